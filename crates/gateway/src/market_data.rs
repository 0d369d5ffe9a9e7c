//! Market data client over a connected transport
//!
//! ```text
//!  start_level2(sym) ──► rate limiter ──► send REQ_MKT_DEPTH ──► wait confirm window
//!                                                                  │ error for req_id → Err(Rejected)
//!                                                                  │ first depth row  → Ok
//!                                                                  │ silence          → Ok
//!
//!  transport events ──► dispatcher task ──► broadcast<MarketDataEvent>
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use depthgate_core::{Contract, MarketDataEvent, StreamKind, Symbol, TickType};
use depthgate_ports::{MarketDataClient, MarketDataError, MarketDataResult};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::handshake::ReadySession;
use crate::pacing::{RateLimiter, RetryPolicy};
use crate::transport::{ApiRequest, Transport, TransportEvent, codes};

/// Client-layer market data settings
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataSettings {
    pub depth_rows: u32,
    pub smart_depth: bool,
    pub tick_type: TickType,
    pub exchange: String,
    pub currency: String,
    /// A depth request not rejected within this window holds its slot
    pub confirm_window: Duration,
    pub send_retry: RetryPolicy,
    pub event_buffer: usize,
}

impl Default for MarketDataSettings {
    fn default() -> Self {
        MarketDataSettings {
            depth_rows: 10,
            smart_depth: false,
            tick_type: TickType::AllLast,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            confirm_window: Duration::from_millis(1500),
            send_retry: RetryPolicy::new(2, Duration::from_millis(200)),
            event_buffer: 4096,
        }
    }
}

#[derive(Debug, Clone)]
struct StreamEntry {
    symbol: Symbol,
    kind: StreamKind,
}

type Confirmation = oneshot::Sender<MarketDataResult<()>>;

struct Inner {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    settings: MarketDataSettings,
    next_req_id: AtomicI64,
    connected: AtomicBool,
    /// req_id → stream
    streams: DashMap<i64, StreamEntry>,
    /// (symbol, kind) → req_id
    by_symbol: DashMap<(Symbol, StreamKind), i64>,
    /// Depth requests still inside their confirm window
    pending: DashMap<i64, Confirmation>,
    events: broadcast::Sender<MarketDataEvent>,
}

/// [`MarketDataClient`] backed by a TWS connection
pub struct TwsMarketDataClient {
    inner: Arc<Inner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TwsMarketDataClient {
    /// Take over the events of `transport`'s current connection
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        limiter: Arc<RateLimiter>,
        settings: MarketDataSettings,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(settings.event_buffer.max(1));
        let inner = Arc::new(Inner {
            transport,
            limiter,
            settings,
            next_req_id: AtomicI64::new(1),
            connected: AtomicBool::new(true),
            streams: DashMap::new(),
            by_symbol: DashMap::new(),
            pending: DashMap::new(),
            events: events_tx,
        });
        let dispatcher = tokio::spawn(dispatch(inner.clone(), events));
        TwsMarketDataClient {
            inner,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn from_ready(
        transport: Arc<dyn Transport>,
        ready: ReadySession,
        limiter: Arc<RateLimiter>,
        settings: MarketDataSettings,
    ) -> Self {
        Self::new(transport, ready.events, limiter, settings)
    }

    /// Subscribe to depth, tick and stream lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<MarketDataEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Streams currently registered, sorted
    pub fn active_streams(&self) -> Vec<(Symbol, StreamKind)> {
        let mut streams: Vec<_> = self.inner.by_symbol.iter().map(|e| e.key().clone()).collect();
        streams.sort_by(|a, b| a.0.cmp(&b.0).then((a.1 as u8).cmp(&(b.1 as u8))));
        streams
    }

    /// Cancel every stream and stop dispatching
    pub async fn shutdown(&self) {
        let streams = self.active_streams();
        for (symbol, kind) in streams {
            if let Err(e) = self.stop_stream(&symbol, kind).await {
                debug!(%symbol, ?kind, error = %e, "Cancel during shutdown failed");
            }
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        self.inner.connected.store(false, Ordering::Release);
    }

    fn contract_for(&self, symbol: &Symbol) -> Contract {
        let s = &self.inner.settings;
        Contract::stock_on(symbol.clone(), s.exchange.clone(), s.currency.clone())
    }

    async fn start_stream(&self, symbol: &Symbol, kind: StreamKind) -> MarketDataResult<()> {
        let inner = &self.inner;
        if !self.is_connected() {
            return Err(MarketDataError::NotConnected);
        }
        if inner.by_symbol.contains_key(&(symbol.clone(), kind)) {
            return Ok(());
        }

        let req_id = inner.next_req_id.fetch_add(1, Ordering::SeqCst);
        let request = match kind {
            StreamKind::Depth => ApiRequest::RequestMarketDepth {
                req_id,
                contract: self.contract_for(symbol),
                num_rows: inner.settings.depth_rows,
                smart_depth: inner.settings.smart_depth,
            },
            StreamKind::Ticks => ApiRequest::RequestTickByTick {
                req_id,
                contract: self.contract_for(symbol),
                tick_type: inner.settings.tick_type,
                number_of_ticks: 0,
                ignore_size: false,
            },
        };

        // Register before sending so an immediate rejection finds the request
        let confirmation = match kind {
            StreamKind::Depth => {
                let (tx, rx) = oneshot::channel();
                inner.pending.insert(req_id, tx);
                Some(rx)
            }
            StreamKind::Ticks => None,
        };
        inner.streams.insert(
            req_id,
            StreamEntry {
                symbol: symbol.clone(),
                kind,
            },
        );
        inner.by_symbol.insert((symbol.clone(), kind), req_id);

        let _permit = inner.limiter.acquire().await;
        let sent = inner
            .settings
            .send_retry
            .run(
                || inner.transport.send(request.clone()),
                TransportError::is_transient,
            )
            .await;
        if let Err(e) = sent {
            inner.forget(req_id);
            return Err(match e {
                TransportError::NotConnected | TransportError::ChannelClosed => {
                    MarketDataError::NotConnected
                }
                other => MarketDataError::Transport(other.to_string()),
            });
        }
        debug!(%symbol, ?kind, req_id, "Stream requested");

        let Some(rx) = confirmation else {
            return Ok(());
        };
        match tokio::time::timeout(inner.settings.confirm_window, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped: the dispatcher stopped with the connection
            Ok(Err(_)) => {
                inner.forget(req_id);
                Err(MarketDataError::NotConnected)
            }
            Err(_) => {
                inner.pending.remove(&req_id);
                trace!(%symbol, req_id, "No rejection within confirm window");
                Ok(())
            }
        }
    }

    async fn stop_stream(&self, symbol: &Symbol, kind: StreamKind) -> MarketDataResult<()> {
        let inner = &self.inner;
        let Some((_, req_id)) = inner.by_symbol.remove(&(symbol.clone(), kind)) else {
            return Ok(());
        };
        inner.streams.remove(&req_id);
        inner.pending.remove(&req_id);

        let request = match kind {
            StreamKind::Depth => ApiRequest::CancelMarketDepth {
                req_id,
                smart_depth: inner.settings.smart_depth,
            },
            StreamKind::Ticks => ApiRequest::CancelTickByTick { req_id },
        };
        inner
            .transport
            .send(request)
            .await
            .map_err(|e| MarketDataError::Transport(e.to_string()))?;
        debug!(%symbol, ?kind, req_id, "Stream cancelled");
        Ok(())
    }
}

impl Drop for TwsMarketDataClient {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl MarketDataClient for TwsMarketDataClient {
    async fn start_ticks(&self, symbol: &Symbol) -> MarketDataResult<()> {
        self.start_stream(symbol, StreamKind::Ticks).await
    }

    async fn stop_ticks(&self, symbol: &Symbol) -> MarketDataResult<()> {
        self.stop_stream(symbol, StreamKind::Ticks).await
    }

    async fn start_level2(&self, symbol: &Symbol) -> MarketDataResult<()> {
        self.start_stream(symbol, StreamKind::Depth).await
    }

    async fn stop_level2(&self, symbol: &Symbol) -> MarketDataResult<()> {
        self.stop_stream(symbol, StreamKind::Depth).await
    }
}

impl Inner {
    fn forget(&self, req_id: i64) -> Option<StreamEntry> {
        self.pending.remove(&req_id);
        let (_, entry) = self.streams.remove(&req_id)?;
        self.by_symbol
            .remove_if(&(entry.symbol.clone(), entry.kind), |_, id| *id == req_id);
        Some(entry)
    }

    fn publish(&self, event: MarketDataEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::MarketDepth { req_id, update } => {
                let Some(symbol) = self.streams.get(&req_id).map(|e| e.symbol.clone()) else {
                    trace!(req_id, "Depth row for unknown request");
                    return;
                };
                if let Some((_, confirm)) = self.pending.remove(&req_id) {
                    let _ = confirm.send(Ok(()));
                }
                self.publish(MarketDataEvent::Depth {
                    symbol,
                    received_at: Utc::now(),
                    update,
                });
            }
            TransportEvent::TickByTick { req_id, tick } => {
                if let Some(symbol) = self.streams.get(&req_id).map(|e| e.symbol.clone()) {
                    self.publish(MarketDataEvent::Tick { symbol, tick });
                }
            }
            TransportEvent::Error {
                req_id,
                code,
                message,
            } => self.handle_error(req_id, code, message),
            TransportEvent::Disconnected { .. } => {}
            other => trace!(?other, "Ignoring event"),
        }
    }

    fn handle_error(&self, req_id: i64, code: i32, message: String) {
        if codes::is_informational(code) {
            debug!(code, %message, "Gateway notice");
            return;
        }
        if req_id < 0 || !self.streams.contains_key(&req_id) {
            if code == codes::CONNECTIVITY_LOST {
                warn!(code, %message, "Gateway lost connectivity");
            } else {
                info!(req_id, code, %message, "Gateway message");
            }
            return;
        }
        if code == codes::DEPTH_RESET {
            if let Some(symbol) = self.streams.get(&req_id).map(|e| e.symbol.clone()) {
                info!(%symbol, "Depth book reset by gateway");
                self.publish(MarketDataEvent::DepthReset { symbol });
            }
            return;
        }

        if let Some((_, confirm)) = self.pending.remove(&req_id) {
            self.forget(req_id);
            warn!(req_id, code, %message, "Depth request rejected");
            let _ = confirm.send(Err(MarketDataError::Rejected { code, message }));
            return;
        }
        if let Some(entry) = self.forget(req_id) {
            warn!(symbol = %entry.symbol, kind = ?entry.kind, code, %message, "Stream lost");
            self.publish(MarketDataEvent::StreamLost {
                symbol: entry.symbol,
                kind: entry.kind,
                code,
                message,
            });
        }
    }

    fn on_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        let pending: Vec<i64> = self.pending.iter().map(|e| *e.key()).collect();
        for req_id in pending {
            if let Some((_, confirm)) = self.pending.remove(&req_id) {
                let _ = confirm.send(Err(MarketDataError::NotConnected));
            }
        }
        self.streams.clear();
        self.by_symbol.clear();
        self.publish(MarketDataEvent::Disconnected);
    }
}

async fn dispatch(inner: Arc<Inner>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        if let TransportEvent::Disconnected { reason } = &event {
            warn!(%reason, "Gateway connection lost");
            break;
        }
        inner.handle(event);
    }
    inner.on_disconnect();
}
