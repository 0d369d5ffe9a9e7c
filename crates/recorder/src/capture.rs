//! In-memory capture of one recording run
//!
//! Market data events fold into per-symbol books and message logs; the
//! snapshot timer samples every book on its own schedule.

use std::collections::{BTreeMap, HashSet};

use depthgate_core::{MarketDataEvent, StreamKind, Symbol};
use depthgate_recording::{BookRegistry, DepthMessage, DepthSnapshot, EventSink, RecordingEvent};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What the run loop should do after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSignal {
    Continue,
    /// The gateway cancelled this symbol's deep stream
    DepthLost(Symbol),
    /// The connection is gone; nothing more will arrive
    Disconnected,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SymbolCapture {
    pub snapshots: Vec<DepthSnapshot>,
    pub messages: Vec<DepthMessage>,
    pub ticks: u64,
    pub resets: u64,
}

pub struct DepthCapture {
    levels: usize,
    books: BookRegistry,
    symbols: HashSet<Symbol>,
    data: Mutex<BTreeMap<Symbol, SymbolCapture>>,
}

impl DepthCapture {
    pub fn new(symbols: &[Symbol], levels: usize) -> Self {
        let data = symbols
            .iter()
            .map(|s| (s.clone(), SymbolCapture::default()))
            .collect();
        DepthCapture {
            levels,
            books: BookRegistry::new(),
            symbols: symbols.iter().cloned().collect(),
            data: Mutex::new(data),
        }
    }

    pub fn on_event(&self, event: &MarketDataEvent) -> CaptureSignal {
        if let Some(symbol) = event.symbol()
            && !self.symbols.contains(symbol)
        {
            return CaptureSignal::Continue;
        }

        match event {
            MarketDataEvent::Depth {
                symbol,
                received_at,
                update,
            } => {
                self.books.apply_event(event);
                let mut data = self.data.lock();
                let capture = data.entry(symbol.clone()).or_default();
                capture
                    .messages
                    .push(DepthMessage::new(symbol, *received_at, update));
                if capture.messages.len() <= 20 {
                    debug!(
                        %symbol,
                        side = ?update.side,
                        level = update.position,
                        op = ?update.operation,
                        price = %update.price,
                        size = %update.size,
                        "Depth update"
                    );
                }
                CaptureSignal::Continue
            }
            MarketDataEvent::Tick { symbol, .. } => {
                self.data.lock().entry(symbol.clone()).or_default().ticks += 1;
                CaptureSignal::Continue
            }
            MarketDataEvent::DepthReset { symbol } => {
                self.books.apply_event(event);
                self.data.lock().entry(symbol.clone()).or_default().resets += 1;
                info!(%symbol, "Depth book reset by gateway");
                CaptureSignal::Continue
            }
            MarketDataEvent::StreamLost {
                symbol,
                kind,
                code,
                message,
            } => {
                warn!(%symbol, ?kind, code, %message, "Stream lost");
                match kind {
                    StreamKind::Depth => {
                        self.books.apply_event(&MarketDataEvent::DepthReset {
                            symbol: symbol.clone(),
                        });
                        CaptureSignal::DepthLost(symbol.clone())
                    }
                    StreamKind::Ticks => CaptureSignal::Continue,
                }
            }
            MarketDataEvent::Disconnected => {
                self.books.apply_event(event);
                CaptureSignal::Disconnected
            }
        }
    }

    /// Sample the books of `symbols`; books that have never seen a row are skipped
    pub fn take_snapshots<'a>(&self, symbols: impl IntoIterator<Item = &'a Symbol>) -> usize {
        let mut taken = 0;
        let mut data = self.data.lock();
        for symbol in symbols {
            let Some(snapshot) = self.books.snapshot(symbol, self.levels) else {
                continue;
            };
            let capture = data.entry(symbol.clone()).or_default();
            capture.snapshots.push(snapshot);
            taken += 1;
            if capture.snapshots.len() % 100 == 0 {
                info!(%symbol, snapshots = capture.snapshots.len(), "Recording progress");
            }
        }
        taken
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    /// Hand over everything captured so far
    pub fn drain(&self) -> BTreeMap<Symbol, SymbolCapture> {
        std::mem::take(&mut *self.data.lock())
    }
}

/// Keeps every slot and session event for the stats file
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordingEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_symbol(&self, symbol: &Symbol) -> Vec<RecordingEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.symbol() == symbol)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: RecordingEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use depthgate_core::{BookSide, DepthOperation, DepthUpdate, Price, TickByTick};
    use rust_decimal_macros::dec;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn bid(symbol: &Symbol, position: usize, price: Price) -> MarketDataEvent {
        MarketDataEvent::Depth {
            symbol: symbol.clone(),
            received_at: Utc::now(),
            update: DepthUpdate {
                position,
                market_maker: None,
                operation: DepthOperation::Insert,
                side: BookSide::Bid,
                price,
                size: dec!(200),
            },
        }
    }

    #[test]
    fn test_depth_events_build_snapshots() {
        let aapl = sym("AAPL");
        let capture = DepthCapture::new(&[aapl.clone()], 2);
        capture.on_event(&bid(&aapl, 0, dec!(189.25)));
        capture.on_event(&bid(&aapl, 1, dec!(189.24)));

        assert_eq!(capture.take_snapshots([&aapl]), 1);
        let data = capture.drain();
        let aapl_data = &data[&aapl];
        assert_eq!(aapl_data.messages.len(), 2);
        assert_eq!(aapl_data.messages[0].operation, "add");
        assert_eq!(
            aapl_data.snapshots[0].bid_prices,
            vec![dec!(189.25), dec!(189.24)]
        );
        assert_eq!(aapl_data.snapshots[0].ask_prices, vec![dec!(0), dec!(0)]);
    }

    #[test]
    fn test_no_snapshot_before_first_row() {
        let aapl = sym("AAPL");
        let capture = DepthCapture::new(&[aapl.clone()], 5);
        assert_eq!(capture.take_snapshots([&aapl]), 0);
        assert!(capture.drain()[&aapl].snapshots.is_empty());
    }

    #[test]
    fn test_untracked_symbols_ignored() {
        let capture = DepthCapture::new(&[sym("AAPL")], 5);
        assert_eq!(
            capture.on_event(&bid(&sym("MSFT"), 0, dec!(410))),
            CaptureSignal::Continue
        );
        assert!(!capture.drain().contains_key(&sym("MSFT")));
    }

    #[test]
    fn test_signals() {
        let aapl = sym("AAPL");
        let capture = DepthCapture::new(&[aapl.clone()], 5);
        let lost = MarketDataEvent::StreamLost {
            symbol: aapl.clone(),
            kind: StreamKind::Depth,
            code: 322,
            message: "Duplicate ticker id".into(),
        };
        assert_eq!(capture.on_event(&lost), CaptureSignal::DepthLost(aapl.clone()));
        assert_eq!(
            capture.on_event(&MarketDataEvent::Disconnected),
            CaptureSignal::Disconnected
        );

        let tick = MarketDataEvent::Tick {
            symbol: aapl.clone(),
            tick: TickByTick::MidPoint {
                time: Utc::now(),
                mid_point: dec!(189.26),
            },
        };
        capture.on_event(&tick);
        assert_eq!(capture.drain()[&aapl].ticks, 1);
    }

    #[test]
    fn test_event_log_filters_by_symbol() {
        let log = EventLog::new();
        log.emit(RecordingEvent::l2_acquired(&sym("AAPL"), 1));
        log.emit(RecordingEvent::l2_acquired(&sym("MSFT"), 2));
        log.emit(RecordingEvent::session_stopped(&sym("AAPL")));

        assert_eq!(log.len(), 3);
        let names: Vec<&str> = log.for_symbol(&sym("AAPL")).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["l2_acquired", "session_stopped"]);
    }
}
