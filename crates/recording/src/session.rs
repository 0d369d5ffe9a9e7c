//! Per-symbol stream orchestration
//!
//! Every tracked symbol gets a tick-by-tick stream straight away. The deep
//! book stream is gated by the [`SlotManager`]: symbols without a slot are
//! `queued` and picked up by [`SessionManager::upgrade_cycle`] once one frees.
//!
//! ```text
//!   start ──► tick_only ──┬─ slot + subscribe ok ──► deep
//!                         └─ no slot / failure ───► queued
//!   queued ── upgrade_cycle ok ──► deep
//!   deep ──── stream lost ───────► queued
//!   any ───── stop ──────────────► (removed)
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use depthgate_core::{Symbol, Timestamp};
use depthgate_ports::{MarketDataClient, MarketDataError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::{EventSink, RecordingEvent};
use crate::slots::SlotManager;

/// What a tracked symbol is currently streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Ticks only; transient state during `start`
    TickOnly,
    /// Ticks plus deep book
    Deep,
    /// Ticks, waiting for a deep book slot
    Queued,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamMode::TickOnly => "tick_only",
            StreamMode::Deep => "deep",
            StreamMode::Queued => "queued",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub symbol: Symbol,
    pub mode: StreamMode,
    pub started_at: Timestamp,
    pub queued: bool,
    /// Whether the tick stream was accepted
    pub ticks: bool,
    /// Last time the symbol moved to `deep` through an upgrade cycle
    pub upgraded_at: Option<Timestamp>,
}

impl SessionRecord {
    fn new(symbol: Symbol) -> Self {
        SessionRecord {
            symbol,
            mode: StreamMode::TickOnly,
            started_at: Utc::now(),
            queued: false,
            ticks: false,
            upgraded_at: None,
        }
    }

    fn set_mode(&mut self, mode: StreamMode) {
        self.mode = mode;
        self.queued = mode == StreamMode::Queued;
    }
}

/// Counts by stream type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSummary {
    pub ticks: usize,
    pub deep: usize,
    pub queued: usize,
}

/// Result of one upgrade cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// No slot free or nobody waiting
    Idle,
    Upgraded(Symbol),
    Failed {
        symbol: Symbol,
        attempts: u32,
        error: MarketDataError,
    },
}

/// Orchestrates tick and deep book streams for a set of symbols
pub struct SessionManager {
    md: Arc<dyn MarketDataClient>,
    slots: Arc<SlotManager>,
    sink: Arc<dyn EventSink>,
    records: Mutex<HashMap<Symbol, SessionRecord>>,
    /// Symbols handed a slot by a release or failure, in promotion order.
    /// Their deep stream starts on the next upgrade cycle.
    pending: Mutex<VecDeque<Symbol>>,
    /// Serializes upgrade cycles
    cycle: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        md: Arc<dyn MarketDataClient>,
        slots: Arc<SlotManager>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        SessionManager {
            md,
            slots,
            sink,
            records: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn slots(&self) -> &Arc<SlotManager> {
        &self.slots
    }

    fn defer_promotion(&self, promoted: Option<Symbol>) {
        if let Some(symbol) = promoted {
            let mut pending = self.pending.lock();
            if !pending.contains(&symbol) {
                pending.push_back(symbol);
            }
        }
    }

    fn set_mode(&self, symbol: &Symbol, mode: StreamMode) -> bool {
        match self.records.lock().get_mut(symbol) {
            Some(record) => {
                record.set_mode(mode);
                true
            }
            None => false,
        }
    }

    /// Start streaming a symbol. Idempotent: a tracked symbol's record is
    /// returned unchanged.
    pub async fn start(&self, symbol: &Symbol) -> SessionRecord {
        {
            let mut records = self.records.lock();
            if let Some(existing) = records.get(symbol) {
                return existing.clone();
            }
            records.insert(symbol.clone(), SessionRecord::new(symbol.clone()));
        }

        let ticks = match self.md.start_ticks(symbol).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%symbol, error = %e, "Tick stream request failed");
                false
            }
        };
        if let Some(record) = self.records.lock().get_mut(symbol) {
            record.ticks = ticks;
        }

        let mode = if self.slots.try_acquire(symbol) {
            match self.md.start_level2(symbol).await {
                Ok(()) => StreamMode::Deep,
                Err(e) => {
                    warn!(%symbol, error = %e, "Deep book request failed, queueing");
                    self.defer_promotion(self.slots.fail_and_requeue(symbol));
                    StreamMode::Queued
                }
            }
        } else {
            debug!(%symbol, "No deep book slot free, queueing");
            StreamMode::Queued
        };

        let record = {
            let mut records = self.records.lock();
            match records.get_mut(symbol) {
                Some(record) => {
                    record.set_mode(mode);
                    Some(record.clone())
                }
                None => None,
            }
        };

        let Some(record) = record else {
            // Stopped while starting; undo the deep stream it may have won
            if mode == StreamMode::Deep {
                let _ = self.md.stop_level2(symbol).await;
            }
            self.defer_promotion(self.slots.withdraw(symbol));
            let mut orphan = SessionRecord::new(symbol.clone());
            orphan.ticks = ticks;
            return orphan;
        };

        info!(%symbol, mode = mode.as_str(), "Session started");
        self.sink
            .emit(RecordingEvent::session_started(symbol, mode));
        record
    }

    /// Stop all streams for a symbol. No-op if untracked.
    pub async fn stop(&self, symbol: &Symbol) {
        let Some(record) = self.records.lock().remove(symbol) else {
            return;
        };
        self.pending.lock().retain(|s| s != symbol);

        let promoted = if record.mode == StreamMode::Deep {
            if let Err(e) = self.md.stop_level2(symbol).await {
                debug!(%symbol, error = %e, "Deep book cancel failed");
            }
            self.slots.release(symbol)
        } else {
            self.slots.withdraw(symbol)
        };
        self.defer_promotion(promoted);

        if let Err(e) = self.md.stop_ticks(symbol).await {
            debug!(%symbol, error = %e, "Tick cancel failed");
        }

        info!(%symbol, "Session stopped");
        self.sink.emit(RecordingEvent::session_stopped(symbol));
    }

    /// Start the deep stream for the next symbol holding (or newly granted)
    /// a slot. At most one subscribe request per call.
    pub async fn upgrade_cycle(&self) -> UpgradeOutcome {
        let _guard = self.cycle.lock().await;

        loop {
            let next = self.pending.lock().pop_front();
            let Some(symbol) = next.or_else(|| self.slots.promote_next()) else {
                return UpgradeOutcome::Idle;
            };

            let waiting = self
                .records
                .lock()
                .get(&symbol)
                .map(|r| r.mode == StreamMode::Queued)
                .unwrap_or(false);
            if !waiting {
                // Stopped, or already deep; give the slot back only if orphaned
                if !self.records.lock().contains_key(&symbol) {
                    self.defer_promotion(self.slots.withdraw(&symbol));
                }
                continue;
            }

            return match self.md.start_level2(&symbol).await {
                Ok(()) => {
                    let now = Utc::now();
                    let tracked = {
                        let mut records = self.records.lock();
                        match records.get_mut(&symbol) {
                            Some(record) => {
                                record.set_mode(StreamMode::Deep);
                                record.upgraded_at = Some(now);
                                true
                            }
                            None => false,
                        }
                    };
                    if !tracked {
                        let _ = self.md.stop_level2(&symbol).await;
                        self.defer_promotion(self.slots.withdraw(&symbol));
                        continue;
                    }
                    info!(%symbol, "Upgraded to deep book");
                    self.sink.emit(RecordingEvent::session_upgraded(&symbol));
                    UpgradeOutcome::Upgraded(symbol)
                }
                Err(error) => {
                    warn!(%symbol, error = %error, "Deep book upgrade failed, requeueing");
                    self.defer_promotion(self.slots.fail_and_requeue(&symbol));
                    UpgradeOutcome::Failed {
                        attempts: self.slots.attempts(&symbol),
                        symbol,
                        error,
                    }
                }
            };
        }
    }

    /// The gateway dropped an established deep stream: give the slot up and
    /// wait for the next upgrade. Returns false if the symbol was not deep.
    pub fn report_level2_lost(&self, symbol: &Symbol) -> bool {
        let was_deep = self
            .records
            .lock()
            .get(symbol)
            .map(|r| r.mode == StreamMode::Deep)
            .unwrap_or(false);
        if !was_deep {
            return false;
        }
        self.set_mode(symbol, StreamMode::Queued);
        self.defer_promotion(self.slots.fail_and_requeue(symbol));
        warn!(%symbol, "Deep book stream lost, requeued");
        true
    }

    pub fn active_summary(&self) -> ActiveSummary {
        let records = self.records.lock();
        records
            .values()
            .fold(ActiveSummary::default(), |mut acc, r| {
                if r.ticks {
                    acc.ticks += 1;
                }
                match r.mode {
                    StreamMode::Deep => acc.deep += 1,
                    StreamMode::Queued => acc.queued += 1,
                    StreamMode::TickOnly => {}
                }
                acc
            })
    }

    /// Snapshot of all records, sorted by symbol
    pub fn list_sessions(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> = self.records.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        sessions
    }

    pub fn session(&self, symbol: &Symbol) -> Option<SessionRecord> {
        self.records.lock().get(symbol).cloned()
    }

    pub async fn stop_all(&self) {
        let symbols: Vec<Symbol> = self.records.lock().keys().cloned().collect();
        for symbol in symbols {
            self.stop(&symbol).await;
        }
        self.pending.lock().clear();
    }
}
