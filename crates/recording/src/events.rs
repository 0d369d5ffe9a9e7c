//! Slot and session lifecycle events
//!
//! Producers never block on delivery: sinks are synchronous and must not
//! fail the operation that emitted the event.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use depthgate_core::{Symbol, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::session::StreamMode;

/// Lifecycle event emitted by the slot manager and the session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecordingEvent {
    L2Acquired {
        symbol: Symbol,
        active: usize,
        timestamp: Timestamp,
    },
    L2Released {
        symbol: Symbol,
        active: usize,
        timestamp: Timestamp,
    },
    L2Promoted {
        symbol: Symbol,
        active: usize,
        timestamp: Timestamp,
    },
    L2SubscribeFailed {
        symbol: Symbol,
        attempts: u32,
        active: usize,
        timestamp: Timestamp,
    },
    SessionStarted {
        symbol: Symbol,
        mode: StreamMode,
        timestamp: Timestamp,
    },
    SessionStopped {
        symbol: Symbol,
        timestamp: Timestamp,
    },
    SessionUpgraded {
        symbol: Symbol,
        timestamp: Timestamp,
    },
}

impl RecordingEvent {
    pub fn l2_acquired(symbol: &Symbol, active: usize) -> Self {
        RecordingEvent::L2Acquired {
            symbol: symbol.clone(),
            active,
            timestamp: Utc::now(),
        }
    }

    pub fn l2_released(symbol: &Symbol, active: usize) -> Self {
        RecordingEvent::L2Released {
            symbol: symbol.clone(),
            active,
            timestamp: Utc::now(),
        }
    }

    pub fn l2_promoted(symbol: &Symbol, active: usize) -> Self {
        RecordingEvent::L2Promoted {
            symbol: symbol.clone(),
            active,
            timestamp: Utc::now(),
        }
    }

    pub fn l2_subscribe_failed(symbol: &Symbol, attempts: u32, active: usize) -> Self {
        RecordingEvent::L2SubscribeFailed {
            symbol: symbol.clone(),
            attempts,
            active,
            timestamp: Utc::now(),
        }
    }

    pub fn session_started(symbol: &Symbol, mode: StreamMode) -> Self {
        RecordingEvent::SessionStarted {
            symbol: symbol.clone(),
            mode,
            timestamp: Utc::now(),
        }
    }

    pub fn session_stopped(symbol: &Symbol) -> Self {
        RecordingEvent::SessionStopped {
            symbol: symbol.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn session_upgraded(symbol: &Symbol) -> Self {
        RecordingEvent::SessionUpgraded {
            symbol: symbol.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Wire name, e.g. `l2_subscribe_failed`
    pub fn name(&self) -> &'static str {
        match self {
            RecordingEvent::L2Acquired { .. } => "l2_acquired",
            RecordingEvent::L2Released { .. } => "l2_released",
            RecordingEvent::L2Promoted { .. } => "l2_promoted",
            RecordingEvent::L2SubscribeFailed { .. } => "l2_subscribe_failed",
            RecordingEvent::SessionStarted { .. } => "session_started",
            RecordingEvent::SessionStopped { .. } => "session_stopped",
            RecordingEvent::SessionUpgraded { .. } => "session_upgraded",
        }
    }

    pub fn symbol(&self) -> &Symbol {
        match self {
            RecordingEvent::L2Acquired { symbol, .. }
            | RecordingEvent::L2Released { symbol, .. }
            | RecordingEvent::L2Promoted { symbol, .. }
            | RecordingEvent::L2SubscribeFailed { symbol, .. }
            | RecordingEvent::SessionStarted { symbol, .. }
            | RecordingEvent::SessionStopped { symbol, .. }
            | RecordingEvent::SessionUpgraded { symbol, .. } => symbol,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            RecordingEvent::L2Acquired { timestamp, .. }
            | RecordingEvent::L2Released { timestamp, .. }
            | RecordingEvent::L2Promoted { timestamp, .. }
            | RecordingEvent::L2SubscribeFailed { timestamp, .. }
            | RecordingEvent::SessionStarted { timestamp, .. }
            | RecordingEvent::SessionStopped { timestamp, .. }
            | RecordingEvent::SessionUpgraded { timestamp, .. } => *timestamp,
        }
    }
}

/// Flat `key=value` rendering for log lines
impl fmt::Display for RecordingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event={} symbol={}", self.name(), self.symbol())?;
        match self {
            RecordingEvent::L2Acquired { active, .. }
            | RecordingEvent::L2Released { active, .. }
            | RecordingEvent::L2Promoted { active, .. } => write!(f, " active={active}")?,
            RecordingEvent::L2SubscribeFailed {
                attempts, active, ..
            } => write!(f, " attempts={attempts} active={active}")?,
            RecordingEvent::SessionStarted { mode, .. } => write!(f, " mode={}", mode.as_str())?,
            RecordingEvent::SessionStopped { .. } | RecordingEvent::SessionUpgraded { .. } => {}
        }
        write!(f, " ts={}", self.timestamp().to_rfc3339())
    }
}

/// Synchronous, non-blocking event consumer
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RecordingEvent);
}

/// Logs every event as one `key=value` line on the `depthgate::events` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: RecordingEvent) {
        info!(target: "depthgate::events", "{event}");
    }
}

/// Fans events out to broadcast subscribers; lagging or absent subscribers
/// never hold up the producer
pub struct BroadcastEventSink {
    tx: broadcast::Sender<RecordingEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        BroadcastEventSink { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: RecordingEvent) {
        let _ = self.tx.send(event);
    }
}

/// Delivers each event to several sinks in order
#[derive(Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: RecordingEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aapl() -> Symbol {
        Symbol::new("AAPL").unwrap()
    }

    #[test]
    fn test_event_names_match_serde_tags() {
        let events = [
            RecordingEvent::l2_acquired(&aapl(), 1),
            RecordingEvent::l2_subscribe_failed(&aapl(), 2, 4),
            RecordingEvent::session_started(&aapl(), StreamMode::Queued),
            RecordingEvent::session_upgraded(&aapl()),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
            assert_eq!(json["symbol"], "AAPL");
        }
    }

    #[test]
    fn test_key_value_rendering() {
        let line = RecordingEvent::l2_subscribe_failed(&aapl(), 3, 5).to_string();
        assert!(line.starts_with("event=l2_subscribe_failed symbol=AAPL attempts=3 active=5 ts="));

        let line = RecordingEvent::session_started(&aapl(), StreamMode::Deep).to_string();
        assert!(line.contains("mode=deep"));
    }

    #[test]
    fn test_broadcast_without_subscribers_does_not_fail() {
        let sink = BroadcastEventSink::new(4);
        sink.emit(RecordingEvent::session_stopped(&aapl()));

        let mut rx = sink.subscribe();
        sink.emit(RecordingEvent::session_stopped(&aapl()));
        assert_eq!(rx.try_recv().unwrap().name(), "session_stopped");
    }

    #[test]
    fn test_fanout_delivers_to_all() {
        let a = Arc::new(BroadcastEventSink::new(4));
        let b = Arc::new(BroadcastEventSink::new(4));
        let (mut ra, mut rb) = (a.subscribe(), b.subscribe());
        let fanout = FanoutEventSink::new()
            .with(a.clone())
            .with(Arc::new(TracingEventSink))
            .with(b.clone());

        fanout.emit(RecordingEvent::l2_promoted(&aapl(), 5));
        assert_eq!(ra.try_recv().unwrap().name(), "l2_promoted");
        assert_eq!(rb.try_recv().unwrap().name(), "l2_promoted");
    }
}
