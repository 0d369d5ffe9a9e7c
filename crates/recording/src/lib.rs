//! depthgate Recording
//!
//! Session side of the market data pipeline:
//! - [`SlotManager`]: admission control for the gateway's limited deep book streams
//! - [`SessionManager`]: per-symbol tick and deep book orchestration
//! - [`spawn_upgrade_loop`]: periodic promotion of queued symbols
//! - [`DepthBook`] / [`BookRegistry`]: position-indexed books and fixed-width snapshots
//!
//! ## Architecture
//!
//! ```text
//!  SessionManager ──► MarketDataClient (ticks, deep book)
//!        │
//!        ▼
//!   SlotManager ──► EventSink (l2_* events)
//!        ▲
//!        │ every upgrade_interval
//!   upgrade loop
//! ```

pub mod book;
pub mod config;
pub mod events;
pub mod session;
pub mod slots;
pub mod upgrade;

pub use book::{BookLevel, BookRegistry, DepthBook, DepthMessage, DepthSnapshot};
pub use config::{SessionConfig, SessionConfigError};
pub use events::{
    BroadcastEventSink, EventSink, FanoutEventSink, RecordingEvent, TracingEventSink,
};
pub use session::{ActiveSummary, SessionManager, SessionRecord, StreamMode, UpgradeOutcome};
pub use slots::{MAX_L2_SLOTS, SlotManager};
pub use upgrade::{UpgradeLoopHandle, spawn_upgrade_loop};
