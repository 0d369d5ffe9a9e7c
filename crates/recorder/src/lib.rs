//! depthgate Recorder
//!
//! Records deep order book snapshots and raw depth messages for a set of
//! symbols through a TWS / IB Gateway connection.

pub mod args;
pub mod capture;
pub mod output;
pub mod recorder;

pub use args::{Args, describe};
pub use capture::{CaptureSignal, DepthCapture, EventLog, SymbolCapture};
pub use output::{OutputError, OutputFiles, SessionStats, write_symbol};
pub use recorder::{
    Recorder, RecorderError, RecordingPlan, RunSummary, StopReason, exit_code, run,
};
