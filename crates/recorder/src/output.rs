//! Recording output files
//!
//! ```text
//! <output>/<SYMBOL>/<YYYY-MM-DD>_snapshots_<HHMMSS>.jsonl
//! <output>/<SYMBOL>/<YYYY-MM-DD>_messages_<HHMMSS>.jsonl
//! <output>/<SYMBOL>/session_stats_<YYYYMMDD_HHMMSS>.json
//! ```

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use depthgate_core::{Symbol, Timestamp};
use depthgate_recording::{RecordingEvent, StreamMode};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::capture::SymbolCapture;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Per-symbol summary written next to the data files
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub run_id: Uuid,
    pub symbol: Symbol,
    pub recording_date: Timestamp,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub levels: usize,
    pub interval_ms: u64,
    pub num_snapshots: usize,
    pub num_messages: usize,
    pub num_ticks: u64,
    pub depth_resets: u64,
    pub paper_mode: bool,
    pub gateway_port: u16,
    pub client_id: i32,
    /// Mode when the recording ended
    pub final_mode: Option<StreamMode>,
    /// Failed deep book attempts still outstanding at the end
    pub deep_attempts: u32,
    pub events: Vec<RecordingEvent>,
}

/// Files produced for one symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub snapshots: Option<PathBuf>,
    pub messages: Option<PathBuf>,
    pub stats: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> OutputError {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One JSON document per line
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<(), OutputError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)
            .map_err(io::Error::from)
            .map_err(io_err(path))?;
        writer.write_all(b"\n").map_err(io_err(path))?;
    }
    writer.flush().map_err(io_err(path))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), OutputError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(io::Error::from)
        .map_err(io_err(path))?;
    writer.flush().map_err(io_err(path))
}

/// Write one symbol's capture. Empty snapshot or message logs are skipped;
/// the stats file is always written.
pub fn write_symbol(
    output_dir: &Path,
    capture: &SymbolCapture,
    stats: &SessionStats,
    at: Timestamp,
) -> Result<OutputFiles, OutputError> {
    let dir = output_dir.join(stats.symbol.as_str());
    fs::create_dir_all(&dir).map_err(io_err(&dir))?;

    let date = at.format("%Y-%m-%d");
    let time = at.format("%H%M%S");

    let snapshots = if capture.snapshots.is_empty() {
        warn!(symbol = %stats.symbol, "No snapshots to save");
        None
    } else {
        let path = dir.join(format!("{date}_snapshots_{time}.jsonl"));
        write_jsonl(&path, &capture.snapshots)?;
        info!(symbol = %stats.symbol, count = capture.snapshots.len(), path = %path.display(), "Saved snapshots");
        Some(path)
    };

    let messages = if capture.messages.is_empty() {
        None
    } else {
        let path = dir.join(format!("{date}_messages_{time}.jsonl"));
        write_jsonl(&path, &capture.messages)?;
        info!(symbol = %stats.symbol, count = capture.messages.len(), path = %path.display(), "Saved messages");
        Some(path)
    };

    let stats_path = dir.join(format!("session_stats_{}.json", at.format("%Y%m%d_%H%M%S")));
    write_json_pretty(&stats_path, stats)?;
    info!(symbol = %stats.symbol, path = %stats_path.display(), "Saved session statistics");

    Ok(OutputFiles {
        snapshots,
        messages,
        stats: stats_path,
    })
}
