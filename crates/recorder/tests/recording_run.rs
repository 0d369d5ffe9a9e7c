//! Recorder against a scripted market data client: sessions, snapshot
//! timer, stream loss and the files written at the end

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use depthgate_core::{
    BookSide, DepthOperation, DepthUpdate, MarketDataEvent, Price, StreamKind, Symbol,
};
use depthgate_ports::{MarketDataClient, MarketDataError, MarketDataResult};
use depthgate_recorder::{Recorder, RecorderError, RecordingPlan, StopReason};
use depthgate_recording::{SessionConfig, StreamMode};
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use uuid::Uuid;

struct ScriptedClient {
    reject_all: bool,
    no_depth: HashSet<Symbol>,
}

impl ScriptedClient {
    fn reject(&self, symbol: &Symbol, depth: bool) -> MarketDataResult<()> {
        if self.reject_all || (depth && self.no_depth.contains(symbol)) {
            return Err(MarketDataError::Rejected {
                code: 354,
                message: "Requested market data is not subscribed".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataClient for ScriptedClient {
    async fn start_ticks(&self, symbol: &Symbol) -> MarketDataResult<()> {
        self.reject(symbol, false)
    }

    async fn stop_ticks(&self, _: &Symbol) -> MarketDataResult<()> {
        Ok(())
    }

    async fn start_level2(&self, symbol: &Symbol) -> MarketDataResult<()> {
        self.reject(symbol, true)
    }

    async fn stop_level2(&self, _: &Symbol) -> MarketDataResult<()> {
        Ok(())
    }
}

fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

fn plan(symbols: &[&str], output: PathBuf) -> RecordingPlan {
    RecordingPlan {
        run_id: Uuid::new_v4(),
        symbols: symbols.iter().map(|s| sym(s)).collect(),
        levels: 3,
        interval: Duration::from_millis(100),
        duration: Some(Duration::from_secs(1)),
        output,
        paper_mode: true,
        gateway_port: 4002,
        client_id: 1001,
    }
}

fn depth(symbol: &Symbol, position: usize, side: BookSide, price: Price) -> MarketDataEvent {
    MarketDataEvent::Depth {
        symbol: symbol.clone(),
        received_at: Utc::now(),
        update: DepthUpdate {
            position,
            market_maker: None,
            operation: DepthOperation::Insert,
            side,
            price,
            size: dec!(100),
        },
    }
}

fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_records_snapshots_and_writes_files() {
    let out = tempfile::tempdir().unwrap();
    let client = Arc::new(ScriptedClient {
        reject_all: false,
        no_depth: HashSet::new(),
    });
    let recorder = Recorder::new(
        client,
        plan(&["AAPL"], out.path().to_path_buf()),
        &SessionConfig::default(),
    );
    let streams = recorder.start_sessions().await.unwrap();
    assert_eq!(streams.deep, 1);

    let (tx, rx) = broadcast::channel(64);
    let aapl = sym("AAPL");
    let feed = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(depth(&aapl, 0, BookSide::Bid, dec!(189.25))).unwrap();
        tx.send(depth(&aapl, 0, BookSide::Ask, dec!(189.27))).unwrap();
        tx.send(depth(&aapl, 1, BookSide::Ask, dec!(189.28))).unwrap();
        // Keep the channel open past the end of the recording
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(tx);
    });

    let reason = recorder.record(rx, std::future::pending()).await;
    assert_eq!(reason, StopReason::Completed);

    let files = recorder.finish().await.unwrap();
    feed.abort();
    assert_eq!(files.len(), 1);
    let written = &files[0];

    let snapshots = std::fs::read_to_string(written.snapshots.as_ref().unwrap()).unwrap();
    let lines: Vec<serde_json::Value> = snapshots
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    // Ticks at 100..=1000ms see the book populated at 50ms
    assert!(lines.len() >= 9, "only {} snapshots", lines.len());
    let last = lines.last().unwrap();
    assert_eq!(last["bid_prices"].as_array().unwrap().len(), 3);
    assert_eq!(last["ask_prices"][1], "189.28");
    assert_eq!(last["ask_prices"][2], "0");

    let messages = std::fs::read_to_string(written.messages.as_ref().unwrap()).unwrap();
    assert_eq!(messages.lines().count(), 3);
    assert!(messages.lines().all(|l| l.contains("\"operation\":\"add\"")));

    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&written.stats).unwrap()).unwrap();
    assert_eq!(stats["symbol"], "AAPL");
    assert_eq!(stats["levels"], 3);
    assert_eq!(stats["num_messages"], 3);
    assert_eq!(stats["final_mode"], "deep");
    assert_eq!(stats["gateway_port"], 4002);
    assert_eq!(stats["events"][0]["event"], "l2_acquired");

    let names = files_in(&out.path().join("AAPL"));
    assert_eq!(names.len(), 3);
    assert!(names.iter().any(|n| n.contains("_snapshots_") && n.ends_with(".jsonl")));
    assert!(names.iter().any(|n| n.contains("_messages_") && n.ends_with(".jsonl")));
    assert!(names.iter().any(|n| n.starts_with("session_stats_") && n.ends_with(".json")));

    // Sessions are torn down
    assert!(recorder.sessions().list_sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_depth_loss_requeues_and_disconnect_stops() {
    let out = tempfile::tempdir().unwrap();
    let client = Arc::new(ScriptedClient {
        reject_all: false,
        no_depth: HashSet::new(),
    });
    let mut recording = plan(&["MSFT"], out.path().to_path_buf());
    recording.duration = None;
    let config = SessionConfig {
        // Keep the loop from re-upgrading before the assertions
        upgrade_interval_ms: 60_000,
        ..SessionConfig::default()
    };
    let recorder = Recorder::new(client, recording, &config);
    recorder.start_sessions().await.unwrap();

    let (tx, rx) = broadcast::channel(64);
    let msft = sym("MSFT");
    let sessions = recorder.sessions().clone();
    let feed = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(MarketDataEvent::StreamLost {
            symbol: msft.clone(),
            kind: StreamKind::Depth,
            code: 317,
            message: "Market depth data has been RESET".into(),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mode = sessions.session(&msft).unwrap().mode;
        tx.send(MarketDataEvent::Disconnected).unwrap();
        mode
    });

    let reason = recorder.record(rx, std::future::pending()).await;
    assert_eq!(reason, StopReason::Disconnected);
    assert_eq!(feed.await.unwrap(), StreamMode::Queued);

    let files = recorder.finish().await.unwrap();
    assert!(files[0].snapshots.is_none());
    assert!(files[0].messages.is_none());
    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files[0].stats).unwrap()).unwrap();
    let events: Vec<&str> = stats["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap())
        .collect();
    assert!(events.contains(&"l2_subscribe_failed"));
}

#[tokio::test]
async fn test_no_streams_is_reported() {
    let out = tempfile::tempdir().unwrap();
    let client = Arc::new(ScriptedClient {
        reject_all: true,
        no_depth: HashSet::new(),
    });
    let recorder = Recorder::new(
        client,
        plan(&["AAPL", "MSFT"], out.path().to_path_buf()),
        &SessionConfig::default(),
    );

    let err = recorder.start_sessions().await.unwrap_err();
    assert!(matches!(err, RecorderError::NoStreams(ref s) if s.len() == 2));
    assert_eq!(err.exit_code(), 3);
    assert!(recorder.sessions().list_sessions().is_empty());
}

#[tokio::test]
async fn test_ticks_only_symbol_still_counts_as_streaming() {
    let out = tempfile::tempdir().unwrap();
    let client = Arc::new(ScriptedClient {
        reject_all: false,
        no_depth: [sym("AAPL")].into_iter().collect(),
    });
    let recorder = Recorder::new(
        client,
        plan(&["AAPL"], out.path().to_path_buf()),
        &SessionConfig::default(),
    );
    let summary = recorder.start_sessions().await.unwrap();
    assert_eq!(summary.ticks, 1);
    assert_eq!(summary.deep, 0);
    assert_eq!(summary.queued, 1);
}
