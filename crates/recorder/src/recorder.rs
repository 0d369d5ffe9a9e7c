//! Recording run orchestration
//!
//! ```text
//! Args + config + env ──► ConnectionPlan ──► GatewaySession::connect
//!                                                   │
//!                                          TwsMarketDataClient
//!                                                   │ events
//!   SessionManager.start(each symbol)               ▼
//!   upgrade loop ─────────────────────────► DepthCapture ──► snapshot timer
//!                                                   │
//!                          stop_all ──► write_symbol (per symbol)
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use depthgate_core::{MarketDataEvent, Symbol, SymbolError, Timestamp};
use depthgate_gateway::{
    CommandAutostart, ConfigError, GatewayConfigFile, GatewaySession, PortCandidateResolver,
    RateLimiter, SessionError, TradingMode, Transport, TwsMarketDataClient, TwsTransport,
    load_config_from_str, load_default_config,
};
use depthgate_ports::MarketDataClient;
use depthgate_recording::{
    ActiveSummary, FanoutEventSink, SessionConfig, SessionConfigError, SessionManager,
    SlotManager, StreamMode, TracingEventSink, spawn_upgrade_loop,
};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use crate::args::Args;
use crate::capture::{CaptureSignal, DepthCapture, EventLog};
use crate::output::{OutputError, OutputFiles, SessionStats, write_symbol};

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("No symbols given; pass --symbol")]
    NoSymbols,

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    SessionConfig(#[from] SessionConfigError),

    #[error("Gateway unreachable: {0}")]
    Connection(#[from] SessionError),

    #[error("Connection to the gateway was lost during recording")]
    ConnectionLost,

    #[error("No stream could be started for any of {0:?}")]
    NoStreams(Vec<Symbol>),

    #[error(transparent)]
    Output(#[from] OutputError),
}

impl RecorderError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            RecorderError::Connection(_) | RecorderError::ConnectionLost => 2,
            RecorderError::NoStreams(_) => 3,
            _ => 1,
        }
    }
}

/// Exit status for any error surfaced by [`run`]
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<RecorderError>()
        .map(RecorderError::exit_code)
        .unwrap_or(1)
}

/// Why the recording loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `--duration-mins` elapsed
    Completed,
    /// Ctrl-C
    Interrupted,
    Disconnected,
}

/// Everything one recording run needs besides the gateway connection
#[derive(Debug, Clone)]
pub struct RecordingPlan {
    pub run_id: Uuid,
    pub symbols: Vec<Symbol>,
    pub levels: usize,
    pub interval: Duration,
    pub duration: Option<Duration>,
    pub output: PathBuf,
    pub paper_mode: bool,
    pub gateway_port: u16,
    pub client_id: i32,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reason: StopReason,
    pub streams: ActiveSummary,
    pub files: Vec<OutputFiles>,
}

/// Drives sessions and captures depth for a set of symbols
pub struct Recorder {
    plan: RecordingPlan,
    sessions: Arc<SessionManager>,
    capture: DepthCapture,
    event_log: Arc<EventLog>,
    upgrade_interval: Duration,
    started_at: Timestamp,
}

impl Recorder {
    pub fn new(
        md: Arc<dyn MarketDataClient>,
        plan: RecordingPlan,
        session_config: &SessionConfig,
    ) -> Self {
        let event_log = Arc::new(EventLog::new());
        let sink = Arc::new(
            FanoutEventSink::new()
                .with(Arc::new(TracingEventSink))
                .with(event_log.clone()),
        );
        let slots = Arc::new(SlotManager::with_capacity(
            session_config.max_depth_slots,
            sink.clone(),
        ));
        Recorder {
            capture: DepthCapture::new(&plan.symbols, plan.levels),
            sessions: Arc::new(SessionManager::new(md, slots, sink)),
            event_log,
            upgrade_interval: session_config.upgrade_interval(),
            started_at: Utc::now(),
            plan,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Start a session per symbol. Fails if no symbol got any stream.
    pub async fn start_sessions(&self) -> Result<ActiveSummary, RecorderError> {
        for symbol in &self.plan.symbols {
            let record = self.sessions.start(symbol).await;
            info!(%symbol, mode = record.mode.as_str(), ticks = record.ticks, "Recording session ready");
        }

        let summary = self.sessions.active_summary();
        let any_stream = self
            .sessions
            .list_sessions()
            .iter()
            .any(|r| r.ticks || r.mode == StreamMode::Deep);
        if !any_stream {
            self.sessions.stop_all().await;
            return Err(RecorderError::NoStreams(self.plan.symbols.clone()));
        }
        info!(
            ticks = summary.ticks,
            deep = summary.deep,
            queued = summary.queued,
            "Sessions started"
        );
        Ok(summary)
    }

    /// Consume market data until `shutdown` resolves, the duration elapses or
    /// the connection drops
    pub async fn record<F>(
        &self,
        mut events: broadcast::Receiver<MarketDataEvent>,
        shutdown: F,
    ) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let upgrades = spawn_upgrade_loop(self.sessions.clone(), self.upgrade_interval);

        let mut ticker = tokio::time::interval(self.plan.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let duration = self.plan.duration;
        let deadline = async move {
            match duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        info!(
            symbols = self.plan.symbols.len(),
            interval_ms = self.plan.interval.as_millis() as u64,
            duration_secs = duration.map(|d| d.as_secs()),
            "Recording started"
        );

        let reason = loop {
            tokio::select! {
                _ = &mut shutdown => break StopReason::Interrupted,
                _ = &mut deadline => break StopReason::Completed,
                _ = ticker.tick() => {
                    let deep: Vec<Symbol> = self
                        .sessions
                        .list_sessions()
                        .into_iter()
                        .filter(|r| r.mode == StreamMode::Deep)
                        .map(|r| r.symbol)
                        .collect();
                    self.capture.take_snapshots(&deep);
                }
                recv = events.recv() => match recv {
                    Ok(event) => match self.capture.on_event(&event) {
                        CaptureSignal::Continue => {}
                        CaptureSignal::DepthLost(symbol) => {
                            self.sessions.report_level2_lost(&symbol);
                        }
                        CaptureSignal::Disconnected => break StopReason::Disconnected,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Market data consumer lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break StopReason::Disconnected,
                },
            }
        };

        upgrades.join().await;
        info!(?reason, "Recording stopped");
        reason
    }

    /// Stop every session and write the output files
    pub async fn finish(&self) -> Result<Vec<OutputFiles>, RecorderError> {
        let final_sessions = self.sessions.list_sessions();
        let attempts: Vec<(Symbol, u32)> = self
            .plan
            .symbols
            .iter()
            .map(|s| (s.clone(), self.sessions.slots().attempts(s)))
            .collect();
        self.sessions.stop_all().await;

        let finished_at = Utc::now();
        let mut data = self.capture.drain();
        let mut files = Vec::with_capacity(self.plan.symbols.len());

        for (symbol, deep_attempts) in attempts {
            let capture = data.remove(&symbol).unwrap_or_default();
            let stats = SessionStats {
                run_id: self.plan.run_id,
                symbol: symbol.clone(),
                recording_date: finished_at,
                started_at: self.started_at,
                finished_at,
                levels: self.plan.levels,
                interval_ms: self.plan.interval.as_millis() as u64,
                num_snapshots: capture.snapshots.len(),
                num_messages: capture.messages.len(),
                num_ticks: capture.ticks,
                depth_resets: capture.resets,
                paper_mode: self.plan.paper_mode,
                gateway_port: self.plan.gateway_port,
                client_id: self.plan.client_id,
                final_mode: final_sessions
                    .iter()
                    .find(|r| r.symbol == symbol)
                    .map(|r| r.mode),
                deep_attempts,
                events: self.event_log.for_symbol(&symbol),
            };
            files.push(write_symbol(&self.plan.output, &capture, &stats, finished_at)?);
        }
        Ok(files)
    }
}

/// Gateway config plus the session section of the same document
fn load_configs(path: Option<&Path>) -> Result<(GatewayConfigFile, SessionConfig), RecorderError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(ConfigError::from)?;
            Ok((
                load_config_from_str(&text)?,
                SessionConfig::from_config_str(&text)?,
            ))
        }
        None => Ok((load_default_config()?, SessionConfig::default())),
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// Full recorder run: connect, record, write
pub async fn run(args: Args) -> anyhow::Result<RunSummary> {
    let symbols = args.symbols().map_err(RecorderError::from)?;
    if symbols.is_empty() {
        return Err(RecorderError::NoSymbols.into());
    }

    let (mut config, session_config) = load_configs(args.config.as_deref())?;
    config.apply_process_env().map_err(RecorderError::from)?;
    args.apply_to(&mut config);
    config.validate().map_err(RecorderError::from)?;

    let plan = PortCandidateResolver::new(&config).resolve();
    let transport: Arc<dyn Transport> = Arc::new(TwsTransport::new());
    let mut gateway = GatewaySession::new(transport.clone());
    if let Some(cmd) = &config.connection.autostart_command {
        gateway = gateway.with_autostart(Arc::new(CommandAutostart::new(
            cmd.clone(),
            config.connection.autostart_settle(),
        )));
    }
    let ready = gateway.connect(&plan).await.map_err(RecorderError::from)?;

    let run_id = Uuid::new_v4();
    let recording = RecordingPlan {
        run_id,
        symbols,
        levels: usize::from(args.levels),
        interval: args.interval(),
        duration: args.duration(),
        output: args.output.clone(),
        paper_mode: config.connection.trading_mode == TradingMode::Paper,
        gateway_port: ready.port,
        client_id: ready.client_id,
    };
    info!(%run_id, port = ready.port, client_id = ready.client_id, "Connected, starting recording");

    let md = &config.market_data;
    let limiter = Arc::new(RateLimiter::new(md.requests_per_second, md.request_burst));
    let client = Arc::new(TwsMarketDataClient::from_ready(
        transport.clone(),
        ready,
        limiter,
        md.to_settings(),
    ));
    let events = client.subscribe();
    let recorder = Recorder::new(client.clone(), recording, &session_config);

    let outcome = async {
        let streams = recorder.start_sessions().await?;
        let reason = recorder.record(events, ctrl_c()).await;
        let files = recorder.finish().await?;
        Ok::<_, RecorderError>((reason, streams, files))
    }
    .await;

    client.shutdown().await;
    transport.disconnect().await;

    let (reason, streams, files) = outcome?;
    if reason == StopReason::Disconnected {
        return Err(RecorderError::ConnectionLost.into());
    }
    Ok(RunSummary {
        run_id,
        reason,
        streams,
        files,
    })
}
