use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use depthgate_core::{Symbol, SymbolError};
use depthgate_gateway::{GatewayConfigFile, TradingMode};
use serde_json::json;

/// CLI arguments for depthgate-recorder.
#[derive(Parser, Debug, Clone)]
#[command(name = "depthgate-recorder")]
#[command(about = "Record deep order book snapshots from TWS / IB Gateway")]
#[command(version)]
pub struct Args {
    /// Symbols to record (repeat the flag or comma separate, e.g. "AAPL,MSFT")
    #[arg(short, long = "symbol", value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Book levels per side in each snapshot
    #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
    pub levels: u16,

    /// Snapshot interval in milliseconds
    #[arg(short, long = "interval-ms", default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,

    /// Output directory; one subdirectory per symbol
    #[arg(short, long, default_value = "./data/level2")]
    pub output: PathBuf,

    /// Stop after this many minutes (default: until Ctrl-C)
    #[arg(short, long = "duration-mins")]
    pub duration_mins: Option<u64>,

    /// Gateway host (overrides config and IB_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Gateway port, tried before the defaults (overrides config and IB_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// API client id (overrides config and IB_CLIENT_ID)
    #[arg(long)]
    pub client_id: Option<i32>,

    /// Use the paper trading ports
    #[arg(long, overrides_with = "live")]
    pub paper: bool,

    /// Use the live trading ports
    #[arg(long, overrides_with = "paper")]
    pub live: bool,

    /// Gateway config file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Shell command that launches the gateway if nothing answers
    #[arg(long)]
    pub autostart_cmd: Option<String>,

    /// Print a JSON description of this tool and exit
    #[arg(long)]
    pub describe: bool,
}

impl Args {
    /// Parsed, deduplicated symbols in the order given
    pub fn symbols(&self) -> Result<Vec<Symbol>, SymbolError> {
        let mut out: Vec<Symbol> = Vec::new();
        for raw in self.symbols.iter().filter(|s| !s.trim().is_empty()) {
            let symbol = Symbol::new(raw)?;
            if !out.contains(&symbol) {
                out.push(symbol);
            }
        }
        Ok(out)
    }

    pub fn trading_mode(&self) -> Option<TradingMode> {
        match (self.paper, self.live) {
            (_, true) => Some(TradingMode::Live),
            (true, false) => Some(TradingMode::Paper),
            (false, false) => None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_mins
            .map(|m| Duration::from_secs(m.saturating_mul(60)))
    }

    /// Command line wins over file and environment
    pub fn apply_to(&self, config: &mut GatewayConfigFile) {
        let conn = &mut config.connection;
        if let Some(host) = &self.host {
            conn.host = host.clone();
        }
        if let Some(port) = self.port {
            conn.port = Some(port);
        }
        if let Some(client_id) = self.client_id {
            conn.client_id = client_id;
        }
        if let Some(mode) = self.trading_mode() {
            conn.trading_mode = mode;
        }
        if let Some(cmd) = &self.autostart_cmd {
            conn.autostart_command = Some(cmd.clone());
        }
    }
}

/// Machine-readable tool description printed by `--describe`
pub fn describe() -> serde_json::Value {
    json!({
        "name": "depthgate-recorder",
        "description": "Record deep order book snapshots and raw depth messages from TWS / IB Gateway",
        "inputs": [
            "--symbol", "--levels", "--interval-ms", "--output", "--duration-mins",
            "--host", "--port", "--client-id", "--paper/--live", "--config", "--autostart-cmd"
        ],
        "outputs": [
            "<output>/<SYMBOL>/<date>_snapshots_<time>.jsonl",
            "<output>/<SYMBOL>/<date>_messages_<time>.jsonl",
            "<output>/<SYMBOL>/session_stats_<stamp>.json"
        ],
        "environment": ["IB_HOST", "IB_PORT", "IB_CLIENT_ID", "IB_CONNECT_TIMEOUT", "IB_GATEWAY_START_CMD", "RUST_LOG"],
        "exit_codes": { "0": "completed", "1": "error", "2": "gateway unreachable", "3": "no stream obtained" }
    })
}
