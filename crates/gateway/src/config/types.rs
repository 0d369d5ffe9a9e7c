use depthgate_core::TickType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::handshake::HandshakeTimeouts;
use crate::market_data::MarketDataSettings;
use crate::pacing::RetryPolicy;

/// Root configuration for the gateway client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfigFile {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub market_data: MarketDataConfigJson,
}

/// Paper accounts and live accounts listen on different default ports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

/// Where to find the gateway and who to connect as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Explicit port, tried before every default
    #[serde(default)]
    pub port: Option<u16>,
    /// Replaces the built-in default ports when non-empty
    #[serde(default)]
    pub candidate_ports: Vec<u16>,
    /// Port forwarded by a host bridge (e.g. a WSL portproxy), tried last
    #[serde(default = "default_bridge_port")]
    pub bridge_port: Option<u16>,
    #[serde(default = "default_client_id")]
    pub client_id: i32,
    #[serde(default)]
    pub trading_mode: TradingMode,
    /// Shell command that launches the gateway when nothing answers
    #[serde(default)]
    pub autostart_command: Option<String>,
    /// How long to wait after launching before the second sweep
    #[serde(default = "default_autostart_settle")]
    pub autostart_settle_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: default_host(),
            port: None,
            candidate_ports: Vec::new(),
            bridge_port: default_bridge_port(),
            client_id: default_client_id(),
            trading_mode: TradingMode::default(),
            autostart_command: None,
            autostart_settle_ms: default_autostart_settle(),
        }
    }
}

impl ConnectionConfig {
    pub fn autostart_settle(&self) -> Duration {
        Duration::from_millis(self.autostart_settle_ms)
    }
}

/// Handshake timing (JSON representation)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default = "default_socket_open_timeout")]
    pub socket_open_timeout_ms: u64,
    #[serde(default = "default_api_ready_timeout")]
    pub api_ready_timeout_ms: u64,
    /// Extra attempts on the same port with the next client id (0..=2)
    #[serde(default = "default_warmup_retries")]
    pub warmup_retries: u32,
    #[serde(default = "default_warmup_pause")]
    pub warmup_pause_ms: u64,
    #[serde(default = "default_nudge_pause")]
    pub nudge_pause_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            socket_open_timeout_ms: default_socket_open_timeout(),
            api_ready_timeout_ms: default_api_ready_timeout(),
            warmup_retries: default_warmup_retries(),
            warmup_pause_ms: default_warmup_pause(),
            nudge_pause_ms: default_nudge_pause(),
        }
    }
}

impl HandshakeConfig {
    /// Convert to the handshake-layer timeout policy
    pub fn to_timeouts(&self) -> HandshakeTimeouts {
        HandshakeTimeouts {
            socket_open: Duration::from_millis(self.socket_open_timeout_ms),
            api_ready: Duration::from_millis(self.api_ready_timeout_ms),
            warmup_pause: Duration::from_millis(self.warmup_pause_ms),
            nudge_pause: Duration::from_millis(self.nudge_pause_ms),
            warmup_retries: self.warmup_retries,
        }
    }

    /// Derive both waits from one overall connect timeout in seconds.
    ///
    /// 20s gives the stock 15s socket wait and 10s API wait.
    pub fn set_connect_timeout_secs(&mut self, secs: u64) {
        self.socket_open_timeout_ms = secs.clamp(1, 15) * 1000;
        self.api_ready_timeout_ms = secs.saturating_sub(10).max(5) * 1000;
    }
}

/// Market data handling configuration (JSON representation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataConfigJson {
    #[serde(default = "default_depth_rows")]
    pub depth_rows: u32,
    /// Aggregate depth across venues instead of one exchange
    #[serde(default)]
    pub smart_depth: bool,
    #[serde(default = "default_tick_type")]
    pub tick_type: TickType,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_request_burst")]
    pub request_burst: usize,
    /// How long a fresh depth request may still be rejected
    #[serde(default = "default_confirm_window")]
    pub confirm_window_ms: u64,
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,
    #[serde(default = "default_send_backoff")]
    pub send_backoff_ms: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MarketDataConfigJson {
    fn default() -> Self {
        MarketDataConfigJson {
            depth_rows: default_depth_rows(),
            smart_depth: false,
            tick_type: default_tick_type(),
            exchange: default_exchange(),
            currency: default_currency(),
            requests_per_second: default_requests_per_second(),
            request_burst: default_request_burst(),
            confirm_window_ms: default_confirm_window(),
            send_retries: default_send_retries(),
            send_backoff_ms: default_send_backoff(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl MarketDataConfigJson {
    /// Convert to the client-layer settings
    pub fn to_settings(&self) -> MarketDataSettings {
        MarketDataSettings {
            depth_rows: self.depth_rows,
            smart_depth: self.smart_depth,
            tick_type: self.tick_type,
            exchange: self.exchange.clone(),
            currency: self.currency.clone(),
            confirm_window: Duration::from_millis(self.confirm_window_ms),
            send_retry: RetryPolicy::new(
                self.send_retries,
                Duration::from_millis(self.send_backoff_ms),
            ),
            event_buffer: self.event_buffer,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bridge_port() -> Option<u16> {
    Some(4003)
}

fn default_client_id() -> i32 {
    1001
}

fn default_autostart_settle() -> u64 {
    15_000
}

fn default_socket_open_timeout() -> u64 {
    15_000
}

fn default_api_ready_timeout() -> u64 {
    10_000
}

fn default_warmup_retries() -> u32 {
    1
}

fn default_warmup_pause() -> u64 {
    500
}

fn default_nudge_pause() -> u64 {
    50
}

fn default_depth_rows() -> u32 {
    10
}

fn default_tick_type() -> TickType {
    TickType::AllLast
}

fn default_exchange() -> String {
    "SMART".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_requests_per_second() -> f64 {
    2.0
}

fn default_request_burst() -> usize {
    5
}

fn default_confirm_window() -> u64 {
    1_500
}

fn default_send_retries() -> u32 {
    2
}

fn default_send_backoff() -> u64 {
    200
}

fn default_event_buffer() -> usize {
    4096
}
