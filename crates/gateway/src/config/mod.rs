pub mod loader;
pub mod types;

pub use loader::{
    ConfigError, MAX_WARMUP_RETRIES, load_config, load_config_from_str, load_default_config,
};
pub use types::{
    ConnectionConfig, GatewayConfigFile, HandshakeConfig, MarketDataConfigJson, TradingMode,
};
