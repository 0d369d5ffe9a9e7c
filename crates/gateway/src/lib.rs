//! depthgate Gateway
//!
//! Client side of a TWS / IB Gateway connection. Provides:
//! - Connection planning (which host and ports to try, in which order)
//! - A handshake state machine that waits for real API readiness
//! - Request pacing (rate limiter, retry with backoff)
//! - A TCP transport speaking the TWS wire protocol
//! - A [`MarketDataClient`](depthgate_ports::MarketDataClient) for tick and deep book streams
//!
//! ## Architecture
//!
//! ```text
//!  GatewayConfigFile ──► PortCandidateResolver ──► ConnectionPlan
//!                                                      │
//!                                               GatewaySession
//!                                       (sweep, autostart, resweep)
//!                                                      │ per port
//!                                             HandshakeCoordinator
//!                                                      │
//!                                                 ReadySession
//!                                                      │
//!                                           TwsMarketDataClient ◄── RateLimiter
//! ```

pub mod autostart;
pub mod config;
pub mod error;
pub mod handshake;
pub mod market_data;
pub mod pacing;
pub mod plan;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use autostart::{Autostart, CommandAutostart};
pub use config::{ConfigError, GatewayConfigFile, TradingMode, load_config, load_config_from_str, load_default_config};
pub use error::{AutostartError, HandshakeError, SessionError, TransportError};
pub use handshake::{HandshakeCoordinator, HandshakeState, HandshakeTimeouts, ReadySession};
pub use market_data::{MarketDataSettings, TwsMarketDataClient};
pub use pacing::{RateLimiter, RetryPolicy};
pub use plan::{ConnectionPlan, PortCandidateResolver};
pub use session::GatewaySession;
pub use transport::{ApiRequest, Transport, TransportEvent, TwsTransport};
