//! depthgate Ports
//!
//! Port definitions (traits) for depthgate.
//! These define the boundaries between session logic and the gateway client.

mod error;
mod market_data;

pub use error::{MarketDataError, MarketDataResult};
pub use market_data::MarketDataClient;
