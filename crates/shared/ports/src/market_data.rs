use async_trait::async_trait;
use depthgate_core::Symbol;

use crate::error::MarketDataResult;

/// Port for starting and stopping per-symbol streams on the gateway
///
/// `start_level2` resolves only once the gateway has had the chance to
/// reject the request, so a returned `Ok` means the deep stream holds its
/// slot. Stop calls are best effort and should not fail on an unknown symbol.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Start the tick-by-tick trade stream
    async fn start_ticks(&self, symbol: &Symbol) -> MarketDataResult<()>;

    async fn stop_ticks(&self, symbol: &Symbol) -> MarketDataResult<()>;

    /// Start the deep order book stream
    async fn start_level2(&self, symbol: &Symbol) -> MarketDataResult<()>;

    async fn stop_level2(&self, symbol: &Symbol) -> MarketDataResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // Ensure trait is object-safe
    fn _assert_object_safe(_: &dyn MarketDataClient) {}

    struct Noop;

    #[async_trait]
    impl MarketDataClient for Noop {
        async fn start_ticks(&self, _: &Symbol) -> MarketDataResult<()> {
            Ok(())
        }
        async fn stop_ticks(&self, _: &Symbol) -> MarketDataResult<()> {
            Ok(())
        }
        async fn start_level2(&self, _: &Symbol) -> MarketDataResult<()> {
            Err(crate::MarketDataError::NotConnected)
        }
        async fn stop_level2(&self, _: &Symbol) -> MarketDataResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_client_usable_behind_arc_dyn() {
        let client: Arc<dyn MarketDataClient> = Arc::new(Noop);
        let symbol = Symbol::new("AAPL").unwrap();
        assert!(client.start_ticks(&symbol).await.is_ok());
        assert!(client.start_level2(&symbol).await.is_err());
    }
}
