use thiserror::Error;

/// Errors a market data client reports for a stream request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    /// Gateway answered the request with an error code
    #[error("Request rejected by gateway ({code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("Timed out waiting for the gateway")]
    Timeout,

    #[error("Not connected to the gateway")]
    NotConnected,

    #[error("Transport failure: {0}")]
    Transport(String),
}

impl MarketDataError {
    /// Whether resending the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, MarketDataError::Timeout | MarketDataError::Transport(_))
    }
}

pub type MarketDataResult<T> = std::result::Result<T, MarketDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MarketDataError::Timeout.is_transient());
        assert!(MarketDataError::Transport("broken pipe".into()).is_transient());
        assert!(!MarketDataError::NotConnected.is_transient());
        assert!(
            !MarketDataError::Rejected {
                code: 309,
                message: "Max number (3) of market depth requests has been reached".into()
            }
            .is_transient()
        );
    }
}
