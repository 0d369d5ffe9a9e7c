use serde::{Deserialize, Serialize};

use crate::values::Symbol;

/// Contract description sent with every market data request.
///
/// Only the fields the gateway needs to resolve a stock are modelled; the
/// contract id is left at 0 so the gateway resolves by symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: Symbol,
    /// Security type, e.g. "STK"
    pub sec_type: String,
    /// Routing exchange, e.g. "SMART"
    pub exchange: String,
    /// Listing exchange used to disambiguate SMART routing, e.g. "NASDAQ"
    #[serde(default)]
    pub primary_exchange: Option<String>,
    pub currency: String,
}

impl Contract {
    /// US stock routed through SMART
    pub fn stock(symbol: Symbol) -> Self {
        Self {
            symbol,
            sec_type: "STK".to_string(),
            exchange: "SMART".to_string(),
            primary_exchange: None,
            currency: "USD".to_string(),
        }
    }

    /// Stock with custom routing and currency
    pub fn stock_on(
        symbol: Symbol,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            currency: currency.into(),
            ..Self::stock(symbol)
        }
    }

    pub fn with_primary_exchange(mut self, primary: impl Into<String>) -> Self {
        self.primary_exchange = Some(primary.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_defaults() {
        let contract = Contract::stock(Symbol::new("aapl").unwrap());
        assert_eq!(contract.symbol.as_str(), "AAPL");
        assert_eq!(contract.sec_type, "STK");
        assert_eq!(contract.exchange, "SMART");
        assert_eq!(contract.currency, "USD");
        assert!(contract.primary_exchange.is_none());
    }

    #[test]
    fn test_stock_on_custom_exchange() {
        let contract = Contract::stock_on(Symbol::new("SHOP").unwrap(), "TSE", "CAD")
            .with_primary_exchange("TSE");
        assert_eq!(contract.exchange, "TSE");
        assert_eq!(contract.currency, "CAD");
        assert_eq!(contract.primary_exchange.as_deref(), Some("TSE"));
    }
}
