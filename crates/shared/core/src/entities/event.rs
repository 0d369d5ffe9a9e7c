use serde::{Deserialize, Serialize};

use super::{DepthUpdate, TickByTick};
use crate::values::{Symbol, Timestamp};

/// The two streams a symbol can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Ticks,
    Depth,
}

/// Market data delivered to consumers of a market data client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketDataEvent {
    Depth {
        symbol: Symbol,
        received_at: Timestamp,
        update: DepthUpdate,
    },
    Tick {
        symbol: Symbol,
        tick: TickByTick,
    },
    /// Gateway reset the book; consumers drop their local copy
    DepthReset { symbol: Symbol },
    /// An established stream was cancelled by the gateway
    StreamLost {
        symbol: Symbol,
        kind: StreamKind,
        code: i32,
        message: String,
    },
    /// Connection to the gateway closed; every stream is gone
    Disconnected,
}

impl MarketDataEvent {
    pub fn symbol(&self) -> Option<&Symbol> {
        match self {
            MarketDataEvent::Depth { symbol, .. }
            | MarketDataEvent::Tick { symbol, .. }
            | MarketDataEvent::DepthReset { symbol }
            | MarketDataEvent::StreamLost { symbol, .. } => Some(symbol),
            MarketDataEvent::Disconnected => None,
        }
    }
}
