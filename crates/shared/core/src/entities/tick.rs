use serde::{Deserialize, Serialize};

use crate::values::{Price, Quantity, Timestamp};

/// Tick-by-tick stream flavour requested from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickType {
    Last,
    AllLast,
    BidAsk,
    MidPoint,
}

impl TickType {
    /// Name the gateway expects in the request
    pub fn as_wire(&self) -> &'static str {
        match self {
            TickType::Last => "Last",
            TickType::AllLast => "AllLast",
            TickType::BidAsk => "BidAsk",
            TickType::MidPoint => "MidPoint",
        }
    }
}

/// One tick-by-tick message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickByTick {
    /// Trade print (Last or AllLast)
    Trade {
        time: Timestamp,
        price: Price,
        size: Quantity,
        exchange: String,
        special_conditions: String,
        past_limit: bool,
        unreported: bool,
    },
    BidAsk {
        time: Timestamp,
        bid_price: Price,
        ask_price: Price,
        bid_size: Quantity,
        ask_size: Quantity,
    },
    MidPoint {
        time: Timestamp,
        mid_point: Price,
    },
}

impl TickByTick {
    pub fn time(&self) -> Timestamp {
        match self {
            TickByTick::Trade { time, .. }
            | TickByTick::BidAsk { time, .. }
            | TickByTick::MidPoint { time, .. } => *time,
        }
    }
}
