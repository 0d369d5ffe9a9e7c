use serde::{Deserialize, Serialize};

use super::BookSide;
use crate::values::{Price, Quantity};

/// What a depth row update does to the level at `position`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthOperation {
    /// New level at `position`; deeper levels shift down
    Insert,
    /// Replace price/size of the level at `position`
    Update,
    /// Remove the level at `position`; deeper levels shift up
    Delete,
}

impl DepthOperation {
    /// Decode the gateway's operation code (0 = insert, 1 = update, 2 = delete)
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DepthOperation::Insert),
            1 => Some(DepthOperation::Update),
            2 => Some(DepthOperation::Delete),
            _ => None,
        }
    }
}

/// One row update of a deep order book stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    /// Zero-based row index, 0 is top of book
    pub position: usize,
    /// Market maker or exchange id; only present on exchange-level (L2) rows
    #[serde(default)]
    pub market_maker: Option<String>,
    pub operation: DepthOperation,
    pub side: BookSide,
    pub price: Price,
    pub size: Quantity,
}
