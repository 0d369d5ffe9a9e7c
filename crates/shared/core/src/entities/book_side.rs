use serde::{Deserialize, Serialize};

/// Side of the order book a depth row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Ask,
    Bid,
}

impl BookSide {
    /// Decode the gateway's side code (0 = ask, 1 = bid)
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(BookSide::Ask),
            1 => Some(BookSide::Bid),
            _ => None,
        }
    }

    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            BookSide::Ask => BookSide::Bid,
            BookSide::Bid => BookSide::Ask,
        }
    }
}
