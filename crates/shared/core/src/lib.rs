//! depthgate Core Domain
//!
//! Pure domain types shared by the gateway client and the session layer.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod instruments;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    BookSide, DepthOperation, DepthUpdate, MarketDataEvent, StreamKind, TickByTick, TickType,
};
pub use instruments::Contract;
pub use values::{Price, Quantity, Symbol, SymbolError, Timestamp};
