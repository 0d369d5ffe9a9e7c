mod book_side;
mod depth;
mod event;
mod tick;

pub use book_side::BookSide;
pub use depth::{DepthOperation, DepthUpdate};
pub use event::{MarketDataEvent, StreamKind};
pub use tick::{TickByTick, TickType};
