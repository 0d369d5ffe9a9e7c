//! Position-indexed deep order books
//!
//! Depth rows address a level by its row number rather than by price, so
//! each side is kept as an ordered vector: an insert at row `n` pushes the
//! rows below it down, a delete pulls them up.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use depthgate_core::{
    BookSide, DepthOperation, DepthUpdate, MarketDataEvent, Price, Quantity, Symbol, Timestamp,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Rows kept per side; the gateway never sends deeper than this
const MAX_ROWS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Quantity,
}

/// Fixed-width view of the top of both sides, zero padded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub timestamp: Timestamp,
    pub bid_prices: Vec<Price>,
    pub bid_sizes: Vec<Quantity>,
    pub ask_prices: Vec<Price>,
    pub ask_sizes: Vec<Quantity>,
}

/// One raw depth row as received, for the message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthMessage {
    pub timestamp: Timestamp,
    /// `add`, `update` or `remove`
    pub operation: String,
    /// `bid` or `ask`
    pub side: String,
    pub level: usize,
    pub price: Price,
    pub size: Quantity,
    pub symbol: Symbol,
}

impl DepthMessage {
    pub fn new(symbol: &Symbol, received_at: Timestamp, update: &DepthUpdate) -> Self {
        let operation = match update.operation {
            DepthOperation::Insert => "add",
            DepthOperation::Update => "update",
            DepthOperation::Delete => "remove",
        };
        let side = match update.side {
            BookSide::Bid => "bid",
            BookSide::Ask => "ask",
        };
        DepthMessage {
            timestamp: received_at,
            operation: operation.to_string(),
            side: side.to_string(),
            level: update.position,
            price: update.price,
            size: update.size,
            symbol: symbol.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DepthBook {
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
    updates: u64,
    last_update: Option<Timestamp>,
}

impl DepthBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn side_mut(&mut self, side: BookSide) -> &mut Vec<BookLevel> {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    /// Apply one row update. Returns false if the row was out of range.
    pub fn apply(&mut self, update: &DepthUpdate) -> bool {
        let level = BookLevel {
            price: update.price,
            size: update.size,
        };
        let position = update.position;
        let rows = self.side_mut(update.side);

        let applied = match update.operation {
            DepthOperation::Insert => {
                if position > rows.len() || position >= MAX_ROWS {
                    false
                } else {
                    rows.insert(position, level);
                    rows.truncate(MAX_ROWS);
                    true
                }
            }
            DepthOperation::Update => {
                let len = rows.len();
                match rows.get_mut(position) {
                    Some(row) => {
                        *row = level;
                        true
                    }
                    // Some venues update a row they never inserted; treat it as
                    // an append when it extends the book by one
                    None if position == len && position < MAX_ROWS => {
                        rows.push(level);
                        true
                    }
                    None => false,
                }
            }
            DepthOperation::Delete => {
                if position < rows.len() {
                    rows.remove(position);
                    true
                } else {
                    false
                }
            }
        };

        if applied {
            self.updates += 1;
            self.last_update = Some(Utc::now());
        } else {
            trace!(position, side = ?update.side, op = ?update.operation, "Depth row out of range");
        }
        applied
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    pub fn bids(&self) -> &[BookLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[BookLevel] {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Rows applied since creation
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        self.last_update
    }

    pub fn snapshot(&self, levels: usize) -> DepthSnapshot {
        let (bid_prices, bid_sizes) = padded(&self.bids, levels);
        let (ask_prices, ask_sizes) = padded(&self.asks, levels);
        DepthSnapshot {
            timestamp: Utc::now(),
            bid_prices,
            bid_sizes,
            ask_prices,
            ask_sizes,
        }
    }
}

fn padded(rows: &[BookLevel], levels: usize) -> (Vec<Price>, Vec<Quantity>) {
    let mut prices = vec![Decimal::ZERO; levels];
    let mut sizes = vec![Decimal::ZERO; levels];
    for (i, row) in rows.iter().take(levels).enumerate() {
        prices[i] = row.price;
        sizes[i] = row.size;
    }
    (prices, sizes)
}

/// Books for many symbols behind one lock.
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct BookRegistry {
    books: Arc<RwLock<HashMap<Symbol, DepthBook>>>,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a market data event into the matching book. Returns true if a
    /// book changed.
    pub fn apply_event(&self, event: &MarketDataEvent) -> bool {
        match event {
            MarketDataEvent::Depth { symbol, update, .. } => self
                .books
                .write()
                .entry(symbol.clone())
                .or_default()
                .apply(update),
            MarketDataEvent::DepthReset { symbol } => match self.books.write().get_mut(symbol) {
                Some(book) => {
                    book.clear();
                    true
                }
                None => false,
            },
            MarketDataEvent::Disconnected => {
                let mut books = self.books.write();
                books.values_mut().for_each(DepthBook::clear);
                !books.is_empty()
            }
            MarketDataEvent::Tick { .. } | MarketDataEvent::StreamLost { .. } => false,
        }
    }

    pub fn snapshot(&self, symbol: &Symbol, levels: usize) -> Option<DepthSnapshot> {
        self.books.read().get(symbol).map(|b| b.snapshot(levels))
    }

    pub fn with_book<R>(&self, symbol: &Symbol, f: impl FnOnce(&DepthBook) -> R) -> Option<R> {
        self.books.read().get(symbol).map(f)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.books.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(
        position: usize,
        operation: DepthOperation,
        side: BookSide,
        price: Decimal,
    ) -> DepthUpdate {
        DepthUpdate {
            position,
            market_maker: None,
            operation,
            side,
            price,
            size: dec!(100),
        }
    }

    fn prices(rows: &[BookLevel]) -> Vec<Decimal> {
        rows.iter().map(|l| l.price).collect()
    }

    #[test]
    fn test_insert_shifts_lower_rows_down() {
        let mut book = DepthBook::new();
        assert!(book.apply(&row(0, DepthOperation::Insert, BookSide::Bid, dec!(100.00))));
        assert!(book.apply(&row(1, DepthOperation::Insert, BookSide::Bid, dec!(99.99))));
        assert!(book.apply(&row(0, DepthOperation::Insert, BookSide::Bid, dec!(100.01))));

        assert_eq!(
            prices(book.bids()),
            vec![dec!(100.01), dec!(100.00), dec!(99.99)]
        );
        assert!(book.asks().is_empty());
    }

    #[test]
    fn test_delete_shifts_lower_rows_up() {
        let mut book = DepthBook::new();
        for (i, p) in [dec!(50.10), dec!(50.11), dec!(50.12)]
            .into_iter()
            .enumerate()
        {
            book.apply(&row(i, DepthOperation::Insert, BookSide::Ask, p));
        }
        assert!(book.apply(&row(1, DepthOperation::Delete, BookSide::Ask, dec!(0))));
        assert_eq!(prices(book.asks()), vec![dec!(50.10), dec!(50.12)]);
    }

    #[test]
    fn test_update_replaces_row() {
        let mut book = DepthBook::new();
        book.apply(&row(0, DepthOperation::Insert, BookSide::Bid, dec!(10)));
        let mut update = row(0, DepthOperation::Update, BookSide::Bid, dec!(10.5));
        update.size = dec!(7);
        assert!(book.apply(&update));
        assert_eq!(
            book.best_bid(),
            Some(BookLevel {
                price: dec!(10.5),
                size: dec!(7)
            })
        );
    }

    #[test]
    fn test_out_of_range_rows_ignored() {
        let mut book = DepthBook::new();
        assert!(!book.apply(&row(3, DepthOperation::Insert, BookSide::Bid, dec!(1))));
        assert!(!book.apply(&row(0, DepthOperation::Delete, BookSide::Bid, dec!(1))));
        assert!(!book.apply(&row(2, DepthOperation::Update, BookSide::Bid, dec!(1))));
        assert_eq!(book.update_count(), 0);
        assert!(book.is_empty());

        // Update one past the end appends
        assert!(book.apply(&row(0, DepthOperation::Update, BookSide::Bid, dec!(1))));
        assert_eq!(book.update_count(), 1);
    }

    #[test]
    fn test_snapshot_pads_with_zero() {
        let mut book = DepthBook::new();
        book.apply(&row(0, DepthOperation::Insert, BookSide::Bid, dec!(189.25)));
        book.apply(&row(0, DepthOperation::Insert, BookSide::Ask, dec!(189.27)));
        book.apply(&row(1, DepthOperation::Insert, BookSide::Ask, dec!(189.28)));

        let snap = book.snapshot(3);
        assert_eq!(snap.bid_prices, vec![dec!(189.25), dec!(0), dec!(0)]);
        assert_eq!(snap.bid_sizes, vec![dec!(100), dec!(0), dec!(0)]);
        assert_eq!(snap.ask_prices, vec![dec!(189.27), dec!(189.28), dec!(0)]);

        assert_eq!(book.best_ask().map(|l| l.price), Some(dec!(189.27)));

        let narrow = book.snapshot(1);
        assert_eq!(narrow.ask_prices, vec![dec!(189.27)]);
    }

    #[test]
    fn test_registry_routes_by_symbol_and_resets() {
        let books = BookRegistry::new();
        let aapl = Symbol::new("AAPL").unwrap();
        let msft = Symbol::new("MSFT").unwrap();
        let depth = |symbol: &Symbol, price| MarketDataEvent::Depth {
            symbol: symbol.clone(),
            received_at: Utc::now(),
            update: row(0, DepthOperation::Insert, BookSide::Bid, price),
        };

        assert!(books.apply_event(&depth(&aapl, dec!(189))));
        assert!(books.apply_event(&depth(&msft, dec!(410))));
        assert_eq!(
            books.with_book(&msft, |b| b.best_bid().map(|l| l.price)),
            Some(Some(dec!(410)))
        );

        assert!(books.apply_event(&MarketDataEvent::DepthReset {
            symbol: aapl.clone()
        }));
        assert_eq!(books.with_book(&aapl, DepthBook::is_empty), Some(true));
        assert_eq!(books.with_book(&msft, DepthBook::is_empty), Some(false));
        assert!(books.snapshot(&Symbol::new("NVDA").unwrap(), 5).is_none());
    }

    #[test]
    fn test_message_labels() {
        let aapl = Symbol::new("AAPL").unwrap();
        let msg = DepthMessage::new(
            &aapl,
            Utc::now(),
            &row(2, DepthOperation::Delete, BookSide::Ask, dec!(1)),
        );
        assert_eq!(msg.operation, "remove");
        assert_eq!(msg.side, "ask");
        assert_eq!(msg.level, 2);
    }
}
