//! Deep order book slot admission
//!
//! The gateway serves only a handful of concurrent deep book streams. Symbols
//! beyond that wait in a FIFO queue and are promoted as slots free up.
//!
//! ```text
//!                 try_acquire
//!   new symbol ───────────────► active (≤ capacity)
//!        │ no slot                 │ release / fail_and_requeue
//!        ▼                         ▼
//!   queue (FIFO) ◄── failed symbols re-enter at the head
//!        │ promote_next
//!        └──────────────────► active
//! ```
//!
//! A symbol is never both active and queued. Every release, failure and
//! withdrawal immediately promotes at most one queued symbol; the promoted
//! symbol is returned so the caller can start its stream.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use depthgate_core::Symbol;
use parking_lot::Mutex;
use tracing::debug;

use crate::events::{EventSink, RecordingEvent};

/// Concurrent deep book streams the gateway allows
pub const MAX_L2_SLOTS: usize = 5;

#[derive(Debug, Default)]
struct SlotRegistry {
    /// In acquisition order
    active: Vec<Symbol>,
    queue: VecDeque<Symbol>,
    attempts: HashMap<Symbol, u32>,
}

impl SlotRegistry {
    fn is_active(&self, symbol: &Symbol) -> bool {
        self.active.contains(symbol)
    }

    fn remove_active(&mut self, symbol: &Symbol) -> bool {
        match self.active.iter().position(|s| s == symbol) {
            Some(idx) => {
                self.active.remove(idx);
                true
            }
            None => false,
        }
    }

    fn promote(&mut self, capacity: usize, events: &mut Vec<RecordingEvent>) -> Option<Symbol> {
        while self.active.len() < capacity {
            let next = self.queue.pop_front()?;
            if self.is_active(&next) {
                continue;
            }
            self.active.push(next.clone());
            events.push(RecordingEvent::l2_promoted(&next, self.active.len()));
            return Some(next);
        }
        None
    }
}

/// Owns the slot registry; events go out after the lock is released
pub struct SlotManager {
    capacity: usize,
    registry: Mutex<SlotRegistry>,
    sink: Arc<dyn EventSink>,
}

impl SlotManager {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_capacity(MAX_L2_SLOTS, sink)
    }

    /// Capacity is clamped to `1..=MAX_L2_SLOTS`
    pub fn with_capacity(capacity: usize, sink: Arc<dyn EventSink>) -> Self {
        SlotManager {
            capacity: capacity.clamp(1, MAX_L2_SLOTS),
            registry: Mutex::new(SlotRegistry::default()),
            sink,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn emit_all(&self, events: Vec<RecordingEvent>) {
        for event in events {
            self.sink.emit(event);
        }
    }

    /// Grant a slot, or queue the symbol.
    ///
    /// Returns true if the symbol holds a slot afterwards (idempotent for an
    /// active symbol). A queued symbol is not granted a free slot here; it
    /// waits for its promotion.
    pub fn try_acquire(&self, symbol: &Symbol) -> bool {
        let mut events = Vec::new();
        let granted = {
            let mut reg = self.registry.lock();
            if reg.is_active(symbol) {
                true
            } else if reg.active.len() < self.capacity && !reg.queue.contains(symbol) {
                reg.active.push(symbol.clone());
                events.push(RecordingEvent::l2_acquired(symbol, reg.active.len()));
                true
            } else {
                if !reg.queue.contains(symbol) {
                    reg.queue.push_back(symbol.clone());
                    debug!(%symbol, position = reg.queue.len(), "Queued for deep book slot");
                }
                false
            }
        };
        self.emit_all(events);
        granted
    }

    /// Free the symbol's slot and promote one queued symbol. No-op if not active.
    pub fn release(&self, symbol: &Symbol) -> Option<Symbol> {
        let mut events = Vec::new();
        let promoted = {
            let mut reg = self.registry.lock();
            if !reg.remove_active(symbol) {
                return None;
            }
            reg.attempts.remove(symbol);
            events.push(RecordingEvent::l2_released(symbol, reg.active.len()));
            reg.promote(self.capacity, &mut events)
        };
        self.emit_all(events);
        promoted
    }

    /// Record a failed deep subscribe: the symbol leaves its slot, re-enters
    /// at the head of the queue, and one promotion is attempted.
    ///
    /// With no other waiters the promoted symbol is usually `symbol` itself.
    pub fn fail_and_requeue(&self, symbol: &Symbol) -> Option<Symbol> {
        let mut events = Vec::new();
        let promoted = {
            let mut reg = self.registry.lock();
            reg.remove_active(symbol);
            reg.queue.retain(|s| s != symbol);
            reg.queue.push_front(symbol.clone());
            let attempts = {
                let count = reg.attempts.entry(symbol.clone()).or_insert(0);
                *count += 1;
                *count
            };
            events.push(RecordingEvent::l2_subscribe_failed(
                symbol,
                attempts,
                reg.active.len(),
            ));
            reg.promote(self.capacity, &mut events)
        };
        self.emit_all(events);
        promoted
    }

    /// Move the queue head into a free slot
    pub fn promote_next(&self) -> Option<Symbol> {
        let mut events = Vec::new();
        let promoted = self.registry.lock().promote(self.capacity, &mut events);
        self.emit_all(events);
        promoted
    }

    /// Forget a symbol entirely: leave the queue, or release its slot
    /// (promoting the next waiter). Clears its attempt counter.
    pub fn withdraw(&self, symbol: &Symbol) -> Option<Symbol> {
        let was_active = {
            let mut reg = self.registry.lock();
            reg.queue.retain(|s| s != symbol);
            reg.attempts.remove(symbol);
            reg.is_active(symbol)
        };
        if was_active {
            self.release(symbol)
        } else {
            None
        }
    }

    pub fn active(&self) -> Vec<Symbol> {
        self.registry.lock().active.clone()
    }

    pub fn queued(&self) -> Vec<Symbol> {
        self.registry.lock().queue.iter().cloned().collect()
    }

    pub fn is_active(&self, symbol: &Symbol) -> bool {
        self.registry.lock().is_active(symbol)
    }

    pub fn is_queued(&self, symbol: &Symbol) -> bool {
        self.registry.lock().queue.contains(symbol)
    }

    /// Failed subscribe attempts since the last release
    pub fn attempts(&self, symbol: &Symbol) -> u32 {
        self.registry
            .lock()
            .attempts
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }
}
