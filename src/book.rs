//! The order book: price-ordered FIFO queues, per-level aggregate sizes,
//! and an O(1) order index (spec component C).
//!
//! Each price level stores its live orders in a `HashMap<order_id, handle>`
//! for O(1) lookup, and the FIFO arrival order separately as a
//! `VecDeque<(order_id, generation)>`. Cancelling an order removes it from
//! the `HashMap` immediately but leaves its queue entry in place; it is
//! skipped lazily the next time it reaches the front during matching. The
//! generation tag disambiguates a requeue (move-to-tail), which removes
//! and re-inserts the same `order_id`, from the stale entry the removal
//! left behind. This is the same hybrid the teacher crate used for its
//! concurrent `DashMap` + `SegQueue<Id>` price level, adapted to a
//! single-threaded `HashMap` + `VecDeque` since there is no contention to
//! design around here.

use crate::error::EngineError;
use crate::order::{Order, OrderState, Side};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

/// Shared, interior-mutable handle to a live order. The book's level owns
/// it; the top-level index holds only a non-owning locator (side + price)
/// that lets a cancel/modify find the level in O(1) without re-deriving it
/// from the order itself.
pub type OrderHandle = Rc<RefCell<Order>>;

/// Price + aggregate quantity at that price, used for top-of-book and
/// depth-vector queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub price: u128,
    pub quantity: u64,
}

/// A price level's FIFO queue. `ids` records `(order_id, generation)` pairs
/// rather than bare ids: a requeue (move-to-tail) removes and re-inserts
/// the same `order_id`, and without a generation tag the stale front-of-
/// queue entry left behind by the removal would be indistinguishable from
/// the fresh tail entry once the id reappears in `orders`.
#[derive(Default)]
struct Level {
    ids: VecDeque<(u64, u64)>,
    orders: HashMap<u64, OrderHandle>,
    gens: HashMap<u64, u64>,
    next_gen: u64,
    total: u64,
}

impl Level {
    fn push_tail(&mut self, handle: OrderHandle) {
        let (id, qty) = {
            let o = handle.borrow();
            (o.order_id, o.quantity)
        };
        let generation = self.next_gen;
        self.next_gen += 1;
        self.total += qty;
        self.orders.insert(id, handle);
        self.gens.insert(id, generation);
        self.ids.push_back((id, generation));
    }

    /// Removes `order_id` from the live set and returns its handle. Does
    /// not touch `ids` — the stale id is skipped lazily.
    fn take(&mut self, order_id: u64) -> Option<OrderHandle> {
        let handle = self.orders.remove(&order_id)?;
        self.gens.remove(&order_id);
        self.total -= handle.borrow().quantity;
        Some(handle)
    }

    /// Peeks the head of the FIFO queue, dropping any cancelled or
    /// superseded-by-requeue ids that have reached the front.
    fn front(&mut self) -> Option<OrderHandle> {
        while let Some(&(id, generation)) = self.ids.front() {
            if self.gens.get(&id) == Some(&generation) {
                return self.orders.get(&id).cloned();
            }
            self.ids.pop_front();
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn live_total(&self) -> u64 {
        self.orders.values().map(|h| h.borrow().quantity).sum()
    }
}

/// The two-sided order book plus market-order queue and removed-order
/// history (spec §3 "Market queue" / "Lifecycles").
pub struct OrderBook {
    bids: BTreeMap<u128, Level>,
    asks: BTreeMap<u128, Level>,
    index: HashMap<u64, (Side, u128)>,
    market_queue: VecDeque<OrderHandle>,
    removed_orders: Vec<Order>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            market_queue: VecDeque::new(),
            removed_orders: Vec::new(),
        }
    }

    fn side_map(&self, side: Side) -> &BTreeMap<u128, Level> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_map_mut(&mut self, side: Side) -> &mut BTreeMap<u128, Level> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Best (price, aggregate size) on `side`: highest price for bids,
    /// lowest for asks.
    pub fn best(&self, side: Side) -> Option<(u128, u64)> {
        let map = self.side_map(side);
        match side {
            Side::Buy => map.iter().next_back().map(|(p, l)| (*p, l.total)),
            Side::Sell => map.iter().next().map(|(p, l)| (*p, l.total)),
        }
    }

    pub fn best_bid(&self) -> Option<(u128, u64)> {
        self.best(Side::Buy)
    }

    pub fn best_ask(&self) -> Option<(u128, u64)> {
        self.best(Side::Sell)
    }

    /// `(best_bid + best_ask) / 2`, or `NaN` if either side is empty.
    pub fn mid(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => (bid as f64 + ask as f64) / 2.0,
            _ => f64::NAN,
        }
    }

    /// Size-weighted average of the best bid and ask, skewed toward the
    /// thinner side. `NaN` if either side is empty or both sizes are zero.
    pub fn micro(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid_px, bid_sz)), Some((ask_px, ask_sz))) => {
                let denom = (bid_sz + ask_sz) as f64;
                if denom == 0.0 {
                    f64::NAN
                } else {
                    (bid_px as f64 * ask_sz as f64 + ask_px as f64 * bid_sz as f64) / denom
                }
            }
            _ => f64::NAN,
        }
    }

    /// `best_ask - best_bid`, or `NaN` if either side is empty.
    pub fn spread(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => ask as f64 - bid as f64,
            _ => f64::NAN,
        }
    }

    pub fn half_spread(&self) -> f64 {
        self.spread() / 2.0
    }

    /// `(bid_sz - ask_sz) / (bid_sz + ask_sz)`, in `[-1, 1]`, or `NaN` if
    /// either side is empty.
    pub fn imbalance(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some((_, bid_sz)), Some((_, ask_sz))) => {
                let denom = (bid_sz + ask_sz) as f64;
                if denom == 0.0 {
                    f64::NAN
                } else {
                    (bid_sz as f64 - ask_sz as f64) / denom
                }
            }
            _ => f64::NAN,
        }
    }

    /// Top `levels` price levels on `side`, best first. `O(levels)`.
    pub fn depth(&self, side: Side, levels: usize) -> Vec<LevelInfo> {
        let map = self.side_map(side);
        let iter: Box<dyn Iterator<Item = (&u128, &Level)>> = match side {
            Side::Buy => Box::new(map.iter().rev()),
            Side::Sell => Box::new(map.iter()),
        };
        iter.take(levels)
            .map(|(price, level)| LevelInfo {
                price: *price,
                quantity: level.total,
            })
            .collect()
    }

    pub fn num_levels(&self, side: Side) -> usize {
        self.side_map(side).len()
    }

    pub fn removed_orders(&self) -> &[Order] {
        &self.removed_orders
    }

    pub fn market_queue_len(&self) -> usize {
        self.market_queue.len()
    }

    /// Appends `handle` to the tail of its price level's FIFO queue,
    /// creating the level if needed, and registers it in the index.
    pub fn place_limit(&mut self, handle: OrderHandle) -> Result<(), EngineError> {
        let (order_id, side, price) = {
            let o = handle.borrow();
            let price = o.price.ok_or(EngineError::NullOrder)?;
            (o.order_id, o.side, price)
        };
        if self.index.contains_key(&order_id) {
            return Err(EngineError::DuplicateOrderId(order_id));
        }
        self.side_map_mut(side)
            .entry(price)
            .or_default()
            .push_tail(handle);
        self.index.insert(order_id, (side, price));
        Ok(())
    }

    /// Locates the live order's current `(side, price)`, if any.
    pub fn locate(&self, order_id: u64) -> Option<(Side, u128)> {
        self.index.get(&order_id).copied()
    }

    /// Returns a clone of the live order handle, if present.
    pub fn get(&self, order_id: u64) -> Option<OrderHandle> {
        let (side, price) = self.locate(order_id)?;
        self.side_map(side)
            .get(&price)?
            .orders
            .get(&order_id)
            .cloned()
    }

    /// Fully removes a live limit order: drops it from its level, appends
    /// to the removed-orders history (with its final snapshot supplied by
    /// the caller before the state is set to `Cancelled`), and drops the
    /// level itself if it is now empty. Returns the handle so the caller
    /// can read its pre-removal quantity/price for report emission.
    pub fn remove(&mut self, order_id: u64) -> Option<OrderHandle> {
        let (side, price) = self.index.remove(&order_id)?;
        let level = self.side_map_mut(side).get_mut(&price)?;
        let handle = level.take(order_id);
        if level.is_empty() {
            self.side_map_mut(side).remove(&price);
        }
        if let Some(handle) = &handle {
            self.removed_orders.push(handle.borrow().clone());
        }
        handle
    }

    /// Reduces a live order's quantity in place, keeping its FIFO position.
    /// Caller is responsible for validating `new_qty <= current`.
    pub fn shrink(&mut self, order_id: u64, new_qty: u64) -> Option<()> {
        let (side, price) = self.locate(order_id)?;
        let level = self.side_map_mut(side).get_mut(&price)?;
        let handle = level.orders.get(&order_id)?.clone();
        let old_qty = handle.borrow().quantity;
        level.total -= old_qty - new_qty;
        handle.borrow_mut().quantity = new_qty;
        Some(())
    }

    /// Moves a live order to the tail of a (possibly new) price level,
    /// losing time priority. Used for `MODIFY_PRICE` and for growing
    /// `MODIFY_QUANTITY`. `new_ts` becomes the order's new arrival time —
    /// without it, an order requeued behind one with a later original
    /// timestamp would violate FIFO monotonicity.
    pub fn requeue(
        &mut self,
        order_id: u64,
        new_price: u128,
        new_qty: u64,
        new_ts: u64,
    ) -> Option<()> {
        let handle = self.remove(order_id)?;
        // `remove` logs a removed-orders entry; this is a requeue, not a
        // cancellation, so undo that bookkeeping.
        self.removed_orders.pop();
        {
            let mut o = handle.borrow_mut();
            o.price = Some(new_price);
            o.quantity = new_qty;
            o.timestamp = new_ts;
        }
        self.place_limit(handle).ok()
    }

    pub fn enqueue_market(&mut self, handle: OrderHandle) {
        self.market_queue.push_back(handle);
    }

    /// Drains resting market orders on `side` that can now execute against
    /// an incoming limit at `limit_price`, calling `on_fill(maker, qty)` for
    /// each and stopping once `remaining` is exhausted or the queue is dry.
    /// Returns the remaining (unfilled) quantity.
    pub fn drain_market_queue(
        &mut self,
        side: Side,
        mut remaining: u64,
        mut on_fill: impl FnMut(OrderHandle, u64),
    ) -> u64 {
        while remaining > 0 {
            let Some(front) = self.market_queue.front().cloned() else {
                break;
            };
            if front.borrow().side != side || !front.borrow().is_alive() {
                self.market_queue.pop_front();
                continue;
            }
            let maker_qty = front.borrow().quantity;
            let fill = maker_qty.min(remaining);
            remaining -= fill;
            {
                let mut m = front.borrow_mut();
                m.quantity -= fill;
                if m.quantity == 0 {
                    m.state = OrderState::Filled;
                } else {
                    m.state = OrderState::PartiallyFilled;
                }
            }
            if front.borrow().quantity == 0 {
                self.market_queue.pop_front();
            }
            on_fill(front, fill);
        }
        remaining
    }

    /// Peeks the head order of the best level on `side` without consuming
    /// it, skipping stale (cancelled) ids lazily.
    pub fn peek_front(&mut self, side: Side) -> Option<OrderHandle> {
        let price = self.best(side)?.0;
        self.side_map_mut(side).get_mut(&price)?.front()
    }

    /// Consumes `qty` from the head order on `side` (caller must have
    /// already confirmed the head exists and `qty <= head.quantity`).
    /// Removes the maker from the book if it becomes fully filled,
    /// dropping the level if it empties. Returns the maker's handle.
    pub fn consume_front(&mut self, side: Side, qty: u64) -> Option<OrderHandle> {
        let price = self.best(side)?.0;
        let order_id = {
            let level = self.side_map_mut(side).get_mut(&price)?;
            let handle = level.front()?;
            let id = handle.borrow().order_id;
            handle.borrow_mut().quantity -= qty;
            level.total -= qty;
            id
        };
        let maker_fully_filled = self
            .side_map(side)
            .get(&price)
            .map(|l| {
                l.orders
                    .get(&order_id)
                    .map(|h| h.borrow().quantity == 0)
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        let handle = if maker_fully_filled {
            let level = self.side_map_mut(side).get_mut(&price)?;
            let handle = level.orders.remove(&order_id)?;
            handle.borrow_mut().state = OrderState::Filled;
            if level.is_empty() {
                self.side_map_mut(side).remove(&price);
            }
            self.index.remove(&order_id);
            self.removed_orders.push(handle.borrow().clone());
            handle
        } else {
            let level = self.side_map(side).get(&price)?;
            let handle = level.orders.get(&order_id)?.clone();
            handle.borrow_mut().state = OrderState::PartiallyFilled;
            handle
        };
        Some(handle)
    }

    /// Validates spec §8.1 invariants 1-3 and the index's faithfulness to
    /// the levels it points into. Intended for use on init and after a
    /// `build()` rebuild, not on the hot path.
    pub fn state_consistency_check(&self) -> Result<(), EngineError> {
        for (side, map) in [(Side::Buy, &self.bids), (Side::Sell, &self.asks)] {
            for (price, level) in map {
                let actual = level.live_total();
                if actual != level.total {
                    return Err(EngineError::SizeMismatch {
                        price: *price,
                        recorded_total: level.total,
                        actual_total: actual,
                    });
                }
                if level.total == 0 {
                    return Err(EngineError::SizeMismatch {
                        price: *price,
                        recorded_total: 0,
                        actual_total: actual,
                    });
                }
                for id in level.orders.keys() {
                    match self.index.get(id) {
                        Some((s, p)) if *s == side && *p == *price => {}
                        _ => {
                            return Err(EngineError::IndexMismatch {
                                order_id: *id,
                                expected_price: *price,
                                side,
                            });
                        }
                    }
                }
                let mut last_ts = None;
                for (id, generation) in level.ids.iter() {
                    if level.gens.get(id) != Some(generation) {
                        continue;
                    }
                    if let Some(handle) = level.orders.get(id) {
                        let ts = handle.borrow().timestamp;
                        if let Some(prev) = last_ts
                            && ts < prev
                        {
                            return Err(EngineError::NonMonotonicFifo {
                                price: *price,
                                side,
                            });
                        }
                        last_ts = Some(ts);
                    }
                }
            }
        }
        for (id, (side, price)) in &self.index {
            let present = self
                .side_map(*side)
                .get(price)
                .map(|l| l.orders.contains_key(id))
                .unwrap_or(false);
            if !present {
                return Err(EngineError::IndexMismatch {
                    order_id: *id,
                    expected_price: *price,
                    side: *side,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;

    fn handle(id: u64, ts: u64, side: Side, price: u128, qty: u64) -> OrderHandle {
        Rc::new(RefCell::new(Order::new_limit(id, ts, side, price, qty)))
    }

    #[test]
    fn best_bid_ask_empty_book_is_none() {
        let book = OrderBook::new();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert!(book.mid().is_nan());
    }

    #[test]
    fn place_and_query_bbo() {
        let mut book = OrderBook::new();
        book.place_limit(handle(1, 0, Side::Buy, 99, 10)).unwrap();
        book.place_limit(handle(2, 1, Side::Sell, 101, 5)).unwrap();
        assert_eq!(book.best_bid(), Some((99, 10)));
        assert_eq!(book.best_ask(), Some((101, 5)));
        assert_eq!(book.mid(), 100.0);
        assert_eq!(book.spread(), 2.0);
    }

    #[test]
    fn cancel_preserves_neighbours_scenario_s3() {
        let mut book = OrderBook::new();
        book.place_limit(handle(1, 0, Side::Buy, 99, 10)).unwrap();
        book.place_limit(handle(2, 1, Side::Buy, 99, 5)).unwrap();
        book.place_limit(handle(3, 2, Side::Buy, 98, 10)).unwrap();

        book.remove(2).unwrap();

        assert_eq!(book.best_bid(), Some((99, 10)));
        assert_eq!(book.num_levels(Side::Buy), 2);
        book.state_consistency_check().unwrap();
    }

    #[test]
    fn duplicate_order_id_is_fatal() {
        let mut book = OrderBook::new();
        book.place_limit(handle(1, 0, Side::Buy, 99, 10)).unwrap();
        let err = book
            .place_limit(handle(1, 1, Side::Buy, 98, 5))
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateOrderId(1)));
    }

    #[test]
    fn requeue_moves_to_tail_scenario_s4() {
        let mut book = OrderBook::new();
        book.place_limit(handle(1, 0, Side::Buy, 99, 15)).unwrap();
        book.place_limit(handle(2, 1, Side::Buy, 99, 5)).unwrap();

        book.requeue(1, 100, 15, 2).unwrap();

        assert_eq!(book.best_bid(), Some((100, 15)));
        assert_eq!(
            book.depth(Side::Buy, 2),
            vec![
                LevelInfo {
                    price: 100,
                    quantity: 15
                },
                LevelInfo {
                    price: 99,
                    quantity: 5
                },
            ]
        );
        book.state_consistency_check().unwrap();
    }
}
