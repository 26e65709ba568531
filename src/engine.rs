//! The matching engine: applies events, runs the match loop, maintains
//! invariants, and emits reports (spec component D).

use crate::book::{OrderBook, OrderHandle};
use crate::clock::{Clock, IdAllocator};
use crate::error::EngineError;
use crate::order::{Order, OrderEvent, OrderState, OrderType, Side, Trade};
use crate::report::{ExecType, OrderEventLatency, Report, ReportKind, ReportStatus};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use tracing::{trace, warn};

type ReportCallback = Rc<dyn Fn(&Report, &OrderBook)>;
type LatencyCallback = Rc<dyn Fn(&OrderEventLatency)>;

/// The single-symbol matching engine. Strictly single-threaded and
/// synchronous: `process` runs to completion, including synchronous
/// callback dispatch, before returning (spec §5).
pub struct MatchingEngine {
    clock: Clock,
    report_ids: IdAllocator,
    trade_ids: IdAllocator,
    book: OrderBook,
    report_callbacks: Vec<ReportCallback>,
    latency_callbacks: Vec<LatencyCallback>,
    last_trade: Option<Trade>,
    debug_mode: bool,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self {
            clock: Clock::new(),
            report_ids: IdAllocator::new(),
            trade_ids: IdAllocator::new(),
            book: OrderBook::new(),
            report_callbacks: Vec::new(),
            latency_callbacks: Vec::new(),
            last_trade: None,
            debug_mode: false,
        }
    }

    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn last_trade(&self) -> Option<&Trade> {
        self.last_trade.as_ref()
    }

    /// Registers an observer for every report this engine emits. Callbacks
    /// fire synchronously in registration order and must not call back into
    /// `process` on this engine.
    pub fn add_order_processing_callback(&mut self, cb: impl Fn(&Report, &OrderBook) + 'static) {
        self.report_callbacks.push(Rc::new(cb));
    }

    pub fn add_order_event_latency_callback(&mut self, cb: impl Fn(&OrderEventLatency) + 'static) {
        self.latency_callbacks.push(Rc::new(cb));
    }

    fn emit(&self, reports: &[Report]) {
        for report in reports {
            for cb in &self.report_callbacks {
                cb(report, &self.book);
            }
        }
    }

    fn emit_latency(&self, event: OrderEvent, duration_ns: u64) {
        let latency = OrderEventLatency { event, duration_ns };
        for cb in &self.latency_callbacks {
            cb(&latency);
        }
    }

    /// Runs `state_consistency_check()` against the book; call after
    /// `build()` or on init (spec §7).
    pub fn state_consistency_check(&self) -> Result<(), EngineError> {
        self.book.state_consistency_check()
    }

    /// Convenience dispatch: wraps a freshly created order into the
    /// corresponding submit event and processes it.
    pub fn process_order(
        &mut self,
        event_id: u64,
        order_id: u64,
        order_type: OrderType,
        side: Side,
        qty: u64,
        price: Option<u128>,
    ) -> Result<Vec<Report>, EngineError> {
        let event = match order_type {
            OrderType::Limit => OrderEvent::LimitSubmit {
                event_id,
                order_id,
                ts: self.clock.now(),
                side,
                qty,
                price: price.unwrap_or(0),
            },
            OrderType::Market => OrderEvent::MarketSubmit {
                event_id,
                order_id,
                ts: self.clock.now(),
                side,
                qty,
            },
        };
        self.process(event)
    }

    /// The sole mutation entry point. Emits reports in canonical order
    /// (spec §5.2): submit-receipt, execution pairs in match order
    /// (taker-then-maker), placement (if any).
    pub fn process(&mut self, event: OrderEvent) -> Result<Vec<Report>, EngineError> {
        let start = Instant::now();
        self.clock.tick(1);

        let reports = match event {
            OrderEvent::LimitSubmit {
                order_id,
                side,
                qty,
                price,
                ..
            } => self.submit_limit(order_id, side, qty, price)?,
            OrderEvent::MarketSubmit {
                order_id,
                side,
                qty,
                ..
            } => self.submit_market(order_id, side, qty)?,
            OrderEvent::Cancel { order_id, .. } => vec![self.cancel(order_id)],
            OrderEvent::PartialCancel {
                order_id,
                cancel_qty,
                ..
            } => vec![self.partial_cancel(order_id, cancel_qty)],
            OrderEvent::ModifyPrice {
                order_id,
                new_price,
                ..
            } => vec![self.modify_price(order_id, new_price)],
            OrderEvent::ModifyQuantity {
                order_id, new_qty, ..
            } => vec![self.modify_quantity(order_id, new_qty)],
            OrderEvent::CancelReplace {
                order_id,
                new_order_id,
                new_qty,
                new_price,
                ..
            } => {
                vec![self.cancel_replace(order_id, new_order_id, new_qty, new_price)?]
            }
        };

        self.emit(&reports);
        let duration_ns = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.emit_latency(event, duration_ns);
        if self.debug_mode {
            trace!(?event, reports = reports.len(), "processed order event");
        }
        Ok(reports)
    }

    /// Feeds a sequence of events (or, via `make_event`, reports) to
    /// reconstruct state from a log (spec §4.D `build`).
    pub fn build(
        &mut self,
        events: impl IntoIterator<Item = OrderEvent>,
    ) -> Result<(), EngineError> {
        for event in events {
            self.process(event)?;
        }
        Ok(())
    }

    fn next_report(
        &mut self,
        order_id: u64,
        side: Side,
        status: ReportStatus,
        kind: ReportKind,
    ) -> Report {
        Report {
            report_id: self.report_ids.next(),
            timestamp: self.clock.now(),
            order_id,
            side,
            status,
            agent_id_hash: None,
            latency_ns: None,
            message: None,
            kind,
        }
    }

    fn submit_limit(
        &mut self,
        order_id: u64,
        side: Side,
        qty: u64,
        price: u128,
    ) -> Result<Vec<Report>, EngineError> {
        if qty == 0 {
            return Err(EngineError::NullOrder);
        }
        let ts = self.clock.now();
        let order = Order::new_limit(order_id, ts, side, price, qty);
        let mut reports = vec![self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::LimitSubmit {
                order: order.clone(),
            },
        )];

        let mut remaining = qty;

        // Step 2: drain resting market orders on the opposite side that can
        // execute against this incoming limit at its own price.
        let opp = side.opposite();
        let mut fills: Vec<(u64, u64, bool)> = Vec::new();
        remaining = self
            .book
            .drain_market_queue(opp, remaining, |maker, filled_qty| {
                fills.push((
                    maker.borrow().order_id,
                    filled_qty,
                    maker.borrow().quantity == 0,
                ));
            });
        // These are resting market orders the book had queued while waiting
        // for liquidity; the incoming limit is the maker here, and the
        // queued market order is the taker (spec §4.D).
        let (buy_order_type, sell_order_type) = match side {
            Side::Buy => (OrderType::Limit, OrderType::Market),
            Side::Sell => (OrderType::Market, OrderType::Limit),
        };
        for (maker_id, filled_qty, maker_done) in fills {
            self.clock.tick(1);
            let trade = self.record_trade(
                side,
                order_id,
                maker_id,
                filled_qty,
                price,
                buy_order_type,
                sell_order_type,
                opp == Side::Buy,
            );
            reports.push(self.execution_report(
                order_id,
                side,
                OrderType::Limit,
                maker_id,
                trade.trade_id,
                filled_qty,
                price,
                true,
                remaining == 0,
            ));
            reports.push(self.execution_report(
                maker_id,
                opp,
                OrderType::Market,
                order_id,
                trade.trade_id,
                filled_qty,
                price,
                false,
                maker_done,
            ));
        }

        // Step 3: walk the book while the top opposite level crosses.
        while remaining > 0 {
            let Some((best_price, _)) = self.book.best(opp) else {
                break;
            };
            let crosses = match side {
                Side::Buy => best_price <= price,
                Side::Sell => best_price >= price,
            };
            if !crosses {
                break;
            }
            let Some(maker) = self.book.peek_front(opp) else {
                break;
            };
            let (maker_id, maker_qty) = {
                let m = maker.borrow();
                (m.order_id, m.quantity)
            };
            let fill = maker_qty.min(remaining);
            self.book.consume_front(opp, fill);
            remaining -= fill;
            self.clock.tick(1);
            // Both sides are limit orders here.
            let trade = self.record_trade(
                side,
                order_id,
                maker_id,
                fill,
                best_price,
                OrderType::Limit,
                OrderType::Limit,
                side == Side::Buy,
            );
            let maker_done = fill == maker_qty;
            reports.push(self.execution_report(
                order_id,
                side,
                OrderType::Limit,
                maker_id,
                trade.trade_id,
                fill,
                best_price,
                false,
                remaining == 0,
            ));
            reports.push(self.execution_report(
                maker_id,
                opp,
                OrderType::Limit,
                order_id,
                trade.trade_id,
                fill,
                best_price,
                true,
                maker_done,
            ));
        }

        if remaining > 0 {
            let order = Order::new_limit(order_id, self.clock.now(), side, price, remaining);
            self.book.place_limit(Rc::new(RefCell::new(order)))?;
            reports.push(self.next_report(
                order_id,
                side,
                ReportStatus::Success,
                ReportKind::LimitPlacement {
                    order_qty_remaining: remaining,
                    order_price: price,
                },
            ));
        }
        Ok(reports)
    }

    fn submit_market(
        &mut self,
        order_id: u64,
        side: Side,
        qty: u64,
    ) -> Result<Vec<Report>, EngineError> {
        if qty == 0 {
            return Err(EngineError::NullOrder);
        }
        let order = Order::new_market(order_id, self.clock.now(), side, qty);
        let mut reports = vec![self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::MarketSubmit { order },
        )];

        let opp = side.opposite();
        let mut remaining = qty;
        while remaining > 0 {
            let Some(maker) = self.book.peek_front(opp) else {
                break;
            };
            let (maker_id, maker_qty, maker_price) = {
                let m = maker.borrow();
                (m.order_id, m.quantity, m.price.unwrap_or(0))
            };
            let fill = maker_qty.min(remaining);
            self.book.consume_front(opp, fill);
            remaining -= fill;
            self.clock.tick(1);
            // The incoming market order is always the taker; the resting
            // order it crosses is always a limit.
            let (buy_order_type, sell_order_type) = match side {
                Side::Buy => (OrderType::Market, OrderType::Limit),
                Side::Sell => (OrderType::Limit, OrderType::Market),
            };
            let trade = self.record_trade(
                side,
                order_id,
                maker_id,
                fill,
                maker_price,
                buy_order_type,
                sell_order_type,
                side == Side::Buy,
            );
            let maker_done = fill == maker_qty;
            reports.push(self.execution_report(
                order_id,
                side,
                OrderType::Market,
                maker_id,
                trade.trade_id,
                fill,
                maker_price,
                false,
                remaining == 0,
            ));
            reports.push(self.execution_report(
                maker_id,
                opp,
                OrderType::Limit,
                order_id,
                trade.trade_id,
                fill,
                maker_price,
                true,
                maker_done,
            ));
        }

        if remaining > 0 {
            let state = if remaining == qty {
                OrderState::Active
            } else {
                OrderState::PartiallyFilled
            };
            let mut queued = Order::new_market(order_id, self.clock.now(), side, remaining);
            queued.state = state;
            self.book.enqueue_market(Rc::new(RefCell::new(queued)));
        }
        Ok(reports)
    }

    #[allow(clippy::too_many_arguments)]
    fn record_trade(
        &mut self,
        incoming_side: Side,
        incoming_id: u64,
        resting_id: u64,
        qty: u64,
        price: u128,
        buy_order_type: OrderType,
        sell_order_type: OrderType,
        is_buy_initiated: bool,
    ) -> Trade {
        let (buy_order_id, sell_order_id) = match incoming_side {
            Side::Buy => (incoming_id, resting_id),
            Side::Sell => (resting_id, incoming_id),
        };
        let trade = Trade {
            trade_id: self.trade_ids.next(),
            timestamp: self.clock.now(),
            buy_order_id,
            sell_order_id,
            quantity: qty,
            price,
            is_buy_limit: buy_order_type == OrderType::Limit,
            is_sell_limit: sell_order_type == OrderType::Limit,
            is_buy_initiated,
        };
        self.last_trade = Some(trade);
        trade
    }

    #[allow(clippy::too_many_arguments)]
    fn execution_report(
        &mut self,
        order_id: u64,
        side: Side,
        order_type: OrderType,
        match_order_id: u64,
        trade_id: u64,
        filled_qty: u64,
        filled_price: u128,
        is_maker: bool,
        fully_filled: bool,
    ) -> Report {
        let exec_type = if fully_filled {
            ExecType::Filled
        } else {
            ExecType::PartialFilled
        };
        self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::Execution {
                order_type,
                match_order_id,
                trade_id,
                filled_qty,
                filled_price,
                is_maker,
                exec_type,
            },
        )
    }

    fn lookup_live(&self, order_id: u64) -> Option<(Side, OrderHandle)> {
        let (side, _) = self.book.locate(order_id)?;
        let handle = self.book.get(order_id)?;
        Some((side, handle))
    }

    fn failure(&mut self, order_id: u64, side: Side, message: &str) -> Report {
        warn!(order_id, message, "recoverable lookup failure");
        let mut report = self.next_report(
            order_id,
            side,
            ReportStatus::Failure,
            ReportKind::Cancel {
                order_type: OrderType::Limit,
                order_qty: None,
                order_price: None,
            },
        );
        report.message = Some(message.to_string());
        report
    }

    fn cancel(&mut self, order_id: u64) -> Report {
        let Some((side, handle)) = self.lookup_live(order_id) else {
            return self.failure(order_id, Side::Buy, "order not found");
        };
        let (qty, price) = {
            let o = handle.borrow();
            (o.quantity, o.price)
        };
        self.book.remove(order_id);
        if let Some(last) = self.book.removed_orders().last() {
            debug_assert_eq!(last.order_id, order_id);
        }
        self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::Cancel {
                order_type: OrderType::Limit,
                order_qty: Some(qty),
                order_price: price,
            },
        )
    }

    fn partial_cancel(&mut self, order_id: u64, cancel_qty: u64) -> Report {
        let Some((side, handle)) = self.lookup_live(order_id) else {
            return self.failure(order_id, Side::Buy, "order not found");
        };
        let (qty, price) = {
            let o = handle.borrow();
            (o.quantity, o.price.unwrap_or(0))
        };
        if cancel_qty >= qty {
            // Caps at remaining: degrades to a full cancel (spec's resolved
            // open question).
            self.book.remove(order_id);
            return self.next_report(
                order_id,
                side,
                ReportStatus::Success,
                ReportKind::PartialCancel {
                    order_type: OrderType::Limit,
                    cancel_qty: qty,
                    order_qty_before: qty,
                    order_price: price,
                },
            );
        }
        let new_qty = qty - cancel_qty;
        self.book.shrink(order_id, new_qty);
        self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::PartialCancel {
                order_type: OrderType::Limit,
                cancel_qty,
                order_qty_before: qty,
                order_price: price,
            },
        )
    }

    fn modify_price(&mut self, order_id: u64, new_price: u128) -> Report {
        let Some((side, handle)) = self.lookup_live(order_id) else {
            return self.failure(order_id, Side::Buy, "order not found");
        };
        let old_qty = handle.borrow().quantity;
        self.book
            .requeue(order_id, new_price, old_qty, self.clock.now());
        self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::ModifyPrice {
                order_qty: old_qty,
                new_price,
            },
        )
    }

    fn modify_quantity(&mut self, order_id: u64, new_qty: u64) -> Report {
        let Some((side, handle)) = self.lookup_live(order_id) else {
            return self.failure(order_id, Side::Buy, "order not found");
        };
        let (old_qty, price) = {
            let o = handle.borrow();
            (o.quantity, o.price.unwrap_or(0))
        };
        if new_qty == 0 {
            self.book.remove(order_id);
            return self.next_report(
                order_id,
                side,
                ReportStatus::Success,
                ReportKind::Cancel {
                    order_type: OrderType::Limit,
                    order_qty: Some(old_qty),
                    order_price: Some(price),
                },
            );
        }
        if new_qty < old_qty {
            self.book.shrink(order_id, new_qty);
            return self.next_report(
                order_id,
                side,
                ReportStatus::Success,
                ReportKind::PartialCancel {
                    order_type: OrderType::Limit,
                    cancel_qty: old_qty - new_qty,
                    order_qty_before: old_qty,
                    order_price: price,
                },
            );
        }
        // Growing: moves to the tail of the same price level, losing time
        // priority (spec's resolved open question).
        self.book
            .requeue(order_id, price, new_qty, self.clock.now());
        self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::ModifyQuantity {
                order_price: price,
                new_qty,
            },
        )
    }

    fn cancel_replace(
        &mut self,
        order_id: u64,
        new_order_id: u64,
        new_qty: Option<u64>,
        new_price: Option<u128>,
    ) -> Result<Report, EngineError> {
        let Some((side, handle)) = self.lookup_live(order_id) else {
            return Ok(self.failure(order_id, Side::Buy, "order not found"));
        };
        let (old_qty, old_price) = {
            let o = handle.borrow();
            (o.quantity, o.price.unwrap_or(0))
        };
        let qty = new_qty.unwrap_or(old_qty);
        let price = new_price.unwrap_or(old_price);
        self.book.remove(order_id);
        let order = Order::new_limit(new_order_id, self.clock.now(), side, price, qty);
        self.book.place_limit(Rc::new(RefCell::new(order)))?;
        Ok(self.next_report(
            order_id,
            side,
            ReportStatus::Success,
            ReportKind::CancelReplace {
                order_type: OrderType::Limit,
                new_order_id,
                new_qty: qty,
                new_price: price,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_limit(
        engine: &mut MatchingEngine,
        order_id: u64,
        side: Side,
        qty: u64,
        price: u128,
    ) -> Vec<Report> {
        engine
            .process(OrderEvent::LimitSubmit {
                event_id: order_id,
                order_id,
                ts: 0,
                side,
                qty,
                price,
            })
            .unwrap()
    }

    #[test]
    fn simple_cross_scenario_s1() {
        let mut engine = MatchingEngine::new();
        submit_limit(&mut engine, 1, Side::Buy, 10, 99);
        submit_limit(&mut engine, 2, Side::Sell, 10, 101);

        let reports = engine
            .process(OrderEvent::MarketSubmit {
                event_id: 3,
                order_id: 3,
                ts: 0,
                side: Side::Buy,
                qty: 10,
            })
            .unwrap();

        assert!(matches!(reports[0].kind, ReportKind::MarketSubmit { .. }));
        assert_eq!(reports.len(), 3);
        let trade = engine.last_trade().unwrap();
        assert_eq!(trade.quantity, 10);
        assert_eq!(trade.price, 101);
        assert!(trade.is_buy_initiated);
        assert_eq!(engine.book().best_ask(), None);
    }

    #[test]
    fn walk_the_book_scenario_s2() {
        let mut engine = MatchingEngine::new();
        submit_limit(&mut engine, 1, Side::Sell, 5, 101);
        submit_limit(&mut engine, 2, Side::Sell, 5, 102);

        engine
            .process(OrderEvent::MarketSubmit {
                event_id: 3,
                order_id: 3,
                ts: 0,
                side: Side::Buy,
                qty: 8,
            })
            .unwrap();

        assert_eq!(engine.book().best_ask(), Some((102, 2)));
    }

    #[test]
    fn cancel_replace_decomposition_scenario_s5() {
        let mut engine = MatchingEngine::new();
        submit_limit(&mut engine, 1, Side::Buy, 10, 99);

        let reports = engine
            .process(OrderEvent::CancelReplace {
                event_id: 2,
                order_id: 1,
                ts: 0,
                new_order_id: 42,
                new_qty: Some(7),
                new_price: Some(98),
            })
            .unwrap();

        assert_eq!(engine.book().best_bid(), Some((98, 7)));
        let atoms = reports[0].decompose_into_atomic_reports();
        assert!(matches!(atoms[0].kind, ReportKind::Cancel { .. }));
        assert_eq!(atoms[1].order_id, 42);
    }

    #[test]
    fn lookup_miss_is_a_failure_report_not_an_error() {
        let mut engine = MatchingEngine::new();
        let reports = engine
            .process(OrderEvent::Cancel {
                event_id: 1,
                order_id: 999,
                ts: 0,
            })
            .unwrap();
        assert_eq!(reports[0].status, ReportStatus::Failure);
    }

    #[test]
    fn partial_cancel_overshoot_caps_at_full_cancel() {
        let mut engine = MatchingEngine::new();
        submit_limit(&mut engine, 1, Side::Buy, 10, 99);
        let reports = engine
            .process(OrderEvent::PartialCancel {
                event_id: 2,
                order_id: 1,
                ts: 0,
                cancel_qty: 999,
            })
            .unwrap();
        assert_eq!(reports[0].status, ReportStatus::Success);
        assert_eq!(engine.book().best_bid(), None);
    }

    #[test]
    fn growing_modify_quantity_loses_time_priority() {
        let mut engine = MatchingEngine::new();
        submit_limit(&mut engine, 1, Side::Buy, 5, 99);
        submit_limit(&mut engine, 2, Side::Buy, 5, 99);

        engine
            .process(OrderEvent::ModifyQuantity {
                event_id: 3,
                order_id: 1,
                ts: 0,
                new_qty: 20,
            })
            .unwrap();

        // order 1 grew and moved behind order 2; consuming 5 should now hit
        // order 2 first.
        let reports = engine
            .process(OrderEvent::MarketSubmit {
                event_id: 4,
                order_id: 4,
                ts: 0,
                side: Side::Sell,
                qty: 5,
            })
            .unwrap();
        let exec = reports
            .iter()
            .find(|r| matches!(r.kind, ReportKind::Execution { is_maker: true, .. }))
            .unwrap();
        assert_eq!(exec.order_id, 2);
    }

    #[test]
    fn report_ids_and_timestamps_are_monotone() {
        let mut engine = MatchingEngine::new();
        let mut all_reports = Vec::new();
        all_reports.extend(submit_limit(&mut engine, 1, Side::Sell, 5, 101));
        all_reports.extend(submit_limit(&mut engine, 2, Side::Buy, 5, 101));
        let mut last_id = 0;
        let mut last_ts = 0;
        for r in &all_reports {
            assert!(r.report_id > last_id);
            assert!(r.timestamp >= last_ts);
            last_id = r.report_id;
            last_ts = r.timestamp;
        }
    }
}
