//! The engine monitor: samples book statistics on a qualifying policy and
//! keeps a bounded, parallel history of reports and snapshots (spec
//! component G, supplemented with richer aggregates per §5).

use crate::book::OrderBook;
use crate::order::{OrderType, Side};
use crate::report::{Report, ReportKind};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// When to take a new statistics snapshot. `TopOfBookTick` is the default:
/// sample when the event's price is within the top-N levels of its side;
/// market events always qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualifyingStrategy {
    #[default]
    TopOfBookTick,
    EachOrderEvent,
    EachMarketOrder,
    EachTrade,
}

/// Running counts of every report kind seen so far. Updated unconditionally
/// on every report, independent of whether the sample qualifies for a
/// snapshot, so the counts never undercount a suppressed sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub limit_submits: u64,
    pub market_submits: u64,
    pub cancels: u64,
    pub partial_cancels: u64,
    pub modify_prices: u64,
    pub modify_quantities: u64,
    pub cancel_replaces: u64,
    pub trades: u64,
}

/// A single statistics sample, timestamped at the engine's logical clock.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookStatisticsByTimestamp {
    pub timestamp: u64,
    pub best_bid: Option<(u128, u64)>,
    pub best_ask: Option<(u128, u64)>,
    pub mid: f64,
    pub micro: f64,
    pub spread: f64,
    pub half_spread: f64,
    pub imbalance: f64,
    pub bid_depth: Vec<crate::book::LevelInfo>,
    pub ask_depth: Vec<crate::book::LevelInfo>,
    pub last_trade_price: Option<u128>,
    pub last_trade_qty: Option<u64>,
    pub last_trade_is_buy_initiated: Option<bool>,
    pub cumulative_trade_volume: u64,
    pub cumulative_trade_notional: u128,
    pub counts: EventCounts,
}

/// Samples the book on a qualifying policy and keeps parallel, bounded
/// ring buffers of snapshots and the report that triggered each one.
/// `snapshots.len() == triggers.len()` always (spec invariant).
pub struct EngineMonitor {
    strategy: QualifyingStrategy,
    capacity: usize,
    snapshots: VecDeque<OrderBookStatisticsByTimestamp>,
    triggers: VecDeque<Report>,
    counts: EventCounts,
    cumulative_trade_volume: u64,
    cumulative_trade_notional: u128,
    last_trade_price: Option<u128>,
    last_trade_qty: Option<u64>,
    last_trade_is_buy_initiated: Option<bool>,
    last_counted_trade_id: Option<u64>,
    depth_levels: usize,
}

impl EngineMonitor {
    pub fn new(strategy: QualifyingStrategy, capacity: usize, depth_levels: usize) -> Self {
        Self {
            strategy,
            capacity: capacity.max(1),
            snapshots: VecDeque::new(),
            triggers: VecDeque::new(),
            counts: EventCounts::default(),
            cumulative_trade_volume: 0,
            cumulative_trade_notional: 0,
            last_trade_price: None,
            last_trade_qty: None,
            last_trade_is_buy_initiated: None,
            last_counted_trade_id: None,
            depth_levels,
        }
    }

    /// Wires this monitor into an engine's report stream. The returned
    /// handle must outlive the engine registration; use
    /// [`EngineMonitor::attach`] for ownership shared with the caller.
    pub fn attach(monitor: Rc<RefCell<Self>>, engine: &mut crate::engine::MatchingEngine) {
        engine.add_order_processing_callback(move |report, book| {
            monitor.borrow_mut().on_report(report, book);
        });
    }

    pub fn snapshots(&self) -> &VecDeque<OrderBookStatisticsByTimestamp> {
        &self.snapshots
    }

    pub fn triggers(&self) -> &VecDeque<Report> {
        &self.triggers
    }

    pub fn counts(&self) -> EventCounts {
        self.counts
    }

    fn on_report(&mut self, report: &Report, book: &OrderBook) {
        self.update_counts(report);

        let qualifies = match self.strategy {
            QualifyingStrategy::TopOfBookTick => self.is_within_top_of_book(report, book),
            QualifyingStrategy::EachOrderEvent => true,
            QualifyingStrategy::EachMarketOrder => {
                matches!(report.kind, ReportKind::MarketSubmit { .. })
            }
            QualifyingStrategy::EachTrade => matches!(report.kind, ReportKind::Execution { .. }),
        };
        if !qualifies {
            return;
        }

        let snapshot = OrderBookStatisticsByTimestamp {
            timestamp: report.timestamp,
            best_bid: book.best_bid(),
            best_ask: book.best_ask(),
            mid: book.mid(),
            micro: book.micro(),
            spread: book.spread(),
            half_spread: book.half_spread(),
            imbalance: book.imbalance(),
            bid_depth: book.depth(Side::Buy, self.depth_levels),
            ask_depth: book.depth(Side::Sell, self.depth_levels),
            last_trade_price: self.last_trade_price,
            last_trade_qty: self.last_trade_qty,
            last_trade_is_buy_initiated: self.last_trade_is_buy_initiated,
            cumulative_trade_volume: self.cumulative_trade_volume,
            cumulative_trade_notional: self.cumulative_trade_notional,
            counts: self.counts,
        };
        self.push(snapshot, report.clone());
    }

    /// `TopOfBookTick` qualifying rule: a market-typed event always
    /// qualifies; otherwise the event's price must sit within the top-N
    /// levels of its side (or fewer than N levels exist on that side).
    fn is_within_top_of_book(&self, report: &Report, book: &OrderBook) -> bool {
        let (order_type, price) = match &report.kind {
            ReportKind::LimitSubmit { order } => (order.order_type, order.price),
            ReportKind::MarketSubmit { order } => (order.order_type, order.price),
            ReportKind::LimitPlacement { order_price, .. } => {
                (OrderType::Limit, Some(*order_price))
            }
            ReportKind::Cancel {
                order_type,
                order_price,
                ..
            } => (*order_type, *order_price),
            ReportKind::PartialCancel {
                order_type,
                order_price,
                ..
            } => (*order_type, Some(*order_price)),
            ReportKind::CancelReplace {
                order_type,
                new_price,
                ..
            } => (*order_type, Some(*new_price)),
            ReportKind::ModifyPrice { new_price, .. } => (OrderType::Limit, Some(*new_price)),
            ReportKind::ModifyQuantity { order_price, .. } => {
                (OrderType::Limit, Some(*order_price))
            }
            ReportKind::Execution {
                order_type,
                filled_price,
                ..
            } => (*order_type, Some(*filled_price)),
        };
        if order_type == OrderType::Market {
            return true;
        }
        let Some(price) = price else {
            return true;
        };
        let top = book.depth(report.side, self.depth_levels);
        if top.len() < self.depth_levels {
            return true;
        }
        let nth_best = top.last().expect("non-empty top-N").price;
        match report.side {
            Side::Buy => price >= nth_best,
            Side::Sell => price <= nth_best,
        }
    }

    fn update_counts(&mut self, report: &Report) {
        match &report.kind {
            ReportKind::LimitSubmit { .. } => self.counts.limit_submits += 1,
            ReportKind::MarketSubmit { .. } => self.counts.market_submits += 1,
            ReportKind::Cancel { .. } => self.counts.cancels += 1,
            ReportKind::PartialCancel { .. } => self.counts.partial_cancels += 1,
            ReportKind::ModifyPrice { .. } => self.counts.modify_prices += 1,
            ReportKind::ModifyQuantity { .. } => self.counts.modify_quantities += 1,
            ReportKind::CancelReplace { .. } => self.counts.cancel_replaces += 1,
            ReportKind::Execution {
                trade_id,
                filled_qty,
                filled_price,
                ..
            } => {
                // Every fill produces two execution reports (taker + maker)
                // against the same trade_id; count the trade exactly once.
                if self.last_counted_trade_id != Some(*trade_id) {
                    self.last_counted_trade_id = Some(*trade_id);
                    self.counts.trades += 1;
                    self.cumulative_trade_volume += filled_qty;
                    self.cumulative_trade_notional += (*filled_qty as u128) * filled_price;
                    self.last_trade_price = Some(*filled_price);
                    self.last_trade_qty = Some(*filled_qty);
                    self.last_trade_is_buy_initiated = Some(report.side == Side::Buy);
                }
            }
            ReportKind::LimitPlacement { .. } => {}
        }
    }

    fn push(&mut self, snapshot: OrderBookStatisticsByTimestamp, trigger: Report) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
            self.triggers.pop_front();
        }
        self.snapshots.push_back(snapshot);
        self.triggers.push_back(trigger);
    }

    pub fn depth_levels(&self) -> usize {
        self.depth_levels
    }
}
