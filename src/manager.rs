//! The order event manager: creates events from user intents, rounds
//! prices to the configured tick, and mirrors active-order state purely
//! from the engine's report stream (spec component F).

use crate::clock::IdAllocator;
use crate::engine::MatchingEngine;
use crate::error::ManagerError;
use crate::monitor::{EngineMonitor, QualifyingStrategy};
use crate::order::{Order, OrderEvent, Side};
use crate::report::{Report, ReportKind};
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::info;

/// Hashes an agent identifier down to 64 bits with SHA-256, truncating to
/// the first 8 bytes. Used to tag orders without carrying raw agent
/// identities through the report stream.
pub fn hash_agent_id(agent_id: &str) -> u64 {
    let digest = Sha256::digest(agent_id.as_bytes());
    u64::from_be_bytes(
        digest[..8]
            .try_into()
            .expect("sha256 digest is at least 8 bytes"),
    )
}

/// Rounds a floating-point price to the nearest multiple of `tick` and
/// returns the corresponding int-price (`round(price / tick)`), per spec
/// §3's "int-price" definition.
pub fn round_to_tick(price: f64, tick: f64) -> u128 {
    (price / tick).round() as u128
}

type Mirror = Rc<RefCell<HashMap<u64, Order>>>;
type PendingTags = Rc<RefCell<HashMap<u64, (u64, String)>>>;

/// Per-run configuration for the manager (spec §6.4).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_price_tick: f64,
    pub min_lot_size: u32,
    pub debug_mode: bool,
    /// Monitor's top-levels depth for `TopOfBookTick` qualifying and depth
    /// snapshots.
    pub order_book_num_levels: usize,
    /// Monitor's bounded history capacity (snapshots and triggers).
    pub time_series_collector_max_size: usize,
    /// Monitor's qualifying policy.
    pub order_book_statistics_timestamp_strategy: QualifyingStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_price_tick: 0.01,
            min_lot_size: 1,
            debug_mode: false,
            order_book_num_levels: 10,
            time_series_collector_max_size: 1_000_000,
            order_book_statistics_timestamp_strategy: QualifyingStrategy::TopOfBookTick,
        }
    }
}

/// Creates engine events from user intents and keeps two mirrors in
/// lockstep with the engine purely from its reports:
/// `active_limit_orders` and `queued_market_orders`.
pub struct OrderEventManager {
    engine: MatchingEngine,
    event_ids: IdAllocator,
    order_ids: IdAllocator,
    config: EngineConfig,
    symbol: String,
    active_limit_orders: Mirror,
    queued_market_orders: Mirror,
    pending_tags: PendingTags,
    monitor: Rc<RefCell<EngineMonitor>>,
}

impl OrderEventManager {
    pub fn new(symbol: impl Into<String>, config: EngineConfig) -> Self {
        let mut engine = MatchingEngine::new().with_debug_mode(config.debug_mode);
        let active_limit_orders: Mirror = Rc::new(RefCell::new(HashMap::new()));
        let queued_market_orders: Mirror = Rc::new(RefCell::new(HashMap::new()));
        let pending_tags: PendingTags = Rc::new(RefCell::new(HashMap::new()));

        let mirror_active = active_limit_orders.clone();
        let mirror_queued = queued_market_orders.clone();
        let mirror_tags = pending_tags.clone();
        engine.add_order_processing_callback(move |report, _book| {
            mirror_report(report, &mirror_active, &mirror_queued, &mirror_tags);
        });

        let monitor = Rc::new(RefCell::new(EngineMonitor::new(
            config.order_book_statistics_timestamp_strategy,
            config.time_series_collector_max_size,
            config.order_book_num_levels,
        )));
        EngineMonitor::attach(monitor.clone(), &mut engine);

        Self {
            engine,
            event_ids: IdAllocator::new(),
            order_ids: IdAllocator::new(),
            config,
            symbol: symbol.into(),
            active_limit_orders,
            queued_market_orders,
            pending_tags,
            monitor,
        }
    }

    pub fn monitor(&self) -> std::cell::Ref<'_, EngineMonitor> {
        self.monitor.borrow()
    }

    fn tag(&mut self, order_id: u64, agent_id: &str) {
        self.pending_tags
            .borrow_mut()
            .insert(order_id, (hash_agent_id(agent_id), self.symbol.clone()));
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MatchingEngine {
        &mut self.engine
    }

    pub fn active_limit_orders(&self) -> std::cell::Ref<'_, HashMap<u64, Order>> {
        self.active_limit_orders.borrow()
    }

    pub fn queued_market_orders(&self) -> std::cell::Ref<'_, HashMap<u64, Order>> {
        self.queued_market_orders.borrow()
    }

    fn next_order_id(&mut self) -> u64 {
        self.order_ids.next()
    }

    /// Submits a new limit order, returning the emitted event for test
    /// determinism.
    pub fn submit_limit(
        &mut self,
        agent_id: &str,
        side: Side,
        qty: u64,
        price: f64,
    ) -> Result<OrderEvent, ManagerError> {
        if qty == 0 {
            return Err(ManagerError::ZeroQuantity);
        }
        if price < 0.0 {
            return Err(ManagerError::NegativePrice(price));
        }
        let order_id = self.next_order_id();
        let int_price = round_to_tick(price, self.config.min_price_tick);
        let event = OrderEvent::LimitSubmit {
            event_id: self.event_ids.next(),
            order_id,
            ts: 0,
            side,
            qty,
            price: int_price,
        };
        self.tag(order_id, agent_id);
        info!(symbol = %self.symbol, order_id, %side, qty, price = int_price, "submit limit");
        let _ = self.engine.process(event)?;
        Ok(event)
    }

    pub fn submit_market(
        &mut self,
        agent_id: &str,
        side: Side,
        qty: u64,
    ) -> Result<OrderEvent, ManagerError> {
        if qty == 0 {
            return Err(ManagerError::ZeroQuantity);
        }
        let order_id = self.next_order_id();
        let event = OrderEvent::MarketSubmit {
            event_id: self.event_ids.next(),
            order_id,
            ts: 0,
            side,
            qty,
        };
        self.tag(order_id, agent_id);
        info!(symbol = %self.symbol, order_id, %side, qty, "submit market");
        let _ = self.engine.process(event)?;
        Ok(event)
    }

    pub fn cancel(&mut self, order_id: u64) -> Result<OrderEvent, ManagerError> {
        let event = OrderEvent::Cancel {
            event_id: self.event_ids.next(),
            order_id,
            ts: 0,
        };
        let _ = self.engine.process(event)?;
        Ok(event)
    }

    pub fn partial_cancel(
        &mut self,
        order_id: u64,
        cancel_qty: u64,
    ) -> Result<OrderEvent, ManagerError> {
        let event = OrderEvent::PartialCancel {
            event_id: self.event_ids.next(),
            order_id,
            ts: 0,
            cancel_qty,
        };
        let _ = self.engine.process(event)?;
        Ok(event)
    }

    pub fn modify_price(
        &mut self,
        order_id: u64,
        new_price: f64,
    ) -> Result<OrderEvent, ManagerError> {
        let new_price = round_to_tick(new_price, self.config.min_price_tick);
        let event = OrderEvent::ModifyPrice {
            event_id: self.event_ids.next(),
            order_id,
            ts: 0,
            new_price,
        };
        let _ = self.engine.process(event)?;
        Ok(event)
    }

    pub fn modify_quantity(
        &mut self,
        order_id: u64,
        new_qty: u64,
    ) -> Result<OrderEvent, ManagerError> {
        let event = OrderEvent::ModifyQuantity {
            event_id: self.event_ids.next(),
            order_id,
            ts: 0,
            new_qty,
        };
        let _ = self.engine.process(event)?;
        Ok(event)
    }

    pub fn cancel_replace(
        &mut self,
        order_id: u64,
        new_qty: Option<u64>,
        new_price: Option<f64>,
    ) -> Result<OrderEvent, ManagerError> {
        let new_order_id = self.next_order_id();
        let new_price = new_price.map(|p| round_to_tick(p, self.config.min_price_tick));
        let event = OrderEvent::CancelReplace {
            event_id: self.event_ids.next(),
            order_id,
            ts: 0,
            new_order_id,
            new_qty,
            new_price,
        };
        let _ = self.engine.process(event)?;
        Ok(event)
    }
}

fn mirror_report(report: &Report, active: &Mirror, queued: &Mirror, tags: &PendingTags) {
    use crate::report::ReportStatus;
    if report.status == ReportStatus::Failure {
        return;
    }
    match &report.kind {
        ReportKind::LimitSubmit { order } => {
            let mut order = order.clone();
            if let Some((hash, symbol)) = tags.borrow_mut().remove(&report.order_id) {
                order.meta.agent_id_hash = Some(hash);
                order.meta.symbol = Some(symbol);
            }
            active.borrow_mut().insert(report.order_id, order);
        }
        ReportKind::LimitPlacement {
            order_qty_remaining,
            order_price,
        } => {
            if let Some(order) = active.borrow_mut().get_mut(&report.order_id) {
                order.quantity = *order_qty_remaining;
                order.price = Some(*order_price);
            }
        }
        ReportKind::MarketSubmit { order } => {
            let mut order = order.clone();
            if let Some((hash, symbol)) = tags.borrow_mut().remove(&report.order_id) {
                order.meta.agent_id_hash = Some(hash);
                order.meta.symbol = Some(symbol);
            }
            queued.borrow_mut().insert(report.order_id, order);
        }
        ReportKind::Execution {
            filled_qty,
            is_maker,
            ..
        } => {
            let mut a = active.borrow_mut();
            if let Some(order) = a.get_mut(&report.order_id) {
                order.quantity = order.quantity.saturating_sub(*filled_qty);
                if order.quantity == 0 {
                    a.remove(&report.order_id);
                }
            }
            drop(a);
            if !is_maker {
                let mut q = queued.borrow_mut();
                if let Some(order) = q.get_mut(&report.order_id) {
                    order.quantity = order.quantity.saturating_sub(*filled_qty);
                    if order.quantity == 0 {
                        q.remove(&report.order_id);
                    }
                }
            }
        }
        ReportKind::Cancel { .. } => {
            active.borrow_mut().remove(&report.order_id);
            queued.borrow_mut().remove(&report.order_id);
        }
        ReportKind::PartialCancel { cancel_qty, .. } => {
            let mut a = active.borrow_mut();
            if let Some(order) = a.get_mut(&report.order_id) {
                if *cancel_qty >= order.quantity {
                    a.remove(&report.order_id);
                } else {
                    order.quantity -= cancel_qty;
                }
            }
        }
        ReportKind::ModifyPrice { new_price, .. } => {
            if let Some(order) = active.borrow_mut().get_mut(&report.order_id) {
                order.price = Some(*new_price);
            }
        }
        ReportKind::ModifyQuantity { new_qty, .. } => {
            if let Some(order) = active.borrow_mut().get_mut(&report.order_id) {
                order.quantity = *new_qty;
            }
        }
        ReportKind::CancelReplace {
            new_order_id,
            new_qty,
            new_price,
            ..
        } => {
            let mut a = active.borrow_mut();
            if let Some(mut order) = a.remove(&report.order_id) {
                order.order_id = *new_order_id;
                order.quantity = *new_qty;
                order.price = Some(*new_price);
                a.insert(*new_order_id, order);
            }
        }
    }
}
