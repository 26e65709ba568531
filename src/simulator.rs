//! Zero-intelligence simulation scheduler: generates a random but
//! reproducible stream of order events around an anchor price (spec
//! component H, supplemented with `RateSampler::DepthProportional` from
//! the original implementation).

use crate::book::OrderBook;
use crate::manager::{EngineConfig, OrderEventManager};
use crate::order::{OrderEvent, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// How often a generator fires per logical tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateSampler {
    /// Fires with fixed probability `p` every tick.
    Constant(f64),
    /// Fires more often the further the book's imbalance sits from flat,
    /// biased toward the side with less resting depth — thin books attract
    /// more liquidity-providing activity. `offset_ticks` is added to the
    /// base rate; `scale` controls sensitivity to the imbalance magnitude.
    DepthProportional { offset_ticks: f64, scale: f64 },
}

impl RateSampler {
    fn probability(&self, book: &OrderBook) -> f64 {
        match self {
            RateSampler::Constant(p) => *p,
            RateSampler::DepthProportional {
                offset_ticks,
                scale,
            } => {
                let imbalance = book.imbalance();
                let magnitude = if imbalance.is_nan() {
                    1.0
                } else {
                    imbalance.abs()
                };
                (offset_ticks + scale * magnitude).clamp(0.0, 1.0)
            }
        }
    }
}

/// Reproducible configuration for a simulation run (spec §6.4 /
/// supplemented scheduler parameters).
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub anchor_price: f64,
    pub num_grids: u32,
    pub random_seed: u64,
    pub max_timestamp: Option<u64>,
    pub max_num_events: Option<u64>,
    pub limit_rate: RateSampler,
    pub market_rate: RateSampler,
    pub cancel_rate: RateSampler,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            anchor_price: 100.0,
            num_grids: 20,
            random_seed: 0,
            max_timestamp: None,
            max_num_events: Some(1_000),
            limit_rate: RateSampler::Constant(0.6),
            market_rate: RateSampler::Constant(0.1),
            cancel_rate: RateSampler::Constant(0.2),
        }
    }
}

/// Drives an [`OrderEventManager`] with a zero-intelligence order flow:
/// on each tick, independently samples whether to submit a limit order
/// (at a random grid offset from the anchor), a market order, or cancel a
/// random resting order.
pub struct Scheduler {
    manager: OrderEventManager,
    config: SimulatorConfig,
    rng: StdRng,
    ticks_elapsed: u64,
    events_emitted: u64,
}

impl Scheduler {
    pub fn new(symbol: impl Into<String>, config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.random_seed);
        Self {
            manager: OrderEventManager::new(symbol, EngineConfig::default()),
            config,
            rng,
            ticks_elapsed: 0,
            events_emitted: 0,
        }
    }

    pub fn manager(&self) -> &OrderEventManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut OrderEventManager {
        &mut self.manager
    }

    fn done(&self) -> bool {
        if let Some(max_ts) = self.config.max_timestamp
            && self.ticks_elapsed >= max_ts
        {
            return true;
        }
        if let Some(max_events) = self.config.max_num_events
            && self.events_emitted >= max_events
        {
            return true;
        }
        false
    }

    /// Runs one logical tick: each of limit/market/cancel fires
    /// independently per its `RateSampler`, producing zero or more events.
    /// Returns the events actually submitted this tick.
    pub fn step_one_tick(&mut self) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        let book = self.manager.engine().book();

        if self.rng.gen_bool(self.config.limit_rate.probability(book))
            && let Some(event) = self.generate_limit()
        {
            events.push(event);
        }
        if self.rng.gen_bool(
            self.config
                .market_rate
                .probability(self.manager.engine().book()),
        ) && let Some(event) = self.generate_market()
        {
            events.push(event);
        }
        if self.rng.gen_bool(
            self.config
                .cancel_rate
                .probability(self.manager.engine().book()),
        ) && let Some(event) = self.generate_cancel()
        {
            events.push(event);
        }

        self.events_emitted += events.len() as u64;
        self.ticks_elapsed += 1;
        debug!(
            tick = self.ticks_elapsed,
            emitted = events.len(),
            "simulator tick"
        );
        events
    }

    fn generate_limit(&mut self) -> Option<OrderEvent> {
        let side = if self.rng.gen_bool(0.5) {
            Side::Buy
        } else {
            Side::Sell
        };
        let grid_offset = self.rng.gen_range(0..self.config.num_grids) as f64;
        let tick = 0.01;
        let price = match side {
            Side::Buy => self.config.anchor_price - grid_offset * tick,
            Side::Sell => self.config.anchor_price + grid_offset * tick,
        };
        let qty = self.rng.gen_range(1..=10);
        self.manager
            .submit_limit("zi-agent", side, qty, price.max(tick))
            .ok()
    }

    fn generate_market(&mut self) -> Option<OrderEvent> {
        let side = if self.rng.gen_bool(0.5) {
            Side::Buy
        } else {
            Side::Sell
        };
        let qty = self.rng.gen_range(1..=5);
        self.manager.submit_market("zi-agent", side, qty).ok()
    }

    fn generate_cancel(&mut self) -> Option<OrderEvent> {
        // Sorted for determinism: `HashMap` iteration order is not stable
        // across runs, but the simulator must replay identically for a
        // fixed seed.
        let mut order_ids: Vec<u64> = self.manager.active_limit_orders().keys().copied().collect();
        order_ids.sort_unstable();
        if order_ids.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..order_ids.len());
        self.manager.cancel(order_ids[idx]).ok()
    }

    /// Runs ticks until the configured stop condition is reached.
    pub fn simulate(&mut self) -> Vec<OrderEvent> {
        let mut all = Vec::new();
        while !self.done() {
            all.extend(self.step_one_tick());
        }
        all
    }

    /// Runs ticks until `self.ticks_elapsed >= target`, ignoring
    /// `max_num_events` (but still respecting it as an upper bound).
    pub fn advance_to_timestamp(&mut self, target: u64) -> Vec<OrderEvent> {
        let mut all = Vec::new();
        while self.ticks_elapsed < target && !self.done() {
            all.extend(self.step_one_tick());
        }
        all
    }
}
