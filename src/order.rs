//! Order, event, and trade data model (spec component B).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the book an order or report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side an incoming order of this side would match against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Limit orders carry a price; market orders do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Market => write!(f, "MARKET"),
        }
    }
}

/// Lifecycle state of an order. `quantity > 0` iff
/// `state ∈ {Active, PartiallyFilled}`; `Filled` implies `quantity == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
    Invalid,
}

/// Optional tags carried by an order for downstream attribution. None of
/// these fields affect matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMeta {
    pub symbol: Option<String>,
    pub exchange_id: Option<String>,
    /// SHA-256-derived hash of the submitting agent's identifier, truncated
    /// to 64 bits. See [`crate::manager::hash_agent_id`].
    pub agent_id_hash: Option<u64>,
    pub mpid: Option<String>,
}

/// A live or historical order. `price` is an int-price (`round(price /
/// tick)`) and is `None` for market orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: u64,
    pub timestamp: u64,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<u128>,
    pub quantity: u64,
    pub state: OrderState,
    pub meta: OrderMeta,
}

impl Order {
    pub fn new_limit(
        order_id: u64,
        timestamp: u64,
        side: Side,
        price: u128,
        quantity: u64,
    ) -> Self {
        Self {
            order_id,
            timestamp,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            state: OrderState::Active,
            meta: OrderMeta::default(),
        }
    }

    pub fn new_market(order_id: u64, timestamp: u64, side: Side, quantity: u64) -> Self {
        Self {
            order_id,
            timestamp,
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            state: OrderState::Active,
            meta: OrderMeta::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.state, OrderState::Active | OrderState::PartiallyFilled)
    }
}

/// A completed match between a resting (maker) order and an incoming
/// (taker) order. `price` is always the maker's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub timestamp: u64,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub quantity: u64,
    pub price: u128,
    pub is_buy_limit: bool,
    pub is_sell_limit: bool,
    /// `true` iff the taker (aggressing) side was BUY.
    pub is_buy_initiated: bool,
}

/// An input to the matching engine (spec §6.1). Every variant carries its
/// own `event_id`, `order_id`, and `ts` (assigned by the caller/manager,
/// not by the engine's internal clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    LimitSubmit {
        event_id: u64,
        order_id: u64,
        ts: u64,
        side: Side,
        qty: u64,
        price: u128,
    },
    MarketSubmit {
        event_id: u64,
        order_id: u64,
        ts: u64,
        side: Side,
        qty: u64,
    },
    Cancel {
        event_id: u64,
        order_id: u64,
        ts: u64,
    },
    PartialCancel {
        event_id: u64,
        order_id: u64,
        ts: u64,
        cancel_qty: u64,
    },
    ModifyPrice {
        event_id: u64,
        order_id: u64,
        ts: u64,
        new_price: u128,
    },
    ModifyQuantity {
        event_id: u64,
        order_id: u64,
        ts: u64,
        new_qty: u64,
    },
    CancelReplace {
        event_id: u64,
        order_id: u64,
        ts: u64,
        new_order_id: u64,
        new_qty: Option<u64>,
        new_price: Option<u128>,
    },
}

impl OrderEvent {
    /// The order targeted by this event (the pre-existing order for every
    /// non-submit variant, the newly created order for submits).
    pub fn order_id(&self) -> u64 {
        match self {
            OrderEvent::LimitSubmit { order_id, .. }
            | OrderEvent::MarketSubmit { order_id, .. }
            | OrderEvent::Cancel { order_id, .. }
            | OrderEvent::PartialCancel { order_id, .. }
            | OrderEvent::ModifyPrice { order_id, .. }
            | OrderEvent::ModifyQuantity { order_id, .. }
            | OrderEvent::CancelReplace { order_id, .. } => *order_id,
        }
    }

    pub fn is_submit(&self) -> bool {
        matches!(
            self,
            OrderEvent::LimitSubmit { .. } | OrderEvent::MarketSubmit { .. }
        )
    }
}
