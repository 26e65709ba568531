//! Engine and manager error types.

use thiserror::Error;

/// Fatal invariant violations (spec §7). These are programming bugs or
/// corrupt inputs — the engine raises and does not attempt recovery. They
/// are distinct from recoverable lookup failures, which are surfaced as
/// `status: FAILURE` reports instead of an `Err`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A null/empty order or event was handed to the engine.
    #[error("null order or event handed to the engine")]
    NullOrder,

    /// An incoming order or event reused a live `order_id`.
    #[error("duplicate order id: {0}")]
    DuplicateOrderId(u64),

    /// A price was negative (prices are unsigned in the wire model, but an
    /// upstream caller can still construct an out-of-range one via casts).
    #[error("negative price")]
    NegativePrice,

    /// The order index disagreed with the price level it pointed to.
    #[error("index mismatch for order {order_id}: expected at {side} price {expected_price}")]
    IndexMismatch {
        order_id: u64,
        expected_price: u128,
        side: crate::order::Side,
    },

    /// A level's recorded aggregate size diverged from the sum of its
    /// queue's quantities.
    #[error("size mismatch at price {price}: recorded {recorded_total}, actual {actual_total}")]
    SizeMismatch {
        price: u128,
        recorded_total: u64,
        actual_total: u64,
    },

    /// FIFO monotonicity was violated: a queue held a later timestamp ahead
    /// of an earlier one.
    #[error("non-monotonic FIFO timestamps at {side} price {price}")]
    NonMonotonicFifo {
        price: u128,
        side: crate::order::Side,
    },
}

/// Errors surfaced by the order event manager when a user intent cannot be
/// turned into a valid engine event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManagerError {
    /// Quantity was zero on a submit (submits require `qty > 0`).
    #[error("order quantity must be greater than zero")]
    ZeroQuantity,

    /// Price was negative before tick rounding.
    #[error("negative price: {0}")]
    NegativePrice(f64),

    /// The engine rejected the event with a fatal error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}
