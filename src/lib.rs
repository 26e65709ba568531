//! A single-symbol, single-threaded limit order book matching engine.
//!
//! `lobcore` builds a full order book for one instrument: price-time
//! priority matching, a report stream that can replay a book from its own
//! history, a statistics monitor with a pluggable sampling policy, and a
//! zero-intelligence simulation scheduler for generating reproducible
//! synthetic order flow.
//!
//! # Layout
//!
//! - [`clock`] — the logical clock and per-domain monotonic ID allocators.
//! - [`order`] — the order, trade, and event data model.
//! - [`error`] — engine and manager error types.
//! - [`book`] — the price-ordered FIFO book with O(1) order lookup.
//! - [`report`] — the tagged report stream, with replay and decomposition.
//! - [`engine`] — [`MatchingEngine`], the sole mutation entry point.
//! - [`manager`] — [`OrderEventManager`], which turns user intents into
//!   events and mirrors active orders from the report stream.
//! - [`monitor`] — [`EngineMonitor`], a bounded statistics sampler.
//! - [`simulator`] — [`Scheduler`], a reproducible zero-intelligence order
//!   flow generator.
//!
//! # Example
//!
//! ```
//! use lobcore::prelude::*;
//!
//! let mut engine = MatchingEngine::new();
//! engine
//!     .process(OrderEvent::LimitSubmit {
//!         event_id: 1,
//!         order_id: 1,
//!         ts: 0,
//!         side: Side::Buy,
//!         qty: 10,
//!         price: 9_900,
//!     })
//!     .unwrap();
//! assert_eq!(engine.book().best_bid(), Some((9_900, 10)));
//! ```
//!
//! Strictly single-threaded and synchronous: there is no locking, no
//! atomics, and no async runtime anywhere in this crate. Order handles are
//! `Rc<RefCell<Order>>`, not `Arc<Mutex<..>>`; running a book concurrently
//! means running one engine per thread, each on its own symbol.

pub mod book;
pub mod clock;
pub mod engine;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod order;
pub mod report;
pub mod simulator;

pub mod prelude;
