//! Convenience re-exports of the crate's most commonly used types.
//!
//! ```
//! use lobcore::prelude::*;
//! ```

pub use crate::book::{LevelInfo, OrderBook};
pub use crate::engine::MatchingEngine;
pub use crate::error::{EngineError, ManagerError};
pub use crate::manager::{EngineConfig, OrderEventManager};
pub use crate::monitor::{
    EngineMonitor, EventCounts, OrderBookStatisticsByTimestamp, QualifyingStrategy,
};
pub use crate::order::{Order, OrderEvent, OrderState, OrderType, Side, Trade};
pub use crate::report::{ExecType, Report, ReportKind, ReportStatus};
pub use crate::simulator::{RateSampler, Scheduler, SimulatorConfig};
