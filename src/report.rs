//! The report stream: a totally-ordered, tagged variant of processing
//! reports (spec component E / §6.2).

use crate::order::{Order, OrderEvent, OrderType, Side};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecType {
    Filled,
    PartialFilled,
}

/// Variant-specific payload of a [`Report`]. See spec §6.2 for the field
/// list each kind carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReportKind {
    Execution {
        order_type: OrderType,
        match_order_id: u64,
        trade_id: u64,
        filled_qty: u64,
        filled_price: u128,
        is_maker: bool,
        exec_type: ExecType,
    },
    LimitSubmit {
        order: Order,
    },
    LimitPlacement {
        order_qty_remaining: u64,
        order_price: u128,
    },
    MarketSubmit {
        order: Order,
    },
    Cancel {
        order_type: OrderType,
        order_qty: Option<u64>,
        order_price: Option<u128>,
    },
    PartialCancel {
        order_type: OrderType,
        cancel_qty: u64,
        order_qty_before: u64,
        order_price: u128,
    },
    CancelReplace {
        order_type: OrderType,
        new_order_id: u64,
        new_qty: u64,
        new_price: u128,
    },
    ModifyPrice {
        order_qty: u64,
        new_price: u128,
    },
    ModifyQuantity {
        order_price: u128,
        new_qty: u64,
    },
}

/// A single emitted processing report. Immutable once emitted; the engine
/// never mutates a `Report` after handing it to a callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: u64,
    pub timestamp: u64,
    pub order_id: u64,
    pub side: Side,
    pub status: ReportStatus,
    pub agent_id_hash: Option<u64>,
    pub latency_ns: Option<u64>,
    pub message: Option<String>,
    pub kind: ReportKind,
}

impl Report {
    /// The minimal event that, when replayed through a fresh engine,
    /// reproduces this report's state transition. Returns `None` for
    /// execution and placement reports, which are derived side effects of
    /// a submit rather than independently replayable events (spec's
    /// answer to its own open question).
    pub fn make_event(&self) -> Option<OrderEvent> {
        if self.status == ReportStatus::Failure {
            return None;
        }
        match &self.kind {
            ReportKind::LimitSubmit { order } => Some(OrderEvent::LimitSubmit {
                event_id: self.report_id,
                order_id: order.order_id,
                ts: self.timestamp,
                side: self.side,
                qty: order.quantity,
                price: order.price.unwrap_or(0),
            }),
            ReportKind::MarketSubmit { order } => Some(OrderEvent::MarketSubmit {
                event_id: self.report_id,
                order_id: order.order_id,
                ts: self.timestamp,
                side: self.side,
                qty: order.quantity,
            }),
            ReportKind::Cancel { .. } => Some(OrderEvent::Cancel {
                event_id: self.report_id,
                order_id: self.order_id,
                ts: self.timestamp,
            }),
            ReportKind::PartialCancel { cancel_qty, .. } => Some(OrderEvent::PartialCancel {
                event_id: self.report_id,
                order_id: self.order_id,
                ts: self.timestamp,
                cancel_qty: *cancel_qty,
            }),
            ReportKind::ModifyPrice { new_price, .. } => Some(OrderEvent::ModifyPrice {
                event_id: self.report_id,
                order_id: self.order_id,
                ts: self.timestamp,
                new_price: *new_price,
            }),
            ReportKind::ModifyQuantity { new_qty, .. } => Some(OrderEvent::ModifyQuantity {
                event_id: self.report_id,
                order_id: self.order_id,
                ts: self.timestamp,
                new_qty: *new_qty,
            }),
            ReportKind::CancelReplace {
                new_order_id,
                new_qty,
                new_price,
                ..
            } => Some(OrderEvent::CancelReplace {
                event_id: self.report_id,
                order_id: self.order_id,
                ts: self.timestamp,
                new_order_id: *new_order_id,
                new_qty: Some(*new_qty),
                new_price: Some(*new_price),
            }),
            ReportKind::Execution { .. } | ReportKind::LimitPlacement { .. } => None,
        }
    }

    /// Splits a `CANCEL_REPLACE` or growing `MODIFY_QUANTITY` report into
    /// the atomic `[CANCEL, LIMIT_SUBMIT]` pair it is logically equivalent
    /// to (spec §6.2 / §8.2). Every other report decomposes to itself.
    pub fn decompose_into_atomic_reports(&self) -> Vec<Report> {
        match &self.kind {
            ReportKind::CancelReplace {
                order_type,
                new_order_id,
                new_qty,
                new_price,
            } => {
                let cancel = Report {
                    report_id: self.report_id,
                    timestamp: self.timestamp,
                    order_id: self.order_id,
                    side: self.side,
                    status: self.status,
                    agent_id_hash: self.agent_id_hash,
                    latency_ns: None,
                    message: None,
                    kind: ReportKind::Cancel {
                        order_type: *order_type,
                        order_qty: None,
                        order_price: None,
                    },
                };
                let submit = Report {
                    report_id: self.report_id,
                    timestamp: self.timestamp,
                    order_id: *new_order_id,
                    side: self.side,
                    status: self.status,
                    agent_id_hash: self.agent_id_hash,
                    latency_ns: None,
                    message: None,
                    kind: ReportKind::LimitSubmit {
                        order: Order::new_limit(
                            *new_order_id,
                            self.timestamp,
                            self.side,
                            *new_price,
                            *new_qty,
                        ),
                    },
                };
                vec![cancel, submit]
            }
            ReportKind::ModifyQuantity {
                order_price,
                new_qty,
            } => {
                let cancel = Report {
                    report_id: self.report_id,
                    timestamp: self.timestamp,
                    order_id: self.order_id,
                    side: self.side,
                    status: self.status,
                    agent_id_hash: self.agent_id_hash,
                    latency_ns: None,
                    message: None,
                    kind: ReportKind::Cancel {
                        order_type: OrderType::Limit,
                        order_qty: None,
                        order_price: Some(*order_price),
                    },
                };
                let submit = Report {
                    report_id: self.report_id,
                    timestamp: self.timestamp,
                    order_id: self.order_id,
                    side: self.side,
                    status: self.status,
                    agent_id_hash: self.agent_id_hash,
                    latency_ns: None,
                    message: None,
                    kind: ReportKind::LimitSubmit {
                        order: Order::new_limit(
                            self.order_id,
                            self.timestamp,
                            self.side,
                            *order_price,
                            *new_qty,
                        ),
                    },
                };
                vec![cancel, submit]
            }
            _ => vec![self.clone()],
        }
    }
}

/// Wall-clock duration of a single `process(event)` call, reported to
/// latency callbacks (spec §4.D "Timing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEventLatency {
    pub event: OrderEvent,
    pub duration_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_report(kind: ReportKind) -> Report {
        Report {
            report_id: 1,
            timestamp: 1,
            order_id: 1,
            side: Side::Buy,
            status: ReportStatus::Success,
            agent_id_hash: None,
            latency_ns: None,
            message: None,
            kind,
        }
    }

    #[test]
    fn cancel_replace_decomposes_to_cancel_then_submit() {
        let r = base_report(ReportKind::CancelReplace {
            order_type: OrderType::Limit,
            new_order_id: 42,
            new_qty: 7,
            new_price: 98,
        });
        let atoms = r.decompose_into_atomic_reports();
        assert_eq!(atoms.len(), 2);
        assert!(matches!(atoms[0].kind, ReportKind::Cancel { .. }));
        assert!(matches!(atoms[1].kind, ReportKind::LimitSubmit { .. }));
        assert_eq!(atoms[1].order_id, 42);
    }

    #[test]
    fn growing_modify_quantity_decomposes() {
        let r = base_report(ReportKind::ModifyQuantity {
            order_price: 100,
            new_qty: 20,
        });
        let atoms = r.decompose_into_atomic_reports();
        assert_eq!(atoms.len(), 2);
        assert!(matches!(atoms[0].kind, ReportKind::Cancel { .. }));
    }

    #[test]
    fn non_decomposable_report_returns_itself() {
        let r = base_report(ReportKind::Cancel {
            order_type: OrderType::Limit,
            order_qty: Some(10),
            order_price: Some(100),
        });
        let atoms = r.decompose_into_atomic_reports();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0], r);
    }

    #[test]
    fn execution_report_has_no_make_event() {
        let r = base_report(ReportKind::Execution {
            order_type: OrderType::Limit,
            match_order_id: 2,
            trade_id: 1,
            filled_qty: 1,
            filled_price: 100,
            is_maker: false,
            exec_type: ExecType::Filled,
        });
        assert_eq!(r.make_event(), None);
    }

    #[test]
    fn limit_submit_make_event_round_trips() {
        let order = Order::new_limit(5, 1, Side::Buy, 100, 10);
        let r = base_report(ReportKind::LimitSubmit { order });
        let event = r.make_event().unwrap();
        assert!(matches!(
            event,
            OrderEvent::LimitSubmit {
                order_id: 5,
                price: 100,
                qty: 10,
                ..
            }
        ));
    }

    #[test]
    fn failure_report_has_no_make_event() {
        let mut r = base_report(ReportKind::Cancel {
            order_type: OrderType::Limit,
            order_qty: None,
            order_price: None,
        });
        r.status = ReportStatus::Failure;
        assert_eq!(r.make_event(), None);
    }
}
