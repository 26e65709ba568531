//! Property-based invariants that must hold for every reachable engine
//! state, checked via `proptest` instead of a hand-rolled fuzz loop.

use lobcore::engine::MatchingEngine;
use lobcore::order::{OrderEvent, Side};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Action {
    Submit { side: Side, qty: u64, price: u128 },
    Market { side: Side, qty: u64 },
    Cancel { target: usize },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (side_strategy(), 1..20u64, 95..105u128).prop_map(|(side, qty, price)| Action::Submit {
            side,
            qty,
            price
        }),
        (side_strategy(), 1..10u64).prop_map(|(side, qty)| Action::Market { side, qty }),
        (0..50usize).prop_map(|target| Action::Cancel { target }),
    ]
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

proptest! {
    /// Size conservation + index faithfulness + no-orphan-levels + FIFO
    /// monotonicity, folded into `state_consistency_check`, must hold
    /// after any sequence of submits, market orders, and cancels.
    #[test]
    fn book_stays_consistent_under_random_actions(actions in prop::collection::vec(action_strategy(), 1..60)) {
        let mut engine = MatchingEngine::new();
        let mut submitted_ids: Vec<u64> = Vec::new();
        let mut next_id = 1u64;

        for action in actions {
            match action {
                Action::Submit { side, qty, price } => {
                    let order_id = next_id;
                    next_id += 1;
                    engine
                        .process(OrderEvent::LimitSubmit {
                            event_id: order_id,
                            order_id,
                            ts: 0,
                            side,
                            qty,
                            price,
                        })
                        .unwrap();
                    submitted_ids.push(order_id);
                }
                Action::Market { side, qty } => {
                    let order_id = next_id;
                    next_id += 1;
                    engine
                        .process(OrderEvent::MarketSubmit {
                            event_id: order_id,
                            order_id,
                            ts: 0,
                            side,
                            qty,
                        })
                        .unwrap();
                }
                Action::Cancel { target } => {
                    if submitted_ids.is_empty() {
                        continue;
                    }
                    let order_id = submitted_ids[target % submitted_ids.len()];
                    // A miss is a FAILURE report, not an engine error, so this
                    // is always safe to call even on an already-filled id.
                    engine
                        .process(OrderEvent::Cancel {
                            event_id: next_id,
                            order_id,
                            ts: 0,
                        })
                        .unwrap();
                    next_id += 1;
                }
            }
            prop_assert!(engine.state_consistency_check().is_ok());
        }
    }

    /// Report ids are strictly increasing and timestamps never regress,
    /// across any sequence of actions.
    #[test]
    fn report_ids_are_strictly_increasing(actions in prop::collection::vec(action_strategy(), 1..40)) {
        let mut engine = MatchingEngine::new();
        let mut next_id = 1u64;
        let mut last_report_id = 0u64;
        let mut last_ts = 0u64;

        for action in actions {
            let reports = match action {
                Action::Submit { side, qty, price } => {
                    let order_id = next_id;
                    next_id += 1;
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
                Action::Market { side, qty } => {
                    let order_id = next_id;
                    next_id += 1;
                    engine
                        .process(OrderEvent::MarketSubmit {
                            event_id: order_id,
                            order_id,
                            ts: 0,
                            side,
                            qty,
                        })
                        .unwrap()
                }
                Action::Cancel { target } => {
                    let order_id = (target as u64 % next_id.max(1)).max(1);
                    let reports = engine
                        .process(OrderEvent::Cancel {
                            event_id: next_id,
                            order_id,
                            ts: 0,
                        })
                        .unwrap();
                    next_id += 1;
                    reports
                }
            };
            for r in &reports {
                prop_assert!(r.report_id > last_report_id);
                prop_assert!(r.timestamp >= last_ts);
                last_report_id = r.report_id;
                last_ts = r.timestamp;
            }
        }
    }
}
