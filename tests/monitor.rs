//! Monitor parity law (`|reports| == |snapshots|`) and qualifying-policy
//! behaviour, exercised against a full order flow rather than the
//! monitor's own narrower inline unit tests.

use lobcore::engine::MatchingEngine;
use lobcore::monitor::{EngineMonitor, QualifyingStrategy};
use lobcore::order::{OrderEvent, Side};
use std::cell::RefCell;
use std::rc::Rc;

fn submit(engine: &mut MatchingEngine, id: u64, side: Side, qty: u64, price: u128) {
    engine
        .process(OrderEvent::LimitSubmit {
            event_id: id,
            order_id: id,
            ts: 0,
            side,
            qty,
            price,
        })
        .unwrap();
}

/// Monitor parity: the triggers ring buffer and the snapshots ring buffer
/// must always be the same length, across every qualifying strategy.
#[test]
fn monitor_parity_holds_across_strategies() {
    for strategy in [
        QualifyingStrategy::TopOfBookTick,
        QualifyingStrategy::EachOrderEvent,
        QualifyingStrategy::EachMarketOrder,
        QualifyingStrategy::EachTrade,
    ] {
        let mut engine = MatchingEngine::new();
        let monitor = Rc::new(RefCell::new(EngineMonitor::new(strategy, 1_000, 5)));
        EngineMonitor::attach(monitor.clone(), &mut engine);

        submit(&mut engine, 1, Side::Buy, 10, 99);
        submit(&mut engine, 2, Side::Sell, 10, 101);
        engine
            .process(OrderEvent::MarketSubmit {
                event_id: 3,
                order_id: 3,
                ts: 0,
                side: Side::Buy,
                qty: 5,
            })
            .unwrap();
        submit(&mut engine, 4, Side::Sell, 5, 102);
        engine
            .process(OrderEvent::Cancel {
                event_id: 5,
                order_id: 4,
                ts: 0,
            })
            .unwrap();

        let m = monitor.borrow();
        assert_eq!(m.snapshots().len(), m.triggers().len());
    }
}

/// Each-trade strategy counts every unique trade exactly once and ignores
/// non-execution reports for sampling purposes.
#[test]
fn each_trade_strategy_samples_only_executions() {
    let mut engine = MatchingEngine::new();
    let monitor = Rc::new(RefCell::new(EngineMonitor::new(
        QualifyingStrategy::EachTrade,
        100,
        5,
    )));
    EngineMonitor::attach(monitor.clone(), &mut engine);

    submit(&mut engine, 1, Side::Buy, 10, 100);
    submit(&mut engine, 2, Side::Sell, 5, 101); // resting, no trade
    engine
        .process(OrderEvent::MarketSubmit {
            event_id: 3,
            order_id: 3,
            ts: 0,
            side: Side::Sell,
            qty: 10,
        })
        .unwrap();

    // Every fill emits two EXECUTION reports (taker + maker); both qualify
    // under `EachTrade`, so the snapshot count tracks reports, not trades.
    let m = monitor.borrow();
    assert_eq!(m.snapshots().len(), 2);
    assert_eq!(m.counts().trades, 1);
}

/// Depth vectors in a snapshot reflect the book at the moment the
/// qualifying report fired, not some later state.
#[test]
fn snapshot_depth_matches_book_at_trigger_time() {
    let mut engine = MatchingEngine::new();
    let monitor = Rc::new(RefCell::new(EngineMonitor::new(
        QualifyingStrategy::EachOrderEvent,
        100,
        3,
    )));
    EngineMonitor::attach(monitor.clone(), &mut engine);

    submit(&mut engine, 1, Side::Buy, 10, 99);
    submit(&mut engine, 2, Side::Buy, 5, 98);

    let m = monitor.borrow();
    let last = m.snapshots().back().unwrap();
    assert_eq!(last.bid_depth.len(), 2);
    assert_eq!(last.bid_depth[0].price, 99);
    assert_eq!(last.bid_depth[1].price, 98);
}
