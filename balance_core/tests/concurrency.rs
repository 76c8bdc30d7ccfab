//! Concurrent weighing attempts share one gated connection; ledger readers never see
//! a slot mid-supersession.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use balance_core::mocks::{ScriptedBalance, WireEvent};
use balance_core::{
    AttemptState, BridgeCfg, CancelToken, InstrumentBridge, Ledger, MeasurementSource, Milligrams,
    StreamCfg, StreamCoordinator, Unit, WeighRequest,
};
use balance_traits::clock::MonotonicClock;

#[test]
fn two_sessions_never_interleave_on_the_wire() {
    let sim = ScriptedBalance::new();
    sim.set_fallback_line("SI S  100.05 mg");
    sim.set_latency(Duration::from_millis(1));
    let clock = Arc::new(MonotonicClock::new());
    let bridge = Arc::new(InstrumentBridge::new(
        Box::new(sim.connector()),
        BridgeCfg::default(),
        clock.clone(),
    ));
    bridge.connect().unwrap();
    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    let cfg = StreamCfg {
        poll_interval: Duration::from_millis(1),
        ..StreamCfg::default()
    };
    let coord = StreamCoordinator::new(Some(bridge), ledger.clone(), cfg, clock);

    let handles: Vec<_> = ["session-a", "session-b"]
        .into_iter()
        .map(|session| {
            let coord = coord.clone();
            thread::spawn(move || {
                coord.run(&WeighRequest::new(session, "gross"), &CancelToken::new(), |_| true)
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), AttemptState::Stabilized);
    }

    assert_eq!(sim.overlaps(), 0);
    let wire = sim.wire();
    assert_eq!(wire.len(), 20);
    for pair in wire.chunks(2) {
        assert!(
            matches!(pair, [WireEvent::Tx(_), WireEvent::Rx(_)]),
            "interleaved exchange: {pair:?}"
        );
    }
    assert_eq!(ledger.current_for("session-a").unwrap().len(), 1);
    assert_eq!(ledger.current_for("session-b").unwrap().len(), 1);
}

#[test]
fn readers_always_see_exactly_one_current_row() {
    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    let w = |ug| Milligrams::from_ug(ug);
    ledger
        .record("s", "x", w(0), Unit::Milligram, MeasurementSource::Manual, None)
        .unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let ledger = ledger.clone();
        let done = done.clone();
        thread::spawn(move || {
            for i in 1..=200 {
                ledger
                    .record("s", "x", w(i), Unit::Milligram, MeasurementSource::Instrument, None)
                    .unwrap();
            }
            done.store(true, Ordering::Relaxed);
        })
    };

    let mut reads = 0;
    while !done.load(Ordering::Relaxed) {
        assert_eq!(ledger.current_for("s").unwrap().len(), 1);
        reads += 1;
    }
    writer.join().unwrap();

    assert!(reads > 0);
    assert_eq!(ledger.history_for("s", "x").unwrap().len(), 201);
    assert_eq!(ledger.current_for("s").unwrap()[0].weight, w(200));
}
