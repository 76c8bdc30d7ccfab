//! Full path through the simulated balance from `balance_hardware`.

use std::sync::Arc;

use balance_core::{
    AttemptState, BridgeCfg, CancelToken, ConnectionState, DeviceHandle, Ledger, StreamCfg,
    StreamCoordinator, StreamEvent, WeighRequest,
};
use balance_hardware::SimulatedBalance;
use balance_traits::clock::test_clock::TestClock;

#[test]
fn converging_load_settles_at_the_applied_weight() {
    let sim = SimulatedBalance::new();
    sim.set_load_ug(100_050);
    let clock = Arc::new(TestClock::new());
    let handle = DeviceHandle::open(Box::new(sim.connector()), BridgeCfg::default(), clock.clone());
    let bridge = handle.bridge().cloned().unwrap();
    assert_eq!(bridge.state(), ConnectionState::Connected);

    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    let coord = StreamCoordinator::new(Some(bridge), ledger.clone(), StreamCfg::default(), clock);
    let mut events = Vec::new();
    let state = coord.run(&WeighRequest::new("s", "net"), &CancelToken::new(), |e| {
        events.push(e);
        true
    });

    assert_eq!(state, AttemptState::Stabilized);
    assert!(events.len() > 5, "simulated display should settle gradually");
    assert_eq!(
        events.last().unwrap(),
        &StreamEvent::stable("100.05".parse().unwrap())
    );
    let m = &ledger.current_for("s").unwrap()[0];
    assert!(m.raw.as_deref().unwrap().starts_with("SI S"));
    handle.shutdown();
}

#[test]
fn tare_then_read_stable_reports_net_weight() {
    let sim = SimulatedBalance::new();
    sim.set_load_ug(10_000);
    let handle = DeviceHandle::open(
        Box::new(sim.connector()),
        BridgeCfg::default(),
        Arc::new(TestClock::new()),
    );
    let bridge = handle.bridge().unwrap();
    assert_eq!(bridge.tare().unwrap().value().to_string(), "10.00");
    sim.set_load_ug(35_500);
    assert_eq!(bridge.read_stable().unwrap().value().to_string(), "25.50");
    assert_eq!(sim.commands(), vec!["T".to_string(), "S".to_string()]);
}

#[test]
fn pulled_cable_faults_the_bridge() {
    let sim = SimulatedBalance::new();
    let handle = DeviceHandle::open(
        Box::new(sim.connector()),
        BridgeCfg::default(),
        Arc::new(TestClock::new()),
    );
    let bridge = handle.bridge().unwrap();
    sim.set_connected(false);
    assert!(bridge.read_immediate().is_err());
    assert_eq!(bridge.state(), ConnectionState::Faulted);
    sim.set_connected(true);
    bridge.reconnect().unwrap();
    assert!(bridge.read_immediate().is_ok());
}
