//! Known gap: a link that keeps replaying one cached stable line cannot be told apart
//! from a settled pan. The protocol carries no sequence counter or heartbeat, so this
//! test pins today's behaviour; change it when a liveness signal exists.

use std::sync::Arc;

use balance_core::mocks::ScriptedBalance;
use balance_core::{
    AttemptState, BridgeCfg, CancelToken, InstrumentBridge, Ledger, StreamCfg, StreamCoordinator,
    WeighRequest,
};
use balance_traits::clock::test_clock::TestClock;

#[test]
fn frozen_link_replaying_a_stable_line_is_accepted() {
    let sim = ScriptedBalance::new();
    sim.set_fallback_line("SI S  12.34 mg");
    let clock = Arc::new(TestClock::new());
    let bridge = Arc::new(InstrumentBridge::new(
        Box::new(sim.connector()),
        BridgeCfg::default(),
        clock.clone(),
    ));
    bridge.connect().unwrap();
    let ledger = Arc::new(Ledger::open_in_memory().unwrap());
    let coord = StreamCoordinator::new(Some(bridge), ledger.clone(), StreamCfg::default(), clock);

    let state = coord.run(&WeighRequest::new("s", "x"), &CancelToken::new(), |_| true);

    assert_eq!(state, AttemptState::Stabilized);
    assert_eq!(ledger.current_for("s").unwrap()[0].weight.to_string(), "12.34");
}
