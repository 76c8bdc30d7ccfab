#![no_main]
use balance_core::{Command, DeviceResponse, parse_response};
use libfuzzer_sys::fuzz_target;

const COMMANDS: [Command; 4] = [
    Command::ImmediateWeight,
    Command::StableWeight,
    Command::Tare,
    Command::Abort,
];

fuzz_target!(|input: (u8, &str)| {
    let (which, line) = input;
    let cmd = COMMANDS[usize::from(which) % COMMANDS.len()];
    if let Ok(DeviceResponse::Weight(r)) = parse_response(cmd, line) {
        // Whatever parses must render back to a value that parses again.
        let again: balance_core::Milligrams = r.value().to_string().parse().unwrap();
        assert_eq!(again, r.value());
    }
});
