use balance_config::{load_file, load_toml};
use rstest::rstest;
use std::fs;
use tempfile::tempdir;

const FULL: &str = r#"
[device]
host = "10.0.0.20"
port = 4001
connect_timeout_ms = 3000
response_timeout_ms = 2000

[stability]
window = 5
tolerance_mg = 0.5

[stream]
deadline_ms = 30000
poll_interval_ms = 200

[ledger]
path = "ledger.sqlite3"

[logging]
level = "debug"
rotation = "daily"
"#;

#[test]
fn accepts_full_device_config() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert!(cfg.device.is_configured());
    assert_eq!(cfg.device.host.as_deref(), Some("10.0.0.20"));
    assert_eq!(cfg.ledger.path.to_str(), Some("ledger.sqlite3"));
}

#[test]
fn simulate_counts_as_configured_device() {
    let cfg = load_toml(
        r#"
[device]
simulate = true
simulated_load_mg = "100.05"
"#,
    )
    .unwrap();
    cfg.validate().unwrap();
    assert!(cfg.device.is_configured());
}

#[rstest]
#[case("[device]\nhost = \"  \"", "device.host must not be blank")]
#[case("[device]\nport = 0", "device.port must be > 0")]
#[case("[device]\nresponse_timeout_ms = 0", "response_timeout_ms must be >= 1")]
#[case("[device]\nsimulated_load_mg = \"1e3\"", "simulated_load_mg must be a decimal")]
#[case("[stability]\nwindow = 0", "stability.window must be >= 1")]
#[case("[stability]\ntolerance_mg = -0.1", "tolerance_mg must be a finite value")]
#[case("[stream]\ndeadline_ms = 0", "stream.deadline_ms must be >= 1")]
#[case(
    "[stream]\ndeadline_ms = 100\npoll_interval_ms = 100",
    "poll_interval_ms must be < stream.deadline_ms"
)]
#[case("[logging]\nrotation = \"weekly\"", "rotation must be one of")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(needle), "{err} !~ {needle}");
}

#[test]
fn load_file_reports_path_on_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[device\nhost=").unwrap();
    let err = load_file(&path).expect_err("malformed TOML");
    assert!(format!("{err}").contains("bad.toml"));
}

#[test]
fn load_file_validates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[stability]\nwindow = 0\n").unwrap();
    let err = load_file(&path).expect_err("invalid window");
    assert!(format!("{err}").contains("stability.window"));
}
