//! Subcommand handlers. Results go to stdout; logs and errors go to stderr.

use std::sync::Arc;

use balance_config::{Config, Device};
use balance_core::export::export_session;
use balance_core::{
    AttemptState, BalanceError, ConnectionState, DeviceHandle, InstrumentBridge, Ledger,
    Measurement, MeasurementSource, Milligrams, SharedClock, StreamCfg, StreamCoordinator,
    StreamEvent, Unit, WeighRequest, WeightReading,
};
use balance_hardware::{SimulatedBalance, TcpConnector};
use balance_traits::{Connector, MonotonicClock};
use eyre::WrapErr;
use serde_json::json;

use crate::cli::{Commands, json_mode};
use crate::error_fmt::AttemptError;

pub fn dispatch(cmd: Commands, cfg: &Config) -> eyre::Result<()> {
    match cmd {
        Commands::Read { stable } => read(cfg, stable),
        Commands::Weigh { session, step, sse } => {
            weigh(cfg, WeighRequest::new(session, step), sse)
        }
        Commands::Tare => tare(cfg),
        Commands::Record {
            session,
            step,
            weight,
            unit,
        } => record(cfg, &session, &step, &weight, &unit),
        Commands::Current { session } => {
            let rows = open_ledger(cfg)?.current_for(&session)?;
            print_measurements(&rows);
            Ok(())
        }
        Commands::History { session, step } => {
            let rows = open_ledger(cfg)?.history_for(&session, &step)?;
            print_measurements(&rows);
            Ok(())
        }
        Commands::Sessions => {
            let sessions = open_ledger(cfg)?.sessions()?;
            if json_mode() {
                println!("{}", json!(sessions));
            } else {
                for s in sessions {
                    println!("{s}");
                }
            }
            Ok(())
        }
        Commands::Export { session, out } => {
            let n = export_session(&open_ledger(cfg)?, &session, &out)?;
            if json_mode() {
                println!("{}", json!({ "session": session, "rows": n, "path": out }));
            } else {
                println!("exported {n} rows to {}", out.display());
            }
            Ok(())
        }
        Commands::SelfCheck => self_check(cfg),
        Commands::Health => health(cfg),
    }
}

fn clock() -> SharedClock {
    Arc::new(MonotonicClock::new())
}

fn connector_for(dev: &Device, sim_load: Option<Milligrams>) -> Box<dyn Connector> {
    if dev.simulate {
        let sim = SimulatedBalance::new();
        if let Some(load) = sim_load {
            sim.set_load_ug(load.as_ug());
        }
        return Box::new(sim.connector());
    }
    Box::new(TcpConnector::new(dev.host.clone().unwrap_or_default(), dev.port))
}

/// Startup lifecycle: absent in manual mode, otherwise one connection attempt.
fn device(cfg: &Config) -> eyre::Result<DeviceHandle> {
    let sim_load = cfg
        .device
        .simulated_load_mg
        .as_deref()
        .map(str::parse::<Milligrams>)
        .transpose()
        .map_err(|e| BalanceError::Config(format!("device.simulated_load_mg: {e}")))?;
    Ok(DeviceHandle::from_config(cfg, |dev| connector_for(dev, sim_load), clock()))
}

fn require_bridge(handle: &DeviceHandle) -> Result<&Arc<InstrumentBridge>, BalanceError> {
    handle.bridge().ok_or(BalanceError::NotConfigured)
}

fn open_ledger(cfg: &Config) -> eyre::Result<Ledger> {
    Ledger::open(&cfg.ledger.path)
        .wrap_err_with(|| format!("ledger {}", cfg.ledger.path.display()))
}

fn print_reading(r: &WeightReading) {
    if json_mode() {
        println!(
            "{}",
            json!({
                "value": r.value(),
                "unit": Unit::Milligram,
                "stable": r.is_stable(),
                "reported_unit": r.reported_unit(),
                "raw": r.raw(),
            })
        );
    } else {
        let status = if r.is_stable() { "stable" } else { "dynamic" };
        println!("{} mg ({status})", r.value());
    }
}

fn print_measurements(rows: &[Measurement]) {
    if json_mode() {
        println!("{}", json!(rows));
        return;
    }
    for m in rows {
        println!(
            "{:<16} {:>14} mg  {:<10} {} {}",
            m.step_key,
            m.weight.to_string(),
            m.source.as_str(),
            if m.is_current { "current" } else { "superseded" },
            m.recorded_at.to_rfc3339()
        );
    }
}

fn read(cfg: &Config, stable: bool) -> eyre::Result<()> {
    let handle = device(cfg)?;
    let bridge = require_bridge(&handle)?;
    let reading = if stable {
        bridge.read_stable()
    } else {
        bridge.read_immediate()
    };
    handle.shutdown();
    print_reading(&reading?);
    Ok(())
}

fn tare(cfg: &Config) -> eyre::Result<()> {
    let handle = device(cfg)?;
    let result = require_bridge(&handle)?.tare();
    handle.shutdown();
    print_reading(&result?);
    Ok(())
}

fn weigh(cfg: &Config, request: WeighRequest, sse: bool) -> eyre::Result<()> {
    let handle = device(cfg)?;
    let ledger = Arc::new(open_ledger(cfg)?);
    let coord = StreamCoordinator::new(
        handle.bridge().cloned(),
        ledger,
        StreamCfg::from(cfg),
        clock(),
    );

    let mut stream = coord.start(request);
    let token = stream.cancel_token();
    ctrlc::set_handler(move || token.cancel()).wrap_err("install Ctrl-C handler")?;

    let mut failure = None;
    for event in stream.by_ref() {
        if sse {
            print!("{}", event.to_sse()?);
        } else if json_mode() {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
        match event {
            StreamEvent::Error { kind, message } => failure = Some(AttemptError { kind, message }),
            StreamEvent::Timeout {} => {
                failure = Some(AttemptError {
                    kind: BalanceError::Timeout.kind(),
                    message: BalanceError::Timeout.to_string(),
                })
            }
            _ => {}
        }
    }
    let state = stream.finish();
    handle.shutdown();
    tracing::debug!(?state, "weigh finished");

    match state {
        AttemptState::Cancelled => {
            eprintln!("weighing cancelled; nothing recorded");
            Ok(())
        }
        _ => failure.map_or(Ok(()), |f| Err(f.into())),
    }
}

fn print_event(ev: &StreamEvent) {
    match ev {
        StreamEvent::Reading { value, stable, .. } => {
            let status = if *stable { "stable" } else { "dynamic" };
            println!("reading {value} mg ({status})");
        }
        StreamEvent::Stable { value, .. } => println!("stable {value} mg (recorded)"),
        StreamEvent::Timeout {} => println!("timeout"),
        StreamEvent::Error { kind, message } => println!("error [{}] {message}", kind.as_str()),
        StreamEvent::ManualEntry { reason } => {
            println!("manual entry required: {reason}; use `record` to enter the weight");
        }
    }
}

fn record(cfg: &Config, session: &str, step: &str, weight: &str, unit: &str) -> eyre::Result<()> {
    let unit: Unit = unit
        .parse()
        .map_err(|e| BalanceError::Config(format!("--unit: {e}")))?;
    let value = Milligrams::parse_decimal(weight, unit)
        .map_err(|e| BalanceError::Config(format!("--weight: {e}")))?;
    let m = open_ledger(cfg)?.record(session, step, value, unit, MeasurementSource::Manual, None)?;
    if json_mode() {
        println!("{}", json!(m));
    } else {
        println!("recorded {} mg for {session}/{step} (id {})", m.weight, m.id);
    }
    Ok(())
}

fn device_status(handle: &DeviceHandle) -> (&'static str, Option<String>) {
    match handle.bridge() {
        None => ("absent", None),
        Some(b) => (b.state().as_str(), Some(b.endpoint())),
    }
}

fn self_check(cfg: &Config) -> eyre::Result<()> {
    let ledger = open_ledger(cfg)?;
    let sessions = ledger.sessions()?.len();
    let handle = device(cfg)?;
    let reading = match handle.bridge() {
        Some(b) => Some(b.read_immediate()?),
        None => None,
    };
    handle.shutdown();

    if json_mode() {
        println!(
            "{}",
            json!({
                "ok": true,
                "device": if handle.is_present() { "present" } else { "absent" },
                "reading": reading.as_ref().map(WeightReading::value),
                "ledger_sessions": sessions,
            })
        );
    } else {
        match reading {
            Some(r) => println!("balance: ok ({} mg)", r.value()),
            None => println!("balance: not configured (manual entry mode)"),
        }
        println!("ledger: ok ({sessions} sessions)");
        println!("self-check: ok");
    }
    Ok(())
}

fn health(cfg: &Config) -> eyre::Result<()> {
    let handle = device(cfg)?;
    let (state, endpoint) = device_status(&handle);
    let ledger = open_ledger(cfg).and_then(|l| Ok(l.sessions()?.len()));
    let healthy = ledger.is_ok()
        && handle
            .bridge()
            .is_none_or(|b| b.state() == ConnectionState::Connected);
    handle.shutdown();

    let ledger_status = match &ledger {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };
    if json_mode() {
        println!(
            "{}",
            json!({
                "healthy": healthy,
                "device": state,
                "endpoint": endpoint,
                "ledger": ledger_status,
            })
        );
    } else {
        println!("device: {state}{}", endpoint.map(|e| format!(" ({e})")).unwrap_or_default());
        println!("ledger: {ledger_status}");
        println!("{}", if healthy { "healthy" } else { "unhealthy" });
    }
    if healthy {
        Ok(())
    } else {
        Err(BalanceError::Connection(format!("device {state}")).into())
    }
}
