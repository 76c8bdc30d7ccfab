//! Device Protocol Codec: wire text <-> typed commands and readings.
//!
//! Responses are `<echo> <status> <value> <unit>` with the value right-aligned in a
//! padded field. A bare `ES`/`ET`/`EL` line is the device refusing a command.
//! Values are normalized to canonical milligrams here and nowhere else.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::mass::{MassError, Milligrams, Unit};

/// Commands understood by the balance. Framing (CRLF) belongs to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Current value, stable or not.
    ImmediateWeight,
    /// Device waits for its own stability before answering (or gives up with `I`).
    StableWeight,
    Tare,
    /// Cancel a device-side wait. No response is required.
    Abort,
}

impl Command {
    pub const fn token(self) -> &'static str {
        match self {
            Command::ImmediateWeight => "SI",
            Command::StableWeight => "S",
            Command::Tare => "T",
            Command::Abort => "@",
        }
    }

    /// Whether the device answers this command with a status line.
    pub const fn expects_response(self) -> bool {
        !matches!(self, Command::Abort)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Status token in the second field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stable,
    Dynamic,
    NotSettled,
    Overload,
    Underload,
    SyntaxError,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty response line")]
    Empty,
    #[error("expected echo {expected:?} but got {found:?} in {line:?}")]
    EchoMismatch {
        expected: &'static str,
        found: String,
        line: String,
    },
    #[error("unknown status token {token:?} in {line:?}")]
    UnknownStatus { token: String, line: String },
    #[error("missing field in {line:?}")]
    MissingField { line: String },
    #[error("unexpected trailing field in {line:?}")]
    TrailingField { line: String },
    #[error("bad weight in {line:?}: {source}")]
    Value { line: String, source: MassError },
}

/// One reading as reported by the device, already in canonical milligrams.
///
/// Immutable once constructed; `raw` keeps the exact wire line for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightReading {
    value: Milligrams,
    reported_unit: Unit,
    stable: bool,
    raw: String,
    captured_at: DateTime<Utc>,
}

impl WeightReading {
    pub fn new(
        value: Milligrams,
        reported_unit: Unit,
        stable: bool,
        raw: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            value,
            reported_unit,
            stable,
            raw: raw.into(),
            captured_at,
        }
    }

    pub fn value(&self) -> Milligrams {
        self.value
    }
    pub fn reported_unit(&self) -> Unit {
        self.reported_unit
    }
    /// The device's own stability bit for this reading.
    pub fn is_stable(&self) -> bool {
        self.stable
    }
    pub fn raw(&self) -> &str {
        &self.raw
    }
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// A parsed response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResponse {
    Weight(WeightReading),
    NotSettled { raw: String },
    Overload { raw: String },
    Underload { raw: String },
    SyntaxError { raw: String },
}

impl DeviceResponse {
    pub fn status(&self) -> Status {
        match self {
            DeviceResponse::Weight(r) if r.is_stable() => Status::Stable,
            DeviceResponse::Weight(_) => Status::Dynamic,
            DeviceResponse::NotSettled { .. } => Status::NotSettled,
            DeviceResponse::Overload { .. } => Status::Overload,
            DeviceResponse::Underload { .. } => Status::Underload,
            DeviceResponse::SyntaxError { .. } => Status::SyntaxError,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            DeviceResponse::Weight(r) => r.raw(),
            DeviceResponse::NotSettled { raw }
            | DeviceResponse::Overload { raw }
            | DeviceResponse::Underload { raw }
            | DeviceResponse::SyntaxError { raw } => raw,
        }
    }
}

/// Parse the response to `expected`, stamping weight readings with the current time.
pub fn parse_response(expected: Command, line: &str) -> Result<DeviceResponse, ParseError> {
    parse_response_at(expected, line, Utc::now())
}

/// Parse the response to `expected` with an explicit capture timestamp.
pub fn parse_response_at(
    expected: Command,
    line: &str,
    captured_at: DateTime<Utc>,
) -> Result<DeviceResponse, ParseError> {
    let raw = line.trim_end_matches(['\r', '\n']);
    let missing = || ParseError::MissingField {
        line: raw.to_string(),
    };

    let mut fields = raw.split_whitespace();
    let echo = fields.next().ok_or(ParseError::Empty)?;

    if matches!(echo, "ES" | "ET" | "EL") {
        if fields.next().is_some() {
            return Err(ParseError::TrailingField {
                line: raw.to_string(),
            });
        }
        return Ok(DeviceResponse::SyntaxError {
            raw: raw.to_string(),
        });
    }

    if echo != expected.token() {
        return Err(ParseError::EchoMismatch {
            expected: expected.token(),
            found: echo.to_string(),
            line: raw.to_string(),
        });
    }

    let status_tok = fields.next().ok_or_else(missing)?;
    let value = fields.next();
    let unit = fields.next();
    if fields.next().is_some() {
        return Err(ParseError::TrailingField {
            line: raw.to_string(),
        });
    }
    // A value without its unit is never valid, even on statuses that may omit both.
    if value.is_some() && unit.is_none() {
        return Err(missing());
    }

    let raw_owned = raw.to_string();
    match status_tok {
        "S" | "D" => {
            let (Some(value), Some(unit)) = (value, unit) else {
                return Err(missing());
            };
            let value_err = |source| ParseError::Value {
                line: raw.to_string(),
                source,
            };
            let unit: Unit = unit.parse().map_err(value_err)?;
            let mg = Milligrams::parse_decimal(value, unit).map_err(value_err)?;
            Ok(DeviceResponse::Weight(WeightReading::new(
                mg,
                unit,
                status_tok == "S",
                raw_owned,
                captured_at,
            )))
        }
        "I" => Ok(DeviceResponse::NotSettled { raw: raw_owned }),
        "+" => Ok(DeviceResponse::Overload { raw: raw_owned }),
        "-" => Ok(DeviceResponse::Underload { raw: raw_owned }),
        other => Err(ParseError::UnknownStatus {
            token: other.to_string(),
            line: raw_owned,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn weight(cmd: Command, line: &str) -> WeightReading {
        match parse_response(cmd, line).unwrap() {
            DeviceResponse::Weight(r) => r,
            other => panic!("expected weight, got {other:?}"),
        }
    }

    #[rstest]
    #[case("SI S  100.05 mg", 100_050, Unit::Milligram, true)]
    #[case("SI D      12.3456 g", 12_345_600, Unit::Gram, false)]
    #[case("SI S       -0.002 g", -2_000, Unit::Gram, true)]
    #[case("SI S 0.000125 kg", 125_000, Unit::Kilogram, true)]
    #[case("SI D 250 ug\r\n", 250, Unit::Microgram, false)]
    fn parses_padded_weight_lines(
        #[case] line: &str,
        #[case] ug: i64,
        #[case] unit: Unit,
        #[case] stable: bool,
    ) {
        let r = weight(Command::ImmediateWeight, line);
        assert_eq!(r.value().as_ug(), ug);
        assert_eq!(r.reported_unit(), unit);
        assert_eq!(r.is_stable(), stable);
        assert_eq!(r.raw(), line.trim_end_matches(['\r', '\n']));
    }

    #[rstest]
    #[case(Command::StableWeight, "S I", Status::NotSettled)]
    #[case(Command::StableWeight, "S +", Status::Overload)]
    #[case(Command::ImmediateWeight, "SI -", Status::Underload)]
    #[case(Command::ImmediateWeight, "SI + 250.00001 g", Status::Overload)]
    #[case(Command::Tare, "ES", Status::SyntaxError)]
    #[case(Command::ImmediateWeight, "EL", Status::SyntaxError)]
    fn classifies_status_lines(#[case] cmd: Command, #[case] line: &str, #[case] status: Status) {
        let resp = parse_response(cmd, line).unwrap();
        assert_eq!(resp.status(), status);
        assert_eq!(resp.raw(), line);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("SI")]
    #[case("SI S")]
    #[case("SI S 100.05")]
    #[case("SI X 100.05 mg")]
    #[case("SI S 100.05 lb")]
    #[case("SI S 10O.05 mg")]
    #[case("SI S 100.05 mg extra")]
    #[case("SI S 100.0501 mg")]
    #[case("S S 100.05 mg")]
    #[case("ES junk")]
    fn malformed_lines_are_parse_errors(#[case] line: &str) {
        assert!(
            parse_response(Command::ImmediateWeight, line).is_err(),
            "{line:?} should not parse"
        );
    }

    #[test]
    fn echo_mismatch_names_both_sides() {
        let err = parse_response(Command::StableWeight, "SI S 1.00 g").unwrap_err();
        assert_eq!(
            err,
            ParseError::EchoMismatch {
                expected: "S",
                found: "SI".into(),
                line: "SI S 1.00 g".into()
            }
        );
    }

    #[test]
    fn tare_reply_is_a_weight() {
        let r = weight(Command::Tare, "T S      10.000 mg");
        assert_eq!(r.value(), Milligrams::from_ug(10_000));
    }

    #[test]
    fn capture_time_is_preserved() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let DeviceResponse::Weight(r) =
            parse_response_at(Command::ImmediateWeight, "SI S 1 mg", at).unwrap()
        else {
            panic!("weight expected");
        };
        assert_eq!(r.captured_at(), at);
    }

    #[test]
    fn commands_map_to_tokens() {
        assert_eq!(Command::ImmediateWeight.token(), "SI");
        assert_eq!(Command::StableWeight.to_string(), "S");
        assert!(!Command::Abort.expects_response());
        assert!(Command::Tare.expects_response());
    }
}
