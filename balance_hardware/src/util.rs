use std::time::{Duration, Instant};

/// Smallest read timeout handed to the OS; `set_read_timeout(Some(ZERO))` is rejected.
pub const MIN_IO_TIMEOUT: Duration = Duration::from_millis(1);

/// Time left until `deadline`, or `None` once it has passed.
#[inline]
pub fn remaining(deadline: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() { None } else { Some(left) }
}

/// Clamp a caller timeout to something the socket layer accepts.
#[inline]
pub fn io_timeout(d: Duration) -> Duration {
    d.max(MIN_IO_TIMEOUT)
}

/// Strip the CRLF (or bare LF) terminator from a received line.
#[inline]
pub fn strip_terminator(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

/// Render integer micrograms as milligrams with three decimals (`100050` -> `100.050`).
pub fn format_ug_as_mg(ug: i64) -> String {
    let sign = if ug < 0 { "-" } else { "" };
    let abs = ug.unsigned_abs();
    format!("{sign}{}.{:03}", abs / 1000, abs % 1000)
}
