//! Text helpers for rendering command output.

use std::time::Duration;

/// Decodes process output, dropping byte sequences that are not valid UTF-8.
///
/// Checks print whatever they want; a stray binary byte must not make the
/// whole transcript unpublishable.
pub fn normalize_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Rounds a duration to a human-scale precision.
///
/// Below a millisecond the value is kept as is, below a second it is rounded
/// to the microsecond, otherwise to the millisecond.
pub fn round_duration(d: Duration) -> Duration {
    let nanos = d.as_nanos();
    if nanos < 1_000_000 {
        d
    } else if nanos < 1_000_000_000 {
        duration_from_nanos(round_to(nanos, 1_000))
    } else {
        duration_from_nanos(round_to(nanos, 1_000_000))
    }
}

/// Formats a duration the way humans read build logs: `0s`, `850ns`,
/// `123.456µs`, `1.5ms`, `2.031s`, `1m0s`, `1h2m3.5s`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return format!("{}µs", decimal(nanos, 1_000));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", decimal(nanos, 1_000_000));
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs / 60) % 60;
    let secs = decimal(
        u128::from(total_secs % 60) * 1_000_000_000 + u128::from(d.subsec_nanos()),
        1_000_000_000,
    );
    if hours > 0 {
        format!("{hours}h{minutes}m{secs}s")
    } else if minutes > 0 {
        format!("{minutes}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

fn round_to(nanos: u128, unit: u128) -> u128 {
    (nanos + unit / 2) / unit * unit
}

fn duration_from_nanos(nanos: u128) -> Duration {
    Duration::new(
        (nanos / 1_000_000_000) as u64,
        (nanos % 1_000_000_000) as u32,
    )
}

/// `value / unit` with the fractional part printed without trailing zeros.
fn decimal(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
