//! Parser for accelerator status lines.
//!
//! `aria2c` redraws a one-line summary while it works. Two shapes matter:
//!
//! ```text
//! [#8ba9a7 3.0GiB/4.4GiB(67%) CN:16 DL:7.9MiB ETA:3m2s]
//! [FileAlloc:#8ba9a7 356MiB/4.4GiB(7%)]
//! ```
//!
//! The first is a transfer line with speed and ETA, the second is printed
//! while the destination file is being preallocated. Anything else is
//! ignored.

use std::sync::OnceLock;

use regex::Regex;

use super::progress::TransferProgress;

/// Substring that marks a preallocation line.
pub const FILE_ALLOCATION_MARKER: &str = "FileAlloc";

struct Grammar {
    percent: Regex,
    size: Regex,
    eta: Regex,
}

fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
    GRAMMAR.get_or_init(|| Grammar {
        percent: Regex::new(r"\((?P<percent>\d{1,3})%\)").expect("percent grammar is valid"),
        size: Regex::new(r"(?P<value>-?\d+(?:\.\d+)?)(?P<unit>GiB|MiB|KiB|B)\b")
            .expect("size grammar is valid"),
        eta: Regex::new(r"ETA:(?:(?P<h>\d+)h)?(?:(?P<m>\d+)m)?(?:(?P<s>\d+)s)?")
            .expect("eta grammar is valid"),
    })
}

/// Parse one status line.
///
/// Returns `None` for lines that are neither a transfer nor an allocation
/// line; callers skip those.
pub fn parse_progress_line(line: &str) -> Option<TransferProgress> {
    if line.contains(FILE_ALLOCATION_MARKER) {
        parse_allocation_line(line)
    } else {
        parse_transfer_line(line)
    }
}

fn percent_of(line: &str) -> Option<u8> {
    let caps = grammar().percent.captures(line)?;
    let percent: u16 = caps["percent"].parse().ok()?;
    Some(percent.min(100) as u8)
}

fn sizes_of(line: &str) -> Vec<u64> {
    grammar()
        .size
        .captures_iter(line)
        .filter_map(|caps| convert_size(&caps["value"], &caps["unit"]))
        .collect()
}

fn parse_allocation_line(line: &str) -> Option<TransferProgress> {
    // Only the allocation segment counts; a transfer summary may precede it
    // on the same line.
    let segment = &line[line.find(FILE_ALLOCATION_MARKER)?..];
    let percent = percent_of(segment)?;
    let sizes = sizes_of(segment);
    let [current, total] = sizes.as_slice() else {
        return None;
    };

    Some(TransferProgress {
        percent,
        current_bytes: *current,
        total_bytes: *total,
        throughput_bytes_per_second: None,
        estimated_seconds_remaining: None,
    })
}

fn parse_transfer_line(line: &str) -> Option<TransferProgress> {
    let percent = percent_of(line)?;
    let sizes = sizes_of(line);
    // Read right to left: the last three sizes are speed, total and current.
    let mut from_right = sizes.iter().rev();
    let speed = *from_right.next()?;
    let total = *from_right.next()?;
    let current = *from_right.next()?;

    Some(TransferProgress {
        percent,
        current_bytes: current,
        total_bytes: total,
        throughput_bytes_per_second: Some(speed),
        estimated_seconds_remaining: eta_of(line),
    })
}

fn eta_of(line: &str) -> Option<u64> {
    let caps = grammar().eta.captures(line)?;
    let component = |name: &str| -> Option<u64> { caps.name(name)?.as_str().parse().ok() };
    let (h, m, s) = (component("h"), component("m"), component("s"));
    if h.is_none() && m.is_none() && s.is_none() {
        return None;
    }
    Some(h.unwrap_or(0) * 3_600 + m.unwrap_or(0) * 60 + s.unwrap_or(0))
}

/// Convert a size token into bytes.
///
/// The magnitude is made absolute and rounded up before scaling; units
/// scale decimally (a `KiB` counts as 1 000 bytes).
///
/// ```
/// use xcodes::download::convert_size;
///
/// assert_eq!(convert_size("1.0", "MiB"), Some(1_000_000));
/// assert_eq!(convert_size("2.5", "GiB"), Some(3_000_000_000));
/// ```
pub fn convert_size(value: &str, unit: &str) -> Option<u64> {
    let magnitude: f64 = value.parse().ok()?;
    let scale: u64 = match unit {
        "B" => 1,
        "KiB" => 1_000,
        "MiB" => 1_000_000,
        "GiB" => 1_000_000_000,
        _ => return None,
    };
    let whole = magnitude.abs().ceil();
    if !whole.is_finite() {
        return None;
    }
    (whole as u64).checked_mul(scale)
}
