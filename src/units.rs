//! Conversion of the engine's human-readable sizes to byte counts.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::RuntimeError;

static SIZE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(?:\.\d+)?) ?([kKmMgGtTpP])?[iI]?[bB]?$")
        .expect("size pattern is a valid regex")
});

/// Parses a decimal human size such as `142MB`, `1.2 GB` or `0B`.
///
/// Multipliers are powers of 1000 (`kB` = 1000 bytes); a trailing `i` is
/// accepted but does not switch to binary units, matching the engine's own
/// output. Fractional results are truncated.
pub fn from_human_size(size: &str) -> Result<u64, RuntimeError> {
    let trimmed = size.trim();
    let caps = SIZE_PATTERN
        .captures(trimmed)
        .ok_or_else(|| RuntimeError::Parse(format!("invalid size: '{}'", size)))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|e| RuntimeError::Parse(format!("invalid size '{}': {}", size, e)))?;

    let multiplier: f64 = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1.0,
        Some(unit) => match unit.as_str() {
            "k" => 1e3,
            "m" => 1e6,
            "g" => 1e9,
            "t" => 1e12,
            "p" => 1e15,
            other => return Err(RuntimeError::Parse(format!("unknown size unit: {}", other))),
        },
    };

    Ok((value * multiplier) as u64)
}
