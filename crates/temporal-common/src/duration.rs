//! Go-style duration strings (`87600h`, `1h30m`, `5m`, `10s`)
//!
//! cert-manager and the Temporal server both take durations in this form,
//! so the CRD keeps them as strings and they are parsed only for
//! validation and comparison.

use std::time::Duration;

use thiserror::Error;

/// Error parsing a duration string
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationParseError {
    /// The rejected input
    pub input: String,
    /// Why it was rejected
    pub reason: String,
}

/// Parse a Go-style duration
///
/// Supports the units `h`, `m`, `s`, `ms`, integer amounts only, and any
/// number of unit groups. A bare `0` is accepted.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let err = |reason: &str| DurationParseError {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(err("empty"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return Err(err("expected a number"));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|_| err("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(|b| b.is_ascii_alphabetic()).count();
        let (unit, tail) = rest.split_at(unit_len);
        let part = match unit {
            "h" => Duration::from_secs(amount.saturating_mul(3600)),
            "m" => Duration::from_secs(amount.saturating_mul(60)),
            "s" => Duration::from_secs(amount),
            "ms" => Duration::from_millis(amount),
            "" => return Err(err("missing unit")),
            other => return Err(err(&format!("unknown unit '{other}'"))),
        };
        total = total.saturating_add(part);
        rest = tail;
    }
    Ok(total)
}

/// Format a duration the way cert-manager prints it (`8760h0m0s`)
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
