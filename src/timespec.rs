//! Period literal parsing: `"1s"`, `"5m"`, `"2h"` ↔ [`Duration`].

use crate::error::WeirError;
use std::time::Duration;

/// Parse a period literal of the form `<integer><unit>` with
/// `unit ∈ {s, m, h}`.
pub fn parse_period(s: &str) -> Result<Duration, WeirError> {
    if s.is_empty() {
        return Err(WeirError::invalid("empty period"));
    }

    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if digits_end == 0 {
        return Err(WeirError::invalid(format!("period `{}` must start with digits", s)));
    }
    if digits_end == s.len() {
        return Err(WeirError::invalid(format!("period `{}` is missing a unit", s)));
    }

    let value: u64 = s[..digits_end]
        .parse()
        .map_err(|_| WeirError::invalid(format!("period `{}` has an invalid count", s)))?;

    let seconds = match &s[digits_end..] {
        "s" => Some(value),
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3600),
        unit => {
            return Err(WeirError::invalid(format!(
                "unknown period unit `{}` in `{}`",
                unit, s
            )))
        }
    };
    seconds
        .map(Duration::from_secs)
        .ok_or_else(|| WeirError::invalid(format!("period `{}` overflows", s)))
}

/// Format a duration back into its canonical period literal.
///
/// Durations on an exact hour boundary render as hours, exact minutes as
/// minutes, everything else as seconds, so `format_period(parse_period(s))`
/// round-trips canonical inputs.
pub fn format_period(d: Duration) -> String {
    let secs = d.as_secs();
    if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        let cases = [
            ("10s", Duration::from_secs(10)),
            ("1m", Duration::from_secs(60)),
            ("1h", Duration::from_secs(3600)),
            ("90s", Duration::from_secs(90)),
        ];
        for (input, want) in cases {
            assert_eq!(parse_period(input).unwrap(), want, "input {}", input);
        }
    }

    #[test]
    fn normalizes_to_nanoseconds() {
        assert_eq!(parse_period("10s").unwrap().as_nanos(), 10_000_000_000);
        assert_eq!(parse_period("1m").unwrap().as_nanos(), 60_000_000_000);
        assert_eq!(parse_period("1h").unwrap().as_nanos(), 3_600_000_000_000);
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "s", "m10", "10", "10d", "1.5s", "-3s"] {
            assert!(parse_period(input).is_err(), "input {:?} should fail", input);
        }
    }

    #[test]
    fn round_trips_canonical_literals() {
        for input in ["10s", "90s", "1m", "30m", "1h", "24h"] {
            assert_eq!(format_period(parse_period(input).unwrap()), input);
        }
    }
}
