//! Compact duration strings (`90s`, `1h30m`, `1.5h`, `250ms`) as written in
//! service labels and the config file.

use std::time::Duration;

use crate::error::{CoreError, Result};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a compact duration: one or more `<number><unit>` components.
///
/// Units: `ns`, `us`/`µs`, `ms`, `s`, `m`, `h`. Numbers may carry a decimal
/// fraction. A bare `0` is the only unit-less value accepted. Negative
/// durations are rejected since nothing in swarmcron can wait backwards.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input, "empty duration"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(invalid(input, "negative durations are not supported"));
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_end];
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            "" => return Err(invalid(input, "missing unit")),
            other => return Err(invalid(input, &format!("unknown unit {other:?}"))),
        };

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid(input, "expected a number"));
        }
        if frac.contains('.') {
            return Err(invalid(input, "malformed number"));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| invalid(input, "number out of range"))?
        };
        total = whole
            .checked_mul(unit_nanos)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| invalid(input, "duration out of range"))?;

        // Digits past nanosecond precision cannot change the result.
        let frac = &frac[..frac.len().min(18)];
        if !frac.is_empty() {
            let digits: u128 = frac
                .parse()
                .map_err(|_| invalid(input, "malformed fraction"))?;
            let scale = 10u128.pow(frac.len() as u32);
            total += digits * unit_nanos / scale;
        }
    }

    let secs = u64::try_from(total / NANOS_PER_SEC)
        .map_err(|_| invalid(input, "duration out of range"))?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

fn invalid(input: &str, reason: &str) -> CoreError {
    CoreError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse_duration("15us").unwrap(), Duration::from_micros(15));
        assert_eq!(parse_duration("15µs").unwrap(), Duration::from_micros(15));
        assert_eq!(parse_duration("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn compound_and_fractional() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(
            parse_duration("1m0.25s").unwrap(),
            Duration::from_millis(60_250)
        );
    }

    #[test]
    fn zero_is_unitless() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "10", "5x", "h", "1..5s", "-1s", "1h-5m", "abc"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn error_names_the_input() {
        let err = parse_duration("3 days").unwrap_err();
        assert!(err.to_string().contains("3 days"));
    }
}
