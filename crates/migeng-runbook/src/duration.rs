//! Offset and duration grammar (spec §4.1).
//!
//! Offsets: `T-N<unit>` or `T-0`, resolved to minutes.
//! Durations: same grammar without the `T-` prefix, resolved to seconds.

use std::sync::OnceLock;

use regex::Regex;

fn offset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^T-(\d+)(s|m|h|d)$|^T-0$").unwrap())
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(s|m|h|d)$").unwrap())
}

/// Parses `T-N<unit>` (or `T-0`) into minutes before the batch anchor.
pub fn parse_offset(raw: &str) -> Result<i64, String> {
    if raw == "T-0" {
        return Ok(0);
    }
    let caps = offset_re()
        .captures(raw)
        .ok_or_else(|| format!("invalid offset: {raw:?}"))?;
    let n: i64 = caps
        .get(1)
        .ok_or_else(|| format!("invalid offset: {raw:?}"))?
        .as_str()
        .parse()
        .map_err(|_| format!("invalid offset magnitude: {raw:?}"))?;
    let unit = caps.get(2).unwrap().as_str();
    Ok(unit_to_minutes(n, unit))
}

fn unit_to_minutes(n: i64, unit: &str) -> i64 {
    match unit {
        "d" => n * 1440,
        "h" => n * 60,
        "m" => n,
        "s" => (n + 59) / 60, // ceil(N/60)
        _ => unreachable!("regex only matches s|m|h|d"),
    }
}

/// Parses `N<unit>` into seconds.
pub fn parse_duration_secs(raw: &str) -> Result<u64, String> {
    let caps = duration_re()
        .captures(raw)
        .ok_or_else(|| format!("invalid duration: {raw:?}"))?;
    let n: u64 = caps
        .get(1)
        .unwrap()
        .as_str()
        .parse()
        .map_err(|_| format!("invalid duration magnitude: {raw:?}"))?;
    let unit = caps.get(2).unwrap().as_str();
    Ok(match unit {
        "d" => n * 86400,
        "h" => n * 3600,
        "m" => n * 60,
        "s" => n,
        _ => unreachable!("regex only matches s|m|h|d"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_zero() {
        assert_eq!(parse_offset("T-0").unwrap(), 0);
    }

    #[test]
    fn offset_units() {
        assert_eq!(parse_offset("T-1d").unwrap(), 1440);
        assert_eq!(parse_offset("T-2h").unwrap(), 120);
        assert_eq!(parse_offset("T-30m").unwrap(), 30);
        assert_eq!(parse_offset("T-90s").unwrap(), 2); // ceil(90/60)
    }

    #[test]
    fn offset_rejects_garbage() {
        assert!(parse_offset("T-1x").is_err());
        assert!(parse_offset("1d").is_err());
    }

    #[test]
    fn duration_units() {
        assert_eq!(parse_duration_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_secs("2h").unwrap(), 7200);
        assert_eq!(parse_duration_secs("1d").unwrap(), 86400);
    }

    /// R1: ParseOffset("T-" + N + "d") == N*1440.
    #[test]
    fn round_trip_offset_days() {
        for n in [1, 3, 7, 30] {
            assert_eq!(parse_offset(&format!("T-{n}d")).unwrap(), n * 1440);
        }
    }

    /// R1: ParseDuration(N+"m")*60 equals ParseDuration(N*60+"s") within
    /// the ceil(./60) rounding the seconds branch applies.
    #[test]
    fn round_trip_minutes_vs_seconds() {
        for n in [1u64, 5, 42] {
            let minutes_as_secs = parse_duration_secs(&format!("{n}m")).unwrap();
            let via_seconds = parse_offset(&format!("T-{}s", n * 60)).unwrap() * 60;
            assert_eq!(minutes_as_secs, via_seconds);
        }
    }
}
