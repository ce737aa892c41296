//! Candle-boundary time math.
//!
//! All arithmetic happens in UTC; midnight UTC is the sole day anchor and
//! local time is never consulted. Resolutions are validated once into a
//! [`Resolution`] newtype so the rest of the engine never has to re-parse
//! a bare resolution string.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// A validated candle resolution, e.g. `"5"`, `"60"`, `"D"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resolution(String);

impl Resolution {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        resolution_to_minutes(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Minutes per candle for a resolution string. `"D"`/`"1D"` is 1440.
pub fn resolution_to_minutes(res: &str) -> EngineResult<u32> {
    match res {
        "1" => Ok(1),
        "3" => Ok(3),
        "5" => Ok(5),
        "10" => Ok(10),
        "15" => Ok(15),
        "30" => Ok(30),
        "60" => Ok(60),
        "120" => Ok(120),
        "240" => Ok(240),
        "360" => Ok(360),
        "720" => Ok(720),
        "D" | "1D" => Ok(1440),
        other => Err(EngineError::UnsupportedResolution(other.to_string())),
    }
}

/// Cron pattern for a resolution. Resolutions that cleanly divide the hour
/// or the day get an exact pattern; anything else is best-effort and the
/// caller is expected to log a warning (see `resolution_to_cron_checked`).
pub fn resolution_to_cron(res: &str) -> EngineResult<String> {
    let minutes = resolution_to_minutes(res)?;

    if minutes == 1440 {
        return Ok("0 0 * * *".to_string());
    }
    if minutes < 60 && 60 % minutes == 0 {
        return Ok(format!("*/{minutes} * * * *"));
    }
    if minutes % 60 == 0 {
        let hours = minutes / 60;
        if 24 % hours == 0 {
            return Ok(format!("0 */{hours} * * *"));
        }
    }
    // Best-effort: neither divides the hour nor the day evenly.
    Ok(format!("*/{minutes} * * * *"))
}

/// Like [`resolution_to_cron`] but also reports whether the pattern is an
/// exact fit (`true`) or the best-effort fallback (`false`), so the caller
/// can warn when a resolution forces an inexact cron approximation.
pub fn resolution_to_cron_checked(res: &str) -> EngineResult<(String, bool)> {
    let minutes = resolution_to_minutes(res)?;
    let exact = minutes == 1440
        || (minutes < 60 && 60 % minutes == 0)
        || (minutes % 60 == 0 && 24 % (minutes / 60) == 0);
    Ok((resolution_to_cron(res)?, exact))
}

/// Floor `ts` to the most recent UTC boundary for `res`.
pub fn round_to_boundary(ts: DateTime<Utc>, res: &str) -> EngineResult<DateTime<Utc>> {
    let minutes = resolution_to_minutes(res)? as i64;
    let day_start = ts
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    let day_start = Utc.from_utc_datetime(&day_start);

    if minutes >= 1440 {
        return Ok(day_start);
    }

    let minutes_since_midnight = ts.signed_duration_since(day_start).num_minutes();
    let floored = (minutes_since_midnight / minutes) * minutes;
    Ok(day_start + ChronoDuration::minutes(floored))
}

/// Strict "next" boundary: if `now` sits exactly on a boundary, returns the
/// *following* one.
pub fn next_candle_close(now: DateTime<Utc>, res: &str) -> EngineResult<DateTime<Utc>> {
    let minutes = resolution_to_minutes(res)? as i64;
    let floor = round_to_boundary(now, res)?;
    // The next boundary is always one step past the floor, whether or not
    // `now` landed exactly on one: a boundary `now` must not be returned.
    Ok(floor + ChronoDuration::minutes(minutes))
}

/// ISO-8601 timestamp of the floored boundary; used as the execution
/// dedup key for a (strategy, candle) pair.
pub fn interval_key(ts: DateTime<Utc>, res: &str) -> EngineResult<String> {
    let floored = round_to_boundary(ts, res)?;
    Ok(floored.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

/// Lock TTL for a resolution: `max(minutes*60 - safety, 1)` seconds.
pub fn lock_ttl(res: &str, safety: Duration) -> EngineResult<Duration> {
    let minutes = resolution_to_minutes(res)? as u64;
    let total_seconds = minutes * 60;
    let safety_seconds = safety.as_secs();
    let ttl = total_seconds.saturating_sub(safety_seconds).max(1);
    Ok(Duration::from_secs(ttl))
}

/// Returns `(within_tolerance, drift_seconds)` for a scheduled vs. actual
/// firing time.
pub fn validate_timing(
    scheduled: DateTime<Utc>,
    actual: DateTime<Utc>,
    max_drift: Duration,
) -> (bool, f64) {
    let drift = (actual - scheduled).num_milliseconds().abs() as f64 / 1000.0;
    (drift <= max_drift.as_secs_f64(), drift)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn rejects_unsupported_resolution() {
        assert!(matches!(
            resolution_to_minutes("7"),
            Err(EngineError::UnsupportedResolution(_))
        ));
    }

    #[test]
    fn cron_patterns_for_supported_resolutions() {
        assert_eq!(resolution_to_cron("5").unwrap(), "*/5 * * * *");
        assert_eq!(resolution_to_cron("60").unwrap(), "0 */1 * * *");
        assert_eq!(resolution_to_cron("240").unwrap(), "0 */4 * * *");
        assert_eq!(resolution_to_cron("D").unwrap(), "0 0 * * *");
        assert_eq!(resolution_to_cron("1D").unwrap(), "0 0 * * *");
    }

    #[test]
    fn cron_checked_flags_best_effort_patterns() {
        // 720 divides 1440 evenly as hours (720/60=12, 24%12==0) -> exact.
        let (_, exact) = resolution_to_cron_checked("720").unwrap();
        assert!(exact);
    }

    #[test]
    fn exact_boundary_scenario() {
        let now = ts("2025-01-01T00:05:00Z");
        assert_eq!(next_candle_close(now, "5").unwrap(), ts("2025-01-01T00:10:00Z"));
        assert_eq!(round_to_boundary(now, "5").unwrap(), ts("2025-01-01T00:05:00Z"));
        assert_eq!(interval_key(now, "5").unwrap(), "2025-01-01T00:05:00.000Z");
    }

    #[test]
    fn day_rollover_scenario() {
        let now = ts("2025-01-01T23:58:00Z");
        assert_eq!(next_candle_close(now, "5").unwrap(), ts("2025-01-02T00:00:00Z"));
    }

    #[test]
    fn daily_anchor_scenario() {
        let now = ts("2025-01-01T12:34:56Z");
        assert_eq!(next_candle_close(now, "D").unwrap(), ts("2025-01-02T00:00:00Z"));
    }

    #[test]
    fn round_to_boundary_is_idempotent() {
        let now = ts("2025-03-17T08:47:23Z");
        let once = round_to_boundary(now, "15").unwrap();
        let twice = round_to_boundary(once, "15").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn lock_ttl_floors_at_one_second() {
        let ttl = lock_ttl("1", Duration::from_secs(120)).unwrap();
        assert_eq!(ttl, Duration::from_secs(1));
        let ttl = lock_ttl("5", Duration::from_secs(5)).unwrap();
        assert_eq!(ttl, Duration::from_secs(295));
    }

    #[test]
    fn validate_timing_within_and_outside_tolerance() {
        let scheduled = ts("2025-01-01T00:05:00Z");
        let actual = ts("2025-01-01T00:05:01Z");
        let (ok, drift) = validate_timing(scheduled, actual, Duration::from_secs(2));
        assert!(ok);
        assert!((drift - 1.0).abs() < 1e-9);

        let actual_late = ts("2025-01-01T00:05:05Z");
        let (ok, _) = validate_timing(scheduled, actual_late, Duration::from_secs(2));
        assert!(!ok);
    }

    #[test]
    fn next_close_always_strictly_after_now() {
        for (now_str, res) in [
            ("2025-06-01T00:00:00Z", "1"),
            ("2025-06-01T00:00:01Z", "15"),
            ("2025-06-01T23:59:59Z", "D"),
        ] {
            let now = ts(now_str);
            let next = next_candle_close(now, res).unwrap();
            assert!(next > now);
            let minutes = resolution_to_minutes(res).unwrap() as i64;
            let floor = round_to_boundary(now, res).unwrap();
            assert_eq!((next - floor).num_minutes(), minutes);
        }
    }
}
