//! Time utilities for taviblockd
//!
//! All session timers are anchored to the wall clock so that system sleep
//! counts against session durations. The monotonic clock is only used for
//! tick cadence and enforcement throttling.
//!
//! The wall clock is injected as a [`Clock`] dependency rather than read
//! through `Local::now()` at use sites, so time-driven behavior is
//! deterministic under test (see [`ManualClock`]).

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Hour (local time) at which the progressive-penalty day bucket rolls over.
pub const DAY_BUCKET_ROLLOVER_HOUR: i64 = 4;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to. Test use only, but lives here so
/// every crate's tests can drive the same instance.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `d`.
    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::zero());
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Local>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}

/// The progressive-penalty day bucket containing `at`.
///
/// A bucket is a calendar day rolling over at 04:00 local: every instant
/// before 04:00 belongs to the previous date's bucket. Computed by shifting
/// the instant back four hours and taking its local date, which assigns
/// exactly one bucket to every wall-clock instant, DST transitions included.
pub fn day_bucket(at: DateTime<Local>) -> NaiveDate {
    (at - ChronoDuration::hours(DAY_BUCKET_ROLLOVER_HOUR)).date_naive()
}

/// Represents a point in monotonic time, immune to wall-clock changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Instant);

impl MonotonicInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    pub fn duration_since(&self, earlier: MonotonicInstant) -> Duration {
        self.0.duration_since(earlier.0)
    }
}

impl std::ops::Add<Duration> for MonotonicInstant {
    type Output = MonotonicInstant;

    fn add(self, rhs: Duration) -> Self::Output {
        MonotonicInstant(self.0 + rhs)
    }
}

/// Format a duration in human-readable form for status output.
///
/// Durations of five minutes or less keep second precision; longer ones are
/// rounded down to minutes or hours.
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();

    if total_secs < 60 {
        return format!("{}s", total_secs);
    }

    if total_secs <= 300 {
        let minutes = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            return format!("{}m {}s", minutes, secs);
        }
        return format!("{}m", minutes);
    }

    if total_secs < 3600 {
        return format!("{}m", total_secs / 60);
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    if minutes > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}h", hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Local.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + ChronoDuration::seconds(90));
    }

    #[test]
    fn day_bucket_rolls_over_at_four() {
        let late_night = Local.with_ymd_and_hms(2025, 6, 2, 3, 59, 59).unwrap();
        let early_morning = Local.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap();

        assert_eq!(
            day_bucket(late_night),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
        );
        assert_eq!(
            day_bucket(early_morning),
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
        );
    }

    #[test]
    fn day_bucket_noon_is_same_day() {
        let noon = Local.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        assert_eq!(
            day_bucket(noon),
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
        );
    }

    #[test]
    fn format_duration_precision() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(420)), "7m");
        assert_eq!(format_duration(Duration::from_secs(3900)), "1h 5m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
    }

    #[test]
    fn monotonic_instant_ordering() {
        let t1 = MonotonicInstant::now();
        let t2 = t1 + Duration::from_millis(10);
        assert!(t2 > t1);
        assert_eq!(t2.duration_since(t1), Duration::from_millis(10));
    }
}
