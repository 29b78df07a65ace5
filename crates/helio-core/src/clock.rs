//! Wall-clock time
//!
//! The device has no battery-backed RTC worth trusting. Time becomes known
//! once network time has been fetched; until then every clock read reports
//! "unsynchronized" and time-based decisions are skipped.

use embassy_time::Instant;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

pub const SECONDS_PER_DAY: u32 = 86_400;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockError {
    #[error("wall clock not synchronized")]
    Unsynced,
}

/// Broken-down local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallClock {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl WallClock {
    /// Local time for a unix timestamp and a fixed UTC offset.
    pub fn from_unix(unix_secs: i64, utc_offset_minutes: i32) -> Self {
        let local = unix_secs + i64::from(utc_offset_minutes) * 60;
        let days = local.div_euclid(i64::from(SECONDS_PER_DAY));
        let secs_of_day = local.rem_euclid(i64::from(SECONDS_PER_DAY)) as u32;
        let (year, month, day) = civil_from_days(days);

        Self {
            year,
            month,
            day,
            hour: (secs_of_day / 3600) as u8,
            minute: (secs_of_day / 60 % 60) as u8,
            second: (secs_of_day % 60) as u8,
        }
    }

    pub fn seconds_of_day(&self) -> u32 {
        u32::from(self.hour) * 3600 + u32::from(self.minute) * 60 + u32::from(self.second)
    }
}

/// Gregorian date for days since 1970-01-01.
fn civil_from_days(days: i64) -> (i32, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    (year as i32, month as u8, day as u8)
}

/// Source of local wall-clock time.
pub trait ClockSource {
    fn now(&self) -> Result<WallClock, ClockError>;
}

/// Wall clock anchored to a monotonic instant at the last network sync.
#[derive(Debug, Clone, Copy)]
pub struct SyncedClock {
    anchor: Option<(i64, Instant)>,
    utc_offset_minutes: i32,
}

impl SyncedClock {
    pub const fn new(utc_offset_minutes: i32) -> Self {
        Self {
            anchor: None,
            utc_offset_minutes,
        }
    }

    /// Record that `unix_secs` was the time at monotonic instant `at`.
    pub fn set_unix_time(&mut self, unix_secs: i64, at: Instant) {
        self.anchor = Some((unix_secs, at));
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn unix_at(&self, now: Instant) -> Result<i64, ClockError> {
        let (unix, at) = self.anchor.ok_or(ClockError::Unsynced)?;
        let elapsed = now.saturating_duration_since(at).as_secs() as i64;
        Ok(unix + elapsed)
    }

    pub fn wall_clock_at(&self, now: Instant) -> Result<WallClock, ClockError> {
        self.unix_at(now)
            .map(|unix| WallClock::from_unix(unix, self.utc_offset_minutes))
    }
}

impl ClockSource for SyncedClock {
    fn now(&self) -> Result<WallClock, ClockError> {
        self.wall_clock_at(Instant::now())
    }
}
