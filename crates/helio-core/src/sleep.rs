//! Day/night sleep scheduling
//!
//! Once an hour-of-day falls inside the night window the tracker is parked
//! and the scheduler hands back a [`SleepRequest`]. The firmware turns that
//! into a timer-armed deep sleep; nothing runs afterwards, so `Sleeping` is
//! terminal until the chip wakes and boots from scratch.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::SensorBus;
use crate::clock::{ClockError, ClockSource, SECONDS_PER_DAY, WallClock};
use crate::fault::FaultLatch;
use crate::tracker::{ServoDriver, TrackerController};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepConfig {
    /// First hour of the night window.
    pub sleep_start_hour: u8,
    /// Hour the station wakes at; exclusive end of the window.
    pub wake_hour: u8,
    /// Used when the computed sleep duration is not positive.
    pub fallback_secs: u32,
    /// Duration of a sleep requested remotely without an explicit length.
    pub forced_sleep_secs: u32,
    /// Any clock reading before this year is an unsynchronized RTC.
    pub min_valid_year: i32,
    pub utc_offset_minutes: i32,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            sleep_start_hour: 20,
            wake_hour: 7,
            fallback_secs: 60,
            forced_sleep_secs: 3600,
            min_valid_year: 2016,
            utc_offset_minutes: 0,
        }
    }
}

/// Whether `hour` lies in `[start, wake)`, wrapping past midnight when
/// `start > wake`. An empty window (`start == wake`) never matches.
pub fn in_night_window(hour: u8, start: u8, wake: u8) -> bool {
    if start < wake {
        hour >= start && hour < wake
    } else if start > wake {
        hour >= start || hour < wake
    } else {
        false
    }
}

/// Seconds from `now` to the next `wake_hour:00:00`.
///
/// Only non-positive for clock readings with out-of-range fields.
pub fn seconds_until_wake(now: &WallClock, wake_hour: u8) -> i64 {
    let now_secs = i64::from(now.seconds_of_day());
    let wake_secs = i64::from(wake_hour) * 3600;
    if now.hour < wake_hour {
        wake_secs - now_secs
    } else {
        i64::from(SECONDS_PER_DAY) - now_secs + wake_secs
    }
}

/// Terminal request to suspend the station for `duration_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepRequest {
    pub duration_secs: u32,
}

/// Pure outcome of one scheduler check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepDecision {
    /// No trustworthy time; nothing was evaluated.
    Unsynced,
    StayAwake,
    Sleep(SleepRequest),
}

/// Decide from the current wall-clock reading.
pub fn decide(now: Result<WallClock, ClockError>, config: &SleepConfig) -> SleepDecision {
    let now = match now {
        Ok(now) if now.year >= config.min_valid_year => now,
        _ => return SleepDecision::Unsynced,
    };

    if !in_night_window(now.hour, config.sleep_start_hour, config.wake_hour) {
        return SleepDecision::StayAwake;
    }

    let secs = seconds_until_wake(&now, config.wake_hour);
    let duration_secs = if secs > 0 {
        u32::try_from(secs).unwrap_or(config.fallback_secs)
    } else {
        config.fallback_secs
    };
    SleepDecision::Sleep(SleepRequest { duration_secs })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPhase {
    Awake,
    Sleeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// Clock not synchronized; the check was skipped.
    Skipped,
    Awake,
    /// Tracker parked; suspend now.
    Suspend(SleepRequest),
    /// A previous check already requested suspension.
    AlreadySleeping,
}

pub struct SleepScheduler {
    config: SleepConfig,
    phase: SleepPhase,
    unsynced: FaultLatch,
}

impl SleepScheduler {
    pub const fn new(config: SleepConfig) -> Self {
        Self {
            config,
            phase: SleepPhase::Awake,
            unsynced: FaultLatch::new(),
        }
    }

    pub fn phase(&self) -> SleepPhase {
        self.phase
    }

    pub fn config(&self) -> &SleepConfig {
        &self.config
    }

    /// Evaluate one reading without side effects on the tracker.
    pub fn evaluate(&mut self, now: Result<WallClock, ClockError>) -> SleepDecision {
        let decision = decide(now, &self.config);
        if decision == SleepDecision::Unsynced {
            if self.unsynced.fail().is_edge() {
                warn!("Clock not synchronized; sleep checks skipped");
            }
        } else if self.unsynced.clear().is_edge() {
            info!("Clock synchronized; sleep checks active");
        }
        decision
    }

    /// Periodic check: park and request suspension inside the night window.
    pub async fn run_check<C, S, M, D>(
        &mut self,
        clock: &C,
        tracker: &mut TrackerController<S>,
        bus: &SensorBus<M>,
        delay: &mut D,
    ) -> SleepOutcome
    where
        C: ClockSource,
        S: ServoDriver,
        M: RawMutex,
        D: DelayNs,
    {
        if self.phase == SleepPhase::Sleeping {
            return SleepOutcome::AlreadySleeping;
        }

        match self.evaluate(clock.now()) {
            SleepDecision::Unsynced => SleepOutcome::Skipped,
            SleepDecision::StayAwake => {
                debug!("Outside the night window");
                SleepOutcome::Awake
            }
            SleepDecision::Sleep(request) => {
                info!(
                    "Night window reached; sleeping {} s until {:02}:00",
                    request.duration_secs, self.config.wake_hour
                );
                self.enter_sleep(tracker, bus, delay, request).await
            }
        }
    }

    /// Sleep on request regardless of the time of day.
    pub async fn force_sleep<S, M, D>(
        &mut self,
        tracker: &mut TrackerController<S>,
        bus: &SensorBus<M>,
        delay: &mut D,
        duration_secs: Option<u32>,
    ) -> SleepOutcome
    where
        S: ServoDriver,
        M: RawMutex,
        D: DelayNs,
    {
        if self.phase == SleepPhase::Sleeping {
            return SleepOutcome::AlreadySleeping;
        }

        let duration_secs = duration_secs
            .filter(|&secs| secs > 0)
            .unwrap_or(self.config.forced_sleep_secs);
        info!("Forced sleep for {} s", duration_secs);
        self.enter_sleep(tracker, bus, delay, SleepRequest { duration_secs })
            .await
    }

    async fn enter_sleep<S, M, D>(
        &mut self,
        tracker: &mut TrackerController<S>,
        bus: &SensorBus<M>,
        delay: &mut D,
        request: SleepRequest,
    ) -> SleepOutcome
    where
        S: ServoDriver,
        M: RawMutex,
        D: DelayNs,
    {
        tracker.park(bus, delay).await;
        self.phase = SleepPhase::Sleeping;
        SleepOutcome::Suspend(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{SharedSensorBus, Snapshot};
    use crate::tracker::{ActuationError, Axis, TrackerConfig, TrackerMode, TrackerState};
    use embassy_futures::block_on;
    use embassy_time::Duration;

    struct NullServo;

    impl ServoDriver for NullServo {
        fn set_angle(&mut self, _axis: Axis, _degrees: f32) -> Result<(), ActuationError> {
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    struct FixedClock(Result<WallClock, ClockError>);

    impl ClockSource for FixedClock {
        fn now(&self) -> Result<WallClock, ClockError> {
            self.0
        }
    }

    fn at(year: i32, hour: u8, minute: u8) -> WallClock {
        WallClock {
            year,
            month: 6,
            day: 15,
            hour,
            minute,
            second: 0,
        }
    }

    fn fixture() -> (SharedSensorBus, TrackerController<NullServo>) {
        let bus = SensorBus::new(Snapshot::default(), Duration::from_millis(10));
        let tracker = TrackerController::new(NullServo, TrackerConfig::default());
        (bus, tracker)
    }

    #[test]
    fn window_wraps_midnight() {
        let inside = [20, 21, 23, 0, 3, 6];
        let outside = [7, 8, 12, 19];
        for h in inside {
            assert!(in_night_window(h, 20, 7), "hour {h}");
        }
        for h in outside {
            assert!(!in_night_window(h, 20, 7), "hour {h}");
        }
    }

    #[test]
    fn same_day_window_and_empty_window() {
        assert!(in_night_window(2, 1, 5));
        assert!(!in_night_window(5, 1, 5));
        assert!(!in_night_window(0, 1, 5));
        for h in 0..24 {
            assert!(!in_night_window(h, 7, 7));
        }
    }

    #[test]
    fn wake_is_next_boundary() {
        assert_eq!(seconds_until_wake(&at(2024, 22, 0), 7), 9 * 3600);
        assert_eq!(seconds_until_wake(&at(2024, 3, 30), 7), 3 * 3600 + 30 * 60);
        assert_eq!(seconds_until_wake(&at(2024, 7, 0), 7), 24 * 3600);
    }

    #[test]
    fn late_evening_parks_and_sleeps_until_morning() {
        let (bus, mut tracker) = fixture();
        let mut scheduler = SleepScheduler::new(SleepConfig::default());
        let clock = FixedClock(Ok(at(2024, 22, 0)));

        let outcome = block_on(scheduler.run_check(&clock, &mut tracker, &bus, &mut NoDelay));

        assert_eq!(
            outcome,
            SleepOutcome::Suspend(SleepRequest {
                duration_secs: 9 * 3600
            })
        );
        assert_eq!(tracker.mode(), TrackerMode::Parked);
        assert_eq!(tracker.state(), TrackerState::new(90.0, 0.0));
        assert_eq!(scheduler.phase(), SleepPhase::Sleeping);

        // Terminal: later checks do nothing.
        assert_eq!(
            block_on(scheduler.run_check(&clock, &mut tracker, &bus, &mut NoDelay)),
            SleepOutcome::AlreadySleeping
        );
    }

    #[test]
    fn unsynchronized_clock_is_a_no_op() {
        let (bus, mut tracker) = fixture();
        let mut scheduler = SleepScheduler::new(SleepConfig::default());

        for reading in [Ok(at(1970, 22, 0)), Ok(at(2015, 23, 0)), Err(ClockError::Unsynced)] {
            let clock = FixedClock(reading);
            assert_eq!(
                block_on(scheduler.run_check(&clock, &mut tracker, &bus, &mut NoDelay)),
                SleepOutcome::Skipped
            );
        }
        assert_eq!(tracker.mode(), TrackerMode::Tracking);
        assert_eq!(tracker.state(), TrackerState::new(90.0, 45.0));
        assert_eq!(scheduler.phase(), SleepPhase::Awake);
    }

    #[test]
    fn daytime_stays_awake() {
        let (bus, mut tracker) = fixture();
        let mut scheduler = SleepScheduler::new(SleepConfig::default());
        let clock = FixedClock(Ok(at(2024, 13, 0)));
        assert_eq!(
            block_on(scheduler.run_check(&clock, &mut tracker, &bus, &mut NoDelay)),
            SleepOutcome::Awake
        );
        assert_eq!(tracker.mode(), TrackerMode::Tracking);
    }

    #[test]
    fn non_positive_duration_uses_fallback() {
        let config = SleepConfig {
            sleep_start_hour: 20,
            wake_hour: 0,
            ..SleepConfig::default()
        };
        // A faulty source reporting hour 30 lands past the next midnight.
        let bogus = WallClock {
            hour: 30,
            ..at(2024, 0, 0)
        };
        assert!(seconds_until_wake(&bogus, 0) <= 0);
        assert_eq!(
            decide(Ok(bogus), &config),
            SleepDecision::Sleep(SleepRequest { duration_secs: 60 })
        );
    }

    #[test]
    fn forced_sleep_parks_with_default_duration() {
        let (bus, mut tracker) = fixture();
        let mut scheduler = SleepScheduler::new(SleepConfig::default());

        let outcome = block_on(scheduler.force_sleep(&mut tracker, &bus, &mut NoDelay, None));
        assert_eq!(
            outcome,
            SleepOutcome::Suspend(SleepRequest {
                duration_secs: 3600
            })
        );
        assert_eq!(tracker.mode(), TrackerMode::Parked);
    }

    #[test]
    fn forced_sleep_honours_explicit_duration() {
        let (bus, mut tracker) = fixture();
        let mut scheduler = SleepScheduler::new(SleepConfig::default());
        let outcome = block_on(scheduler.force_sleep(&mut tracker, &bus, &mut NoDelay, Some(600)));
        assert_eq!(
            outcome,
            SleepOutcome::Suspend(SleepRequest { duration_secs: 600 })
        );
    }
}
