//! Station configuration
//!
//! Defaults reproduce the values the station has always shipped with. The
//! firmware overrides the network section (and anything else set in `.env`)
//! at build time.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::battery::BatteryConfig;
use crate::sensors::ADC_FULL_SCALE;
use crate::sleep::SleepConfig;
use crate::tracker::{MAX_ANGLE_DEG, MIN_ANGLE_DEG, TrackerConfig, TrackerState};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be an hour in 0..=23, got {value}")]
    InvalidHour { field: &'static str, value: u8 },
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("tracker tolerance {0} exceeds the ADC range")]
    ToleranceOutOfRange(u32),
    #[error("{field} angle outside the servo range")]
    AngleOutOfRange { field: &'static str },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPeriods {
    pub electrical_ms: u64,
    pub light_ms: u64,
    pub tracker_ms: u64,
    pub control_ms: u64,
    pub sleep_check_secs: u64,
}

impl TaskPeriods {
    pub fn electrical(&self) -> Duration {
        Duration::from_millis(self.electrical_ms)
    }

    pub fn light(&self) -> Duration {
        Duration::from_millis(self.light_ms)
    }

    pub fn tracker(&self) -> Duration {
        Duration::from_millis(self.tracker_ms)
    }

    pub fn control(&self) -> Duration {
        Duration::from_millis(self.control_ms)
    }

    pub fn sleep_check(&self) -> Duration {
        Duration::from_secs(self.sleep_check_secs)
    }
}

impl Default for TaskPeriods {
    fn default() -> Self {
        Self {
            electrical_ms: 1000,
            light_ms: 3000,
            tracker_ms: 200,
            control_ms: 1000,
            sleep_check_secs: 60,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub lock_timeout_ms: u64,
    /// Consecutive read failures tolerated before a sensor is re-initialized.
    pub max_sensor_failures: u32,
}

impl BusConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 100,
            max_sensor_failures: 10,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
    /// Attempts per connection round before reporting failure.
    pub wifi_retries: u8,
    /// Dotted IPv4 address of the telemetry collector.
    pub telemetry_host: &'a str,
    pub telemetry_port: u16,
    /// Local UDP port that accepts text commands.
    pub command_port: u16,
    pub ntp_server: &'a str,
}

impl Default for NetworkConfig<'_> {
    fn default() -> Self {
        Self {
            ssid: "",
            password: "",
            wifi_retries: 5,
            telemetry_host: "192.168.1.100",
            telemetry_port: 5005,
            command_port: 5006,
            ntp_server: "pool.ntp.org",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct Config<'a> {
    pub battery: BatteryConfig,
    pub tracker: TrackerConfig,
    pub sleep: SleepConfig,
    pub periods: TaskPeriods,
    pub bus: BusConfig,
    pub network: NetworkConfig<'a>,
}

fn check_hour(field: &'static str, value: u8) -> Result<(), ConfigError> {
    if value < 24 {
        Ok(())
    } else {
        Err(ConfigError::InvalidHour { field, value })
    }
}

fn check_positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    // Written this way round so NaN is rejected too.
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field })
    }
}

fn check_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field })
    }
}

fn check_position(field: &'static str, position: TrackerState) -> Result<(), ConfigError> {
    let in_range = |a: f32| (MIN_ANGLE_DEG..=MAX_ANGLE_DEG).contains(&a);
    if in_range(position.angle_h) && in_range(position.angle_v) {
        Ok(())
    } else {
        Err(ConfigError::AngleOutOfRange { field })
    }
}

impl Config<'_> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("battery.capacity_ah", self.battery.capacity_ah)?;

        check_positive("tracker.step_deg", self.tracker.step_deg)?;
        if self.tracker.tolerance > ADC_FULL_SCALE as u32 {
            return Err(ConfigError::ToleranceOutOfRange(self.tracker.tolerance));
        }
        check_position("tracker.home", self.tracker.home)?;
        check_position("tracker.park", self.tracker.park)?;

        check_hour("sleep.sleep_start_hour", self.sleep.sleep_start_hour)?;
        check_hour("sleep.wake_hour", self.sleep.wake_hour)?;
        check_nonzero("sleep.fallback_secs", self.sleep.fallback_secs.into())?;
        check_nonzero("sleep.forced_sleep_secs", self.sleep.forced_sleep_secs.into())?;

        check_nonzero("periods.electrical_ms", self.periods.electrical_ms)?;
        check_nonzero("periods.light_ms", self.periods.light_ms)?;
        check_nonzero("periods.tracker_ms", self.periods.tracker_ms)?;
        check_nonzero("periods.control_ms", self.periods.control_ms)?;
        check_nonzero("periods.sleep_check_secs", self.periods.sleep_check_secs)?;
        check_nonzero("bus.lock_timeout_ms", self.bus.lock_timeout_ms)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.sleep.sleep_start_hour, 20);
        assert_eq!(config.sleep.wake_hour, 7);
        assert_eq!(config.tracker.tolerance, 100);
        assert_eq!(config.bus.max_sensor_failures, 10);
        assert_eq!(config.periods.light(), Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_hours() {
        let mut config = Config::default();
        config.sleep.wake_hour = 24;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHour {
                field: "sleep.wake_hour",
                value: 24
            })
        );
    }

    #[test]
    fn rejects_non_positive_step_and_capacity() {
        let mut config = Config::default();
        config.tracker.step_deg = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { field: "tracker.step_deg" })
        ));

        let mut config = Config::default();
        config.battery.capacity_ah = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tolerance_beyond_adc_range() {
        let mut config = Config::default();
        config.tracker.tolerance = 5000;
        assert_eq!(config.validate(), Err(ConfigError::ToleranceOutOfRange(5000)));
    }

    #[test]
    fn rejects_park_outside_servo_range() {
        let mut config = Config::default();
        config.tracker.park = TrackerState::new(90.0, -5.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::AngleOutOfRange { field: "tracker.park" })
        );
    }

    #[test]
    fn round_trips_through_postcard() {
        let mut config = Config::default();
        config.network.ssid = "station";
        let bytes = postcard::to_allocvec(&config).unwrap();
        let back: Config = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, config);
    }
}
