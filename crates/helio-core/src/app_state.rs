//! Application-wide run state and error types

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::clock::ClockError;
use crate::config::ConfigError;
use crate::ntp::NtpError;
use crate::sensors::SensorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppRunState {
    Booting,
    WifiConnecting,
    WifiConnected,
    TimeSyncing,
    TimeKnown,
    Tracking,
    Sleeping,
    Error,
}

impl AppRunState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Booting => "booting",
            Self::WifiConnecting => "wifi connecting",
            Self::WifiConnected => "wifi connected",
            Self::TimeSyncing => "time syncing",
            Self::TimeKnown => "time known",
            Self::Tracking => "tracking",
            Self::Sleeping => "sleeping",
            Self::Error => "error",
        }
    }
}

/// Status shared between the network, control and command tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStatus {
    pub run_state: AppRunState,
    pub wifi_connected: bool,
    pub time_known: bool,
    /// Most recent failure reported by the boot or network path.
    pub last_error: Option<AppError>,
}

impl AppStatus {
    pub const fn new() -> Self {
        Self {
            run_state: AppRunState::Booting,
            wifi_connected: false,
            time_known: false,
            last_error: None,
        }
    }

    /// Move to `next`, returning whether anything changed.
    pub fn transition(&mut self, next: AppRunState) -> bool {
        if self.run_state == next {
            return false;
        }
        log::info!("Run state: {} -> {}", self.run_state.label(), next.label());
        self.run_state = next;
        match next {
            AppRunState::WifiConnected => self.wifi_connected = true,
            AppRunState::WifiConnecting => self.wifi_connected = false,
            AppRunState::TimeKnown => self.time_known = true,
            _ => {}
        }
        true
    }

    /// Log `error` and keep it for status reports.
    pub fn record_error(&mut self, error: impl Into<AppError>) {
        let error = error.into();
        log::error!("{}", error);
        self.last_error = Some(error);
    }
}

impl Default for AppStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedAppStatus<M> = AsyncMutex<M, AppStatus>;

pub const fn new_shared_status<M: RawMutex>() -> SharedAppStatus<M> {
    AsyncMutex::new(AppStatus::new())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("WiFi connection failed: {0}")]
    Wifi(heapless::String<64>),
    #[error("Time sync failed: {0}")]
    TimeSync(NtpError),
    #[error("Sensor error: {0}")]
    Sensor(SensorError),
    #[error("Invalid configuration: {0}")]
    Config(ConfigError),
    #[error("Clock error: {0}")]
    Clock(ClockError),
}

impl AppError {
    pub fn wifi(details: &str) -> Self {
        Self::Wifi(truncated(details))
    }
}

impl From<SensorError> for AppError {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<NtpError> for AppError {
    fn from(e: NtpError) -> Self {
        Self::TimeSync(e)
    }
}

impl From<ClockError> for AppError {
    fn from(e: ClockError) -> Self {
        Self::Clock(e)
    }
}

/// Copy `value` into a bounded string, dropping whatever does not fit.
pub fn truncated<const N: usize>(value: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in value.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
