//! Sensor records and the driver traits the acquisition tasks poll.

pub mod ina219;
pub mod ldr;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

pub use ina219::{Ina219, Ina219Calibration};
pub use ldr::{ADC_FULL_SCALE, LIGHT_SENSOR_COUNT, LightPosition};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: initialization failed ({details})")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: timed out during {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
}

/// Monitored power rail. Each rail has its own current/power sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rail {
    Panel,
    Battery,
}

impl Rail {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Panel => "panel",
            Self::Battery => "battery",
        }
    }
}

/// One reading of a rail's bus voltage, current and power.
///
/// Replaced wholesale on every successful read, never patched field by field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElectricalSample {
    pub bus_voltage_v: f32,
    pub current_a: f32,
    pub power_w: f32,
}

/// One light-dependent resistor reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LightSample {
    /// Raw ADC counts, `0..=4095`. Higher means more light.
    pub raw: i32,
    pub voltage_mv: i32,
    /// Always `>= 0`.
    pub resistance_kohm: f32,
}

/// Current/power sensor on one rail.
pub trait ElectricalSensor {
    /// Read bus voltage, current and power in one go.
    fn read(&mut self) -> impl Future<Output = Result<ElectricalSample, SensorError>>;

    /// Reset and recalibrate the device after repeated read failures.
    fn reinitialize(&mut self) -> impl Future<Output = Result<(), SensorError>>;
}

/// The four tracker light sensors, read in [`LightPosition`] order.
pub trait LightSensorArray {
    fn read_all(
        &mut self,
    ) -> impl Future<Output = Result<[LightSample; LIGHT_SENSOR_COUNT], SensorError>>;
}
