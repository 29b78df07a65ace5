//! Battery state-of-charge estimation
//!
//! Two independent estimates are blended every control cycle:
//!
//! - **Coulomb counting** integrates the measured current over the measured
//!   interval. Accurate under load, but drifts over time.
//! - **Voltage curve** maps the terminal voltage onto a Li-ion discharge
//!   curve. Only trustworthy near rest, since load sags the voltage.
//!
//! The blend weight switches on the current magnitude: near rest the voltage
//! curve dominates, under load coulomb counting does.

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Discharge curve anchors as `(volts, percent)`, strictly decreasing.
pub const VOLTAGE_CURVE: [(f32, f32); 11] = [
    (4.20, 100.0),
    (4.10, 90.0),
    (4.00, 80.0),
    (3.90, 70.0),
    (3.80, 60.0),
    (3.75, 50.0),
    (3.70, 40.0),
    (3.65, 30.0),
    (3.55, 20.0),
    (3.45, 10.0),
    (3.30, 0.0),
];

/// Below this magnitude the battery is considered at rest.
pub const REST_CURRENT_A: f32 = 0.05;
/// Coulomb-counting weight at rest.
pub const ALPHA_AT_REST: f32 = 0.2;
/// Coulomb-counting weight under load.
pub const ALPHA_UNDER_LOAD: f32 = 0.8;

/// Derived battery state published on the sensor bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    /// Always within `[0, 100]`.
    pub soc_percent: f32,
}

/// Clamp to `[0, 100]`; NaN maps to 0.
pub fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn magnitude(value: f32) -> f32 {
    if value < 0.0 { -value } else { value }
}

/// Open-circuit voltage to charge percentage.
///
/// Clamps to 100 at or above the top anchor and to 0 at or below the bottom
/// one; interpolates linearly between the two bracketing anchors otherwise.
pub fn voltage_to_percent(volts: f32) -> f32 {
    let (top_v, _) = VOLTAGE_CURVE[0];
    let (bottom_v, _) = VOLTAGE_CURVE[VOLTAGE_CURVE.len() - 1];

    if volts >= top_v {
        return 100.0;
    }
    if !(volts > bottom_v) {
        // Also catches NaN.
        return 0.0;
    }

    for pair in VOLTAGE_CURVE.windows(2) {
        let (v_high, p_high) = pair[0];
        let (v_low, p_low) = pair[1];
        if volts <= v_high && volts > v_low {
            return p_low + (volts - v_low) * (p_high - p_low) / (v_high - v_low);
        }
    }

    0.0
}

/// Coulomb-counting weight for a given battery current.
pub fn blend_weight(current_a: f32) -> f32 {
    if magnitude(current_a) < REST_CURRENT_A {
        ALPHA_AT_REST
    } else {
        ALPHA_UNDER_LOAD
    }
}

/// Coulomb-counted SoC after `dt_seconds` at `current_a`.
///
/// Positive current discharges the battery.
pub fn coulomb_count(prev_soc: f32, current_a: f32, dt_seconds: f32, capacity_ah: f32) -> f32 {
    let delta_ah = current_a * dt_seconds / 3600.0;
    let delta_percent = delta_ah / capacity_ah * 100.0;
    let soc = prev_soc - delta_percent;
    if soc.is_nan() {
        clamp_percent(prev_soc)
    } else {
        clamp_percent(soc)
    }
}

/// Blend coulomb counting and the voltage curve into a new SoC.
///
/// `dt_seconds` must be the measured interval since the previous call; the
/// result is always within `[0, 100]`.
pub fn estimate(
    prev_soc: f32,
    v_bat: f32,
    i_bat: f32,
    dt_seconds: f32,
    capacity_ah: f32,
) -> f32 {
    let soc_cc = coulomb_count(prev_soc, i_bat, dt_seconds, capacity_ah);
    let soc_v = voltage_to_percent(v_bat);
    let alpha = blend_weight(i_bat);

    clamp_percent(alpha * soc_cc + (1.0 - alpha) * soc_v)
}

/// Battery parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    pub capacity_ah: f32,
    /// Set when the shunt is wired so that charging reads positive.
    pub invert_current: bool,
    /// Boot readings at or below this are treated as "no battery reading".
    pub boot_min_voltage: f32,
    pub boot_fallback_soc: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_ah: 2.6,
            invert_current: false,
            boot_min_voltage: 1.0,
            boot_fallback_soc: 50.0,
        }
    }
}

/// Running SoC estimate. Lives in memory only; a reboot re-seeds it from
/// the battery voltage.
#[derive(Debug, Clone, Copy)]
pub struct SocEstimator {
    soc: f32,
    config: BatteryConfig,
}

impl SocEstimator {
    /// Seed from the first battery voltage seen after boot.
    pub fn from_boot_voltage(v_bat: Option<f32>, config: BatteryConfig) -> Self {
        let soc = match v_bat {
            Some(v) if v > config.boot_min_voltage => {
                let soc = voltage_to_percent(v);
                info!("Initial SoC from voltage: {} V -> {}%", v, soc);
                soc
            }
            _ => {
                warn!(
                    "No usable battery voltage at boot; starting at {}%",
                    config.boot_fallback_soc
                );
                clamp_percent(config.boot_fallback_soc)
            }
        };
        Self { soc, config }
    }

    /// Advance the estimate with one measured battery sample.
    pub fn update(&mut self, v_bat: f32, i_bat: f32, dt_seconds: f32) -> f32 {
        let current = if self.config.invert_current {
            -i_bat
        } else {
            i_bat
        };
        self.soc = estimate(self.soc, v_bat, current, dt_seconds, self.config.capacity_ah);
        self.soc
    }

    pub fn soc(&self) -> f32 {
        self.soc
    }

    pub fn state(&self) -> BatteryState {
        BatteryState {
            soc_percent: self.soc,
        }
    }
}
