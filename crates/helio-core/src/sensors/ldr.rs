//! Light-dependent resistor conversions
//!
//! The LDRs sit in voltage dividers on 12-bit ADC channels. The driver only
//! supplies raw counts (and millivolts when the ADC has a calibration
//! scheme); everything else is derived here.

use super::LightSample;

pub const LIGHT_SENSOR_COUNT: usize = 4;

/// Largest raw value of the 12-bit ADC.
pub const ADC_FULL_SCALE: i32 = 4095;

/// ADC reference used when no calibration scheme is available.
const ADC_REFERENCE_MV: i32 = 3300;

/// Resistance of the divider at full brightness.
const LDR_MIN_OHM: f32 = 4_000.0;
/// Resistance of the divider in darkness.
const LDR_MAX_OHM: f32 = 1_000_000.0;

/// Fixed slot of each sensor in the light array. The order is significant:
/// the tracker pairs top/bottom and left/right by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightPosition {
    Top = 0,
    Bottom = 1,
    Left = 2,
    Right = 3,
}

impl LightPosition {
    pub const ALL: [LightPosition; LIGHT_SENSOR_COUNT] =
        [Self::Top, Self::Bottom, Self::Left, Self::Right];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl LightSample {
    /// Build a sample from a raw ADC count.
    ///
    /// `calibrated_mv` is the driver's calibrated conversion when it has
    /// one; otherwise millivolts are scaled linearly from the reference.
    pub fn from_raw(raw: i32, calibrated_mv: Option<i32>) -> Self {
        let raw = raw.clamp(0, ADC_FULL_SCALE);
        let voltage_mv = calibrated_mv.unwrap_or(raw * ADC_REFERENCE_MV / ADC_FULL_SCALE);

        Self {
            raw,
            voltage_mv,
            resistance_kohm: resistance_ohm(raw) / 1000.0,
        }
    }
}

fn resistance_ohm(raw: i32) -> f32 {
    let fraction = raw as f32 / ADC_FULL_SCALE as f32;
    (LDR_MAX_OHM - (LDR_MAX_OHM - LDR_MIN_OHM) * fraction).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dark_reading_is_max_resistance() {
        let sample = LightSample::from_raw(0, None);
        assert_eq!(sample.voltage_mv, 0);
        assert!((sample.resistance_kohm - 1000.0).abs() < 0.01);
    }

    #[test]
    fn full_scale_reading_is_min_resistance() {
        let sample = LightSample::from_raw(ADC_FULL_SCALE, None);
        assert_eq!(sample.voltage_mv, 3300);
        assert!((sample.resistance_kohm - 4.0).abs() < 0.01);
    }

    #[test]
    fn out_of_range_raw_is_clamped() {
        let high = LightSample::from_raw(9000, None);
        let low = LightSample::from_raw(-20, None);
        assert_eq!(high.raw, ADC_FULL_SCALE);
        assert_eq!(low.raw, 0);
        assert!(high.resistance_kohm >= 0.0);
    }

    #[test]
    fn calibrated_millivolts_take_precedence() {
        let sample = LightSample::from_raw(2048, Some(1712));
        assert_eq!(sample.voltage_mv, 1712);
    }

    #[test]
    fn positions_map_to_fixed_slots() {
        for (i, pos) in LightPosition::ALL.iter().enumerate() {
            assert_eq!(pos.index(), i);
        }
    }
}
