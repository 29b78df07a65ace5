//! Hobby-servo pulse mapping
//!
//! Standard 50 Hz servo frames: 500 µs commands 0°, 2500 µs commands 180°.

use crate::tracker::{MAX_ANGLE_DEG, MIN_ANGLE_DEG};

pub const SERVO_PWM_HZ: u32 = 50;
pub const SERVO_PERIOD_US: u32 = 1_000_000 / SERVO_PWM_HZ;
pub const MIN_PULSE_US: u32 = 500;
pub const MAX_PULSE_US: u32 = 2500;
/// LEDC timer resolution used for the servo channels.
pub const DUTY_RESOLUTION_BITS: u8 = 14;

/// Pulse width for `degrees`, clamped to the servo range.
pub fn angle_to_pulse_us(degrees: f32) -> u32 {
    let degrees = if degrees.is_nan() {
        MIN_ANGLE_DEG
    } else {
        degrees.clamp(MIN_ANGLE_DEG, MAX_ANGLE_DEG)
    };
    let span = (MAX_PULSE_US - MIN_PULSE_US) as f32;
    MIN_PULSE_US + (degrees / MAX_ANGLE_DEG * span + 0.5) as u32
}

/// Duty counts for a pulse width at the given timer resolution.
pub fn pulse_to_duty(pulse_us: u32, resolution_bits: u8) -> u32 {
    let max_duty = (1u64 << resolution_bits) - 1;
    let duty = u64::from(pulse_us.min(SERVO_PERIOD_US)) * max_duty / u64::from(SERVO_PERIOD_US);
    duty as u32
}

pub fn angle_to_duty(degrees: f32) -> u32 {
    pulse_to_duty(angle_to_pulse_us(degrees), DUTY_RESOLUTION_BITS)
}
