//! ESP32-S3 firmware-specific modules for helio
//!
//! This crate contains the hardware-specific code that cannot compile on
//! desktop targets: peripheral setup, ADC and PWM drivers, WiFi, network
//! time, the UDP telemetry and command services, and deep sleep.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod config;
pub mod network;
pub mod power;
pub mod tasks;
