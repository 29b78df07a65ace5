//! Hardware-independent control kernel for the helio solar tracker
//!
//! This crate contains all platform-agnostic logic of the power station:
//! the shared sensor bus, the battery state-of-charge estimator, the
//! closed-loop tracker, the day/night sleep scheduler and the collaborator
//! traits that the firmware implements on top of real peripherals.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod acquisition;
pub mod app_state;
pub mod battery;
pub mod bus;
pub mod clock;
pub mod command;
pub mod config;
pub mod control;
pub mod fault;
pub mod ntp;
pub mod sensors;
pub mod servo;
pub mod shared_i2c;
pub mod sleep;
pub mod telemetry;
pub mod tracker;
