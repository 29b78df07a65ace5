//! Closed-loop solar tracker
//!
//! Each cycle compares opposing light sensors (top/bottom for elevation,
//! left/right for azimuth) and nudges the matching servo one fixed step toward
//! the brighter side. Differences within the tolerance are ignored, so sensor
//! noise does not make the servos jitter. The controller never gets position
//! feedback from the servos; its own [`TrackerState`] is the source of truth.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::bus::{BusRecord, SensorBus};
use crate::fault::FaultLatch;
use crate::sensors::{LIGHT_SENSOR_COUNT, LightPosition};

pub const MIN_ANGLE_DEG: f32 = 0.0;
pub const MAX_ANGLE_DEG: f32 = 180.0;

/// Commanded servo position in degrees, both axes within `[0, 180]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    /// Azimuth.
    pub angle_h: f32,
    /// Elevation.
    pub angle_v: f32,
}

impl TrackerState {
    pub const fn new(angle_h: f32, angle_v: f32) -> Self {
        Self { angle_h, angle_v }
    }

    /// Same position with both axes forced into the servo range.
    pub fn clamped(self) -> Self {
        Self {
            angle_h: clamp_angle(self.angle_h),
            angle_v: clamp_angle(self.angle_v),
        }
    }
}

fn clamp_angle(angle: f32) -> f32 {
    if angle.is_nan() {
        MIN_ANGLE_DEG
    } else {
        angle.clamp(MIN_ANGLE_DEG, MAX_ANGLE_DEG)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    Horizontal,
    Vertical,
}

/// Which way an axis turns when the first sensor of its pair (top for
/// vertical, left for horizontal) is the brighter one. Depends on how the
/// servo is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisDirection {
    Increasing,
    Decreasing,
}

impl AxisDirection {
    fn signed_step(self, first_is_brighter: bool, step: f32) -> f32 {
        let toward_first = match self {
            Self::Increasing => step,
            Self::Decreasing => -step,
        };
        if first_is_brighter { toward_first } else { -toward_first }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Dead-band in raw ADC counts. A difference equal to it does not move.
    pub tolerance: u32,
    pub step_deg: f32,
    pub vertical: AxisDirection,
    pub horizontal: AxisDirection,
    /// Position commanded at boot.
    pub home: TrackerState,
    /// Position commanded before sleep or on request.
    pub park: TrackerState,
    /// Mechanical travel time allowed after a park command.
    pub park_settle_ms: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tolerance: 100,
            step_deg: 1.0,
            vertical: AxisDirection::Decreasing,
            horizontal: AxisDirection::Increasing,
            home: TrackerState::new(90.0, 45.0),
            park: TrackerState::new(90.0, 0.0),
            park_settle_ms: 2000,
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuationError {
    #[error("servo {axis:?} did not accept the command in time")]
    Timeout { axis: Axis },
    #[error("servo {axis:?} PWM update failed")]
    Pwm { axis: Axis },
}

/// Open-loop servo output.
pub trait ServoDriver {
    /// Command `axis` to `degrees`. Fire-and-forget: success only means the
    /// PWM was updated, not that the horn reached the position.
    fn set_angle(&mut self, axis: Axis, degrees: f32) -> Result<(), ActuationError>;
}

/// One dead-band step of a single axis.
fn step_axis(
    angle: f32,
    first: i32,
    second: i32,
    direction: AxisDirection,
    config: &TrackerConfig,
) -> f32 {
    if first.abs_diff(second) <= config.tolerance {
        return angle;
    }
    clamp_angle(angle + direction.signed_step(first > second, config.step_deg))
}

/// Next commanded position for the given raw light readings.
///
/// Pure: no servo or bus access.
pub fn next_position(
    current: TrackerState,
    raw: &[i32; LIGHT_SENSOR_COUNT],
    config: &TrackerConfig,
) -> TrackerState {
    let top = raw[LightPosition::Top.index()];
    let bottom = raw[LightPosition::Bottom.index()];
    let left = raw[LightPosition::Left.index()];
    let right = raw[LightPosition::Right.index()];

    TrackerState {
        angle_v: step_axis(current.angle_v, top, bottom, config.vertical, config),
        angle_h: step_axis(current.angle_h, left, right, config.horizontal, config),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerMode {
    Tracking,
    /// Parked by request; periodic cycles hold until resumed.
    Parked,
}

/// Result of one periodic cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Moved(TrackerState),
    Held(TrackerState),
    /// Parked; nothing was commanded.
    Suspended,
    /// The bus was busy; nothing was commanded this cycle.
    Skipped,
}

pub struct TrackerController<S> {
    servo: S,
    config: TrackerConfig,
    state: TrackerState,
    mode: TrackerMode,
    /// Last position that made it onto the bus.
    published: Option<TrackerState>,
    bus_fault: FaultLatch,
    actuation_fault: FaultLatch,
}

impl<S: ServoDriver> TrackerController<S> {
    /// Create the controller and drive the servos to the home position.
    pub fn new(servo: S, config: TrackerConfig) -> Self {
        let mut controller = Self {
            servo,
            config,
            state: config.home.clamped(),
            mode: TrackerMode::Tracking,
            published: None,
            bus_fault: FaultLatch::new(),
            actuation_fault: FaultLatch::new(),
        };
        controller.command(controller.state);
        controller
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn mode(&self) -> TrackerMode {
        self.mode
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn servo(&self) -> &S {
        &self.servo
    }

    /// Command both servos and adopt `target` as the believed position.
    fn command(&mut self, target: TrackerState) {
        let target = target.clamped();
        let results = [
            self.servo.set_angle(Axis::Vertical, target.angle_v),
            self.servo.set_angle(Axis::Horizontal, target.angle_h),
        ];

        match results.into_iter().find_map(Result::err) {
            Some(e) => {
                if self.actuation_fault.fail().is_edge() {
                    warn!("Servo command failed: {}", e);
                }
            }
            None => {
                if self.actuation_fault.clear().is_edge() {
                    info!("Servo commands accepted again");
                }
            }
        }

        self.state = target;
    }

    /// Apply one step for `raw` light readings without touching the bus.
    pub fn step(&mut self, raw: &[i32; LIGHT_SENSOR_COUNT]) -> CycleOutcome {
        if self.mode == TrackerMode::Parked {
            return CycleOutcome::Suspended;
        }

        let next = next_position(self.state, raw, &self.config);
        if next == self.state {
            return CycleOutcome::Held(self.state);
        }

        self.command(next);
        debug!(
            "V:{} H:{} | T:{} B:{} L:{} R:{}",
            next.angle_v, next.angle_h, raw[0], raw[1], raw[2], raw[3]
        );
        CycleOutcome::Moved(next)
    }

    /// One periodic cycle: read lights from the bus, step, publish position.
    ///
    /// A position whose earlier publish hit a busy bus is written again on
    /// every following cycle until it lands, parked or not.
    pub async fn run_cycle<M: RawMutex>(&mut self, bus: &SensorBus<M>) -> CycleOutcome {
        if self.mode == TrackerMode::Parked {
            self.publish_if_stale(bus).await;
            return CycleOutcome::Suspended;
        }

        let raw = match bus.read_snapshot().await {
            Ok(snapshot) => snapshot.light_raw(),
            Err(e) => {
                if self.bus_fault.fail().is_edge() {
                    warn!("Tracker skipping cycle: {}", e);
                }
                return CycleOutcome::Skipped;
            }
        };

        let outcome = self.step(&raw);
        self.publish_if_stale(bus).await;
        outcome
    }

    /// Whether the bus holds the believed position.
    pub fn is_published(&self) -> bool {
        self.published == Some(self.state)
    }

    async fn publish_if_stale<M: RawMutex>(&mut self, bus: &SensorBus<M>) {
        if self.is_published() {
            if self.bus_fault.clear().is_edge() {
                info!("Tracker bus access recovered");
            }
            return;
        }
        self.publish(bus).await;
    }

    async fn publish<M: RawMutex>(&mut self, bus: &SensorBus<M>) {
        match bus.write(BusRecord::Tracker(self.state)).await {
            Ok(()) => {
                self.published = Some(self.state);
                if self.bus_fault.clear().is_edge() {
                    info!("Tracker bus access recovered");
                }
            }
            Err(e) => {
                if self.bus_fault.fail().is_edge() {
                    warn!("Tracker position not published: {}", e);
                }
            }
        }
    }

    /// Drive both axes to the park position and wait for the mechanics to
    /// settle. Periodic cycles hold until [`Self::resume`].
    pub async fn park<M: RawMutex, D: DelayNs>(
        &mut self,
        bus: &SensorBus<M>,
        delay: &mut D,
    ) -> TrackerState {
        info!("Parking tracker at {:?}", self.config.park);
        self.mode = TrackerMode::Parked;
        self.command(self.config.park);
        self.publish(bus).await;

        delay.delay_ms(self.config.park_settle_ms).await;
        info!("Tracker parked");
        self.state
    }

    /// Leave the parked mode; the next cycle tracks from the park position.
    pub fn resume(&mut self) {
        if self.mode == TrackerMode::Parked {
            info!("Tracker resuming");
            self.mode = TrackerMode::Tracking;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{SharedSensorBus, Snapshot};
    use crate::sensors::LightSample;
    use alloc::vec::Vec;
    use embassy_futures::block_on;
    use embassy_time::Duration;

    #[derive(Default)]
    struct RecordingServo {
        commands: Vec<(Axis, f32)>,
        fail: bool,
    }

    impl ServoDriver for RecordingServo {
        fn set_angle(&mut self, axis: Axis, degrees: f32) -> Result<(), ActuationError> {
            self.commands.push((axis, degrees));
            if self.fail {
                Err(ActuationError::Timeout { axis })
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        total_ms: u64,
    }

    impl DelayNs for RecordingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.total_ms += u64::from(ns) / 1_000_000;
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.total_ms += u64::from(ms);
        }
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            tolerance: 50,
            step_deg: 2.0,
            ..TrackerConfig::default()
        }
    }

    fn at(h: f32, v: f32) -> TrackerState {
        TrackerState::new(h, v)
    }

    #[test]
    fn equal_light_holds_position() {
        let cfg = config();
        let start = at(90.0, 45.0);
        for level in [0, 1000, 4095] {
            assert_eq!(next_position(start, &[level; 4], &cfg), start);
        }
        // Within the dead-band on both axes.
        assert_eq!(next_position(start, &[1000, 1040, 2000, 1960], &cfg), start);
    }

    #[test]
    fn difference_equal_to_tolerance_does_not_step() {
        let cfg = config();
        let start = at(90.0, 45.0);
        assert_eq!(next_position(start, &[1050, 1000, 500, 550], &cfg), start);

        let moved = next_position(start, &[1051, 1000, 500, 551], &cfg);
        assert_eq!(moved.angle_v, 43.0);
        assert_eq!(moved.angle_h, 88.0);
    }

    #[test]
    fn steps_toward_brighter_sensor_with_default_mounting() {
        let cfg = config();
        let start = at(90.0, 45.0);

        // Top brighter: elevation decreases. Left brighter: azimuth increases.
        let next = next_position(start, &[3000, 1000, 3000, 1000], &cfg);
        assert_eq!(next, at(92.0, 43.0));

        // Bottom and right brighter: the opposite way.
        let next = next_position(start, &[1000, 3000, 1000, 3000], &cfg);
        assert_eq!(next, at(88.0, 47.0));
    }

    #[test]
    fn mounting_direction_is_configurable() {
        let cfg = TrackerConfig {
            vertical: AxisDirection::Increasing,
            horizontal: AxisDirection::Decreasing,
            ..config()
        };
        let next = next_position(at(90.0, 45.0), &[3000, 1000, 3000, 1000], &cfg);
        assert_eq!(next, at(88.0, 47.0));
    }

    #[test]
    fn stepping_never_leaves_servo_range() {
        let cfg = config();
        let mut state = at(179.0, 1.0);
        for _ in 0..200 {
            state = next_position(state, &[4095, 0, 4095, 0], &cfg);
            assert!((0.0..=180.0).contains(&state.angle_h));
            assert!((0.0..=180.0).contains(&state.angle_v));
        }
        assert_eq!(state, at(180.0, 0.0));

        for _ in 0..200 {
            state = next_position(state, &[0, 4095, 0, 4095], &cfg);
        }
        assert_eq!(state, at(0.0, 180.0));
    }

    #[test]
    fn controller_homes_on_creation() {
        let ctl = TrackerController::new(RecordingServo::default(), config());
        assert_eq!(ctl.state(), at(90.0, 45.0));
        assert_eq!(
            ctl.servo().commands,
            [(Axis::Vertical, 45.0), (Axis::Horizontal, 90.0)]
        );
    }

    #[test]
    fn cycle_reads_bus_and_publishes_new_position() {
        let bus: SharedSensorBus =
            SensorBus::new(Snapshot::new(at(90.0, 45.0)), Duration::from_millis(10));
        let lights = [3000, 1000, 2000, 2000].map(|raw| LightSample::from_raw(raw, None));
        block_on(bus.write(BusRecord::Lights(lights))).unwrap();

        let mut ctl = TrackerController::new(RecordingServo::default(), config());
        let outcome = block_on(ctl.run_cycle(&bus));

        assert_eq!(outcome, CycleOutcome::Moved(at(90.0, 43.0)));
        assert_eq!(block_on(bus.read_snapshot()).unwrap().tracker, at(90.0, 43.0));

        // Balanced light afterwards: hold, no new servo commands.
        let before = ctl.servo().commands.len();
        block_on(bus.write(BusRecord::Lights([LightSample::from_raw(2000, None); 4]))).unwrap();
        assert_eq!(block_on(ctl.run_cycle(&bus)), CycleOutcome::Held(at(90.0, 43.0)));
        assert_eq!(ctl.servo().commands.len(), before);
    }

    #[test]
    fn busy_bus_skips_the_cycle() {
        let bus: SharedSensorBus =
            SensorBus::new(Snapshot::default(), Duration::from_millis(2));
        let mut ctl = TrackerController::new(RecordingServo::default(), config());

        let _held = bus.hold_for_test();
        assert_eq!(block_on(ctl.run_cycle(&bus)), CycleOutcome::Skipped);
        assert_eq!(ctl.state(), at(90.0, 45.0));
    }

    #[test]
    fn actuation_failure_keeps_believed_position() {
        let servo = RecordingServo {
            fail: true,
            ..Default::default()
        };
        let mut ctl = TrackerController::new(servo, config());
        let outcome = ctl.step(&[4000, 0, 2000, 2000]);
        assert_eq!(outcome, CycleOutcome::Moved(at(90.0, 43.0)));
        assert_eq!(ctl.state(), at(90.0, 43.0));
    }

    #[test]
    fn park_moves_publishes_and_waits_for_settle() {
        let bus: SharedSensorBus =
            SensorBus::new(Snapshot::default(), Duration::from_millis(10));
        let mut ctl = TrackerController::new(RecordingServo::default(), config());
        let mut delay = RecordingDelay::default();

        let parked = block_on(ctl.park(&bus, &mut delay));

        assert_eq!(parked, at(90.0, 0.0));
        assert_eq!(ctl.mode(), TrackerMode::Parked);
        assert_eq!(delay.total_ms, 2000);
        assert_eq!(block_on(bus.read_snapshot()).unwrap().tracker, at(90.0, 0.0));
        assert_eq!(
            &ctl.servo().commands[2..],
            [(Axis::Vertical, 0.0), (Axis::Horizontal, 90.0)]
        );
    }

    #[test]
    fn parked_tracker_holds_until_resumed() {
        let bus: SharedSensorBus =
            SensorBus::new(Snapshot::default(), Duration::from_millis(10));
        let mut ctl = TrackerController::new(RecordingServo::default(), config());
        block_on(ctl.park(&bus, &mut RecordingDelay::default()));

        block_on(bus.write(BusRecord::Lights(
            [4000, 0, 4000, 0].map(|raw| LightSample::from_raw(raw, None)),
        )))
        .unwrap();
        assert_eq!(block_on(ctl.run_cycle(&bus)), CycleOutcome::Suspended);

        ctl.resume();
        assert_eq!(
            block_on(ctl.run_cycle(&bus)),
            CycleOutcome::Moved(at(92.0, 0.0))
        );
    }

    #[test]
    fn position_lost_to_busy_bus_is_republished() {
        let bus: SharedSensorBus =
            SensorBus::new(Snapshot::new(at(90.0, 45.0)), Duration::from_millis(2));
        let mut ctl = TrackerController::new(RecordingServo::default(), config());
        block_on(bus.write(BusRecord::Lights([LightSample::from_raw(2000, None); 4]))).unwrap();

        {
            let _held = bus.hold_for_test();
            block_on(ctl.park(&bus, &mut RecordingDelay::default()));
        }
        assert!(!ctl.is_published());
        assert_eq!(block_on(bus.read_snapshot()).unwrap().tracker, at(90.0, 45.0));

        // Still parked: the suspended cycle catches the bus up.
        assert_eq!(block_on(ctl.run_cycle(&bus)), CycleOutcome::Suspended);
        assert!(ctl.is_published());
        assert_eq!(block_on(bus.read_snapshot()).unwrap().tracker, at(90.0, 0.0));
    }

    #[test]
    fn held_cycle_republishes_after_busy_park() {
        let bus: SharedSensorBus =
            SensorBus::new(Snapshot::new(at(90.0, 45.0)), Duration::from_millis(2));
        let mut ctl = TrackerController::new(RecordingServo::default(), config());
        block_on(bus.write(BusRecord::Lights([LightSample::from_raw(2000, None); 4]))).unwrap();

        {
            let _held = bus.hold_for_test();
            block_on(ctl.park(&bus, &mut RecordingDelay::default()));
        }
        ctl.resume();

        assert_eq!(block_on(ctl.run_cycle(&bus)), CycleOutcome::Held(at(90.0, 0.0)));
        assert_eq!(block_on(bus.read_snapshot()).unwrap().tracker, at(90.0, 0.0));
        assert_eq!(ctl.state(), block_on(bus.read_snapshot()).unwrap().tracker);
    }
}
