//! Desktop simulator for the helio solar-tracking power station.
//!
//! Runs the helio-core control kernel against a simulated sun, panel,
//! battery and pair of servos. One loop iteration is one simulated minute;
//! the run starts shortly after sunrise and ends when the sleep scheduler
//! decides to suspend for the night.
//!
//! Set `RUST_LOG=debug` for per-cycle detail.
//!
//! Scripted events:
//!
//! | Minute | Event                                   |
//! |--------|-----------------------------------------|
//! | 90     | `/status` command                       |
//! | 240    | `/park` command                         |
//! | 270    | `/resume` command                       |
//! | 400    | panel monitor stops answering for 15 min |

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration as StdDuration;

use embassy_futures::block_on;
use embassy_time::{Delay, Instant};
use log::{debug, info, warn};

use helio_core::acquisition::{ElectricalPoller, LightPoller};
use helio_core::app_state::{AppRunState, AppStatus};
use helio_core::battery::SocEstimator;
use helio_core::bus::{SensorBus, SharedSensorBus, Snapshot};
use helio_core::clock::{ClockError, ClockSource, WallClock};
use helio_core::command::{CommandAction, respond};
use helio_core::config::Config;
use helio_core::control::ControlLoop;
use helio_core::sensors::{
    ElectricalSample, ElectricalSensor, LIGHT_SENSOR_COUNT, LightPosition, LightSample,
    LightSensorArray, Rail, SensorError,
};
use helio_core::sleep::{SleepOutcome, SleepScheduler};
use helio_core::telemetry::{MAX_FRAME_LEN, TelemetryError, TelemetryFrame, TelemetrySink};
use helio_core::tracker::{ActuationError, Axis, ServoDriver, TrackerController, TrackerState};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Simulated seconds per loop iteration.
const STEP_SECS: u64 = 60;

/// Real pause between iterations so the log stays readable.
const FRAME_PAUSE: StdDuration = StdDuration::from_millis(5);

/// 2024-06-01 05:30 UTC.
const START_UNIX: i64 = 1_717_219_800;

const SUNRISE_HOUR: f32 = 6.0;
const SUNSET_HOUR: f32 = 20.0;

/// LDR counts gained per degree of misalignment.
const LDR_GAIN: f32 = 40.0;
const LDR_AMBIENT: f32 = 300.0;

const PANEL_OPEN_CIRCUIT_V: f32 = 21.0;
const PANEL_SHORT_CIRCUIT_A: f32 = 1.1;
const BATTERY_CAPACITY_AH: f32 = 2.6;
const LOAD_A: f32 = 0.15;

const FAULT_WINDOW: core::ops::Range<u64> = 400..415;

// ---------------------------------------------------------------------------
// Plant model
// ---------------------------------------------------------------------------

/// Physical state shared by all simulated peripherals.
struct Plant {
    elapsed_secs: u64,
    servo: TrackerState,
    /// True battery charge, 0..=1.
    charge: f32,
    panel_offline: bool,
}

impl Plant {
    fn new() -> Self {
        Self {
            elapsed_secs: 0,
            servo: TrackerState::default(),
            charge: 0.55,
            panel_offline: false,
        }
    }

    fn unix(&self) -> i64 {
        START_UNIX + self.elapsed_secs as i64
    }

    fn minute(&self) -> u64 {
        self.elapsed_secs / 60
    }

    fn hour_of_day(&self) -> f32 {
        let clock = WallClock::from_unix(self.unix(), 0);
        clock.seconds_of_day() as f32 / 3600.0
    }

    /// Daylight fraction: 0 at night, 1 at solar noon.
    fn irradiance(&self) -> f32 {
        let h = self.hour_of_day();
        if !(SUNRISE_HOUR..SUNSET_HOUR).contains(&h) {
            return 0.0;
        }
        let phase = (h - SUNRISE_HOUR) / (SUNSET_HOUR - SUNRISE_HOUR);
        (phase * core::f32::consts::PI).sin()
    }

    /// Servo angles that would face the sun squarely.
    fn sun_position(&self) -> TrackerState {
        let h = self.hour_of_day().clamp(SUNRISE_HOUR, SUNSET_HOUR);
        let phase = (h - SUNRISE_HOUR) / (SUNSET_HOUR - SUNRISE_HOUR);
        TrackerState::new(
            30.0 + 120.0 * phase,
            20.0 + 50.0 * (phase * core::f32::consts::PI).sin(),
        )
    }

    /// Fraction of the available light the panel collects at its angle.
    fn alignment(&self) -> f32 {
        let sun = self.sun_position();
        let err = (sun.angle_h - self.servo.angle_h).hypot(sun.angle_v - self.servo.angle_v);
        err.to_radians().cos().max(0.0)
    }

    fn panel_current(&self) -> f32 {
        PANEL_SHORT_CIRCUIT_A * self.irradiance() * self.alignment()
    }

    fn battery_voltage(&self) -> f32 {
        3.3 + 0.9 * self.charge.clamp(0.0, 1.0)
    }

    fn advance(&mut self, secs: u64) {
        self.elapsed_secs += secs;
        let net_a = self.panel_current() - LOAD_A;
        let hours = secs as f32 / 3600.0;
        self.charge = (self.charge + net_a * hours / BATTERY_CAPACITY_AH).clamp(0.0, 1.0);
        self.panel_offline = FAULT_WINDOW.contains(&self.minute());
    }
}

type SharedPlant = Rc<RefCell<Plant>>;

// ---------------------------------------------------------------------------
// Simulated peripherals
// ---------------------------------------------------------------------------

struct SimMonitor {
    rail: Rail,
    plant: SharedPlant,
}

impl ElectricalSensor for SimMonitor {
    async fn read(&mut self) -> Result<ElectricalSample, SensorError> {
        let plant = self.plant.borrow();
        match self.rail {
            Rail::Panel if plant.panel_offline => Err(SensorError::ReadFailed {
                sensor: "panel monitor",
                operation: "bus voltage",
                details: "no acknowledge",
            }),
            Rail::Panel => {
                let current_a = plant.panel_current();
                let bus_voltage_v = if current_a > 0.0 {
                    PANEL_OPEN_CIRCUIT_V * 0.85
                } else {
                    0.0
                };
                Ok(ElectricalSample {
                    bus_voltage_v,
                    current_a,
                    power_w: bus_voltage_v * current_a,
                })
            }
            Rail::Battery => {
                let bus_voltage_v = plant.battery_voltage();
                let current_a = plant.panel_current() - LOAD_A;
                Ok(ElectricalSample {
                    bus_voltage_v,
                    current_a,
                    power_w: bus_voltage_v * current_a,
                })
            }
        }
    }

    async fn reinitialize(&mut self) -> Result<(), SensorError> {
        if self.plant.borrow().panel_offline {
            Err(SensorError::InitializationFailed {
                sensor: "panel monitor",
                details: "no acknowledge",
            })
        } else {
            Ok(())
        }
    }
}

struct SimLdrs {
    plant: SharedPlant,
}

impl SimLdrs {
    fn count(light: f32, bias_deg: f32) -> i32 {
        (LDR_AMBIENT + light * (2000.0 + LDR_GAIN * bias_deg)).clamp(0.0, 4095.0) as i32
    }
}

impl LightSensorArray for SimLdrs {
    async fn read_all(&mut self) -> Result<[LightSample; LIGHT_SENSOR_COUNT], SensorError> {
        let plant = self.plant.borrow();
        let light = plant.irradiance();
        let sun = plant.sun_position();
        // Vertical servo is mounted so that a brighter top sensor means
        // lowering the angle; horizontal turns toward a brighter left.
        let dv = plant.servo.angle_v - sun.angle_v;
        let dh = sun.angle_h - plant.servo.angle_h;

        let mut raw = [0; LIGHT_SENSOR_COUNT];
        raw[LightPosition::Top.index()] = Self::count(light, dv / 2.0);
        raw[LightPosition::Bottom.index()] = Self::count(light, -dv / 2.0);
        raw[LightPosition::Left.index()] = Self::count(light, dh / 2.0);
        raw[LightPosition::Right.index()] = Self::count(light, -dh / 2.0);
        Ok(raw.map(|r| LightSample::from_raw(r, None)))
    }
}

struct SimServos {
    plant: SharedPlant,
}

impl ServoDriver for SimServos {
    fn set_angle(&mut self, axis: Axis, degrees: f32) -> Result<(), ActuationError> {
        let mut plant = self.plant.borrow_mut();
        match axis {
            Axis::Horizontal => plant.servo.angle_h = degrees,
            Axis::Vertical => plant.servo.angle_v = degrees,
        }
        Ok(())
    }
}

/// Wall clock driven by simulated time. Reports unsynced for the first
/// few minutes, as the station does before its first SNTP answer.
struct SimClock {
    plant: SharedPlant,
    synced_after_secs: u64,
}

impl ClockSource for SimClock {
    fn now(&self) -> Result<WallClock, ClockError> {
        let plant = self.plant.borrow();
        if plant.elapsed_secs < self.synced_after_secs {
            return Err(ClockError::Unsynced);
        }
        Ok(WallClock::from_unix(plant.unix(), 0))
    }
}

/// Encodes every frame as the firmware would and logs a summary.
struct LogSink {
    frames: u32,
    bytes: usize,
}

impl TelemetrySink for LogSink {
    async fn publish(&mut self, frame: &TelemetryFrame) -> Result<(), TelemetryError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let encoded = frame.encode(&mut buf)?;
        self.frames += 1;
        self.bytes += encoded.len();
        debug!(
            "frame #{} ({} B): SoC {:.1}%, panel {:.2} W",
            frame.sequence,
            encoded.len(),
            frame.soc_percent,
            frame.panel.power_w
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted operator
// ---------------------------------------------------------------------------

fn scripted_command(minute: u64) -> Option<&'static str> {
    match minute {
        90 => Some("/status"),
        240 => Some("/park"),
        270 => Some("/resume"),
        _ => None,
    }
}

async fn handle_command(
    text: &str,
    bus: &SharedSensorBus,
    status: &AppStatus,
    tracker: &mut TrackerController<SimServos>,
) {
    let snapshot = bus.read_snapshot().await.ok();
    let response = respond(text, snapshot.as_ref(), status);
    info!("> {}\n{}", text, response.reply);

    match response.action {
        CommandAction::Park => {
            tracker.park(bus, &mut Delay).await;
        }
        CommandAction::Resume => tracker.resume(),
        other => debug!("Action {:?} not simulated", other),
    }
    if let Some(done) = response.action.completion_text() {
        info!("{}", done);
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::default();
    config.tracker.park_settle_ms = 50;
    if let Err(e) = config.validate() {
        warn!("Invalid configuration: {}", e);
        return;
    }

    let plant: SharedPlant = Rc::new(RefCell::new(Plant::new()));
    let bus: SharedSensorBus = SensorBus::new(
        Snapshot::new(config.tracker.home),
        config.bus.lock_timeout(),
    );

    let mut panel = ElectricalPoller::new(
        Rail::Panel,
        SimMonitor {
            rail: Rail::Panel,
            plant: plant.clone(),
        },
        config.bus.max_sensor_failures,
    );
    let mut battery_monitor = SimMonitor {
        rail: Rail::Battery,
        plant: plant.clone(),
    };
    let boot_voltage = block_on(battery_monitor.read()).ok().map(|s| s.bus_voltage_v);
    let mut battery = ElectricalPoller::new(
        Rail::Battery,
        battery_monitor,
        config.bus.max_sensor_failures,
    );
    let mut lights = LightPoller::new(SimLdrs {
        plant: plant.clone(),
    });
    let mut tracker = TrackerController::new(
        SimServos {
            plant: plant.clone(),
        },
        config.tracker,
    );
    let mut scheduler = SleepScheduler::new(config.sleep);
    let clock = SimClock {
        plant: plant.clone(),
        synced_after_secs: 5 * STEP_SECS,
    };
    let mut sink = LogSink {
        frames: 0,
        bytes: 0,
    };

    let sim_instant = |plant: &SharedPlant| Instant::from_secs(plant.borrow().elapsed_secs);
    let mut control = ControlLoop::new(
        SocEstimator::from_boot_voltage(boot_voltage, config.battery),
        sim_instant(&plant),
    );

    let mut status = AppStatus::default();
    status.transition(AppRunState::TimeSyncing);

    info!("Simulation started");
    let outcome = loop {
        let minute = plant.borrow().minute();

        if minute == 5 {
            status.transition(AppRunState::TimeKnown);
            status.transition(AppRunState::Tracking);
        }

        block_on(async {
            panel.poll(&bus).await;
            battery.poll(&bus).await;
            lights.poll(&bus).await;
            tracker.run_cycle(&bus).await;
            control
                .run_cycle(&bus, &mut sink, status.run_state, sim_instant(&plant))
                .await;
        });

        if let Some(text) = scripted_command(minute) {
            block_on(handle_command(text, &bus, &status, &mut tracker));
        }

        let outcome = block_on(scheduler.run_check(&clock, &mut tracker, &bus, &mut Delay));
        if let SleepOutcome::Suspend(request) = outcome {
            status.transition(AppRunState::Sleeping);
            break request;
        }

        if minute % 60 == 0 {
            let p = plant.borrow();
            info!(
                "{:02}:00  sun {:.0}%  servos H {:.0} V {:.0}  SoC est {:.1}% (true {:.1}%)",
                p.hour_of_day() as u32,
                p.irradiance() * 100.0,
                p.servo.angle_h,
                p.servo.angle_v,
                control.soc(),
                p.charge * 100.0,
            );
        }

        plant.borrow_mut().advance(STEP_SECS);
        std::thread::sleep(FRAME_PAUSE);
    };

    let p = plant.borrow();
    info!(
        "Suspending for {} s at minute {}; {} frames sent ({} B)",
        outcome.duration_secs,
        p.minute(),
        sink.frames,
        sink.bytes
    );
}
