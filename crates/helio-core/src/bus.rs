//! Shared sensor bus
//!
//! One aggregate holds the latest value of every sub-record (panel and
//! battery electrical samples, the light array, the tracker position and the
//! derived battery state) behind a single async mutex. Each sub-record has
//! exactly one producer task, so the lock only exists to keep readers from
//! seeing a half-written record.
//!
//! Every lock acquisition is bounded. When the lock cannot be taken within
//! the configured timeout the call returns [`BusError::Busy`]; the caller
//! keeps whatever it cached last and tries again next cycle.

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{Duration, with_timeout};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::battery::BatteryState;
use crate::sensors::{ElectricalSample, LIGHT_SENSOR_COUNT, LightSample, Rail};
use crate::tracker::TrackerState;

/// Bus shared between tasks on the firmware.
pub type SharedSensorBus = SensorBus<CriticalSectionRawMutex>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("sensor bus busy: lock not acquired within timeout")]
    Busy,
}

/// Point-in-time copy of everything on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub panel: ElectricalSample,
    pub battery: ElectricalSample,
    pub lights: [LightSample; LIGHT_SENSOR_COUNT],
    pub tracker: TrackerState,
    pub battery_state: BatteryState,
}

impl Snapshot {
    /// Boot-time contents: zeroed readings and the tracker at `tracker`.
    pub const fn new(tracker: TrackerState) -> Self {
        const ZERO_ELECTRICAL: ElectricalSample = ElectricalSample {
            bus_voltage_v: 0.0,
            current_a: 0.0,
            power_w: 0.0,
        };
        const ZERO_LIGHT: LightSample = LightSample {
            raw: 0,
            voltage_mv: 0,
            resistance_kohm: 0.0,
        };

        Self {
            panel: ZERO_ELECTRICAL,
            battery: ZERO_ELECTRICAL,
            lights: [ZERO_LIGHT; LIGHT_SENSOR_COUNT],
            tracker,
            battery_state: BatteryState { soc_percent: 0.0 },
        }
    }

    pub fn rail(&self, rail: Rail) -> ElectricalSample {
        match rail {
            Rail::Panel => self.panel,
            Rail::Battery => self.battery,
        }
    }

    /// Raw light counts in position order.
    pub fn light_raw(&self) -> [i32; LIGHT_SENSOR_COUNT] {
        self.lights.map(|l| l.raw)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new(TrackerState::default())
    }
}

/// A single sub-record replacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BusRecord {
    Electrical(Rail, ElectricalSample),
    Lights([LightSample; LIGHT_SENSOR_COUNT]),
    Tracker(TrackerState),
    Battery(BatteryState),
}

impl BusRecord {
    fn apply(self, snapshot: &mut Snapshot) {
        match self {
            Self::Electrical(Rail::Panel, sample) => snapshot.panel = sample,
            Self::Electrical(Rail::Battery, sample) => snapshot.battery = sample,
            Self::Lights(lights) => snapshot.lights = lights,
            Self::Tracker(state) => snapshot.tracker = state,
            Self::Battery(state) => snapshot.battery_state = state,
        }
    }
}

/// Take `mutex`, giving up with [`BusError::Busy`] after `timeout`.
pub async fn lock_within<M: RawMutex, T>(
    mutex: &Mutex<M, T>,
    timeout: Duration,
) -> Result<MutexGuard<'_, M, T>, BusError> {
    with_timeout(timeout, mutex.lock())
        .await
        .map_err(|_| BusError::Busy)
}

pub struct SensorBus<M: RawMutex> {
    inner: Mutex<M, Snapshot>,
    lock_timeout: Duration,
}

impl<M: RawMutex> SensorBus<M> {
    pub const fn new(initial: Snapshot, lock_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(initial),
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Replace one sub-record, waiting at most the lock timeout.
    pub async fn write(&self, record: BusRecord) -> Result<(), BusError> {
        let mut guard = lock_within(&self.inner, self.lock_timeout).await?;
        record.apply(&mut guard);
        Ok(())
    }

    /// Copy the whole aggregate, waiting at most the lock timeout.
    pub async fn read_snapshot(&self) -> Result<Snapshot, BusError> {
        let guard = lock_within(&self.inner, self.lock_timeout).await?;
        Ok(*guard)
    }

    /// Hold the lock so tests can provoke [`BusError::Busy`].
    #[cfg(test)]
    pub(crate) fn hold_for_test(&self) -> MutexGuard<'_, M, Snapshot> {
        self.inner.try_lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embassy_futures::block_on;

    fn bus(timeout_ms: u64) -> SharedSensorBus {
        SensorBus::new(
            Snapshot::new(TrackerState::new(90.0, 45.0)),
            Duration::from_millis(timeout_ms),
        )
    }

    fn sample(v: f32) -> ElectricalSample {
        ElectricalSample {
            bus_voltage_v: v,
            current_a: v,
            power_w: v,
        }
    }

    #[test]
    fn boot_snapshot_is_zeroed_with_home_tracker() {
        let bus = bus(10);
        let snap = block_on(bus.read_snapshot()).unwrap();
        assert_eq!(snap.panel, ElectricalSample::default());
        assert_eq!(snap.light_raw(), [0; LIGHT_SENSOR_COUNT]);
        assert_eq!(snap.tracker, TrackerState::new(90.0, 45.0));
        assert_eq!(snap.battery_state.soc_percent, 0.0);
    }

    #[test]
    fn write_replaces_only_its_sub_record() {
        let bus = bus(10);
        block_on(bus.write(BusRecord::Electrical(Rail::Battery, sample(3.9)))).unwrap();
        block_on(bus.write(BusRecord::Battery(BatteryState { soc_percent: 71.0 }))).unwrap();

        let snap = block_on(bus.read_snapshot()).unwrap();
        assert_eq!(snap.rail(Rail::Battery), sample(3.9));
        assert_eq!(snap.rail(Rail::Panel), ElectricalSample::default());
        assert_eq!(snap.battery_state.soc_percent, 71.0);
        assert_eq!(snap.tracker, TrackerState::new(90.0, 45.0));
    }

    #[test]
    fn held_lock_yields_busy_instead_of_blocking() {
        let bus = bus(5);
        let _guard = bus.hold_for_test();

        assert_eq!(
            block_on(bus.write(BusRecord::Tracker(TrackerState::new(0.0, 0.0)))),
            Err(BusError::Busy)
        );
        assert_eq!(block_on(bus.read_snapshot()), Err(BusError::Busy));
    }

    #[test]
    fn lock_is_available_again_after_busy() {
        let bus = bus(5);
        {
            let _guard = bus.hold_for_test();
            assert!(block_on(bus.write(BusRecord::Lights([LightSample::default(); 4]))).is_err());
        }
        assert!(block_on(bus.write(BusRecord::Lights([LightSample::from_raw(100, None); 4]))).is_ok());
        assert_eq!(block_on(bus.read_snapshot()).unwrap().light_raw(), [100; 4]);
    }

    #[test]
    fn bounded_lock_gives_up_on_a_held_mutex() {
        let mutex: Mutex<CriticalSectionRawMutex, u32> = Mutex::new(7);
        let timeout = Duration::from_millis(5);
        {
            let _held = mutex.try_lock().unwrap();
            assert!(matches!(block_on(lock_within(&mutex, timeout)), Err(BusError::Busy)));
        }
        let mut guard = block_on(lock_within(&mutex, timeout)).unwrap();
        *guard += 1;
        assert_eq!(*guard, 8);
    }

    #[test]
    fn concurrent_readers_never_see_torn_sub_records() {
        const WRITES: u32 = 2_000;
        const READERS: usize = 4;

        let bus = bus(1_000);

        std::thread::scope(|s| {
            s.spawn(|| {
                for k in 1..=WRITES {
                    let v = k as f32;
                    let _ = block_on(bus.write(BusRecord::Electrical(Rail::Panel, sample(v))));
                }
            });
            s.spawn(|| {
                for k in 1..=WRITES {
                    let raw = (k % 4096) as i32;
                    let _ = block_on(bus.write(BusRecord::Lights(
                        [LightSample::from_raw(raw, None); LIGHT_SENSOR_COUNT],
                    )));
                }
            });

            for _ in 0..READERS {
                s.spawn(|| {
                    let mut last_panel = 0.0f32;
                    for _ in 0..WRITES {
                        let Ok(snap) = block_on(bus.read_snapshot()) else {
                            continue;
                        };
                        let p = snap.panel;
                        assert_eq!(p.bus_voltage_v, p.current_a);
                        assert_eq!(p.current_a, p.power_w);
                        assert!(p.bus_voltage_v >= last_panel, "panel went backwards");
                        last_panel = p.bus_voltage_v;

                        let first = snap.lights[0];
                        assert!(snap.lights.iter().all(|l| *l == first));
                    }
                });
            }
        });

        let snap = block_on(bus.read_snapshot()).unwrap();
        assert_eq!(snap.panel, sample(WRITES as f32));
    }
}
