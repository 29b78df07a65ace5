//! Periodic sensor producers
//!
//! Each poller owns one sensor and one sub-record of the bus. A failed read
//! leaves the bus untouched, so readers keep seeing the last good value; a
//! busy bus drops this cycle's value for the same reason.

use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{debug, error, info, warn};

use crate::bus::{BusRecord, SensorBus};
use crate::fault::{FailureAction, FailureCounter, FaultLatch};
use crate::sensors::{ElectricalSample, ElectricalSensor, LightSensorArray, Rail, SensorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Published,
    /// Read failed; the previous value stays on the bus.
    ReadFailed,
    /// Read failed past the threshold and the sensor was re-initialized.
    Reinitialized { ok: bool },
    /// Read succeeded but the bus was busy.
    BusBusy,
}

async fn publish<M: RawMutex>(
    bus: &SensorBus<M>,
    record: BusRecord,
    latch: &mut FaultLatch,
    what: &str,
) -> PollOutcome {
    match bus.write(record).await {
        Ok(()) => {
            if latch.clear().is_edge() {
                info!("{} publishing resumed", what);
            }
            PollOutcome::Published
        }
        Err(e) => {
            if latch.fail().is_edge() {
                warn!("{} reading dropped: {}", what, e);
            }
            PollOutcome::BusBusy
        }
    }
}

/// Producer for one electrical rail.
pub struct ElectricalPoller<S> {
    rail: Rail,
    sensor: S,
    failures: FailureCounter,
    read_fault: FaultLatch,
    bus_fault: FaultLatch,
    last_good: Option<ElectricalSample>,
}

impl<S: ElectricalSensor> ElectricalPoller<S> {
    pub fn new(rail: Rail, sensor: S, max_failures: u32) -> Self {
        Self {
            rail,
            sensor,
            failures: FailureCounter::new(max_failures),
            read_fault: FaultLatch::new(),
            bus_fault: FaultLatch::new(),
            last_good: None,
        }
    }

    pub fn rail(&self) -> Rail {
        self.rail
    }

    pub fn last_good(&self) -> Option<ElectricalSample> {
        self.last_good
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// False from the first failed read until the next good one, across re-inits.
    pub fn is_reading(&self) -> bool {
        !self.read_fault.is_active()
    }

    pub async fn poll<M: RawMutex>(&mut self, bus: &SensorBus<M>) -> PollOutcome {
        match self.sensor.read().await {
            Ok(sample) => {
                if self.read_fault.clear().is_edge() {
                    info!("{} sensor reading again", self.rail.label());
                }
                self.failures.record_success();
                self.last_good = Some(sample);
                debug!(
                    "{}: {} V {} A {} W",
                    self.rail.label(),
                    sample.bus_voltage_v,
                    sample.current_a,
                    sample.power_w
                );
                publish(
                    bus,
                    BusRecord::Electrical(self.rail, sample),
                    &mut self.bus_fault,
                    self.rail.label(),
                )
                .await
            }
            Err(e) => {
                self.read_fault.fail();
                self.on_read_failure(e).await
            }
        }
    }

    async fn on_read_failure(&mut self, e: SensorError) -> PollOutcome {
        match self.failures.record_failure() {
            FailureAction::LogOnset => {
                warn!("{} sensor read failed: {}", self.rail.label(), e);
                PollOutcome::ReadFailed
            }
            FailureAction::Reinitialize => {
                warn!(
                    "{} sensor failing repeatedly; re-initializing",
                    self.rail.label()
                );
                let ok = match self.sensor.reinitialize().await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("{} sensor re-init failed: {}", self.rail.label(), e);
                        false
                    }
                };
                PollOutcome::Reinitialized { ok }
            }
            FailureAction::KeepStale | FailureAction::None => PollOutcome::ReadFailed,
        }
    }
}

/// Producer for the four tracker light sensors.
pub struct LightPoller<A> {
    array: A,
    read_fault: FaultLatch,
    bus_fault: FaultLatch,
}

impl<A: LightSensorArray> LightPoller<A> {
    pub fn new(array: A) -> Self {
        Self {
            array,
            read_fault: FaultLatch::new(),
            bus_fault: FaultLatch::new(),
        }
    }

    pub async fn poll<M: RawMutex>(&mut self, bus: &SensorBus<M>) -> PollOutcome {
        match self.array.read_all().await {
            Ok(lights) => {
                if self.read_fault.clear().is_edge() {
                    info!("Light sensors reading again");
                }
                debug!(
                    "LDR T:{} B:{} L:{} R:{}",
                    lights[0].raw, lights[1].raw, lights[2].raw, lights[3].raw
                );
                publish(bus, BusRecord::Lights(lights), &mut self.bus_fault, "light").await
            }
            Err(e) => {
                if self.read_fault.fail().is_edge() {
                    warn!("Light sensor read failed: {}", e);
                }
                PollOutcome::ReadFailed
            }
        }
    }
}
