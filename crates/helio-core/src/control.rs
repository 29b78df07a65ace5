//! Control and reporting cycle
//!
//! Copies a snapshot off the bus, advances the SoC estimate by the measured
//! time since the previous cycle, writes the derived battery state back and
//! publishes telemetry. Nothing here holds the bus lock across the estimate
//! or the network send.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Instant;
use log::{debug, info, warn};

use crate::app_state::AppRunState;
use crate::battery::SocEstimator;
use crate::bus::{BusRecord, SensorBus, Snapshot};
use crate::fault::FaultLatch;
use crate::telemetry::{TelemetryFrame, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlOutcome {
    /// SoC advanced and telemetry sent.
    Published { soc_percent: f32 },
    /// SoC advanced; telemetry could not be sent.
    NotReported { soc_percent: f32 },
    /// Bus busy; nothing advanced this cycle.
    Stale,
}

pub struct ControlLoop {
    estimator: SocEstimator,
    last_update: Instant,
    sequence: u32,
    boot: Instant,
    read_fault: FaultLatch,
    write_fault: FaultLatch,
    sink_fault: FaultLatch,
}

impl ControlLoop {
    /// `now` starts the first measured interval.
    pub fn new(estimator: SocEstimator, now: Instant) -> Self {
        Self {
            estimator,
            last_update: now,
            sequence: 0,
            boot: now,
            read_fault: FaultLatch::new(),
            write_fault: FaultLatch::new(),
            sink_fault: FaultLatch::new(),
        }
    }

    pub fn soc(&self) -> f32 {
        self.estimator.soc()
    }

    /// Advance the estimate from `snapshot` at monotonic time `now`.
    ///
    /// A `now` earlier than the previous update counts as zero elapsed time.
    pub fn estimate(&mut self, snapshot: &Snapshot, now: Instant) -> f32 {
        let dt_seconds = now.saturating_duration_since(self.last_update).as_micros() as f32 / 1e6;
        self.last_update = now;

        let soc = self.estimator.update(
            snapshot.battery.bus_voltage_v,
            snapshot.battery.current_a,
            dt_seconds,
        );
        debug!(
            "IN: {} V {} A {} W | OUT: {} V {} A {} W | SoC {}% (dt {} s)",
            snapshot.panel.bus_voltage_v,
            snapshot.panel.current_a,
            snapshot.panel.power_w,
            snapshot.battery.bus_voltage_v,
            snapshot.battery.current_a,
            snapshot.battery.power_w,
            soc,
            dt_seconds
        );
        soc
    }

    pub async fn run_cycle<M: RawMutex, T: TelemetrySink>(
        &mut self,
        bus: &SensorBus<M>,
        sink: &mut T,
        run_state: AppRunState,
        now: Instant,
    ) -> ControlOutcome {
        let mut snapshot = match bus.read_snapshot().await {
            Ok(snapshot) => {
                if self.read_fault.clear().is_edge() {
                    info!("Control loop reading the bus again");
                }
                snapshot
            }
            Err(e) => {
                // The interval keeps growing, so the next estimate covers it.
                if self.read_fault.fail().is_edge() {
                    warn!("Control cycle skipped: {}", e);
                }
                return ControlOutcome::Stale;
            }
        };

        let soc_percent = self.estimate(&snapshot, now);
        let state = self.estimator.state();
        snapshot.battery_state = state;

        match bus.write(BusRecord::Battery(state)).await {
            Ok(()) => {
                if self.write_fault.clear().is_edge() {
                    info!("Battery state publishing resumed");
                }
            }
            Err(e) => {
                if self.write_fault.fail().is_edge() {
                    warn!("Battery state not published: {}", e);
                }
            }
        }

        self.sequence = self.sequence.wrapping_add(1);
        let uptime_ms = now.saturating_duration_since(self.boot).as_millis();
        let frame =
            TelemetryFrame::from_snapshot(self.sequence, uptime_ms, run_state, &snapshot, soc_percent);

        match sink.publish(&frame).await {
            Ok(()) => {
                if self.sink_fault.clear().is_edge() {
                    info!("Telemetry delivery resumed");
                }
                ControlOutcome::Published { soc_percent }
            }
            Err(e) => {
                if self.sink_fault.fail().is_edge() {
                    warn!("Telemetry not sent: {}", e);
                }
                ControlOutcome::NotReported { soc_percent }
            }
        }
    }
}
