//! Telemetry frames
//!
//! One frame per control cycle, postcard-encoded into a fixed buffer so the
//! firmware can hand it straight to a UDP socket.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::app_state::AppRunState;
use crate::bus::Snapshot;
use crate::sensors::{ElectricalSample, LIGHT_SENSOR_COUNT};
use crate::tracker::TrackerState;

/// Upper bound of an encoded frame.
pub const MAX_FRAME_LEN: usize = 128;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("frame encoding failed")]
    Encode,
    #[error("frame decoding failed")]
    Decode,
    #[error("telemetry link down")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub sequence: u32,
    pub uptime_ms: u64,
    pub run_state: AppRunState,
    pub panel: ElectricalSample,
    pub battery: ElectricalSample,
    pub soc_percent: f32,
    /// LDR resistances in top, bottom, left, right order.
    pub ldr_kohm: [f32; LIGHT_SENSOR_COUNT],
    pub tracker: TrackerState,
}

impl TelemetryFrame {
    pub fn from_snapshot(
        sequence: u32,
        uptime_ms: u64,
        run_state: AppRunState,
        snapshot: &Snapshot,
        soc_percent: f32,
    ) -> Self {
        Self {
            sequence,
            uptime_ms,
            run_state,
            panel: snapshot.panel,
            battery: snapshot.battery,
            soc_percent,
            ldr_kohm: snapshot.lights.map(|l| l.resistance_kohm),
            tracker: snapshot.tracker,
        }
    }

    /// Encode into `buf`, returning the used prefix.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], TelemetryError> {
        postcard::to_slice(self, buf).map_err(|_| TelemetryError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TelemetryError> {
        postcard::from_bytes(bytes).map_err(|_| TelemetryError::Decode)
    }
}

/// Destination for telemetry frames.
pub trait TelemetrySink {
    fn publish(&mut self, frame: &TelemetryFrame) -> impl Future<Output = Result<(), TelemetryError>>;
}
