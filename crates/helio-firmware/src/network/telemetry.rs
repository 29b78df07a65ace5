//! Telemetry frames over UDP

use embassy_net::udp::UdpSocket;
use embassy_net::{IpEndpoint, Stack};
use helio_core::telemetry::{MAX_FRAME_LEN, TelemetryError, TelemetryFrame, TelemetrySink};

/// Sends each frame as one datagram to a fixed collector.
pub struct UdpTelemetrySink<'a> {
    stack: Stack<'static>,
    socket: UdpSocket<'a>,
    collector: IpEndpoint,
    buffer: [u8; MAX_FRAME_LEN],
}

impl<'a> UdpTelemetrySink<'a> {
    pub fn new(
        stack: Stack<'static>,
        mut socket: UdpSocket<'a>,
        collector: IpEndpoint,
    ) -> Result<Self, TelemetryError> {
        socket
            .bind(0)
            .map_err(|_| TelemetryError::Send("socket bind failed"))?;
        Ok(Self {
            stack,
            socket,
            collector,
            buffer: [0; MAX_FRAME_LEN],
        })
    }
}

impl TelemetrySink for UdpTelemetrySink<'_> {
    async fn publish(&mut self, frame: &TelemetryFrame) -> Result<(), TelemetryError> {
        if !self.stack.is_config_up() {
            return Err(TelemetryError::NotConnected);
        }
        let bytes = frame.encode(&mut self.buffer)?;
        self.socket
            .send_to(bytes, self.collector)
            .await
            .map_err(|_| TelemetryError::Send("udp send failed"))
    }
}

/// Sink used when the station has no network stack.
pub struct OfflineSink;

impl TelemetrySink for OfflineSink {
    async fn publish(&mut self, _frame: &TelemetryFrame) -> Result<(), TelemetryError> {
        Err(TelemetryError::NotConnected)
    }
}
