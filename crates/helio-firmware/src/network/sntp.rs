//! Network time over SNTP

use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::Stack;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use helio_core::ntp::{NTP_PACKET_LEN, NTP_PORT, NtpError, NtpTimestamp, build_request, parse_response};
use log::{info, warn};

use crate::app_state::SharedClock;

const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Query `server` once.
pub async fn fetch_time(stack: Stack<'static>, server: &str) -> Result<NtpTimestamp, NtpError> {
    let addresses = stack
        .dns_query(server, DnsQueryType::A)
        .await
        .map_err(|_| NtpError::Network("DNS lookup failed"))?;
    let address = addresses
        .first()
        .copied()
        .ok_or(NtpError::Network("no address for NTP server"))?;

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 2 * NTP_PACKET_LEN];
    let mut tx_buffer = [0u8; 2 * NTP_PACKET_LEN];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket
        .bind(0)
        .map_err(|_| NtpError::Network("socket bind failed"))?;

    socket
        .send_to(&build_request(), (address, NTP_PORT))
        .await
        .map_err(|_| NtpError::Network("send failed"))?;

    let mut reply = [0u8; NTP_PACKET_LEN];
    let (len, _) = with_timeout(REPLY_TIMEOUT, socket.recv_from(&mut reply))
        .await
        .map_err(|_| NtpError::Timeout)?
        .map_err(|_| NtpError::Network("receive failed"))?;

    parse_response(&reply[..len])
}

/// Fetch network time and anchor `clock` to it, retrying a few times.
pub async fn sync_clock(
    stack: Stack<'static>,
    server: &str,
    clock: &SharedClock,
    attempts: u8,
) -> Result<(), NtpError> {
    let mut last_error = NtpError::Timeout;
    for attempt in 1..=attempts.max(1) {
        match fetch_time(stack, server).await {
            Ok(timestamp) => {
                clock.set_unix_time(timestamp.rounded_unix_secs(), Instant::now());
                info!("Time synchronized: unix {}", timestamp.unix_secs);
                return Ok(());
            }
            Err(e) => {
                warn!("SNTP attempt {} failed: {}", attempt, e);
                last_error = e;
                Timer::after(Duration::from_secs(2)).await;
            }
        }
    }
    Err(last_error)
}
