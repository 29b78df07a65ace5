//! Remote text commands over UDP
//!
//! Each datagram is one command line; the reply goes back to the sender.

use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Delay, Duration, Timer};
use helio_core::bus::SharedSensorBus;
use helio_core::command::{CommandAction, respond};
use helio_core::sleep::SleepOutcome;
use log::{error, info, warn};

use crate::app_state::{
    AppRunState, POWER_REQUEST, PowerRequest, SharedScheduler, SharedTracker, StationStatus,
};

const MAX_COMMAND_LEN: usize = 128;
/// Time for the reply datagram to leave before the station goes down.
const FAREWELL_DELAY: Duration = Duration::from_secs(1);

async fn send(socket: &mut UdpSocket<'_>, to: IpEndpoint, text: &str) {
    if let Err(e) = socket.send_to(text.as_bytes(), to).await {
        warn!("Command reply to {} not sent: {:?}", to, e);
    }
}

#[embassy_executor::task]
pub async fn command_task(
    stack: Stack<'static>,
    port: u16,
    bus: &'static SharedSensorBus,
    status: &'static StationStatus,
    scheduler: &'static SharedScheduler,
    tracker: &'static SharedTracker,
) {
    let mut rx_meta = [PacketMetadata::EMPTY; 4];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; 512];
    let mut tx_buffer = [0u8; 1024];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    if let Err(e) = socket.bind(port) {
        error!("Command port {} unavailable: {:?}", port, e);
        return;
    }
    info!("Listening for commands on UDP {}", port);

    let mut packet = [0u8; MAX_COMMAND_LEN];
    loop {
        let (len, meta) = match socket.recv_from(&mut packet).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Command receive failed: {:?}", e);
                continue;
            }
        };
        let sender = meta.endpoint;
        let text = core::str::from_utf8(&packet[..len]).unwrap_or("");
        info!("Command from {}: {}", sender, text.trim());

        let snapshot = bus.read_snapshot().await.ok();
        let current = status.lock().await.clone();
        let response = respond(text, snapshot.as_ref(), &current);
        send(&mut socket, sender, &response.reply).await;

        match response.action {
            CommandAction::None => {}
            CommandAction::Park => {
                tracker.lock().await.park(bus, &mut Delay).await;
            }
            CommandAction::Resume => tracker.lock().await.resume(),
            CommandAction::Sleep { secs } => {
                Timer::after(FAREWELL_DELAY).await;
                // Same lock order as the sleep task: scheduler, then tracker.
                let mut scheduler = scheduler.lock().await;
                let mut tracker = tracker.lock().await;
                let outcome = scheduler
                    .force_sleep(&mut tracker, bus, &mut Delay, secs)
                    .await;
                if let SleepOutcome::Suspend(request) = outcome {
                    status.lock().await.transition(AppRunState::Sleeping);
                    POWER_REQUEST.signal(PowerRequest::DeepSleep {
                        secs: request.duration_secs,
                    });
                }
            }
            CommandAction::Reset => {
                Timer::after(FAREWELL_DELAY).await;
                POWER_REQUEST.signal(PowerRequest::Reset);
            }
        }

        if let Some(done) = response.action.completion_text() {
            send(&mut socket, sender, done).await;
        }
    }
}
