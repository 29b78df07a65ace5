//! Periodic station tasks
//!
//! Every task runs until the station resets or sleeps; none of them exits
//! on a recoverable fault.

use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Delay, Duration, Instant, Ticker};
use esp_hal::peripherals::LPWR;
use helio_core::acquisition::{ElectricalPoller, LightPoller};
use helio_core::bus::{SharedSensorBus, lock_within};
use helio_core::control::ControlLoop;
use helio_core::fault::FaultLatch;
use helio_core::sleep::SleepOutcome;
use helio_core::telemetry::TelemetrySink;
use log::{error, info, warn};

use crate::app_state::{
    AppRunState, LdrArray, POWER_REQUEST, PowerMonitor, PowerRequest, SharedClock,
    SharedScheduler, SharedTracker, StationStatus,
};
use crate::network::telemetry::{OfflineSink, UdpTelemetrySink};
use crate::power;

#[embassy_executor::task(pool_size = 2)]
pub async fn electrical_task(
    mut poller: ElectricalPoller<PowerMonitor>,
    bus: &'static SharedSensorBus,
    period: Duration,
) {
    info!("{} acquisition every {} ms", poller.rail().label(), period.as_millis());
    let mut ticker = Ticker::every(period);
    loop {
        poller.poll(bus).await;
        ticker.next().await;
    }
}

#[embassy_executor::task]
pub async fn light_task(
    mut poller: LightPoller<LdrArray>,
    bus: &'static SharedSensorBus,
    period: Duration,
) {
    let mut ticker = Ticker::every(period);
    loop {
        poller.poll(bus).await;
        ticker.next().await;
    }
}

#[embassy_executor::task]
pub async fn tracker_task(
    tracker: &'static SharedTracker,
    bus: &'static SharedSensorBus,
    period: Duration,
) {
    let mut ticker = Ticker::every(period);
    let mut lock_fault = FaultLatch::new();
    loop {
        match lock_within(tracker, bus.lock_timeout()).await {
            Ok(mut tracker) => {
                lock_fault.clear();
                tracker.run_cycle(bus).await;
            }
            Err(e) => {
                if lock_fault.fail().is_edge() {
                    warn!("Tracker cycle skipped: {}", e);
                }
            }
        }
        ticker.next().await;
    }
}

async fn run_control<T: TelemetrySink>(
    mut control: ControlLoop,
    sink: &mut T,
    bus: &'static SharedSensorBus,
    status: &'static StationStatus,
    period: Duration,
) -> ! {
    let mut ticker = Ticker::every(period);
    loop {
        let run_state = status.lock().await.run_state;
        control.run_cycle(bus, sink, run_state, Instant::now()).await;
        ticker.next().await;
    }
}

#[embassy_executor::task]
pub async fn control_task(
    control: ControlLoop,
    stack: Option<Stack<'static>>,
    collector: Option<IpEndpoint>,
    bus: &'static SharedSensorBus,
    status: &'static StationStatus,
    period: Duration,
) {
    let mut rx_meta = [PacketMetadata::EMPTY; 1];
    let mut tx_meta = [PacketMetadata::EMPTY; 4];
    let mut rx_buffer = [0u8; 16];
    let mut tx_buffer = [0u8; 512];

    if let (Some(stack), Some(collector)) = (stack, collector) {
        let socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        match UdpTelemetrySink::new(stack, socket, collector) {
            Ok(mut sink) => {
                info!("Telemetry to {}", collector);
                run_control(control, &mut sink, bus, status, period).await
            }
            Err(e) => {
                error!("Telemetry disabled: {}", e);
                run_control(control, &mut OfflineSink, bus, status, period).await
            }
        }
    } else {
        run_control(control, &mut OfflineSink, bus, status, period).await
    }
}

#[embassy_executor::task]
pub async fn sleep_task(
    scheduler: &'static SharedScheduler,
    tracker: &'static SharedTracker,
    clock: &'static SharedClock,
    bus: &'static SharedSensorBus,
    status: &'static StationStatus,
    period: Duration,
) {
    let mut ticker = Ticker::every(period);
    let mut lock_fault = FaultLatch::new();
    loop {
        ticker.next().await;

        let locked = match lock_within(scheduler, bus.lock_timeout()).await {
            Ok(scheduler) => lock_within(tracker, bus.lock_timeout())
                .await
                .map(|tracker| (scheduler, tracker)),
            Err(e) => Err(e),
        };
        let outcome = match locked {
            Ok((mut scheduler, mut tracker)) => {
                lock_fault.clear();
                scheduler
                    .run_check(clock, &mut tracker, bus, &mut Delay)
                    .await
            }
            Err(e) => {
                if lock_fault.fail().is_edge() {
                    warn!("Sleep check skipped: {}", e);
                }
                continue;
            }
        };

        if let SleepOutcome::Suspend(request) = outcome {
            status.lock().await.transition(AppRunState::Sleeping);
            POWER_REQUEST.signal(PowerRequest::DeepSleep {
                secs: request.duration_secs,
            });
            return;
        }
    }
}

/// Owns the low-power peripheral and performs the single terminal transition.
#[embassy_executor::task]
pub async fn power_task(lpwr: LPWR<'static>) {
    match POWER_REQUEST.wait().await {
        PowerRequest::DeepSleep { secs } => power::deep_sleep(lpwr, secs),
        PowerRequest::Reset => power::reset(),
    }
}
