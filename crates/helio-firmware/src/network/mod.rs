//! WiFi station, network stack and the UDP services on top of it

pub mod commands;
pub mod sntp;
pub mod telemetry;

use alloc::format;
use alloc::string::String;

use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, DhcpConfig, Stack, StackResources};
use embassy_time::{Duration, Timer};
use esp_hal::peripherals::WIFI;
use esp_hal::rng::Rng;
use esp_radio::Controller as RadioController;
use esp_radio::wifi::{self, ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent};
use helio_core::config::NetworkConfig;
use log::{error, info, warn};
use static_cell::StaticCell;
use thiserror_no_std::Error;

use crate::app_state::{AppError, WIFI_OUTCOME};

/// DNS plus the telemetry, command and SNTP sockets.
const SOCKET_COUNT: usize = 4;
const DHCP_POLLS: u8 = 30;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    #[error("radio could not be initialized")]
    Radio,
    #[error("station mode could not be started")]
    Start,
    #[error("association failed after {0} attempts")]
    Association(u8),
    #[error("no DHCP lease")]
    NoLease,
}

impl From<WifiError> for AppError {
    fn from(e: WifiError) -> Self {
        AppError::wifi(&format!("{}", e))
    }
}

static RADIO_CONTROLLER: StaticCell<RadioController<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<SOCKET_COUNT>> = StaticCell::new();

/// Bring up the radio and the network stack and spawn their tasks.
///
/// Returns `None` when the radio cannot be initialized; the station then
/// runs offline and [`WIFI_OUTCOME`] reports failure.
pub fn spawn_network(
    spawner: &Spawner,
    wifi_peripheral: WIFI<'static>,
    config: NetworkConfig<'static>,
) -> Option<Stack<'static>> {
    let radio = match esp_radio::init() {
        Ok(radio) => RADIO_CONTROLLER.init(radio),
        Err(e) => {
            error!("Radio init failed; running offline: {:?}", e);
            WIFI_OUTCOME.signal(Err(WifiError::Radio));
            return None;
        }
    };

    let (controller, interfaces) = match wifi::new(radio, wifi_peripheral, Default::default()) {
        Ok(v) => v,
        Err(e) => {
            error!("WiFi driver init failed; running offline: {:?}", e);
            WIFI_OUTCOME.signal(Err(WifiError::Radio));
            return None;
        }
    };

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let resources = NET_RESOURCES.init(StackResources::new());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(DhcpConfig::default()),
        resources,
        seed,
    );

    spawner.must_spawn(net_task(runner));
    spawner.must_spawn(wifi_task(controller, stack, config));
    Some(stack)
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

async fn wait_for_ip(stack: Stack<'static>) -> bool {
    for _ in 0..DHCP_POLLS {
        if stack.is_config_up() {
            return true;
        }
        Timer::after(Duration::from_millis(500)).await;
    }
    stack.is_config_up()
}

/// One connection round: up to `retries` association attempts, then DHCP.
async fn connect_round(
    controller: &mut WifiController<'static>,
    stack: Stack<'static>,
    retries: u8,
) -> Result<(), WifiError> {
    let attempts = retries.max(1);
    let mut last_error = WifiError::Association(attempts);
    for attempt in 1..=attempts {
        info!("Connecting to WiFi (attempt {}/{})", attempt, attempts);
        match controller.connect_async().await {
            Ok(()) => {
                if wait_for_ip(stack).await {
                    if let Some(cfg) = stack.config_v4() {
                        info!("WiFi up: ip={}", cfg.address.address());
                    }
                    return Ok(());
                }
                warn!("WiFi associated but no DHCP lease");
                last_error = WifiError::NoLease;
                let _ = controller.disconnect_async().await;
            }
            Err(e) => {
                warn!("WiFi connect failed: {:?}", e);
                last_error = WifiError::Association(attempts);
            }
        }
        Timer::after(Duration::from_secs(1)).await;
    }
    Err(last_error)
}

/// Apply the client configuration and start station mode.
async fn start_station(
    controller: &mut WifiController<'static>,
    client: &ModeConfig,
) -> Result<(), WifiError> {
    controller.set_config(client).map_err(|e| {
        warn!("WiFi config rejected: {:?}", e);
        WifiError::Start
    })?;
    controller.start_async().await.map_err(|e| {
        warn!("WiFi start failed: {:?}", e);
        WifiError::Start
    })
}

#[embassy_executor::task]
async fn wifi_task(
    mut controller: WifiController<'static>,
    stack: Stack<'static>,
    config: NetworkConfig<'static>,
) {
    let client = ModeConfig::Client(
        ClientConfig::default()
            .with_ssid(String::from(config.ssid))
            .with_password(String::from(config.password)),
    );
    let mut reported = false;

    loop {
        if !matches!(controller.is_started(), Ok(true)) {
            if let Err(e) = start_station(&mut controller, &client).await {
                error!("{}", e);
                if !reported {
                    WIFI_OUTCOME.signal(Err(e));
                    reported = true;
                }
                Timer::after(Duration::from_secs(10)).await;
                continue;
            }
        }

        let result = connect_round(&mut controller, stack, config.wifi_retries).await;
        if !reported {
            WIFI_OUTCOME.signal(result);
            reported = true;
        }

        match result {
            Ok(()) => {
                controller.wait_for_event(WifiEvent::StaDisconnected).await;
                warn!("WiFi disconnected; reconnecting");
                Timer::after(Duration::from_secs(5)).await;
            }
            Err(e) => {
                warn!("WiFi unavailable ({}); next round in 30 s", e);
                Timer::after(Duration::from_secs(30)).await;
            }
        }
    }
}
