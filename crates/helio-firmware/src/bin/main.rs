#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::{IpEndpoint, Ipv4Address};
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use helio_core::acquisition::{ElectricalPoller, LightPoller};
use helio_core::battery::SocEstimator;
use helio_core::bus::{SensorBus, SharedSensorBus, Snapshot};
use helio_core::config::Config;
use helio_core::control::ControlLoop;
use helio_core::sensors::{ElectricalSensor, Rail};
use helio_core::sleep::SleepScheduler;
use helio_core::tracker::TrackerController;
use helio_firmware::app_state::{
    AppRunState, LdrArray, LedcServos, SharedClock, SharedScheduler, SharedTracker, StationStatus,
    WIFI_OUTCOME, create_i2c_bus, init_power_monitors, new_shared_status,
};
use helio_firmware::config::station_config;
use helio_firmware::network::{self, commands::command_task, sntp};
use helio_firmware::tasks;
use log::{error, info, warn};
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

const SNTP_ATTEMPTS: u8 = 3;
const RESYNC_INTERVAL: Duration = Duration::from_secs(6 * 3600);
const UNSYNCED_RETRY: Duration = Duration::from_secs(60);

static STATUS: StationStatus = new_shared_status();
static BUS: StaticCell<SharedSensorBus> = StaticCell::new();
static TRACKER: StaticCell<SharedTracker> = StaticCell::new();
static SCHEDULER: StaticCell<SharedScheduler> = StaticCell::new();
static CLOCK: StaticCell<SharedClock> = StaticCell::new();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(log::LevelFilter::Info);

    let mut config = station_config();
    if let Err(e) = config.validate() {
        STATUS.lock().await.record_error(e);
        warn!("Falling back to default station settings");
        config = Config {
            network: config.network,
            ..Config::default()
        };
    }

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);
    info!("Embassy initialized");

    // ------------------------------------------------------------------
    // Sensors and actuators
    // ------------------------------------------------------------------

    let i2c = create_i2c_bus(peripherals.I2C0, peripherals.GPIO8, peripherals.GPIO9);
    let (panel, mut battery) = init_power_monitors(i2c).await;

    let boot_voltage = match battery.read().await {
        Ok(sample) => Some(sample.bus_voltage_v),
        Err(e) => {
            warn!("No boot battery reading: {}", e);
            None
        }
    };
    let estimator = SocEstimator::from_boot_voltage(boot_voltage, config.battery);

    let ldrs = LdrArray::new(
        peripherals.ADC1,
        peripherals.GPIO4,
        peripherals.GPIO5,
        peripherals.GPIO6,
        peripherals.GPIO7,
    );
    let servos = LedcServos::new(peripherals.LEDC, peripherals.GPIO17, peripherals.GPIO18);

    let bus: &'static SharedSensorBus = BUS.init(SensorBus::new(
        Snapshot::new(config.tracker.home),
        config.bus.lock_timeout(),
    ));
    let tracker: &'static SharedTracker =
        TRACKER.init(AsyncMutex::new(TrackerController::new(servos, config.tracker)));
    let scheduler: &'static SharedScheduler =
        SCHEDULER.init(AsyncMutex::new(SleepScheduler::new(config.sleep)));
    let clock: &'static SharedClock = CLOCK.init(SharedClock::new(config.sleep.utc_offset_minutes));

    spawner.must_spawn(tasks::power_task(peripherals.LPWR));
    spawner.must_spawn(tasks::electrical_task(
        ElectricalPoller::new(Rail::Panel, panel, config.bus.max_sensor_failures),
        bus,
        config.periods.electrical(),
    ));
    spawner.must_spawn(tasks::electrical_task(
        ElectricalPoller::new(Rail::Battery, battery, config.bus.max_sensor_failures),
        bus,
        config.periods.electrical(),
    ));
    spawner.must_spawn(tasks::light_task(
        LightPoller::new(ldrs),
        bus,
        config.periods.light(),
    ));
    spawner.must_spawn(tasks::tracker_task(tracker, bus, config.periods.tracker()));

    // ------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------

    STATUS.lock().await.transition(AppRunState::WifiConnecting);
    let stack = network::spawn_network(&spawner, peripherals.WIFI, config.network);

    let connected = match WIFI_OUTCOME.wait().await {
        Ok(()) => {
            STATUS.lock().await.transition(AppRunState::WifiConnected);
            true
        }
        Err(e) => {
            let mut status = STATUS.lock().await;
            status.record_error(e);
            status.transition(AppRunState::Error);
            false
        }
    };

    if let Some(stack) = stack {
        if connected {
            STATUS.lock().await.transition(AppRunState::TimeSyncing);
            match sntp::sync_clock(stack, config.network.ntp_server, clock, SNTP_ATTEMPTS).await {
                Ok(()) => {
                    STATUS.lock().await.transition(AppRunState::TimeKnown);
                }
                Err(e) => STATUS.lock().await.record_error(e),
            }
        }
        // The link task keeps reconnecting, so commands may arrive later.
        spawner.must_spawn(command_task(
            stack,
            config.network.command_port,
            bus,
            &STATUS,
            scheduler,
            tracker,
        ));
    }

    let collector = match config.network.telemetry_host.parse::<Ipv4Address>() {
        Ok(ip) => Some(IpEndpoint::new(ip.into(), config.network.telemetry_port)),
        Err(_) => {
            error!(
                "Telemetry host {:?} is not an IPv4 address",
                config.network.telemetry_host
            );
            None
        }
    };
    spawner.must_spawn(tasks::control_task(
        ControlLoop::new(estimator, Instant::now()),
        stack,
        collector,
        bus,
        &STATUS,
        config.periods.control(),
    ));
    spawner.must_spawn(tasks::sleep_task(
        scheduler,
        tracker,
        clock,
        bus,
        &STATUS,
        config.periods.sleep_check(),
    ));

    STATUS.lock().await.transition(AppRunState::Tracking);

    // Keep the clock fresh; pick it up late if the first sync failed.
    loop {
        let synced = clock.is_synced();
        Timer::after(if synced { RESYNC_INTERVAL } else { UNSYNCED_RETRY }).await;

        if let Some(stack) = stack.filter(|s| s.is_config_up()) {
            if let Err(e) =
                sntp::sync_clock(stack, config.network.ntp_server, clock, SNTP_ATTEMPTS).await
            {
                STATUS.lock().await.record_error(e);
            }
        }
    }
}
