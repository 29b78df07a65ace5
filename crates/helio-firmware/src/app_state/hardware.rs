//! Hardware initialization for the station
//!
//! Sets up the shared I2C bus with both power monitors, the ADC channels of
//! the four light sensors and the two LEDC servo channels.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_time::{Duration, Timer};
use esp_hal::analog::adc::{Adc, AdcChannel, AdcConfig, AdcPin, Attenuation};
use esp_hal::gpio::DriveMode;
use esp_hal::ledc::channel::{self, ChannelHW, ChannelIFace};
use esp_hal::ledc::timer::{self, TimerIFace};
use esp_hal::ledc::{LSGlobalClkSource, Ledc, LowSpeed};
use esp_hal::peripherals::{
    ADC1, GPIO4, GPIO5, GPIO6, GPIO7, GPIO8, GPIO9, GPIO17, GPIO18, I2C0, LEDC,
};
use esp_hal::{i2c::master::Config as I2cConfig, time::Rate};
use helio_core::sensors::{
    Ina219, Ina219Calibration, LIGHT_SENSOR_COUNT, LightPosition, LightSample, LightSensorArray,
    Rail, SensorError,
};
use helio_core::servo::{SERVO_PWM_HZ, angle_to_duty};
use helio_core::shared_i2c::SharedI2cDevice;
use helio_core::tracker::{ActuationError, Axis, ServoDriver};
use log::{error, info};
use static_cell::StaticCell;

pub type I2cBus = esp_hal::i2c::master::I2c<'static, esp_hal::Async>;
pub type PowerMonitor = Ina219<SharedI2cDevice<'static, CriticalSectionRawMutex, I2cBus>>;

pub const PANEL_MONITOR_ADDR: u8 = 0x40;
pub const BATTERY_MONITOR_ADDR: u8 = 0x41;

/// 0.1 Ω shunt, 3.2 A full scale on both rails.
const MONITOR_CALIBRATION: Ina219Calibration = Ina219Calibration {
    shunt_ohms: 0.1,
    max_current_a: 3.2,
};

/// Create the I2C peripheral the power monitors share.
pub fn create_i2c_bus(i2c0: I2C0<'static>, sda: GPIO8<'static>, scl: GPIO9<'static>) -> I2cBus {
    esp_hal::i2c::master::I2c::new(
        i2c0,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .expect("I2C0 configuration rejected")
    .with_sda(sda)
    .with_scl(scl)
    .into_async()
}

/// Put the bus behind a mutex and bring up both INA219s.
///
/// A monitor that fails to initialize is still returned; its poller keeps
/// retrying through re-initialization.
pub async fn init_power_monitors(i2c: I2cBus) -> (PowerMonitor, PowerMonitor) {
    static I2C0_BUS: StaticCell<AsyncMutex<CriticalSectionRawMutex, I2cBus>> = StaticCell::new();
    let bus = I2C0_BUS.init(AsyncMutex::new(i2c));

    let mut panel = Ina219::new(
        SharedI2cDevice::new(bus),
        PANEL_MONITOR_ADDR,
        Rail::Panel.label(),
        MONITOR_CALIBRATION,
    );
    let mut battery = Ina219::new(
        SharedI2cDevice::new(bus),
        BATTERY_MONITOR_ADDR,
        Rail::Battery.label(),
        MONITOR_CALIBRATION,
    );

    for monitor in [&mut panel, &mut battery] {
        if let Err(e) = monitor.init().await {
            error!("Power monitor 0x{:02X} not ready: {}", monitor.address(), e);
        }
    }
    info!("Power monitors configured");

    (panel, battery)
}

type LdrAdc = Adc<'static, ADC1<'static>, esp_hal::Blocking>;

/// Conversions are polled; give up after this many tries.
const ADC_READ_ATTEMPTS: u32 = 20;

async fn read_channel<PIN: AdcChannel>(
    adc: &mut LdrAdc,
    pin: &mut AdcPin<PIN, ADC1<'static>>,
    position: LightPosition,
) -> Result<LightSample, SensorError> {
    for _ in 0..ADC_READ_ATTEMPTS {
        if let Ok(raw) = adc.read_oneshot(pin) {
            return Ok(LightSample::from_raw(i32::from(raw), None));
        }
        Timer::after(Duration::from_micros(100)).await;
    }
    Err(SensorError::Timeout {
        sensor: position.label(),
        operation: "ADC conversion",
    })
}

/// The four LDR dividers on ADC1.
pub struct LdrArray {
    adc: LdrAdc,
    top: AdcPin<GPIO4<'static>, ADC1<'static>>,
    bottom: AdcPin<GPIO5<'static>, ADC1<'static>>,
    left: AdcPin<GPIO6<'static>, ADC1<'static>>,
    right: AdcPin<GPIO7<'static>, ADC1<'static>>,
}

impl LdrArray {
    pub fn new(
        adc1: ADC1<'static>,
        top: GPIO4<'static>,
        bottom: GPIO5<'static>,
        left: GPIO6<'static>,
        right: GPIO7<'static>,
    ) -> Self {
        let mut config = AdcConfig::new();
        let top = config.enable_pin(top, Attenuation::_11dB);
        let bottom = config.enable_pin(bottom, Attenuation::_11dB);
        let left = config.enable_pin(left, Attenuation::_11dB);
        let right = config.enable_pin(right, Attenuation::_11dB);
        info!("LDR ADC channels configured");

        Self {
            adc: Adc::new(adc1, config),
            top,
            bottom,
            left,
            right,
        }
    }
}

impl LightSensorArray for LdrArray {
    async fn read_all(&mut self) -> Result<[LightSample; LIGHT_SENSOR_COUNT], SensorError> {
        Ok([
            read_channel(&mut self.adc, &mut self.top, LightPosition::Top).await?,
            read_channel(&mut self.adc, &mut self.bottom, LightPosition::Bottom).await?,
            read_channel(&mut self.adc, &mut self.left, LightPosition::Left).await?,
            read_channel(&mut self.adc, &mut self.right, LightPosition::Right).await?,
        ])
    }
}

/// Both tracker servos on LEDC low-speed channels sharing one 50 Hz timer.
pub struct LedcServos {
    vertical: channel::Channel<'static, LowSpeed>,
    horizontal: channel::Channel<'static, LowSpeed>,
}

impl LedcServos {
    pub fn new(ledc: LEDC<'static>, vertical_pin: GPIO17<'static>, horizontal_pin: GPIO18<'static>) -> Self {
        static SERVO_TIMER: StaticCell<timer::Timer<'static, LowSpeed>> = StaticCell::new();

        let mut ledc = Ledc::new(ledc);
        ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);

        let servo_timer = SERVO_TIMER.init(ledc.timer::<LowSpeed>(timer::Number::Timer0));
        servo_timer
            .configure(timer::config::Config {
                duty: timer::config::Duty::Duty14Bit,
                clock_source: timer::LSClockSource::APBClk,
                frequency: Rate::from_hz(SERVO_PWM_HZ),
            })
            .expect("servo timer configuration rejected");

        let mut vertical = ledc.channel(channel::Number::Channel0, vertical_pin);
        let mut horizontal = ledc.channel(channel::Number::Channel1, horizontal_pin);
        for ch in [&mut vertical, &mut horizontal] {
            ch.configure(channel::config::Config {
                timer: servo_timer,
                duty_pct: 0,
                drive_mode: DriveMode::PushPull,
            })
            .expect("servo channel configuration rejected");
        }
        info!("Servo PWM ready at {} Hz", SERVO_PWM_HZ);

        Self {
            vertical,
            horizontal,
        }
    }
}

impl ServoDriver for LedcServos {
    fn set_angle(&mut self, axis: Axis, degrees: f32) -> Result<(), ActuationError> {
        let channel = match axis {
            Axis::Vertical => &self.vertical,
            Axis::Horizontal => &self.horizontal,
        };
        channel.set_duty_hw(angle_to_duty(degrees));
        Ok(())
    }
}
