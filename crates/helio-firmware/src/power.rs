//! Deep sleep and restart

use esp_hal::peripherals::LPWR;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use log::info;

/// Arm the RTC timer and power down. The chip boots from scratch on wake.
pub fn deep_sleep(lpwr: LPWR<'static>, secs: u32) -> ! {
    let mut rtc = Rtc::new(lpwr);
    let wakeup = TimerWakeupSource::new(core::time::Duration::from_secs(u64::from(secs)));
    info!("Entering deep sleep for {} s", secs);
    rtc.sleep_deep(&[&wakeup])
}

pub fn reset() -> ! {
    info!("Restarting");
    esp_hal::system::software_reset()
}
