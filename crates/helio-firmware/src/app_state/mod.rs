//! Firmware-specific application state
//!
//! Re-exports the hardware-independent app state from `helio_core` and adds
//! the concrete shared objects the tasks hand around.

mod hardware;

pub use hardware::*;

pub use helio_core::app_state::*;

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex as AsyncMutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;
use helio_core::clock::{ClockError, ClockSource, SyncedClock, WallClock};
use helio_core::sleep::SleepScheduler;
use helio_core::tracker::TrackerController;

use crate::network::WifiError;

pub type StationStatus = SharedAppStatus<CriticalSectionRawMutex>;
pub type SharedTracker = AsyncMutex<CriticalSectionRawMutex, TrackerController<LedcServos>>;
pub type SharedScheduler = AsyncMutex<CriticalSectionRawMutex, SleepScheduler>;

/// Terminal power transitions, executed by the power task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    DeepSleep { secs: u32 },
    Reset,
}

pub static POWER_REQUEST: Signal<CriticalSectionRawMutex, PowerRequest> = Signal::new();

/// Outcome of the first WiFi connection round; boot waits on it.
pub static WIFI_OUTCOME: Signal<CriticalSectionRawMutex, Result<(), WifiError>> = Signal::new();

/// Wall clock shared by the time-sync path and the sleep scheduler.
pub struct SharedClock(BlockingMutex<CriticalSectionRawMutex, Cell<SyncedClock>>);

impl SharedClock {
    pub const fn new(utc_offset_minutes: i32) -> Self {
        Self(BlockingMutex::new(Cell::new(SyncedClock::new(
            utc_offset_minutes,
        ))))
    }

    pub fn set_unix_time(&self, unix_secs: i64, at: Instant) {
        self.0.lock(|clock| {
            let mut synced = clock.get();
            synced.set_unix_time(unix_secs, at);
            clock.set(synced);
        });
    }

    pub fn is_synced(&self) -> bool {
        self.0.lock(|clock| clock.get().is_synced())
    }
}

impl ClockSource for SharedClock {
    fn now(&self) -> Result<WallClock, ClockError> {
        self.0.lock(|clock| clock.get()).now()
    }
}
