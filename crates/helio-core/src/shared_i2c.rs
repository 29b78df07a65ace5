//! One async I2C bus shared by several devices
//!
//! The panel and battery monitors sit on the same bus. Each gets a
//! [`SharedI2cDevice`] handle; a transaction holds the bus mutex only for its
//! own duration and yields to the executor while the transfer is in flight.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};

pub struct SharedI2cDevice<'a, M: RawMutex, T> {
    bus: &'a Mutex<M, T>,
}

impl<'a, M: RawMutex, T> SharedI2cDevice<'a, M, T> {
    #[inline]
    pub const fn new(bus: &'a Mutex<M, T>) -> Self {
        Self { bus }
    }
}

impl<M: RawMutex, T> ErrorType for SharedI2cDevice<'_, M, T>
where
    T: ErrorType,
{
    type Error = T::Error;
}

impl<M: RawMutex, T> I2c for SharedI2cDevice<'_, M, T>
where
    T: I2c,
{
    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut bus = self.bus.lock().await;
        bus.transaction(address, operations).await
    }
}
