use embedded_hal_async::i2c::I2c;
use log::info;

use super::{ElectricalSample, ElectricalSensor, SensorError};

const REG_CONFIG: u8 = 0x00;
const REG_BUS_VOLTAGE: u8 = 0x02;
const REG_POWER: u8 = 0x03;
const REG_CURRENT: u8 = 0x04;
const REG_CALIBRATION: u8 = 0x05;

const CONFIG_RESET: u16 = 0x8000;
const BUS_VOLTAGE_LSB_V: f32 = 0.004;

/// Shunt and range of one INA219 install.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ina219Calibration {
    pub shunt_ohms: f32,
    pub max_current_a: f32,
}

impl Ina219Calibration {
    /// Amps per bit of the CURRENT register.
    pub fn current_lsb(&self) -> f32 {
        self.max_current_a / 32767.0
    }

    /// Watts per bit of the POWER register.
    pub fn power_lsb(&self) -> f32 {
        20.0 * self.current_lsb()
    }

    /// Value written to the CALIBRATION register.
    pub fn register_value(&self) -> u16 {
        let cal = 0.04096 / (self.current_lsb() * self.shunt_ohms);
        if cal >= 65535.0 { u16::MAX } else { cal as u16 }
    }
}

/// INA219 current/power monitor on an async I2C bus.
///
/// Only the registers needed for calibrated voltage/current/power reads are
/// touched.
pub struct Ina219<I> {
    i2c: I,
    address: u8,
    label: &'static str,
    calibration: Ina219Calibration,
}

impl<I: I2c> Ina219<I> {
    pub fn new(i2c: I, address: u8, label: &'static str, calibration: Ina219Calibration) -> Self {
        Self {
            i2c,
            address,
            label,
            calibration,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Reset the device and program its calibration register.
    pub async fn init(&mut self) -> Result<(), SensorError> {
        self.write_register(REG_CONFIG, CONFIG_RESET)
            .await
            .map_err(|_| SensorError::InitializationFailed {
                sensor: self.label,
                details: "Failed to reset configuration register",
            })?;

        let cal = self.calibration.register_value();
        self.write_register(REG_CALIBRATION, cal)
            .await
            .map_err(|_| SensorError::InitializationFailed {
                sensor: self.label,
                details: "Failed to write calibration register",
            })?;

        info!(
            "{} (0x{:02X}) calibrated: shunt={} ohm, imax={} A, cal=0x{:04X}",
            self.label, self.address, self.calibration.shunt_ohms, self.calibration.max_current_a, cal
        );
        Ok(())
    }

    async fn write_register(&mut self, reg: u8, value: u16) -> Result<(), I::Error> {
        let [msb, lsb] = value.to_be_bytes();
        self.i2c.write(self.address, &[reg, msb, lsb]).await
    }

    async fn read_register(
        &mut self,
        reg: u8,
        operation: &'static str,
    ) -> Result<u16, SensorError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[reg], &mut buf)
            .await
            .map_err(|_| SensorError::ReadFailed {
                sensor: self.label,
                operation,
                details: "I2C communication error",
            })?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<I: I2c> ElectricalSensor for Ina219<I> {
    async fn read(&mut self) -> Result<ElectricalSample, SensorError> {
        let raw_bus = self.read_register(REG_BUS_VOLTAGE, "read bus voltage").await?;
        let raw_current = self.read_register(REG_CURRENT, "read current").await?;
        let raw_power = self.read_register(REG_POWER, "read power").await?;

        Ok(ElectricalSample {
            bus_voltage_v: (raw_bus >> 3) as f32 * BUS_VOLTAGE_LSB_V,
            current_a: (raw_current as i16) as f32 * self.calibration.current_lsb(),
            power_w: raw_power as f32 * self.calibration.power_lsb(),
        })
    }

    async fn reinitialize(&mut self) -> Result<(), SensorError> {
        self.init().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embedded_hal_async::i2c::{ErrorKind, ErrorType, Operation};

    /// Register file of a fake INA219 that also records writes.
    #[derive(Default)]
    struct MockI2c {
        registers: [u16; 6],
        pointer: usize,
        fail: bool,
        writes: alloc::vec::Vec<(u8, u16)>,
    }

    impl ErrorType for MockI2c {
        type Error = ErrorKind;
    }

    impl I2c for MockI2c {
        async fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        self.pointer = bytes[0] as usize;
                        if bytes.len() == 3 {
                            let value = u16::from_be_bytes([bytes[1], bytes[2]]);
                            self.registers[self.pointer] = value;
                            self.writes.push((bytes[0], value));
                        }
                    }
                    Operation::Read(buf) => {
                        buf.copy_from_slice(&self.registers[self.pointer].to_be_bytes());
                    }
                }
            }
            Ok(())
        }
    }

    fn calibration() -> Ina219Calibration {
        Ina219Calibration {
            shunt_ohms: 0.1,
            max_current_a: 3.2,
        }
    }

    #[test]
    fn calibration_register_follows_datasheet_formula() {
        let cal = calibration();
        // 0.04096 / (3.2 / 32767 * 0.1) = 4194.1
        assert_eq!(cal.register_value(), 4194);
        assert!((cal.power_lsb() - 20.0 * cal.current_lsb()).abs() < 1e-9);
    }

    #[test]
    fn init_resets_then_calibrates() {
        let mut dev = Ina219::new(MockI2c::default(), 0x40, "INA219 panel", calibration());
        block_on(dev.init()).unwrap();
        assert_eq!(dev.i2c.writes[0], (REG_CONFIG, CONFIG_RESET));
        assert_eq!(dev.i2c.writes[1], (REG_CALIBRATION, 4194));
    }

    #[test]
    fn read_converts_raw_registers() {
        let mut i2c = MockI2c::default();
        // 12.0 V -> 3000 counts shifted left by 3
        i2c.registers[REG_BUS_VOLTAGE as usize] = 3000 << 3;
        // negative current: -1000 counts
        i2c.registers[REG_CURRENT as usize] = (-1000i16) as u16;
        i2c.registers[REG_POWER as usize] = 500;

        let mut dev = Ina219::new(i2c, 0x41, "INA219 battery", calibration());
        let sample = block_on(dev.read()).unwrap();

        assert!((sample.bus_voltage_v - 12.0).abs() < 1e-4);
        assert!((sample.current_a + 1000.0 * 3.2 / 32767.0).abs() < 1e-5);
        assert!((sample.power_w - 500.0 * 20.0 * 3.2 / 32767.0).abs() < 1e-4);
    }

    #[test]
    fn bus_failure_maps_to_read_failed() {
        let i2c = MockI2c {
            fail: true,
            ..Default::default()
        };
        let mut dev = Ina219::new(i2c, 0x40, "INA219 panel", calibration());
        let err = block_on(dev.read()).unwrap_err();
        assert!(matches!(
            err,
            SensorError::ReadFailed {
                operation: "read bus voltage",
                ..
            }
        ));
        assert!(matches!(
            block_on(dev.reinitialize()),
            Err(SensorError::InitializationFailed { .. })
        ));
    }
}
