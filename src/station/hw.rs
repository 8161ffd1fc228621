//! I2C sensor drivers for the Pi. Compiled only with the `sensors`
//! feature; the station falls back to mock values without it.

use super::sensors::{HumiditySensor, PressureSensor, TemperatureSensor};
use crate::error::{HomewatchError, Result};
use parking_lot::Mutex;
use rppal::i2c::I2c;
use std::thread;
use std::time::Duration;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn i2c_error(component: &'static str, err: rppal::i2c::Error) -> HomewatchError {
    HomewatchError::hardware(component.to_string(), err.to_string())
}

// ---------------------------------------------------------------------------
// SHT3x temperature/humidity sensor
// ---------------------------------------------------------------------------

pub const SHT3X_ADDR: u16 = 0x44;
/// Single-shot measurement, high repeatability, no clock stretching.
const SHT3X_CMD_MEASURE: [u8; 2] = [0x24, 0x00];
const SHT3X_MEASUREMENT_DELAY: Duration = Duration::from_millis(16);

/// One physical device serving both the temperature and humidity
/// capabilities; share it via `Arc`.
pub struct Sht3xSensor {
    bus: Mutex<I2c>,
}

impl Sht3xSensor {
    pub fn new() -> Result<Self> {
        let mut bus = I2c::new().map_err(|e| i2c_error("sht3x", e))?;
        bus.set_slave_address(SHT3X_ADDR)
            .map_err(|e| i2c_error("sht3x", e))?;
        Ok(Self {
            bus: Mutex::new(bus),
        })
    }

    fn measure(&self) -> Result<(f64, f64)> {
        let mut bus = self.bus.lock();
        bus.write(&SHT3X_CMD_MEASURE)
            .map_err(|e| i2c_error("sht3x", e))?;
        thread::sleep(SHT3X_MEASUREMENT_DELAY);

        let mut buf = [0u8; 6];
        bus.read(&mut buf).map_err(|e| i2c_error("sht3x", e))?;

        if crc8(&buf[0..2]) != buf[2] || crc8(&buf[3..5]) != buf[5] {
            return Err(HomewatchError::hardware(
                "sht3x".to_string(),
                "measurement CRC mismatch".to_string(),
            ));
        }

        let raw_temperature = u16::from_be_bytes([buf[0], buf[1]]) as f64;
        let raw_humidity = u16::from_be_bytes([buf[3], buf[4]]) as f64;
        let temperature = -45.0 + 175.0 * raw_temperature / 65535.0;
        let humidity = 100.0 * raw_humidity / 65535.0;
        Ok((round2(temperature), round2(humidity)))
    }
}

impl TemperatureSensor for Sht3xSensor {
    fn read_temperature(&self) -> Result<f64> {
        Ok(self.measure()?.0)
    }
}

impl HumiditySensor for Sht3xSensor {
    fn read_humidity(&self) -> Result<f64> {
        Ok(self.measure()?.1)
    }
}

/// CRC-8 over sensor words: polynomial 0x31, init 0xFF (SHT3x datasheet).
fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

// ---------------------------------------------------------------------------
// QMP6988 pressure sensor
// ---------------------------------------------------------------------------

pub const QMP6988_ADDR: u16 = 0x70;
const QMP_REG_CHIP_ID: u8 = 0xD1;
const QMP_CHIP_ID: u8 = 0x5C;
const QMP_REG_RESET: u8 = 0xE0;
const QMP_RESET_VALUE: u8 = 0xE6;
const QMP_REG_CTRL_MEAS: u8 = 0xF4;
const QMP_REG_COEFFICIENTS: u8 = 0xA0;
const QMP_REG_DATA: u8 = 0xF7;
/// temp x4 << 5 | pressure x32 << 2 | forced mode
const QMP_CTRL_FORCED: u8 = (0b011 << 5) | (0b110 << 2) | 0b01;
const QMP_MEASUREMENT_DELAY: Duration = Duration::from_millis(25);

/// Compensation coefficients recovered from the device OTP block,
/// already converted to their floating-point form (datasheet table 14).
struct QmpCoefficients {
    a0: f64,
    a1: f64,
    a2: f64,
    b00: f64,
    bt1: f64,
    bt2: f64,
    bp1: f64,
    b11: f64,
    bp2: f64,
    b12: f64,
    b21: f64,
    bp3: f64,
}

impl QmpCoefficients {
    fn from_otp(otp: &[u8; 25]) -> Self {
        let word = |hi: usize| i16::from_be_bytes([otp[hi], otp[hi + 1]]) as f64;
        let conv = |a: f64, s: f64, raw: f64| a + s * raw / 32767.0;

        // 20-bit values carry their low nibble in the shared extension byte
        let ex = otp[24];
        let b00 = sign_extend_20((otp[0] as u32) << 12 | (otp[1] as u32) << 4 | (ex >> 4) as u32);
        let a0 = sign_extend_20((otp[18] as u32) << 12 | (otp[19] as u32) << 4 | (ex & 0x0F) as u32);

        Self {
            a0: a0 as f64 / 16.0,
            a1: conv(-6.3e-03, 4.3e-04, word(20)),
            a2: conv(-1.9e-11, 1.2e-10, word(22)),
            b00: b00 as f64 / 16.0,
            bt1: conv(1.0e-01, 9.1e-02, word(2)),
            bt2: conv(1.2e-08, 1.2e-06, word(4)),
            bp1: conv(3.3e-02, 1.9e-02, word(6)),
            b11: conv(2.1e-07, 1.4e-07, word(8)),
            bp2: conv(-6.3e-10, 3.5e-10, word(10)),
            b12: conv(2.9e-13, 7.6e-13, word(12)),
            b21: conv(2.1e-15, 1.2e-14, word(14)),
            bp3: conv(1.3e-16, 7.9e-17, word(16)),
        }
    }

    fn compensated_temperature(&self, dt: f64) -> f64 {
        // in 1/256 °C
        self.a0 + self.a1 * dt + self.a2 * dt * dt
    }

    fn compensated_pressure(&self, dp: f64, tr: f64) -> f64 {
        // in Pa
        self.b00
            + self.bt1 * tr
            + self.bp1 * dp
            + self.b11 * dp * tr
            + self.bt2 * tr * tr
            + self.bp2 * dp * dp
            + self.b12 * dp * tr * tr
            + self.b21 * dp * dp * tr
            + self.bp3 * dp * dp * dp
    }
}

fn sign_extend_20(raw: u32) -> i32 {
    if raw & 0x8_0000 != 0 {
        (raw | 0xFFF0_0000) as i32
    } else {
        raw as i32
    }
}

/// One physical device serving the pressure and temperature
/// capabilities.
pub struct Qmp6988Sensor {
    bus: Mutex<I2c>,
    coefficients: QmpCoefficients,
}

impl Qmp6988Sensor {
    pub fn new() -> Result<Self> {
        let mut bus = I2c::new().map_err(|e| i2c_error("qmp6988", e))?;
        bus.set_slave_address(QMP6988_ADDR)
            .map_err(|e| i2c_error("qmp6988", e))?;

        let mut chip_id = [0u8; 1];
        bus.write_read(&[QMP_REG_CHIP_ID], &mut chip_id)
            .map_err(|e| i2c_error("qmp6988", e))?;
        if chip_id[0] != QMP_CHIP_ID {
            return Err(HomewatchError::hardware(
                "qmp6988".to_string(),
                format!("unexpected chip id 0x{:02X}", chip_id[0]),
            ));
        }

        bus.write(&[QMP_REG_RESET, QMP_RESET_VALUE])
            .map_err(|e| i2c_error("qmp6988", e))?;
        thread::sleep(Duration::from_millis(10));

        let mut otp = [0u8; 25];
        bus.write_read(&[QMP_REG_COEFFICIENTS], &mut otp)
            .map_err(|e| i2c_error("qmp6988", e))?;

        Ok(Self {
            bus: Mutex::new(bus),
            coefficients: QmpCoefficients::from_otp(&otp),
        })
    }

    /// (temperature °C, pressure hPa)
    fn measure(&self) -> Result<(f64, f64)> {
        let mut bus = self.bus.lock();
        bus.write(&[QMP_REG_CTRL_MEAS, QMP_CTRL_FORCED])
            .map_err(|e| i2c_error("qmp6988", e))?;
        thread::sleep(QMP_MEASUREMENT_DELAY);

        let mut buf = [0u8; 6];
        bus.write_read(&[QMP_REG_DATA], &mut buf)
            .map_err(|e| i2c_error("qmp6988", e))?;

        let raw = |b: &[u8]| {
            ((b[0] as i64) << 16 | (b[1] as i64) << 8 | b[2] as i64) - (1 << 23)
        };
        let dp = raw(&buf[0..3]) as f64;
        let dt = raw(&buf[3..6]) as f64;

        let tr = self.coefficients.compensated_temperature(dt);
        let pascal = self.coefficients.compensated_pressure(dp, tr);

        Ok((round2(tr / 256.0), round2(pascal / 100.0)))
    }
}

impl PressureSensor for Qmp6988Sensor {
    fn read_pressure(&self) -> Result<f64> {
        Ok(self.measure()?.1)
    }
}

impl TemperatureSensor for Qmp6988Sensor {
    fn read_temperature(&self) -> Result<f64> {
        Ok(self.measure()?.0)
    }
}
