//! Environment 2 Click, an air quality, temperature and humidity sensor.
//!
//! # Hardware Description
//!
//! The board combines two Sensirion sensors on one I2C bus:
//!
//! - an SHT40 relative humidity and temperature sensor (address 0x44), and
//! - an SGP40 metal-oxide VOC sensor (address 0x59).
//!
//! Both are command based: the host writes a 16-bit (SGP40) or 8-bit (SHT40) command, waits
//! for the measurement to finish, then reads back 16-bit words, each followed by a CRC-8.
//!
//! The SGP40 only reports a raw resistance signal. [`Environment2::voc_index`] compensates it
//! with the SHT40 reading and runs it through a [`VocAlgorithm`] owned by the caller.

mod fix16;
mod voc;

use clickboard_core::{Accumulator, BusError};
use embedded_hal::{delay::DelayNs, i2c::I2c};
use snafu::Snafu;
pub use voc::{SRAW_MAX, SRAW_MIN, VocAlgorithm};

/// Default SHT40 address.
pub const SHT40_ADDRESS: u8 = 0x44;

/// Default SGP40 address.
pub const SGP40_ADDRESS: u8 = 0x59;

/// Result word of a passing SGP40 self test.
pub const SELF_TEST_PASSED: u16 = 0xD400;

mod sht40 {
    pub const SOFT_RESET: u8 = 0x94;
    pub const SERIAL_NUMBER: u8 = 0x89;
}

mod sgp40 {
    pub const MEASURE_RAW: [u8; 2] = [0x26, 0x0F];
    pub const SELF_TEST: [u8; 2] = [0x28, 0x0E];
    pub const HEATER_OFF: [u8; 2] = [0x36, 0x15];
    pub const SERIAL_NUMBER: [u8; 2] = [0x36, 0x82];

    /// 50 %RH, used when no humidity reading is available.
    pub const DEFAULT_HUMIDITY: u16 = 0x8000;
    /// 25 °C, used when no temperature reading is available.
    pub const DEFAULT_TEMPERATURE: u16 = 0x6666;
}

/// Computes the Sensirion CRC-8 (polynomial 0x31, initial value 0xFF) of `data`.
#[must_use]
pub const fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFF_u8;
    let mut i = 0;
    while i < data.len() {
        crc ^= data[i];
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
            bit += 1;
        }
        i += 1;
    }
    crc
}

/// SHT40 measurement repeatability.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Precision {
    /// Lowest noise, 8.3 ms measurement.
    #[default]
    High,
    /// 4.5 ms measurement.
    Medium,
    /// 1.7 ms measurement.
    Low,
}

impl Precision {
    const fn command(self) -> u8 {
        match self {
            Self::High => 0xFD,
            Self::Medium => 0xF6,
            Self::Low => 0xE0,
        }
    }

    const fn duration_ms(self) -> u32 {
        match self {
            Self::High => 10,
            Self::Medium => 5,
            Self::Low => 2,
        }
    }
}

/// SHT40 heater power.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HeaterPower {
    /// 200 mW.
    High,
    /// 110 mW.
    Medium,
    /// 20 mW.
    Low,
}

/// SHT40 heater pulse length.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HeaterDuration {
    /// 1 s.
    Long,
    /// 0.1 s.
    Short,
}

const fn heater_command(power: HeaterPower, duration: HeaterDuration) -> u8 {
    match (power, duration) {
        (HeaterPower::High, HeaterDuration::Long) => 0x39,
        (HeaterPower::High, HeaterDuration::Short) => 0x32,
        (HeaterPower::Medium, HeaterDuration::Long) => 0x2F,
        (HeaterPower::Medium, HeaterDuration::Short) => 0x24,
        (HeaterPower::Low, HeaterDuration::Long) => 0x1E,
        (HeaterPower::Low, HeaterDuration::Short) => 0x15,
    }
}

/// A temperature and relative humidity reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Climate {
    /// Temperature in °C.
    pub temperature: f32,
    /// Relative humidity in %, clamped to `0..=100`.
    pub humidity: f32,
}

impl Climate {
    fn from_ticks(temperature: u16, humidity: u16) -> Self {
        let temperature = -45.0 + 175.0 * f32::from(temperature) / 65535.0;
        let humidity = -6.0 + 125.0 * f32::from(humidity) / 65535.0;
        Self {
            temperature,
            humidity: humidity.clamp(0.0, 100.0),
        }
    }
}

/// Converts relative humidity in % to SGP40 compensation ticks.
#[must_use]
pub fn humidity_ticks(humidity: f32) -> u16 {
    libm::roundf(humidity.clamp(0.0, 100.0) * 65535.0 / 100.0) as u16
}

/// Converts temperature in °C to SGP40 compensation ticks.
#[must_use]
pub fn temperature_ticks(temperature: f32) -> u16 {
    libm::roundf((temperature.clamp(-45.0, 130.0) + 45.0) * 65535.0 / 175.0) as u16
}

/// Device configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Config {
    /// SHT40 address. Defaults to [`SHT40_ADDRESS`].
    pub sht_address: u8,
    /// SGP40 address. Defaults to [`SGP40_ADDRESS`].
    pub sgp_address: u8,
}

impl Config {
    /// Sets the SHT40 address.
    #[must_use]
    pub const fn with_sht_address(mut self, address: u8) -> Self {
        self.sht_address = address;
        self
    }

    /// Sets the SGP40 address.
    #[must_use]
    pub const fn with_sgp_address(mut self, address: u8) -> Self {
        self.sgp_address = address;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sht_address: SHT40_ADDRESS,
            sgp_address: SGP40_ADDRESS,
        }
    }
}

/// An Environment 2 Click.
#[derive(Debug)]
pub struct Environment2<I2C, D> {
    i2c: I2C,
    delay: D,
    config: Config,
}

impl<I2C: I2c, D: DelayNs> Environment2<I2C, D> {
    /// Creates a driver. No bus traffic happens until the first command.
    pub const fn new(i2c: I2C, delay: D, config: Config) -> Self {
        Self { i2c, delay, config }
    }

    /// Resets the SHT40 and switches the SGP40 hot plate off.
    ///
    /// Both commands are sent even if the first fails; the error returned is the first one
    /// encountered and does not identify the failing step.
    ///
    /// # Errors
    ///
    /// Returns [`Environment2Error::Bus`] if either command fails.
    pub fn default_cfg(&mut self) -> Result<(), Environment2Error> {
        let mut acc = Accumulator::new();
        acc.record(self.soft_reset());
        acc.record(self.heater_off());
        acc.finish()
    }

    /// Soft-resets the SHT40.
    ///
    /// # Errors
    ///
    /// Returns [`Environment2Error::Bus`] if the command fails.
    pub fn soft_reset(&mut self) -> Result<(), Environment2Error> {
        self.write(self.config.sht_address, &[sht40::SOFT_RESET])?;
        self.delay.delay_ms(1);
        Ok(())
    }

    /// Reads the SHT40 serial number.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::Crc`] if a checksum does not match.
    /// - [`Environment2Error::Bus`] if the transfer fails.
    pub fn serial_number(&mut self) -> Result<u32, Environment2Error> {
        let [hi, lo] =
            self.command_read::<2>(self.config.sht_address, &[sht40::SERIAL_NUMBER], 1)?;
        Ok((u32::from(hi) << 16) | u32::from(lo))
    }

    /// Measures temperature and relative humidity.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::Crc`] if a checksum does not match.
    /// - [`Environment2Error::Bus`] if the transfer fails.
    pub fn temperature_humidity(
        &mut self,
        precision: Precision,
    ) -> Result<Climate, Environment2Error> {
        let [temperature, humidity] = self.command_read::<2>(
            self.config.sht_address,
            &[precision.command()],
            precision.duration_ms(),
        )?;
        Ok(Climate::from_ticks(temperature, humidity))
    }

    /// Runs the SHT40 heater and returns the measurement taken at the end of the pulse.
    ///
    /// The heater is meant for removing condensation and must not run more than 10% of the
    /// time.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::Crc`] if a checksum does not match.
    /// - [`Environment2Error::Bus`] if the transfer fails.
    pub fn activate_heater(
        &mut self,
        power: HeaterPower,
        duration: HeaterDuration,
    ) -> Result<Climate, Environment2Error> {
        let wait_ms = match duration {
            HeaterDuration::Long => 1_100,
            HeaterDuration::Short => 110,
        };
        let [temperature, humidity] = self.command_read::<2>(
            self.config.sht_address,
            &[heater_command(power, duration)],
            wait_ms,
        )?;
        Ok(Climate::from_ticks(temperature, humidity))
    }

    /// Measures the SGP40 raw signal, compensated for the given ambient conditions.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::Crc`] if the checksum does not match.
    /// - [`Environment2Error::Bus`] if the transfer fails.
    pub fn raw_signal(
        &mut self,
        humidity: f32,
        temperature: f32,
    ) -> Result<u16, Environment2Error> {
        self.measure_raw(humidity_ticks(humidity), temperature_ticks(temperature))
    }

    /// Measures the SGP40 raw signal without humidity compensation.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::Crc`] if the checksum does not match.
    /// - [`Environment2Error::Bus`] if the transfer fails.
    pub fn raw_signal_uncompensated(&mut self) -> Result<u16, Environment2Error> {
        self.measure_raw(sgp40::DEFAULT_HUMIDITY, sgp40::DEFAULT_TEMPERATURE)
    }

    /// Runs the SGP40 built-in self test.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::SelfTestFailed`] if the sensor reports a failure.
    /// - [`Environment2Error::Crc`] if the checksum does not match.
    /// - [`Environment2Error::Bus`] if the transfer fails.
    pub fn self_test(&mut self) -> Result<(), Environment2Error> {
        let [result] = self.command_read::<1>(self.config.sgp_address, &sgp40::SELF_TEST, 320)?;
        if result != SELF_TEST_PASSED {
            return Err(Environment2Error::SelfTestFailed { result });
        }
        Ok(())
    }

    /// Switches the SGP40 hot plate off and puts the sensor into idle mode.
    ///
    /// # Errors
    ///
    /// Returns [`Environment2Error::Bus`] if the command fails.
    pub fn heater_off(&mut self) -> Result<(), Environment2Error> {
        self.write(self.config.sgp_address, &sgp40::HEATER_OFF)?;
        self.delay.delay_ms(1);
        Ok(())
    }

    /// Reads the 48-bit SGP40 serial number.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::Crc`] if a checksum does not match.
    /// - [`Environment2Error::Bus`] if the transfer fails.
    pub fn sgp_serial_number(&mut self) -> Result<u64, Environment2Error> {
        let words = self.command_read::<3>(self.config.sgp_address, &sgp40::SERIAL_NUMBER, 1)?;
        Ok(words
            .iter()
            .fold(0, |serial, &word| (serial << 16) | u64::from(word)))
    }

    /// Measures temperature and humidity, takes a compensated raw signal and feeds it to
    /// `algorithm`.
    ///
    /// Call this once per second; the algorithm's time constants assume that rate.
    ///
    /// # Errors
    ///
    /// - [`Environment2Error::Crc`] if a checksum does not match.
    /// - [`Environment2Error::Bus`] if a transfer fails.
    pub fn voc_index(&mut self, algorithm: &mut VocAlgorithm) -> Result<i32, Environment2Error> {
        let climate = self.temperature_humidity(Precision::High)?;
        let sraw = self.raw_signal(climate.humidity, climate.temperature)?;
        let index = algorithm.process(sraw);
        log::trace!(
            "environment2: {:.1} C, {:.1} %RH, sraw {sraw}, voc index {index}",
            climate.temperature,
            climate.humidity
        );
        Ok(index)
    }

    /// Returns the bus and the delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn measure_raw(&mut self, humidity: u16, temperature: u16) -> Result<u16, Environment2Error> {
        let mut command = [0; 8];
        command[..2].copy_from_slice(&sgp40::MEASURE_RAW);
        command[2..5].copy_from_slice(&with_crc(humidity));
        command[5..8].copy_from_slice(&with_crc(temperature));

        let [sraw] = self.command_read::<1>(self.config.sgp_address, &command, 30)?;
        Ok(sraw)
    }

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Environment2Error> {
        self.i2c.write(address, bytes).map_err(BusError::i2c)?;
        Ok(())
    }

    /// Sends `command`, waits `wait_ms` and reads `N` CRC-protected words.
    fn command_read<const N: usize>(
        &mut self,
        address: u8,
        command: &[u8],
        wait_ms: u32,
    ) -> Result<[u16; N], Environment2Error> {
        self.write(address, command)?;
        self.delay.delay_ms(wait_ms);

        // Three bytes per word; the largest read is the three-word serial number.
        let mut buffer = [0; 9];
        let buffer = &mut buffer[..N * 3];
        self.i2c.read(address, buffer).map_err(BusError::i2c)?;

        let mut words = [0; N];
        for (word, chunk) in words.iter_mut().zip(buffer.chunks_exact(3)) {
            if crc8(&chunk[..2]) != chunk[2] {
                log::warn!("environment2: CRC mismatch from {address:#04x}");
                return Err(Environment2Error::Crc);
            }
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(words)
    }
}

fn with_crc(word: u16) -> [u8; 3] {
    let [hi, lo] = word.to_be_bytes();
    [hi, lo, crc8(&[hi, lo])]
}

/// Errors that can occur when using an Environment 2 Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum Environment2Error {
    /// A data word failed its CRC check.
    Crc,

    /// The SGP40 self test reported a failure.
    #[snafu(display("self test failed with {result:#06x}"))]
    SelfTestFailed {
        /// The result word reported by the sensor.
        result: u16,
    },

    /// Generic bus related error.
    #[snafu(transparent)]
    Bus {
        /// The source of the error.
        source: BusError,
    },
}

#[cfg(test)]
mod test {
    use clickboard_core::mock::{MockDelay, MockI2c};

    use super::*;

    fn reply(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|&word| with_crc(word)).collect()
    }

    fn driver() -> (MockI2c, MockDelay, Environment2<MockI2c, MockDelay>) {
        let i2c = MockI2c::new();
        let delay = MockDelay::new();
        let env = Environment2::new(i2c.clone(), delay.clone(), Config::default());
        (i2c, delay, env)
    }

    #[test]
    fn crc_matches_datasheet_example() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
        assert_eq!(with_crc(0x8000), [0x80, 0x00, 0xA2]);
        assert_eq!(with_crc(0x6666), [0x66, 0x66, 0x93]);
    }

    #[test]
    fn compensation_ticks() {
        assert_eq!(humidity_ticks(50.0), 0x8000);
        assert_eq!(temperature_ticks(25.0), 0x6666);
        assert_eq!(humidity_ticks(150.0), 0xFFFF);
    }

    #[test]
    fn measures_climate() {
        let (i2c, delay, mut env) = driver();
        // 25 °C and 50 %RH
        i2c.queue_read(&reply(&[0x6666, 0x7333]));

        let climate = env.temperature_humidity(Precision::High).unwrap();
        assert!((climate.temperature - 25.0).abs() < 0.01);
        assert!((climate.humidity - 50.25).abs() < 0.05);
        assert_eq!(i2c.writes()[0], (SHT40_ADDRESS, vec![0xFD]));
        assert_eq!(delay.elapsed_ms(), 10);
    }

    #[test]
    fn corrupt_word_is_rejected() {
        let (i2c, _, mut env) = driver();
        let mut bytes = reply(&[0x6666, 0x7333]);
        bytes[5] ^= 0x01;
        i2c.queue_read(&bytes);

        assert_eq!(
            env.temperature_humidity(Precision::Low),
            Err(Environment2Error::Crc)
        );
    }

    #[test]
    fn uncompensated_raw_uses_default_parameters() {
        let (i2c, _, mut env) = driver();
        i2c.queue_read(&reply(&[31_000]));

        assert_eq!(env.raw_signal_uncompensated().unwrap(), 31_000);
        assert_eq!(
            i2c.writes()[0],
            (
                SGP40_ADDRESS,
                vec![0x26, 0x0F, 0x80, 0x00, 0xA2, 0x66, 0x66, 0x93]
            )
        );
    }

    #[test]
    fn self_test_result() {
        let (i2c, _, mut env) = driver();
        i2c.queue_read(&reply(&[SELF_TEST_PASSED]));
        assert_eq!(env.self_test(), Ok(()));

        i2c.queue_read(&reply(&[0x4B00]));
        assert_eq!(
            env.self_test(),
            Err(Environment2Error::SelfTestFailed { result: 0x4B00 })
        );
    }

    #[test]
    fn serial_numbers() {
        let (i2c, _, mut env) = driver();
        i2c.queue_read(&reply(&[0x0123, 0x4567]));
        assert_eq!(env.serial_number().unwrap(), 0x0123_4567);

        i2c.queue_read(&reply(&[0x0000, 0x0123, 0x4567]));
        assert_eq!(env.sgp_serial_number().unwrap(), 0x0123_4567);
    }

    #[test]
    fn default_cfg_sends_both_commands() {
        let (i2c, _, mut env) = driver();
        env.default_cfg().unwrap();

        assert_eq!(
            i2c.writes(),
            vec![
                (SHT40_ADDRESS, vec![0x94]),
                (SGP40_ADDRESS, vec![0x36, 0x15])
            ]
        );
    }

    #[test]
    fn voc_index_feeds_algorithm() {
        let (i2c, _, mut env) = driver();
        let mut algorithm = VocAlgorithm::new();
        i2c.queue_read(&reply(&[0x6666, 0x7333]));
        i2c.queue_read(&reply(&[30_000]));

        assert_eq!(env.voc_index(&mut algorithm), Ok(0));
        let sgp = i2c
            .writes()
            .into_iter()
            .find(|(address, _)| *address == SGP40_ADDRESS)
            .unwrap();
        assert_eq!(&sgp.1[..2], &[0x26, 0x0F]);
    }
}
