//! Accel 21 Click, a 3-axis accelerometer.
//!
//! # Hardware Description
//!
//! The board carries an LIS2DH12 ultra-low-power MEMS accelerometer with user-selectable
//! full scales of ±2/±4/±8/±16 g, output data rates from 1 Hz to 5.3 kHz and three resolution
//! modes (8-bit low-power, 10-bit normal, 12-bit high-resolution). It is reachable over I2C
//! (address 0x18 or 0x19, selected by the SA0 jumper) or 4-wire SPI.
//!
//! Samples are left-justified in 16-bit two's complement registers; the number of meaningful
//! bits depends on the resolution mode, and so does the sensitivity in mg/digit.

use clickboard_core::{Accumulator, AddressMask, BusError, RegisterInterface, pin};
use embedded_hal::digital::InputPin;
use mint::Vector3;
use snafu::Snafu;

/// I2C address with SA0 pulled low.
pub const I2C_ADDRESS_LOW: u8 = 0x18;

/// I2C address with SA0 pulled high (the board default).
pub const I2C_ADDRESS_HIGH: u8 = 0x19;

/// Register address decoration on I2C: bit 7 enables auto-increment.
pub const I2C_MASK: AddressMask = AddressMask::multi(0x80);

/// Register address decoration on SPI: bit 7 reads, bit 6 enables auto-increment.
pub const SPI_MASK: AddressMask = AddressMask {
    read: 0x80,
    write: 0x00,
    multi: 0x40,
};

/// Expected content of `WHO_AM_I`.
pub const DEVICE_ID: u8 = 0x33;

/// Register addresses.
#[allow(missing_docs)]
pub mod reg {
    pub const STATUS_REG_AUX: u8 = 0x07;
    pub const OUT_TEMP_L: u8 = 0x0C;
    pub const WHO_AM_I: u8 = 0x0F;
    pub const CTRL_REG0: u8 = 0x1E;
    pub const TEMP_CFG_REG: u8 = 0x1F;
    pub const CTRL_REG1: u8 = 0x20;
    pub const CTRL_REG2: u8 = 0x21;
    pub const CTRL_REG3: u8 = 0x22;
    pub const CTRL_REG4: u8 = 0x23;
    pub const CTRL_REG5: u8 = 0x24;
    pub const CTRL_REG6: u8 = 0x25;
    pub const STATUS_REG: u8 = 0x27;
    pub const OUT_X_L: u8 = 0x28;
    pub const INT1_CFG: u8 = 0x30;
    pub const INT1_SRC: u8 = 0x31;
    pub const INT1_THS: u8 = 0x32;
    pub const INT1_DURATION: u8 = 0x33;
}

const CTRL1_LPEN: u8 = 1 << 3;
const CTRL1_XYZ_EN: u8 = 0b111;
const CTRL3_I1_ZYXDA: u8 = 1 << 4;
const CTRL4_BDU: u8 = 1 << 7;
const CTRL4_HR: u8 = 1 << 3;
const CTRL5_BOOT: u8 = 1 << 7;
const TEMP_EN: u8 = 0b11 << 6;
const STATUS_ZYXDA: u8 = 1 << 3;
const STATUS_AUX_TDA: u8 = 1 << 2;

/// Output data rate.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum OutputDataRate {
    /// Sampling is stopped.
    PowerDown = 0,
    /// 1 Hz.
    Hz1 = 1,
    /// 10 Hz.
    Hz10 = 2,
    /// 25 Hz.
    Hz25 = 3,
    /// 50 Hz.
    Hz50 = 4,
    /// 100 Hz.
    #[default]
    Hz100 = 5,
    /// 200 Hz.
    Hz200 = 6,
    /// 400 Hz.
    Hz400 = 7,
    /// 1.62 kHz, low-power mode only.
    Hz1620LowPower = 8,
    /// 1.344 kHz, or 5.376 kHz in low-power mode.
    Hz1344 = 9,
}

impl OutputDataRate {
    /// All rates, in register order.
    pub const ALL: [Self; 10] = [
        Self::PowerDown,
        Self::Hz1,
        Self::Hz10,
        Self::Hz25,
        Self::Hz50,
        Self::Hz100,
        Self::Hz200,
        Self::Hz400,
        Self::Hz1620LowPower,
        Self::Hz1344,
    ];
}

/// Full-scale measurement range.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum FullScale {
    /// ±2 g.
    #[default]
    G2 = 0,
    /// ±4 g.
    G4 = 1,
    /// ±8 g.
    G8 = 2,
    /// ±16 g.
    G16 = 3,
}

impl FullScale {
    /// All ranges, in register order.
    pub const ALL: [Self; 4] = [Self::G2, Self::G4, Self::G8, Self::G16];
}

/// Output resolution, which doubles as the power mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum Resolution {
    /// 8-bit samples (low-power mode).
    LowPower,
    /// 10-bit samples (normal mode).
    Normal,
    /// 12-bit samples (high-resolution mode).
    #[default]
    HighResolution,
}

impl Resolution {
    /// All resolutions.
    pub const ALL: [Self; 3] = [Self::LowPower, Self::Normal, Self::HighResolution];

    /// Number of significant bits in a sample.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::LowPower => 8,
            Self::Normal => 10,
            Self::HighResolution => 12,
        }
    }

    /// Sensitivity in mg per digit of a right-justified sample.
    #[must_use]
    pub const fn sensitivity_mg(self, scale: FullScale) -> u16 {
        let hr = match scale {
            FullScale::G2 => 1,
            FullScale::G4 => 2,
            FullScale::G8 => 4,
            FullScale::G16 => 12,
        };
        match self {
            Self::HighResolution => hr,
            Self::Normal => hr * 4,
            Self::LowPower => hr * 16,
        }
    }
}

/// Encodes `CTRL_REG1` with all three axes enabled.
#[must_use]
pub const fn ctrl_reg1(odr: OutputDataRate, resolution: Resolution) -> u8 {
    let lpen = match resolution {
        Resolution::LowPower => CTRL1_LPEN,
        _ => 0,
    };
    ((odr as u8) << 4) | lpen | CTRL1_XYZ_EN
}

/// Encodes `CTRL_REG4` with block data update enabled.
#[must_use]
pub const fn ctrl_reg4(scale: FullScale, resolution: Resolution) -> u8 {
    let hr = match resolution {
        Resolution::HighResolution => CTRL4_HR,
        _ => 0,
    };
    CTRL4_BDU | ((scale as u8) << 4) | hr
}

/// Converts a left-justified register sample to a right-justified value.
#[must_use]
pub const fn justify(raw: i16, resolution: Resolution) -> i16 {
    raw >> (16 - resolution.bits())
}

/// Device configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Config {
    /// Output data rate. Defaults to 100 Hz.
    pub odr: OutputDataRate,
    /// Full-scale range. Defaults to ±2 g.
    pub scale: FullScale,
    /// Resolution. Defaults to 12-bit.
    pub resolution: Resolution,
}

impl Config {
    /// Sets the output data rate.
    #[must_use]
    pub const fn with_odr(mut self, odr: OutputDataRate) -> Self {
        self.odr = odr;
        self
    }

    /// Sets the full-scale range.
    #[must_use]
    pub const fn with_scale(mut self, scale: FullScale) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the resolution.
    #[must_use]
    pub const fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// An Accel 21 Click.
#[derive(Debug)]
pub struct Accel21<IF, INT> {
    interface: IF,
    int: INT,
    config: Config,
}

impl<IF: RegisterInterface, INT: InputPin> Accel21<IF, INT> {
    /// Creates a driver on an already configured register interface.
    ///
    /// Use [`I2C_MASK`] or [`SPI_MASK`] when building the interface. No bus traffic happens
    /// until [`Accel21::init`].
    pub const fn new(interface: IF, int: INT, config: Config) -> Self {
        Self {
            interface,
            int,
            config,
        }
    }

    /// Checks that an LIS2DH12 answers on the bus.
    ///
    /// # Errors
    ///
    /// - [`Accel21Error::InvalidDeviceId`] if `WHO_AM_I` does not read back [`DEVICE_ID`].
    /// - [`Accel21Error::Bus`] if the transfer fails.
    pub fn init(&mut self) -> Result<(), Accel21Error> {
        let id = self.interface.read_register(reg::WHO_AM_I)?;
        if id != DEVICE_ID {
            log::warn!("accel21: unexpected WHO_AM_I {id:#04x}");
            return Err(Accel21Error::InvalidDeviceId { id });
        }
        Ok(())
    }

    /// Writes the stored configuration, with block data update and the temperature sensor
    /// enabled.
    ///
    /// Every register in the sequence is written even if an earlier write fails. The error
    /// returned is the first one encountered and does not identify the failing step.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if any write fails.
    pub fn default_cfg(&mut self) -> Result<(), Accel21Error> {
        let Config {
            odr,
            scale,
            resolution,
        } = self.config;

        let mut acc = Accumulator::new();
        acc.record(
            self.interface
                .write_register(reg::CTRL_REG1, ctrl_reg1(odr, resolution)),
        );
        acc.record(
            self.interface
                .write_register(reg::CTRL_REG4, ctrl_reg4(scale, resolution)),
        );
        acc.record(self.interface.write_register(reg::TEMP_CFG_REG, TEMP_EN));
        Ok(acc.finish()?)
    }

    /// Returns the cached configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Changes the output data rate.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn set_output_data_rate(&mut self, odr: OutputDataRate) -> Result<(), Accel21Error> {
        self.interface
            .write_register(reg::CTRL_REG1, ctrl_reg1(odr, self.config.resolution))?;
        self.config.odr = odr;
        Ok(())
    }

    /// Changes the full-scale range.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn set_full_scale(&mut self, scale: FullScale) -> Result<(), Accel21Error> {
        self.interface
            .write_register(reg::CTRL_REG4, ctrl_reg4(scale, self.config.resolution))?;
        self.config.scale = scale;
        Ok(())
    }

    /// Changes the resolution, updating both control registers that encode it.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn set_resolution(&mut self, resolution: Resolution) -> Result<(), Accel21Error> {
        self.interface
            .write_register(reg::CTRL_REG1, ctrl_reg1(self.config.odr, resolution))?;
        self.interface
            .write_register(reg::CTRL_REG4, ctrl_reg4(self.config.scale, resolution))?;
        self.config.resolution = resolution;
        Ok(())
    }

    /// Routes the data-ready signal to the INT1 pin.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn enable_data_ready_interrupt(&mut self) -> Result<(), Accel21Error> {
        self.interface
            .modify_register(reg::CTRL_REG3, CTRL3_I1_ZYXDA, CTRL3_I1_ZYXDA)?;
        Ok(())
    }

    /// Reloads the factory trimming values.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn reboot(&mut self) -> Result<(), Accel21Error> {
        self.interface.write_register(reg::CTRL_REG5, CTRL5_BOOT)?;
        Ok(())
    }

    /// Returns `true` when a new set of samples is available on all three axes.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn data_ready(&mut self) -> Result<bool, Accel21Error> {
        Ok(self.interface.read_register(reg::STATUS_REG)? & STATUS_ZYXDA != 0)
    }

    /// Reads the three axes as right-justified raw samples.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn axes_raw(&mut self) -> Result<Vector3<i16>, Accel21Error> {
        let mut data = [0; 6];
        self.interface.read_registers(reg::OUT_X_L, &mut data)?;

        let resolution = self.config.resolution;
        let axis = |lo: u8, hi: u8| justify(i16::from_le_bytes([lo, hi]), resolution);
        Ok(Vector3 {
            x: axis(data[0], data[1]),
            y: axis(data[2], data[3]),
            z: axis(data[4], data[5]),
        })
    }

    /// Reads the three axes in milli-g.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn axes_mg(&mut self) -> Result<Vector3<f32>, Accel21Error> {
        let raw = self.axes_raw()?;
        let sensitivity = f32::from(
            self.config
                .resolution
                .sensitivity_mg(self.config.scale),
        );
        Ok(Vector3 {
            x: f32::from(raw.x) * sensitivity,
            y: f32::from(raw.y) * sensitivity,
            z: f32::from(raw.z) * sensitivity,
        })
    }

    /// Reads the temperature relative to the sensor's factory reference point, in °C.
    ///
    /// Returns `None` if no new temperature sample is available.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn temperature_delta(&mut self) -> Result<Option<f32>, Accel21Error> {
        if self.interface.read_register(reg::STATUS_REG_AUX)? & STATUS_AUX_TDA == 0 {
            return Ok(None);
        }

        let mut data = [0; 2];
        self.interface.read_registers(reg::OUT_TEMP_L, &mut data)?;
        // One digit per °C in the high byte, regardless of resolution.
        Ok(Some(f32::from(i16::from_le_bytes(data)) / 256.0))
    }

    /// Samples the INT1 line.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the pin cannot be read.
    pub fn interrupt(&mut self) -> Result<bool, Accel21Error> {
        Ok(pin::is_high(&mut self.int)?)
    }

    /// Writes `data` starting at `reg`.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn generic_write(&mut self, reg: u8, data: &[u8]) -> Result<(), Accel21Error> {
        self.interface.write_registers(reg, data)?;
        Ok(())
    }

    /// Reads `data.len()` bytes starting at `reg`.
    ///
    /// # Errors
    ///
    /// Returns [`Accel21Error::Bus`] if the transfer fails.
    pub fn generic_read(&mut self, reg: u8, data: &mut [u8]) -> Result<(), Accel21Error> {
        self.interface.read_registers(reg, data)?;
        Ok(())
    }

    /// Returns the register interface and the interrupt pin.
    pub fn release(self) -> (IF, INT) {
        (self.interface, self.int)
    }
}

/// Errors that can occur when using an Accel 21 Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum Accel21Error {
    /// `WHO_AM_I` did not identify an LIS2DH12.
    #[snafu(display("unexpected device id {id:#04x}"))]
    InvalidDeviceId {
        /// The value that was read.
        id: u8,
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
    use clickboard_core::{
        I2cInterface, SpiInterface,
        mock::{MockI2c, MockPin, MockSpi},
        pin::NoPin,
    };

    use super::*;

    fn i2c_driver(config: Config) -> (MockI2c, Accel21<I2cInterface<MockI2c>, NoPin>) {
        let i2c = MockI2c::new().with_pointer_mask(0x7F);
        let interface = I2cInterface::new(i2c.clone(), I2C_ADDRESS_HIGH, I2C_MASK);
        (i2c, Accel21::new(interface, NoPin, config))
    }

    #[test]
    fn control_register_packing() {
        for odr in OutputDataRate::ALL {
            for scale in FullScale::ALL {
                for resolution in Resolution::ALL {
                    let reg1 = ctrl_reg1(odr, resolution);
                    let reg4 = ctrl_reg4(scale, resolution);

                    assert_eq!(reg1 >> 4, odr as u8);
                    assert_eq!(reg1 & 0b111, 0b111);
                    assert_eq!(reg1 & CTRL1_LPEN != 0, resolution == Resolution::LowPower);

                    assert_eq!((reg4 >> 4) & 0b11, scale as u8);
                    assert_eq!(reg4 & CTRL4_HR != 0, resolution == Resolution::HighResolution);
                    assert_eq!(reg4 & CTRL4_BDU, CTRL4_BDU);
                    assert_eq!(reg4 & 0b0111, 0);
                }
            }
        }

        // Values from the datasheet examples.
        assert_eq!(ctrl_reg1(OutputDataRate::Hz100, Resolution::HighResolution), 0x57);
        assert_eq!(ctrl_reg1(OutputDataRate::Hz50, Resolution::LowPower), 0x4F);
        assert_eq!(ctrl_reg4(FullScale::G8, Resolution::HighResolution), 0xA8);
        assert_eq!(ctrl_reg4(FullScale::G16, Resolution::Normal), 0xB0);
    }

    #[test]
    fn init_checks_identity() {
        let (i2c, mut accel) = i2c_driver(Config::default());
        assert_eq!(
            accel.init(),
            Err(Accel21Error::InvalidDeviceId { id: 0 })
        );

        i2c.set_register(I2C_ADDRESS_HIGH, reg::WHO_AM_I, DEVICE_ID);
        assert_eq!(accel.init(), Ok(()));
    }

    #[test]
    fn default_cfg_writes_sequence() {
        let (i2c, mut accel) = i2c_driver(Config::default());
        accel.default_cfg().unwrap();

        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::CTRL_REG1), 0x57);
        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::CTRL_REG4), 0x88);
        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::TEMP_CFG_REG), 0xC0);
    }

    #[test]
    fn default_cfg_attempts_every_step() {
        let (i2c, mut accel) = i2c_driver(Config::default());
        i2c.nak_next(1);

        assert!(matches!(accel.default_cfg(), Err(Accel21Error::Bus { .. })));
        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::CTRL_REG1), 0);
        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::CTRL_REG4), 0x88);
        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::TEMP_CFG_REG), 0xC0);
    }

    #[test]
    fn generic_round_trip() {
        let (_, mut accel) = i2c_driver(Config::default());
        accel.generic_write(reg::INT1_THS, &[0x10, 0x05]).unwrap();

        let mut back = [0; 2];
        accel.generic_read(reg::INT1_THS, &mut back).unwrap();
        assert_eq!(back, [0x10, 0x05]);
    }

    #[test]
    fn axes_are_scaled() {
        let (i2c, mut accel) = i2c_driver(Config::default().with_scale(FullScale::G4));
        // x = +1000 digits, y = -250 digits, z = 0, left-justified by 4 bits
        let x = (1000i16 << 4).to_le_bytes();
        let y = (-250i16 << 4).to_le_bytes();
        for (offset, byte) in [x[0], x[1], y[0], y[1], 0, 0].into_iter().enumerate() {
            i2c.set_register(I2C_ADDRESS_HIGH, reg::OUT_X_L + offset as u8, byte);
        }

        let raw = accel.axes_raw().unwrap();
        assert_eq!((raw.x, raw.y, raw.z), (1000, -250, 0));

        let mg = accel.axes_mg().unwrap();
        assert_eq!((mg.x, mg.y, mg.z), (2000.0, -500.0, 0.0));
    }

    #[test]
    fn resolution_change_updates_both_registers() {
        let (i2c, mut accel) = i2c_driver(Config::default());
        accel.set_resolution(Resolution::LowPower).unwrap();

        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::CTRL_REG1), 0x5F);
        assert_eq!(i2c.register(I2C_ADDRESS_HIGH, reg::CTRL_REG4), 0x80);
        assert_eq!(accel.config().resolution, Resolution::LowPower);
    }

    #[test]
    fn temperature_requires_new_sample() {
        let (i2c, mut accel) = i2c_driver(Config::default());
        assert_eq!(accel.temperature_delta().unwrap(), None);

        i2c.set_register(I2C_ADDRESS_HIGH, reg::STATUS_REG_AUX, STATUS_AUX_TDA);
        i2c.set_register(I2C_ADDRESS_HIGH, reg::OUT_TEMP_L, 0x80);
        i2c.set_register(I2C_ADDRESS_HIGH, reg::OUT_TEMP_L + 1, 0x02);
        assert_eq!(accel.temperature_delta().unwrap(), Some(2.5));
    }

    #[test]
    fn spi_reads_use_read_bit() {
        let spi = MockSpi::new();
        spi.queue_read(&[DEVICE_ID]);
        let int = MockPin::new();
        int.drive(true);

        let mut accel = Accel21::new(
            SpiInterface::new(spi.clone(), SPI_MASK),
            int,
            Config::default(),
        );
        accel.init().unwrap();
        assert!(accel.interrupt().unwrap());
        assert_eq!(spi.frames(), vec![vec![0x8F]]);
    }
}
