//! Register transports.
//!
//! Most Click boards expose a flat map of 8-bit registers, reachable over I2C, SPI or both.
//! The byte that addresses a register is not sent verbatim: datasheets fold a read/write bit
//! and an auto-increment ("multi-byte") bit into it, and the bit positions differ between
//! devices and between buses of the same device.
//!
//! A driver is generic over [`RegisterInterface`] and is handed either an [`I2cInterface`] or
//! an [`SpiInterface`] when it is created. The [`AddressMask`] given to the interface describes
//! how the register byte is decorated, so the driver itself only deals in plain register
//! addresses.
//!
//! ```ignore
//! let interface = I2cInterface::new(i2c, 0x19, AddressMask::multi(0x80));
//! let mut accel = Accel21::new(interface, NoPin, Config::default());
//! accel.init()?;
//! ```

use embedded_hal::{i2c::I2c, spi, spi::SpiDevice};

use crate::BusError;

/// How a register address byte is decorated before it goes on the wire.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct AddressMask {
    /// ORed into the register byte for reads.
    pub read: u8,

    /// ORed into the register byte for writes.
    pub write: u8,

    /// ORed into the register byte when more than one byte is transferred.
    pub multi: u8,
}

impl AddressMask {
    /// A mask that leaves the register byte untouched.
    pub const NONE: Self = Self {
        read: 0,
        write: 0,
        multi: 0,
    };

    /// A mask that only sets an auto-increment bit, the common I2C convention.
    #[must_use]
    pub const fn multi(multi: u8) -> Self {
        Self {
            read: 0,
            write: 0,
            multi,
        }
    }

    /// Returns the register byte for a read of `len` bytes.
    #[must_use]
    pub const fn read_address(&self, reg: u8, len: usize) -> u8 {
        let reg = reg | self.read;
        if len > 1 { reg | self.multi } else { reg }
    }

    /// Returns the register byte for a write of `len` bytes.
    #[must_use]
    pub const fn write_address(&self, reg: u8, len: usize) -> u8 {
        let reg = reg | self.write;
        if len > 1 { reg | self.multi } else { reg }
    }
}

/// Byte-wide register access, independent of the bus it runs on.
pub trait RegisterInterface {
    /// Writes `data` starting at register `reg`.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if the transfer fails.
    fn write_registers(&mut self, reg: u8, data: &[u8]) -> Result<(), BusError>;

    /// Reads `data.len()` bytes starting at register `reg`.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if the transfer fails.
    fn read_registers(&mut self, reg: u8, data: &mut [u8]) -> Result<(), BusError>;

    /// Writes a single register.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if the transfer fails.
    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.write_registers(reg, &[value])
    }

    /// Reads a single register.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if the transfer fails.
    fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        let mut value = [0];
        self.read_registers(reg, &mut value)?;
        Ok(value[0])
    }

    /// Replaces the bits selected by `mask` in register `reg` with the matching bits of `value`.
    ///
    /// # Errors
    ///
    /// Returns a [`BusError`] if either the read or the write fails.
    fn modify_register(&mut self, reg: u8, mask: u8, value: u8) -> Result<(), BusError> {
        let current = self.read_register(reg)?;
        self.write_register(reg, (current & !mask) | (value & mask))
    }
}

/// A register device on an I2C bus.
#[derive(Debug)]
pub struct I2cInterface<I2C> {
    i2c: I2C,
    address: u8,
    mask: AddressMask,
}

impl<I2C: I2c> I2cInterface<I2C> {
    /// Creates an interface for the device at 7-bit `address`.
    pub const fn new(i2c: I2C, address: u8, mask: AddressMask) -> Self {
        Self { i2c, address, mask }
    }

    /// Returns the 7-bit address of the device.
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Changes the 7-bit address used for subsequent transfers.
    pub const fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    /// Returns the underlying bus.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2c> RegisterInterface for I2cInterface<I2C> {
    fn write_registers(&mut self, reg: u8, data: &[u8]) -> Result<(), BusError> {
        use embedded_hal::i2c::Operation;

        let reg = [self.mask.write_address(reg, data.len())];
        // Adjacent writes go out back to back without a repeated start.
        self.i2c
            .transaction(
                self.address,
                &mut [Operation::Write(&reg), Operation::Write(data)],
            )
            .map_err(BusError::i2c)
    }

    fn read_registers(&mut self, reg: u8, data: &mut [u8]) -> Result<(), BusError> {
        let reg = [self.mask.read_address(reg, data.len())];
        self.i2c
            .write_read(self.address, &reg, data)
            .map_err(BusError::i2c)
    }
}

/// A register device on an SPI bus.
///
/// Chip select is handled by the [`SpiDevice`] implementation.
#[derive(Debug)]
pub struct SpiInterface<SPI> {
    spi: SPI,
    mask: AddressMask,
}

impl<SPI: SpiDevice> SpiInterface<SPI> {
    /// Creates an interface using the given address decoration.
    pub const fn new(spi: SPI, mask: AddressMask) -> Self {
        Self { spi, mask }
    }

    /// Returns the underlying bus.
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> RegisterInterface for SpiInterface<SPI> {
    fn write_registers(&mut self, reg: u8, data: &[u8]) -> Result<(), BusError> {
        let reg = [self.mask.write_address(reg, data.len())];
        self.spi
            .transaction(&mut [spi::Operation::Write(&reg), spi::Operation::Write(data)])
            .map_err(BusError::spi)
    }

    fn read_registers(&mut self, reg: u8, data: &mut [u8]) -> Result<(), BusError> {
        let reg = [self.mask.read_address(reg, data.len())];
        self.spi
            .transaction(&mut [spi::Operation::Write(&reg), spi::Operation::Read(data)])
            .map_err(BusError::spi)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockI2c, MockSpi};

    #[test]
    fn mask_only_applies_multi_bit_to_bursts() {
        let mask = AddressMask {
            read: 0x80,
            write: 0x00,
            multi: 0x40,
        };
        assert_eq!(mask.read_address(0x28, 1), 0xA8);
        assert_eq!(mask.read_address(0x28, 6), 0xE8);
        assert_eq!(mask.write_address(0x20, 1), 0x20);
        assert_eq!(mask.write_address(0x20, 2), 0x60);
    }

    #[test]
    fn i2c_round_trip() {
        let i2c = MockI2c::new().with_pointer_mask(0x7F);
        let mut interface = I2cInterface::new(i2c.clone(), 0x19, AddressMask::multi(0x80));

        interface.write_registers(0x20, &[0x57, 0x00, 0x08]).unwrap();
        let mut back = [0; 3];
        interface.read_registers(0x20, &mut back).unwrap();

        assert_eq!(back, [0x57, 0x00, 0x08]);
        assert_eq!(i2c.register(0x19, 0x22), 0x08);
        assert_eq!(interface.read_register(0x20).unwrap(), 0x57);
    }

    #[test]
    fn modify_preserves_unmasked_bits() {
        let i2c = MockI2c::new();
        i2c.set_register(0x52, 0x10, 0b1010_0101);
        let mut interface = I2cInterface::new(i2c.clone(), 0x52, AddressMask::NONE);

        interface.modify_register(0x10, 0b0000_0011, 0b0000_0010).unwrap();

        assert_eq!(i2c.register(0x52, 0x10), 0b1010_0110);
    }

    #[test]
    fn spi_frames_carry_mask() {
        let spi = MockSpi::new();
        spi.queue_read(&[0x33]);
        let mut interface = SpiInterface::new(
            spi.clone(),
            AddressMask {
                read: 0x80,
                write: 0,
                multi: 0x40,
            },
        );

        assert_eq!(interface.read_register(0x0F).unwrap(), 0x33);
        interface.write_registers(0x20, &[0x57, 0x01]).unwrap();

        let frames = spi.frames();
        assert_eq!(frames[0], vec![0x8F]);
        assert_eq!(frames[1], vec![0x60, 0x57, 0x01]);
    }
}
