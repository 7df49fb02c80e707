//! NTAG 5 link Click, an NFC Forum Type 5 tag with an I2C host interface.
//!
//! # Hardware Description
//!
//! The NXP NTAG 5 link (NTP53x2) is an ISO/IEC 15693 tag whose memory is shared between the
//! RF interface and an I2C target (address 0x54). Memory is addressed in 4-byte blocks with
//! 16-bit block addresses:
//!
//! | Region            | Blocks          |
//! |-------------------|-----------------|
//! | User EEPROM       | 0x0000 - 0x01FF |
//! | Configuration     | 0x1000 - 0x103F |
//! | Session registers | 0x10A0 - 0x10AF |
//! | SRAM              | 0x2000 - 0x203F |
//!
//! EEPROM and configuration blocks are written one block at a time. The tag is busy for a
//! few milliseconds after each such write and NAKs I2C traffic meanwhile, so writes are
//! followed by polling the session status register. Session registers are accessed one byte
//! at a time with a read-modify-write mask.
//!
//! The FD (field detect) output is open-drain and pulled low while an NFC field is present.

use core::ops::RangeInclusive;

use bitflags::bitflags;
use clickboard_core::{BusError, pin, time};
use embedded_hal::{delay::DelayNs, digital::InputPin, i2c::I2c};
use snafu::Snafu;

use super::ndef;

/// Default 7-bit I2C address.
pub const I2C_ADDRESS: u8 = 0x54;

/// Bytes per memory block.
pub const BLOCK_SIZE: usize = 4;

/// User EEPROM blocks.
pub const USER_MEMORY: RangeInclusive<u16> = 0x0000..=0x01FF;
/// Configuration blocks.
pub const CONFIG_MEMORY: RangeInclusive<u16> = 0x1000..=0x103F;
/// Session register blocks.
pub const SESSION_REGISTERS: RangeInclusive<u16> = 0x10A0..=0x10AF;
/// SRAM blocks.
pub const SRAM: RangeInclusive<u16> = 0x2000..=0x203F;

/// Session status register.
pub const STATUS_REG: u16 = 0x10A0;
/// Session configuration register.
pub const CONFIG_REG: u16 = 0x10A1;

/// Budget for one EEPROM block write.
pub const WRITE_TIMEOUT_MS: u32 = 20;

/// NFC Forum Type 5 capability container for a 2 KiB tag, using the 8-byte form.
pub const CAPABILITY_CONTAINER: [u8; 8] = [0xE2, 0x40, 0x00, 0x01, 0x00, 0x00, 0x00, 0xFF];

/// Bytes available for TLVs after the capability container.
pub const NDEF_CAPACITY: usize =
    (*USER_MEMORY.end() as usize + 1) * BLOCK_SIZE - CAPABILITY_CONTAINER.len();

const NDEF_START: u16 = (CAPABILITY_CONTAINER.len() / BLOCK_SIZE) as u16;

bitflags! {
    /// The two bytes of the session status register, byte 0 in the low half.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct Status: u16 {
        /// An NFC field is present.
        const NFC_FIELD_OK = 1 << 0;
        /// The VCC supply is present.
        const VCC_SUPPLY_OK = 1 << 1;
        /// Pass-through direction is NFC to I2C.
        const PT_TRANSFER_DIR = 1 << 2;
        /// The synchronization block was read.
        const SYNCH_BLOCK_READ = 1 << 3;
        /// The synchronization block was written.
        const SYNCH_BLOCK_WRITE = 1 << 4;
        /// SRAM holds data for the I2C host.
        const SRAM_DATA_READY = 1 << 5;
        /// The last EEPROM write failed.
        const EEPROM_WR_ERROR = 1 << 6;
        /// An EEPROM write is in progress.
        const EEPROM_WR_BUSY = 1 << 7;

        /// The tag booted from the NFC field.
        const NFC_BOOT_OK = 1 << 8;
        /// The tag booted from VCC.
        const VCC_BOOT_OK = 1 << 9;
        /// The NFC interface holds the memory lock.
        const NFC_IF_LOCKED = 1 << 10;
        /// The I2C interface holds the memory lock.
        const I2C_IF_LOCKED = 1 << 11;
        /// GPIO0 input level.
        const GPIO0_IN = 1 << 14;
        /// GPIO1 input level.
        const GPIO1_IN = 1 << 15;
    }
}

/// Device configuration.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Config {
    /// 7-bit I2C address. Defaults to [`I2C_ADDRESS`].
    pub address: u8,
}

impl Config {
    /// Sets the I2C address.
    #[must_use]
    pub const fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: I2C_ADDRESS,
        }
    }
}

/// An NTAG 5 link Click.
#[derive(Debug)]
pub struct Ntag5Link<I2C, D, FD> {
    i2c: I2C,
    delay: D,
    fd: FD,
    address: u8,
}

impl<I2C: I2c, D: DelayNs, FD: InputPin> Ntag5Link<I2C, D, FD> {
    /// Creates a driver.
    pub const fn new(i2c: I2C, delay: D, fd: FD, config: Config) -> Self {
        Self {
            i2c,
            delay,
            fd,
            address: config.address,
        }
    }

    /// Reads consecutive blocks starting at `block` into `buf`.
    ///
    /// `buf` may be any length; the read must stay inside one memory region.
    ///
    /// # Errors
    ///
    /// - [`Ntag5LinkError::InvalidAddress`] if the read leaves the region of `block`.
    /// - [`Ntag5LinkError::Bus`] if the transfer fails.
    pub fn read_blocks(&mut self, block: u16, buf: &mut [u8]) -> Result<(), Ntag5LinkError> {
        let blocks = buf.len().div_ceil(BLOCK_SIZE);
        let region = block_region(block).ok_or(Ntag5LinkError::InvalidAddress { address: block })?;
        if blocks == 0 {
            return Ok(());
        }
        let last = usize::from(block) + blocks - 1;
        if last > usize::from(*region.end()) {
            return Err(Ntag5LinkError::InvalidAddress { address: block });
        }

        self.i2c
            .write_read(self.address, &block.to_be_bytes(), buf)
            .map_err(BusError::i2c)?;
        Ok(())
    }

    /// Writes one block.
    ///
    /// EEPROM and configuration writes wait until the tag reports the write complete.
    ///
    /// # Errors
    ///
    /// - [`Ntag5LinkError::InvalidAddress`] if `block` is not writable memory.
    /// - [`Ntag5LinkError::WriteTimeout`] if the tag stays busy past [`WRITE_TIMEOUT_MS`].
    /// - [`Ntag5LinkError::Bus`] if a transfer fails.
    pub fn write_block(&mut self, block: u16, data: [u8; BLOCK_SIZE]) -> Result<(), Ntag5LinkError> {
        let nonvolatile = USER_MEMORY.contains(&block) || CONFIG_MEMORY.contains(&block);
        if !nonvolatile && !SRAM.contains(&block) {
            return Err(Ntag5LinkError::InvalidAddress { address: block });
        }

        let [hi, lo] = block.to_be_bytes();
        let frame = [hi, lo, data[0], data[1], data[2], data[3]];
        self.i2c.write(self.address, &frame).map_err(BusError::i2c)?;

        if nonvolatile {
            self.wait_ready()?;
        }
        Ok(())
    }

    /// Reads byte `index` of session register `reg`.
    ///
    /// # Errors
    ///
    /// - [`Ntag5LinkError::InvalidAddress`] if `reg` is not a session register.
    /// - [`Ntag5LinkError::Bus`] if the transfer fails.
    pub fn read_register(&mut self, reg: u16, index: u8) -> Result<u8, Ntag5LinkError> {
        check_session(reg)?;
        Ok(read_session(&mut self.i2c, self.address, reg, index)?)
    }

    /// Replaces the bits selected by `mask` in byte `index` of session register `reg`.
    ///
    /// # Errors
    ///
    /// - [`Ntag5LinkError::InvalidAddress`] if `reg` is not a session register.
    /// - [`Ntag5LinkError::Bus`] if the transfer fails.
    pub fn write_register(
        &mut self,
        reg: u16,
        index: u8,
        mask: u8,
        value: u8,
    ) -> Result<(), Ntag5LinkError> {
        check_session(reg)?;
        let [hi, lo] = reg.to_be_bytes();
        self.i2c
            .write(self.address, &[hi, lo, index, mask, value])
            .map_err(BusError::i2c)?;
        Ok(())
    }

    /// Reads the session status register.
    ///
    /// # Errors
    ///
    /// Returns [`Ntag5LinkError::Bus`] if a transfer fails.
    pub fn status(&mut self) -> Result<Status, Ntag5LinkError> {
        let low = self.read_register(STATUS_REG, 0)?;
        let high = self.read_register(STATUS_REG, 1)?;
        Ok(Status::from_bits_retain(u16::from_le_bytes([low, high])))
    }

    /// Returns `true` while the FD pin reports an NFC field.
    ///
    /// # Errors
    ///
    /// Returns [`Ntag5LinkError::Bus`] if the pin cannot be read.
    pub fn field_detected(&mut self) -> Result<bool, Ntag5LinkError> {
        Ok(!pin::is_high(&mut self.fd)?)
    }

    /// Writes the capability container and an empty NDEF message.
    ///
    /// # Errors
    ///
    /// - [`Ntag5LinkError::WriteTimeout`] if a block write does not complete.
    /// - [`Ntag5LinkError::Bus`] if a transfer fails.
    pub fn format(&mut self) -> Result<(), Ntag5LinkError> {
        self.write_capability_container()?;
        self.write_block(
            NDEF_START,
            [ndef::NDEF_TLV, 0x00, ndef::TERMINATOR_TLV, 0x00],
        )
    }

    /// Writes `message` as the tag's NDEF message, preceded by the capability container.
    ///
    /// `message` is a complete NDEF message such as one produced by
    /// [`ndef::uri_record`]. It is wrapped in an NDEF TLV and closed with a terminator TLV.
    ///
    /// # Errors
    ///
    /// - [`Ntag5LinkError::MessageTooLong`] if the TLVs do not fit [`NDEF_CAPACITY`].
    /// - [`Ntag5LinkError::WriteTimeout`] if a block write does not complete.
    /// - [`Ntag5LinkError::Bus`] if a transfer fails.
    pub fn write_ndef(&mut self, message: &[u8]) -> Result<(), Ntag5LinkError> {
        let too_long = Ntag5LinkError::MessageTooLong { len: message.len() };
        let len = u16::try_from(message.len()).map_err(|_| too_long)?;
        let (header, header_len) = ndef::tlv_header(len);
        if header_len + message.len() + 1 > NDEF_CAPACITY {
            return Err(too_long);
        }

        self.write_capability_container()?;

        let mut bytes = header[..header_len]
            .iter()
            .chain(message)
            .chain(core::iter::once(&ndef::TERMINATOR_TLV))
            .copied()
            .peekable();
        let mut block = NDEF_START;
        while bytes.peek().is_some() {
            let mut data = [0; BLOCK_SIZE];
            for (slot, byte) in data.iter_mut().zip(&mut bytes) {
                *slot = byte;
            }
            self.write_block(block, data)?;
            block += 1;
        }

        log::debug!("ntag5link: wrote {} byte NDEF message", message.len());
        Ok(())
    }

    /// Returns the bus, the delay and the FD pin.
    pub fn release(self) -> (I2C, D, FD) {
        (self.i2c, self.delay, self.fd)
    }

    fn write_capability_container(&mut self) -> Result<(), Ntag5LinkError> {
        for (block, chunk) in (0..).zip(CAPABILITY_CONTAINER.chunks_exact(BLOCK_SIZE)) {
            let mut data = [0; BLOCK_SIZE];
            data.copy_from_slice(chunk);
            self.write_block(block, data)?;
        }
        Ok(())
    }

    /// Waits for the EEPROM write to finish. NAKs count as busy.
    fn wait_ready(&mut self) -> Result<(), Ntag5LinkError> {
        let (i2c, address) = (&mut self.i2c, self.address);
        let ready = time::poll_until(&mut self.delay, WRITE_TIMEOUT_MS, 1, || {
            match read_session(i2c, address, STATUS_REG, 0) {
                Ok(status) => Ok((status & Status::EEPROM_WR_BUSY.bits() as u8 == 0).then_some(())),
                Err(error) if error.is_nak() => Ok(None),
                Err(error) => Err(error),
            }
        })?;

        ready.ok_or_else(|| {
            log::warn!("ntag5link: EEPROM write did not complete in {WRITE_TIMEOUT_MS} ms");
            Ntag5LinkError::WriteTimeout
        })
    }
}

fn read_session<I2C: I2c>(i2c: &mut I2C, address: u8, reg: u16, index: u8) -> Result<u8, BusError> {
    let [hi, lo] = reg.to_be_bytes();
    let mut value = [0];
    i2c.write_read(address, &[hi, lo, index], &mut value)
        .map_err(BusError::i2c)?;
    Ok(value[0])
}

fn check_session(reg: u16) -> Result<(), Ntag5LinkError> {
    if SESSION_REGISTERS.contains(&reg) {
        Ok(())
    } else {
        Err(Ntag5LinkError::InvalidAddress { address: reg })
    }
}

fn block_region(block: u16) -> Option<RangeInclusive<u16>> {
    [USER_MEMORY, CONFIG_MEMORY, SESSION_REGISTERS, SRAM]
        .into_iter()
        .find(|region| region.contains(&block))
}

/// Errors that can occur when using an NTAG 5 link Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum Ntag5LinkError {
    /// The block or register address is outside the accessible memory map.
    #[snafu(display("address {address:#06x} is out of range"))]
    InvalidAddress {
        /// The rejected address.
        address: u16,
    },

    /// An EEPROM write did not complete in time.
    WriteTimeout,

    /// The NDEF message does not fit in user memory.
    #[snafu(display("NDEF message of {len} bytes does not fit"))]
    MessageTooLong {
        /// Length of the rejected message.
        len: usize,
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
    use clickboard_core::mock::{MockDelay, MockI2c, MockPin};

    use super::*;

    fn driver() -> (MockI2c, MockDelay, MockPin, Ntag5Link<MockI2c, MockDelay, MockPin>) {
        let i2c = MockI2c::new();
        let delay = MockDelay::new();
        let fd = MockPin::new();
        let tag = Ntag5Link::new(i2c.clone(), delay.clone(), fd.clone(), Config::default());
        (i2c, delay, fd, tag)
    }

    #[test]
    fn reads_blocks_within_a_region() {
        let (i2c, _, _, mut tag) = driver();
        i2c.queue_read(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut buf = [0; 8];
        tag.read_blocks(0x0010, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(i2c.writes(), vec![(I2C_ADDRESS, vec![0x00, 0x10])]);

        assert_eq!(
            tag.read_blocks(0x01FF, &mut buf),
            Err(Ntag5LinkError::InvalidAddress { address: 0x01FF })
        );
        assert_eq!(
            tag.read_blocks(0x0800, &mut buf),
            Err(Ntag5LinkError::InvalidAddress { address: 0x0800 })
        );
    }

    #[test]
    fn eeprom_write_polls_busy_flag() {
        let (i2c, delay, _, mut tag) = driver();
        i2c.queue_read(&[0x80]);
        i2c.queue_read(&[0x80]);
        i2c.queue_read(&[0x00]);

        tag.write_block(0x0005, [1, 2, 3, 4]).unwrap();

        let writes = i2c.writes();
        assert_eq!(writes[0], (I2C_ADDRESS, vec![0x00, 0x05, 1, 2, 3, 4]));
        assert_eq!(writes[1], (I2C_ADDRESS, vec![0x10, 0xA0, 0x00]));
        assert_eq!(writes.len(), 4);
        assert_eq!(delay.elapsed_ms(), 2);
    }

    #[test]
    fn sram_write_does_not_poll() {
        let (i2c, _, _, mut tag) = driver();
        tag.write_block(0x2000, [9; 4]).unwrap();
        assert_eq!(i2c.writes().len(), 1);

        assert_eq!(
            tag.write_block(STATUS_REG, [0; 4]),
            Err(Ntag5LinkError::InvalidAddress { address: STATUS_REG })
        );
    }

    #[test]
    fn stuck_write_times_out() {
        let (i2c, delay, _, mut tag) = driver();
        for _ in 0..=WRITE_TIMEOUT_MS {
            i2c.queue_read(&[0x80]);
        }

        assert_eq!(
            tag.write_block(0x1000, [0; 4]),
            Err(Ntag5LinkError::WriteTimeout)
        );
        assert_eq!(delay.elapsed_ms(), u64::from(WRITE_TIMEOUT_MS));
    }

    #[test]
    fn nak_while_busy_is_retried() {
        let (i2c, delay, _, mut tag) = driver();
        i2c.nak_next(2);
        tag.wait_ready().unwrap();
        assert_eq!(delay.elapsed_ms(), 2);
    }

    #[test]
    fn session_registers() {
        let (i2c, _, _, mut tag) = driver();
        tag.write_register(CONFIG_REG, 0, 0x0F, 0x05).unwrap();
        assert_eq!(
            i2c.writes()[0],
            (I2C_ADDRESS, vec![0x10, 0xA1, 0x00, 0x0F, 0x05])
        );

        i2c.queue_read(&[0x03]);
        i2c.queue_read(&[0x02]);
        assert_eq!(
            tag.status().unwrap(),
            Status::NFC_FIELD_OK | Status::VCC_SUPPLY_OK | Status::VCC_BOOT_OK
        );

        assert_eq!(
            tag.read_register(0x1000, 0),
            Err(Ntag5LinkError::InvalidAddress { address: 0x1000 })
        );
    }

    #[test]
    fn ndef_message_layout() {
        let (i2c, _, _, mut tag) = driver();
        tag.write_ndef(&[0xA, 0xB, 0xC, 0xD, 0xE]).unwrap();

        let blocks: Vec<Vec<u8>> = i2c
            .writes()
            .into_iter()
            .map(|(_, bytes)| bytes)
            .filter(|bytes| bytes.len() == 6)
            .collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0], [0x00, 0x00, 0xE2, 0x40, 0x00, 0x01]);
        assert_eq!(blocks[1], [0x00, 0x01, 0x00, 0x00, 0x00, 0xFF]);
        assert_eq!(blocks[2], [0x00, 0x02, 0x03, 0x05, 0xA, 0xB]);
        assert_eq!(blocks[3], [0x00, 0x03, 0xC, 0xD, 0xE, 0xFE]);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let (i2c, _, _, mut tag) = driver();
        let message = vec![0; NDEF_CAPACITY];
        assert_eq!(
            tag.write_ndef(&message),
            Err(Ntag5LinkError::MessageTooLong { len: NDEF_CAPACITY })
        );
        assert!(i2c.writes().is_empty());
    }

    #[test]
    fn field_detect_is_active_low() {
        let (_, _, fd, mut tag) = driver();
        fd.drive(false);
        assert!(tag.field_detected().unwrap());
        fd.drive(true);
        assert!(!tag.field_detected().unwrap());
    }
}
