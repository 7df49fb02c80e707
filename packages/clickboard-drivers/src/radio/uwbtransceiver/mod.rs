//! UWB Click, an IEEE 802.15.4 ultra-wideband transceiver.
//!
//! # Hardware Description
//!
//! The board carries a Decawave DW1000 on SPI, plus a reset line (RSTn, open drain) and an
//! interrupt output (IRQ, active high).
//!
//! The DW1000 has 64 register files, many of them larger than a byte and some of them several
//! kilobytes long, so every SPI transaction starts with a one to three byte header:
//!
//! ```text
//! byte 0: W S r r r r r r    W = write, S = sub-index follows, r = register file id
//! byte 1: E s s s s s s s    E = extended sub-index follows, s = sub-index bits 0..6
//! byte 2: s s s s s s s s    sub-index bits 7..14
//! ```
//!
//! Multi-byte values are little endian.
//!
//! Most front-end registers must be tuned away from their reset values for the chosen channel,
//! pulse repetition frequency, data rate and preamble length. [`UwbTransceiver::default_cfg`]
//! applies a complete configuration; after changing individual settings call
//! [`UwbTransceiver::tune`] to rewrite the dependent registers.

mod tuning;

use bitflags::bitflags;
use clickboard_core::{Accumulator, BusError, pin, time};
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin, PinState},
    spi::{Operation, SpiDevice},
};
use snafu::Snafu;
pub use tuning::{
    Channel, DataRate, PreambleLength, PulseRepetitionFrequency, RadioConfig, Tuning, chan_ctrl,
    tx_fctrl,
};

/// Expected contents of `DEV_ID`.
pub const DEVICE_ID: u32 = 0xDECA_0130;

/// Largest frame in standard frame mode, CRC included.
pub const MAX_FRAME_LEN: usize = 127;

/// Length of the frame check sequence appended by the transmitter.
pub const CRC_LEN: usize = 2;

/// Budget for a frame to leave the antenna.
pub const TX_TIMEOUT_MS: u32 = 50;

/// Register file ids and sub-indices.
#[allow(missing_docs)]
pub mod reg {
    pub const DEV_ID: u8 = 0x00;
    pub const EUI: u8 = 0x01;
    pub const PANADR: u8 = 0x03;
    pub const SYS_CFG: u8 = 0x04;
    pub const TX_FCTRL: u8 = 0x08;
    pub const TX_BUFFER: u8 = 0x09;
    pub const SYS_CTRL: u8 = 0x0D;
    pub const SYS_MASK: u8 = 0x0E;
    pub const SYS_STATUS: u8 = 0x0F;
    pub const RX_FINFO: u8 = 0x10;
    pub const RX_BUFFER: u8 = 0x11;
    pub const TX_POWER: u8 = 0x1E;
    pub const CHAN_CTRL: u8 = 0x1F;
    pub const AGC_CTRL: u8 = 0x23;
    pub const DRX_CONF: u8 = 0x27;
    pub const RF_CONF: u8 = 0x28;
    pub const TX_CAL: u8 = 0x2A;
    pub const FS_CTRL: u8 = 0x2B;
    pub const OTP_IF: u8 = 0x2D;
    pub const LDE_CTRL: u8 = 0x2E;
    pub const PMSC: u8 = 0x36;

    pub mod sub {
        pub const PANADR_SHORT_ADDR: u16 = 0x00;
        pub const PANADR_PAN_ID: u16 = 0x02;
        pub const AGC_TUNE1: u16 = 0x04;
        pub const AGC_TUNE2: u16 = 0x0C;
        pub const AGC_TUNE3: u16 = 0x12;
        pub const DRX_TUNE0B: u16 = 0x02;
        pub const DRX_TUNE1A: u16 = 0x04;
        pub const DRX_TUNE1B: u16 = 0x06;
        pub const DRX_TUNE2: u16 = 0x08;
        pub const DRX_TUNE4H: u16 = 0x26;
        pub const RF_RXCTRLH: u16 = 0x0B;
        pub const RF_TXCTRL: u16 = 0x0C;
        pub const TC_PGDELAY: u16 = 0x0B;
        pub const FS_PLLCFG: u16 = 0x07;
        pub const FS_PLLTUNE: u16 = 0x0B;
        pub const OTP_CTRL: u16 = 0x06;
        pub const LDE_CFG1: u16 = 0x0806;
        pub const LDE_CFG2: u16 = 0x1806;
        pub const LDE_REPC: u16 = 0x2804;
        pub const PMSC_CTRL0: u16 = 0x00;
    }
}

const SYS_CTRL_TXSTRT: u32 = 1 << 1;
const SYS_CTRL_TRXOFF: u32 = 1 << 6;
const SYS_CTRL_RXENAB: u32 = 1 << 8;
const SYS_CFG_RXM110K: u16 = 22;
const OTP_CTRL_LDELOAD: u16 = 0x8000;
const RX_FINFO_RXFLEN: u32 = 0x3FF;

bitflags! {
    /// `SYS_STATUS` event flags. Flags are cleared by writing ones.
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct Status: u32 {
        /// Interrupt request asserted.
        const IRQS = 1 << 0;
        /// Clock PLL locked.
        const CPLOCK = 1 << 1;
        /// External sync clock reset.
        const ESYNCR = 1 << 2;
        /// Automatic acknowledge triggered.
        const AAT = 1 << 3;
        /// Transmit frame begins.
        const TXFRB = 1 << 4;
        /// Transmit preamble sent.
        const TXPRS = 1 << 5;
        /// Transmit PHY header sent.
        const TXPHS = 1 << 6;
        /// Transmit frame sent.
        const TXFRS = 1 << 7;
        /// Receiver preamble detected.
        const RXPRD = 1 << 8;
        /// Receiver SFD detected.
        const RXSFDD = 1 << 9;
        /// Leading edge detection done.
        const LDEDONE = 1 << 10;
        /// Receiver PHY header detected.
        const RXPHD = 1 << 11;
        /// Receiver PHY header error.
        const RXPHE = 1 << 12;
        /// Receiver data frame ready.
        const RXDFR = 1 << 13;
        /// Receiver FCS good.
        const RXFCG = 1 << 14;
        /// Receiver FCS error.
        const RXFCE = 1 << 15;
        /// Reed Solomon frame sync loss.
        const RXRFSL = 1 << 16;
        /// Receive frame wait timeout.
        const RXRFTO = 1 << 17;
        /// Leading edge detection error.
        const LDEERR = 1 << 18;
        /// Receiver overrun.
        const RXOVRR = 1 << 20;
        /// Preamble detection timeout.
        const RXPTO = 1 << 21;
        /// GPIO interrupt.
        const GPIOIRQ = 1 << 22;
        /// SLEEP to INIT transition.
        const SLP2INIT = 1 << 23;
        /// RF PLL losing lock.
        const RFPLL_LL = 1 << 24;
        /// Clock PLL losing lock.
        const CLKPLL_LL = 1 << 25;
        /// Receive SFD timeout.
        const RXSFDTO = 1 << 26;
        /// Half period delay warning.
        const HPDWARN = 1 << 27;
        /// Transmit buffer error.
        const TXBERR = 1 << 28;
        /// Automatic frame filtering rejection.
        const AFFREJ = 1 << 29;

        /// Every transmit event.
        const ALL_TX = Self::AAT.bits() | Self::TXFRB.bits() | Self::TXPRS.bits()
            | Self::TXPHS.bits() | Self::TXFRS.bits();
        /// Every receive event that ends a good frame.
        const ALL_RX_GOOD = Self::RXDFR.bits() | Self::RXFCG.bits() | Self::RXPRD.bits()
            | Self::RXSFDD.bits() | Self::RXPHD.bits() | Self::LDEDONE.bits();
        /// Every receive error.
        const ALL_RX_ERROR = Self::RXPHE.bits() | Self::RXFCE.bits() | Self::RXRFSL.bits()
            | Self::RXSFDTO.bits() | Self::AFFREJ.bits() | Self::LDEERR.bits()
            | Self::RXRFTO.bits() | Self::RXPTO.bits();
    }
}

/// Transceiver state selected through `SYS_CTRL`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Mode {
    /// Transmitter and receiver off.
    Idle,
    /// Receiver on.
    Receive,
    /// Start transmitting the frame in the transmit buffer.
    Transmit,
}

/// Builds the SPI transaction header for register file `reg` at sub-index `sub`.
///
/// Returns the header bytes and how many of them are used. Sub-index 0 uses the one byte form.
///
/// # Examples
///
/// ```
/// use clickboard_drivers::radio::uwbtransceiver::header;
///
/// assert_eq!(header(0x00, 0, false), ([0x00, 0, 0], 1));
/// assert_eq!(header(0x23, 0x04, true), ([0xE3, 0x04, 0], 2));
/// assert_eq!(header(0x2E, 0x1806, false), ([0x6E, 0x86, 0x30], 3));
/// ```
#[must_use]
pub const fn header(reg: u8, sub: u16, write: bool) -> ([u8; 3], usize) {
    let mut first = reg & 0x3F;
    if write {
        first |= 0x80;
    }

    if sub == 0 {
        ([first, 0, 0], 1)
    } else if sub <= 0x7F {
        ([first | 0x40, sub as u8, 0], 2)
    } else {
        let low = (sub & 0x7F) as u8 | 0x80;
        let high = ((sub >> 7) & 0xFF) as u8;
        ([first | 0x40, low, high], 3)
    }
}

/// A UWB Click.
#[derive(Debug)]
pub struct UwbTransceiver<SPI, RST, INT, D> {
    spi: SPI,
    rst: RST,
    int: INT,
    delay: D,
    config: RadioConfig,
}

impl<SPI, RST, INT, D> UwbTransceiver<SPI, RST, INT, D>
where
    SPI: SpiDevice,
    RST: OutputPin,
    INT: InputPin,
    D: DelayNs,
{
    /// Creates a driver. Nothing is written until [`UwbTransceiver::init`].
    pub const fn new(spi: SPI, rst: RST, int: INT, delay: D, config: RadioConfig) -> Self {
        Self {
            spi,
            rst,
            int,
            delay,
            config,
        }
    }

    /// Resets the chip through RSTn and checks its device id.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidDeviceId`] if `DEV_ID` does not read [`DEVICE_ID`].
    /// - [`UwbTransceiverError::Bus`] if a transfer fails.
    pub fn init(&mut self) -> Result<(), UwbTransceiverError> {
        self.hard_reset()?;

        let id = self.read_u32(reg::DEV_ID, 0)?;
        if id != DEVICE_ID {
            log::error!("uwbtransceiver: unexpected device id {id:#010x}");
            return Err(UwbTransceiverError::InvalidDeviceId { id });
        }
        Ok(())
    }

    /// Pulses RSTn low and waits for the chip to come out of reset.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the pin cannot be driven.
    pub fn hard_reset(&mut self) -> Result<(), UwbTransceiverError> {
        pin::pulse(&mut self.rst, &mut self.delay, PinState::Low, 2)?;
        self.delay.delay_ms(5);
        Ok(())
    }

    /// Brings the radio to a known state with the configuration given to [`UwbTransceiver::new`].
    ///
    /// Every step is attempted; the error returned is the first one encountered and does not
    /// identify the failing step.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if the preamble code does not suit the
    ///   channel and PRF. Nothing is written in that case.
    /// - [`UwbTransceiverError::Bus`] if a transfer fails.
    pub fn default_cfg(&mut self) -> Result<(), UwbTransceiverError> {
        if !self.config.is_valid() {
            return Err(UwbTransceiverError::InvalidArgument);
        }

        let mut acc = Accumulator::new();
        acc.record(self.set_mode(Mode::Idle));
        acc.record(self.clear_status(Status::all()));
        acc.record(self.write_u32(reg::CHAN_CTRL, 0, chan_ctrl(&self.config)));
        acc.record(self.load_lde());
        acc.record(self.tune());
        acc.finish()
    }

    /// Returns the cached radio settings.
    #[must_use]
    pub const fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// Selects the channel.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if the current preamble code is not legal on
    ///   `channel`.
    /// - [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_channel(&mut self, channel: Channel) -> Result<(), UwbTransceiverError> {
        self.update_config(self.config.with_channel(channel))
    }

    /// Selects the data rate.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_data_rate(&mut self, data_rate: DataRate) -> Result<(), UwbTransceiverError> {
        self.config.data_rate = data_rate;
        self.set_bit(
            reg::SYS_CFG,
            0,
            SYS_CFG_RXM110K,
            matches!(data_rate, DataRate::Kbps110),
        )
    }

    /// Selects the pulse repetition frequency.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if the current preamble code is not legal at
    ///   `prf`.
    /// - [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_prf(&mut self, prf: PulseRepetitionFrequency) -> Result<(), UwbTransceiverError> {
        self.update_config(self.config.with_prf(prf))
    }

    /// Selects the preamble length. It takes effect with the next transmitted frame.
    pub const fn set_preamble_length(&mut self, preamble_length: PreambleLength) {
        self.config.preamble_length = preamble_length;
    }

    /// Selects the preamble code for both directions.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if `code` is not legal for the channel and PRF.
    /// - [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_preamble_code(&mut self, code: u8) -> Result<(), UwbTransceiverError> {
        self.update_config(self.config.with_preamble_code(code))
    }

    /// Rewrites every register that depends on the radio settings.
    ///
    /// Every register is written even if an earlier write fails.
    ///
    /// # Errors
    ///
    /// Returns the first [`UwbTransceiverError::Bus`] error if a transfer fails.
    pub fn tune(&mut self) -> Result<(), UwbTransceiverError> {
        use reg::sub;

        let t = Tuning::new(&self.config);
        log::debug!("uwbtransceiver: tuning for {:?}", self.config);

        let mut acc = Accumulator::new();
        acc.record(self.write_u16(reg::AGC_CTRL, sub::AGC_TUNE1, t.agc_tune1));
        acc.record(self.write_u32(reg::AGC_CTRL, sub::AGC_TUNE2, tuning::AGC_TUNE2));
        acc.record(self.write_u16(reg::AGC_CTRL, sub::AGC_TUNE3, tuning::AGC_TUNE3));
        acc.record(self.write_u16(reg::DRX_CONF, sub::DRX_TUNE0B, t.drx_tune0b));
        acc.record(self.write_u16(reg::DRX_CONF, sub::DRX_TUNE1A, t.drx_tune1a));
        acc.record(self.write_u16(reg::DRX_CONF, sub::DRX_TUNE1B, t.drx_tune1b));
        acc.record(self.write_u32(reg::DRX_CONF, sub::DRX_TUNE2, t.drx_tune2));
        acc.record(self.write_u16(reg::DRX_CONF, sub::DRX_TUNE4H, t.drx_tune4h));
        acc.record(self.generic_write(reg::RF_CONF, sub::RF_RXCTRLH, &[t.rf_rxctrlh]));
        acc.record(self.write_u32(reg::RF_CONF, sub::RF_TXCTRL, t.rf_txctrl));
        acc.record(self.generic_write(reg::TX_CAL, sub::TC_PGDELAY, &[t.tc_pgdelay]));
        acc.record(self.write_u32(reg::FS_CTRL, sub::FS_PLLCFG, t.fs_pllcfg));
        acc.record(self.generic_write(reg::FS_CTRL, sub::FS_PLLTUNE, &[t.fs_plltune]));
        acc.record(self.generic_write(reg::LDE_CTRL, sub::LDE_CFG1, &[tuning::LDE_CFG1]));
        acc.record(self.write_u16(reg::LDE_CTRL, sub::LDE_CFG2, t.lde_cfg2));
        acc.record(self.write_u16(reg::LDE_CTRL, sub::LDE_REPC, t.lde_repc));
        acc.record(self.write_u32(reg::TX_POWER, 0, t.tx_power));
        acc.record(self.set_bit(
            reg::SYS_CFG,
            0,
            SYS_CFG_RXM110K,
            matches!(self.config.data_rate, DataRate::Kbps110),
        ));
        acc.finish()
    }

    /// Loads the leading edge detection microcode from OTP. Needed once after every reset for
    /// receive timestamps to be valid.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if a transfer fails.
    pub fn load_lde(&mut self) -> Result<(), UwbTransceiverError> {
        self.write_u16(reg::PMSC, reg::sub::PMSC_CTRL0, 0x0301)?;
        self.write_u16(reg::OTP_IF, reg::sub::OTP_CTRL, OTP_CTRL_LDELOAD)?;
        self.delay.delay_us(150);
        self.write_u16(reg::PMSC, reg::sub::PMSC_CTRL0, 0x0200)
    }

    /// Switches the transceiver state.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_mode(&mut self, mode: Mode) -> Result<(), UwbTransceiverError> {
        let bits = match mode {
            Mode::Idle => SYS_CTRL_TRXOFF,
            Mode::Receive => SYS_CTRL_RXENAB,
            Mode::Transmit => SYS_CTRL_TXSTRT,
        };
        self.write_u32(reg::SYS_CTRL, 0, bits)
    }

    /// Sets the PAN identifier used by frame filtering.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_pan_id(&mut self, pan_id: u16) -> Result<(), UwbTransceiverError> {
        self.write_u16(reg::PANADR, reg::sub::PANADR_PAN_ID, pan_id)
    }

    /// Sets the 16-bit short address used by frame filtering.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_short_address(&mut self, address: u16) -> Result<(), UwbTransceiverError> {
        self.write_u16(reg::PANADR, reg::sub::PANADR_SHORT_ADDR, address)
    }

    /// Reads the 64-bit extended unique identifier.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn eui(&mut self) -> Result<u64, UwbTransceiverError> {
        let mut bytes = [0; 8];
        self.generic_read(reg::EUI, 0, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Overrides the extended unique identifier until the next reset.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_eui(&mut self, eui: u64) -> Result<(), UwbTransceiverError> {
        self.generic_write(reg::EUI, 0, &eui.to_le_bytes())
    }

    /// Reads the event flags.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn status(&mut self) -> Result<Status, UwbTransceiverError> {
        Ok(Status::from_bits_retain(self.read_u32(reg::SYS_STATUS, 0)?))
    }

    /// Clears the given event flags.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn clear_status(&mut self, flags: Status) -> Result<(), UwbTransceiverError> {
        self.write_u32(reg::SYS_STATUS, 0, flags.bits())
    }

    /// Selects which events raise the IRQ line.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn set_interrupt_mask(&mut self, events: Status) -> Result<(), UwbTransceiverError> {
        self.write_u32(reg::SYS_MASK, 0, events.bits())
    }

    /// Returns `true` while the IRQ line is asserted.
    ///
    /// # Errors
    ///
    /// Returns [`UwbTransceiverError::Bus`] if the pin cannot be read.
    pub fn interrupt(&mut self) -> Result<bool, UwbTransceiverError> {
        Ok(pin::is_high(&mut self.int)?)
    }

    /// Sends `data` as one frame and waits until it has been transmitted.
    ///
    /// The transmitter appends the two CRC bytes, so `data` may be at most
    /// [`MAX_FRAME_LEN`]` - `[`CRC_LEN`] bytes long.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::FrameTooLong`] if the frame exceeds [`MAX_FRAME_LEN`].
    /// - [`UwbTransceiverError::TransmitTimeout`] if `TXFRS` is not set within
    ///   [`TX_TIMEOUT_MS`].
    /// - [`UwbTransceiverError::Bus`] if a transfer fails.
    pub fn transmit(&mut self, data: &[u8]) -> Result<(), UwbTransceiverError> {
        let frame_len = data.len() + CRC_LEN;
        if frame_len > MAX_FRAME_LEN {
            return Err(UwbTransceiverError::FrameTooLong { len: frame_len });
        }

        self.generic_write(reg::TX_BUFFER, 0, data)?;
        self.write_u32(
            reg::TX_FCTRL,
            0,
            tx_fctrl(&self.config, frame_len as u8),
        )?;
        self.clear_status(Status::ALL_TX)?;
        self.set_mode(Mode::Transmit)?;

        let sent = self.wait_status(TX_TIMEOUT_MS, |status| {
            status.contains(Status::TXFRS).then_some(())
        })?;
        if sent.is_none() {
            log::warn!("uwbtransceiver: frame not sent within {TX_TIMEOUT_MS} ms");
            return Err(UwbTransceiverError::TransmitTimeout);
        }

        self.clear_status(Status::ALL_TX)
    }

    /// Turns the receiver on and waits up to `timeout_ms` for a frame.
    ///
    /// The payload, without CRC, is copied to the start of `buf` and its length returned. The
    /// receiver is off again when this returns.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::ReceiveTimeout`] if no frame arrived in time.
    /// - [`UwbTransceiverError::ReceiveFailed`] if the receiver reported an error.
    /// - [`UwbTransceiverError::FrameTooLong`] if the payload does not fit in `buf`.
    /// - [`UwbTransceiverError::Bus`] if a transfer fails.
    pub fn receive(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, UwbTransceiverError> {
        self.clear_status(Status::ALL_RX_GOOD | Status::ALL_RX_ERROR)?;
        self.set_mode(Mode::Receive)?;

        let event = self.wait_status(timeout_ms, |status| {
            if status.intersects(Status::ALL_RX_ERROR) {
                Some(Err(status & Status::ALL_RX_ERROR))
            } else if status.contains(Status::RXFCG) {
                Some(Ok(()))
            } else {
                None
            }
        })?;

        match event {
            None => {
                self.set_mode(Mode::Idle)?;
                Err(UwbTransceiverError::ReceiveTimeout)
            }
            Some(Err(errors)) => {
                log::debug!("uwbtransceiver: receive failed with {errors:?}");
                self.clear_status(Status::ALL_RX_ERROR)?;
                self.set_mode(Mode::Idle)?;
                Err(UwbTransceiverError::ReceiveFailed {
                    status: errors.bits(),
                })
            }
            Some(Ok(())) => {
                let frame_len = (self.read_u32(reg::RX_FINFO, 0)? & RX_FINFO_RXFLEN) as usize;
                let len = frame_len.saturating_sub(CRC_LEN);
                let result = if len > buf.len() {
                    Err(UwbTransceiverError::FrameTooLong { len })
                } else {
                    self.generic_read(reg::RX_BUFFER, 0, &mut buf[..len])
                        .map(|()| len)
                };
                self.clear_status(Status::ALL_RX_GOOD)?;
                result
            }
        }
    }

    /// Writes `data` to register file `reg` starting at sub-index `sub`.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if `reg` is above 0x3F or `sub` above 0x7FFF.
    /// - [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn generic_write(&mut self, reg: u8, sub: u16, data: &[u8]) -> Result<(), UwbTransceiverError> {
        let (header, len) = checked_header(reg, sub, true)?;
        self.spi
            .transaction(&mut [Operation::Write(&header[..len]), Operation::Write(data)])
            .map_err(BusError::spi)?;
        Ok(())
    }

    /// Reads `buf.len()` bytes from register file `reg` starting at sub-index `sub`.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if `reg` is above 0x3F or `sub` above 0x7FFF.
    /// - [`UwbTransceiverError::Bus`] if the transfer fails.
    pub fn generic_read(&mut self, reg: u8, sub: u16, buf: &mut [u8]) -> Result<(), UwbTransceiverError> {
        let (header, len) = checked_header(reg, sub, false)?;
        self.spi
            .transaction(&mut [Operation::Write(&header[..len]), Operation::Read(buf)])
            .map_err(BusError::spi)?;
        Ok(())
    }

    /// Reads a little endian 16-bit value.
    ///
    /// # Errors
    ///
    /// See [`UwbTransceiver::generic_read`].
    pub fn read_u16(&mut self, reg: u8, sub: u16) -> Result<u16, UwbTransceiverError> {
        let mut bytes = [0; 2];
        self.generic_read(reg, sub, &mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Reads a little endian 32-bit value.
    ///
    /// # Errors
    ///
    /// See [`UwbTransceiver::generic_read`].
    pub fn read_u32(&mut self, reg: u8, sub: u16) -> Result<u32, UwbTransceiverError> {
        let mut bytes = [0; 4];
        self.generic_read(reg, sub, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes a little endian 16-bit value.
    ///
    /// # Errors
    ///
    /// See [`UwbTransceiver::generic_write`].
    pub fn write_u16(&mut self, reg: u8, sub: u16, value: u16) -> Result<(), UwbTransceiverError> {
        self.generic_write(reg, sub, &value.to_le_bytes())
    }

    /// Writes a little endian 32-bit value.
    ///
    /// # Errors
    ///
    /// See [`UwbTransceiver::generic_write`].
    pub fn write_u32(&mut self, reg: u8, sub: u16, value: u32) -> Result<(), UwbTransceiverError> {
        self.generic_write(reg, sub, &value.to_le_bytes())
    }

    /// Reads bit `index` of the register file, counting from bit 0 at `sub`.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if the bit lies past the last sub-index.
    /// - See [`UwbTransceiver::generic_read`].
    pub fn bit(&mut self, reg: u8, sub: u16, index: u16) -> Result<bool, UwbTransceiverError> {
        let sub = sub
            .checked_add(index / 8)
            .ok_or(UwbTransceiverError::InvalidArgument)?;
        let mut byte = [0];
        self.generic_read(reg, sub, &mut byte)?;
        Ok(byte[0] & (1 << (index % 8)) != 0)
    }

    /// Sets or clears bit `index` of the register file, counting from bit 0 at `sub`.
    ///
    /// Only the byte holding the bit is rewritten.
    ///
    /// # Errors
    ///
    /// - [`UwbTransceiverError::InvalidArgument`] if the bit lies past the last sub-index.
    /// - See [`UwbTransceiver::generic_read`].
    pub fn set_bit(
        &mut self,
        reg: u8,
        sub: u16,
        index: u16,
        value: bool,
    ) -> Result<(), UwbTransceiverError> {
        let sub = sub
            .checked_add(index / 8)
            .ok_or(UwbTransceiverError::InvalidArgument)?;
        let mask = 1 << (index % 8);

        let mut byte = [0];
        self.generic_read(reg, sub, &mut byte)?;
        if value {
            byte[0] |= mask;
        } else {
            byte[0] &= !mask;
        }
        self.generic_write(reg, sub, &byte)
    }

    /// Returns the SPI device, the reset and interrupt pins, and the delay.
    pub fn release(self) -> (SPI, RST, INT, D) {
        (self.spi, self.rst, self.int, self.delay)
    }

    fn update_config(&mut self, config: RadioConfig) -> Result<(), UwbTransceiverError> {
        if !config.is_valid() {
            return Err(UwbTransceiverError::InvalidArgument);
        }
        self.config = config;
        self.write_u32(reg::CHAN_CTRL, 0, chan_ctrl(&config))
    }

    /// Polls `SYS_STATUS` every millisecond until `check` yields a value.
    fn wait_status<T>(
        &mut self,
        timeout_ms: u32,
        mut check: impl FnMut(Status) -> Option<T>,
    ) -> Result<Option<T>, UwbTransceiverError> {
        let spi = &mut self.spi;
        time::poll_until(&mut self.delay, timeout_ms, 1, || {
            let mut bytes = [0; 4];
            let (status_header, len) = header(reg::SYS_STATUS, 0, false);
            spi.transaction(&mut [
                Operation::Write(&status_header[..len]),
                Operation::Read(&mut bytes),
            ])
                .map_err(BusError::spi)?;
            Ok::<_, UwbTransceiverError>(check(Status::from_bits_retain(u32::from_le_bytes(bytes))))
        })
    }
}

fn checked_header(reg: u8, sub: u16, write: bool) -> Result<([u8; 3], usize), UwbTransceiverError> {
    if reg > 0x3F || sub > 0x7FFF {
        return Err(UwbTransceiverError::InvalidArgument);
    }
    Ok(header(reg, sub, write))
}

/// Errors that can occur when using a UWB Click.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum UwbTransceiverError {
    /// `DEV_ID` did not match [`DEVICE_ID`].
    #[snafu(display("unexpected device id {id:#010x}"))]
    InvalidDeviceId {
        /// The id that was read.
        id: u32,
    },

    /// A register address, preamble code or other setting was out of range.
    InvalidArgument,

    /// The frame does not fit.
    #[snafu(display("frame of {len} bytes does not fit"))]
    FrameTooLong {
        /// Length of the rejected frame.
        len: usize,
    },

    /// A frame was not sent in time.
    TransmitTimeout,

    /// No frame arrived in time.
    ReceiveTimeout,

    /// The receiver reported an error.
    #[snafu(display("receive failed, status {status:#010x}"))]
    ReceiveFailed {
        /// The error flags from `SYS_STATUS`.
        status: u32,
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
        mock::{MockDelay, MockPin, MockSpi},
        pin::NoPin,
    };

    use super::*;

    type Driver = UwbTransceiver<MockSpi, MockPin, NoPin, MockDelay>;

    fn driver() -> (MockSpi, MockPin, MockDelay, Driver) {
        let spi = MockSpi::new();
        let rst = MockPin::new();
        let delay = MockDelay::new();
        let uwb = UwbTransceiver::new(
            spi.clone(),
            rst.clone(),
            NoPin,
            delay.clone(),
            RadioConfig::default(),
        );
        (spi, rst, delay, uwb)
    }

    #[test]
    fn init_resets_and_checks_id() {
        let (spi, rst, _, mut uwb) = driver();
        spi.queue_read(&DEVICE_ID.to_le_bytes());

        uwb.init().unwrap();
        assert_eq!(rst.history(), vec![false, true]);
        assert_eq!(spi.frames(), vec![vec![0x00]]);

        spi.queue_read(&[0xFF; 4]);
        assert_eq!(
            uwb.init(),
            Err(UwbTransceiverError::InvalidDeviceId { id: 0xFFFF_FFFF })
        );
    }

    #[test]
    fn register_access_uses_sub_index_headers() {
        let (spi, _, _, mut uwb) = driver();
        uwb.write_u16(reg::LDE_CTRL, reg::sub::LDE_REPC, 0x0851)
            .unwrap();
        uwb.set_pan_id(0xDECA).unwrap();

        let frames = spi.frames();
        assert_eq!(frames[0], [0xEE, 0x84, 0x50, 0x51, 0x08]);
        assert_eq!(frames[1], [0xC3, 0x02, 0xCA, 0xDE]);

        assert_eq!(
            uwb.generic_write(0x40, 0, &[0]),
            Err(UwbTransceiverError::InvalidArgument)
        );
    }

    #[test]
    fn set_bit_rewrites_one_byte() {
        let (spi, _, _, mut uwb) = driver();
        spi.queue_read(&[0x01]);

        uwb.set_bit(reg::SYS_CFG, 0, 22, true).unwrap();

        let frames = spi.frames();
        assert_eq!(frames[0], [0x44, 0x02]);
        assert_eq!(frames[1], [0xC4, 0x02, 0x41]);
    }

    #[test]
    fn bit_past_the_sub_index_range_is_rejected() {
        let (spi, _, _, mut uwb) = driver();

        assert_eq!(
            uwb.set_bit(reg::SYS_CFG, 0xFFFF, 8, true),
            Err(UwbTransceiverError::InvalidArgument)
        );
        assert_eq!(
            uwb.bit(reg::SYS_CFG, 0xFFFF, 8),
            Err(UwbTransceiverError::InvalidArgument)
        );
        assert!(spi.frames().is_empty());
    }

    #[test]
    fn tune_keeps_writing_after_a_failure() {
        let (spi, _, _, mut uwb) = driver();
        spi.fail_next(1);

        assert!(matches!(uwb.tune(), Err(UwbTransceiverError::Bus { .. })));

        let frames = spi.frames();
        assert_eq!(frames.len(), 18);
        assert_eq!(frames.last(), Some(&vec![0xC4, 0x02, 0x40]));
    }

    #[test]
    fn default_cfg_writes_channel_control() {
        let (spi, _, _, mut uwb) = driver();
        uwb.default_cfg().unwrap();

        let frames = spi.frames();
        assert_eq!(frames[0], [0x8D, 0x40, 0, 0, 0]);
        assert!(frames.contains(&vec![0x9F, 0x55, 0x00, 0x04, 0x21]));
        assert!(frames.contains(&vec![0xE3, 0x0C, 0x07, 0xA9, 0x02, 0x25]));
    }

    #[test]
    fn illegal_preamble_code_is_rejected() {
        let (spi, _, _, mut uwb) = driver();
        assert_eq!(
            uwb.set_preamble_code(9),
            Err(UwbTransceiverError::InvalidArgument)
        );
        assert_eq!(uwb.config().preamble_code, 4);
        assert!(spi.frames().is_empty());
    }

    #[test]
    fn transmit_waits_for_frame_sent() {
        let (spi, _, delay, mut uwb) = driver();
        spi.queue_read(&[0, 0, 0, 0]);
        spi.queue_read(&[0x80, 0, 0, 0]);

        uwb.transmit(&[1, 2, 3]).unwrap();

        let frames = spi.frames();
        assert_eq!(frames[0], [0x89, 1, 2, 3]);
        assert_eq!(frames[1], [0x88, 0x05, 0x00, 0x09, 0x00]);
        assert_eq!(frames[3], [0x8D, 0x02, 0, 0, 0]);
        assert_eq!(delay.elapsed_ms(), 1);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let (_, _, _, mut uwb) = driver();
        assert_eq!(
            uwb.transmit(&[0; 126]),
            Err(UwbTransceiverError::FrameTooLong { len: 128 })
        );
    }

    #[test]
    fn receives_a_good_frame() {
        let (spi, _, _, mut uwb) = driver();
        spi.queue_read(&[0x00, 0x40, 0, 0]);
        spi.queue_read(&[7, 0, 0, 0]);
        spi.queue_read(&[5, 4, 3, 2, 1]);

        let mut buf = [0; 16];
        assert_eq!(uwb.receive(&mut buf, 10), Ok(5));
        assert_eq!(buf[..5], [5, 4, 3, 2, 1]);
        assert_eq!(spi.frames()[1], [0x8D, 0x00, 0x01, 0, 0]);
    }

    #[test]
    fn crc_error_fails_the_receive() {
        let (spi, _, _, mut uwb) = driver();
        spi.queue_read(&[0x00, 0x80, 0, 0]);

        let mut buf = [0; 16];
        assert_eq!(
            uwb.receive(&mut buf, 10),
            Err(UwbTransceiverError::ReceiveFailed { status: 0x8000 })
        );
    }

    #[test]
    fn silent_receiver_times_out_and_goes_idle() {
        let (spi, _, delay, mut uwb) = driver();
        let mut buf = [0; 16];

        assert_eq!(
            uwb.receive(&mut buf, 20),
            Err(UwbTransceiverError::ReceiveTimeout)
        );
        assert_eq!(delay.elapsed_ms(), 20);
        assert_eq!(spi.frames().last().unwrap(), &vec![0x8D, 0x40, 0, 0, 0]);
    }
}
