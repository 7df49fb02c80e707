//! Radio settings and the register values that depend on them.
//!
//! The receiver and transmitter front ends need per-channel, per-PRF and per-data-rate tuning
//! values that differ from the power-on defaults. [`Tuning::new`] derives all of them from a
//! [`RadioConfig`].

/// UWB channel. Channel 6 does not exist on this part.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Channel {
    Ch1 = 1,
    Ch2 = 2,
    Ch3 = 3,
    Ch4 = 4,
    Ch5 = 5,
    Ch7 = 7,
}

impl Channel {
    /// Returns `true` if `code` may be used on this channel at `prf`.
    #[must_use]
    pub const fn supports_code(self, prf: PulseRepetitionFrequency, code: u8) -> bool {
        match (prf, self) {
            (PulseRepetitionFrequency::Mhz16, Self::Ch1) => matches!(code, 1 | 2),
            (PulseRepetitionFrequency::Mhz16, Self::Ch2 | Self::Ch5) => matches!(code, 3 | 4),
            (PulseRepetitionFrequency::Mhz16, Self::Ch3) => matches!(code, 5 | 6),
            (PulseRepetitionFrequency::Mhz16, Self::Ch4 | Self::Ch7) => matches!(code, 7 | 8),
            (PulseRepetitionFrequency::Mhz64, Self::Ch4 | Self::Ch7) => matches!(code, 17..=20),
            (PulseRepetitionFrequency::Mhz64, _) => matches!(code, 9..=12),
        }
    }
}

/// Over-the-air data rate, as encoded in `TX_FCTRL.TXBR`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum DataRate {
    /// 110 kbps.
    Kbps110 = 0,
    /// 850 kbps.
    Kbps850 = 1,
    /// 6.8 Mbps.
    Mbps6_8 = 2,
}

/// Pulse repetition frequency, as encoded in `TX_FCTRL.TXPRF` and `CHAN_CTRL.RXPRF`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum PulseRepetitionFrequency {
    /// 16 MHz nominal.
    Mhz16 = 1,
    /// 64 MHz nominal.
    Mhz64 = 2,
}

/// Preamble length in symbols.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum PreambleLength {
    Symbols64,
    Symbols128,
    Symbols256,
    Symbols512,
    Symbols1024,
    Symbols1536,
    Symbols2048,
    Symbols4096,
}

impl PreambleLength {
    /// Returns the number of preamble symbols.
    #[must_use]
    pub const fn symbols(self) -> u16 {
        match self {
            Self::Symbols64 => 64,
            Self::Symbols128 => 128,
            Self::Symbols256 => 256,
            Self::Symbols512 => 512,
            Self::Symbols1024 => 1024,
            Self::Symbols1536 => 1536,
            Self::Symbols2048 => 2048,
            Self::Symbols4096 => 4096,
        }
    }

    /// Returns the `TXPSR` and `PE` fields of `TX_FCTRL`.
    #[must_use]
    pub const fn txpsr_pe(self) -> (u8, u8) {
        match self {
            Self::Symbols64 => (0b01, 0b00),
            Self::Symbols128 => (0b01, 0b01),
            Self::Symbols256 => (0b01, 0b10),
            Self::Symbols512 => (0b01, 0b11),
            Self::Symbols1024 => (0b10, 0b00),
            Self::Symbols1536 => (0b10, 0b01),
            Self::Symbols2048 => (0b10, 0b10),
            Self::Symbols4096 => (0b11, 0b00),
        }
    }
}

/// The settings both ends of a link must agree on.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RadioConfig {
    /// Defaults to channel 5.
    pub channel: Channel,
    /// Defaults to 110 kbps.
    pub data_rate: DataRate,
    /// Defaults to 16 MHz.
    pub prf: PulseRepetitionFrequency,
    /// Defaults to 1024 symbols.
    pub preamble_length: PreambleLength,
    /// Defaults to 4.
    pub preamble_code: u8,
}

impl RadioConfig {
    /// Sets the channel.
    #[must_use]
    pub const fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    /// Sets the data rate.
    #[must_use]
    pub const fn with_data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }

    /// Sets the pulse repetition frequency.
    #[must_use]
    pub const fn with_prf(mut self, prf: PulseRepetitionFrequency) -> Self {
        self.prf = prf;
        self
    }

    /// Sets the preamble length.
    #[must_use]
    pub const fn with_preamble_length(mut self, preamble_length: PreambleLength) -> Self {
        self.preamble_length = preamble_length;
        self
    }

    /// Sets the preamble code.
    #[must_use]
    pub const fn with_preamble_code(mut self, preamble_code: u8) -> Self {
        self.preamble_code = preamble_code;
        self
    }

    /// Returns `true` if the preamble code is legal for the channel and PRF.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.channel.supports_code(self.prf, self.preamble_code)
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: Channel::Ch5,
            data_rate: DataRate::Kbps110,
            prf: PulseRepetitionFrequency::Mhz16,
            preamble_length: PreambleLength::Symbols1024,
            preamble_code: 4,
        }
    }
}

/// Packs `CHAN_CTRL`, using the same channel and preamble code for both directions.
#[must_use]
pub const fn chan_ctrl(config: &RadioConfig) -> u32 {
    let channel = config.channel as u32;
    let code = (config.preamble_code & 0x1F) as u32;
    channel | (channel << 4) | ((config.prf as u32) << 18) | (code << 22) | (code << 27)
}

/// Packs the low four bytes of `TX_FCTRL` for a frame of `frame_len` bytes (CRC included).
#[must_use]
pub const fn tx_fctrl(config: &RadioConfig, frame_len: u8) -> u32 {
    let (txpsr, pe) = config.preamble_length.txpsr_pe();
    (frame_len as u32 & 0x7F)
        | ((config.data_rate as u32) << 13)
        | ((config.prf as u32) << 16)
        | ((txpsr as u32) << 18)
        | ((pe as u32) << 20)
}

/// The configuration dependent register values.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct Tuning {
    pub agc_tune1: u16,
    pub drx_tune0b: u16,
    pub drx_tune1a: u16,
    pub drx_tune1b: u16,
    pub drx_tune2: u32,
    pub drx_tune4h: u16,
    pub rf_rxctrlh: u8,
    pub rf_txctrl: u32,
    pub tc_pgdelay: u8,
    pub fs_pllcfg: u32,
    pub fs_plltune: u8,
    pub lde_cfg2: u16,
    pub lde_repc: u16,
    pub tx_power: u32,
}

/// `AGC_TUNE2`, the same for every configuration.
pub const AGC_TUNE2: u32 = 0x2502_A907;
/// `AGC_TUNE3`, the same for every configuration.
pub const AGC_TUNE3: u16 = 0x0035;
/// `LDE_CFG1`: noise threshold multiplier 13, peak multiplier 3.
pub const LDE_CFG1: u8 = 0x6D;

impl Tuning {
    /// Derives the tuning values for `config`.
    #[must_use]
    pub const fn new(config: &RadioConfig) -> Self {
        use Channel::*;
        use DataRate::*;
        use PulseRepetitionFrequency::*;

        let prf16 = matches!(config.prf, Mhz16);
        let symbols = config.preamble_length.symbols();

        let drx_tune1b = match (config.data_rate, symbols) {
            (Kbps110, _) => 0x0064,
            (Mbps6_8, 64) => 0x0010,
            _ => 0x0020,
        };

        // Preamble acquisition chunk size follows the preamble length.
        let drx_tune2 = match (symbols, prf16) {
            (0..=128, true) => 0x311A_002D,
            (0..=128, false) => 0x313B_006B,
            (129..=512, true) => 0x331A_0052,
            (129..=512, false) => 0x333B_00BE,
            (513..=1024, true) => 0x351A_009A,
            (513..=1024, false) => 0x353B_015E,
            (_, true) => 0x371A_011D,
            (_, false) => 0x373B_0296,
        };

        let repc = lde_repc(config.preamble_code);

        Self {
            agc_tune1: if prf16 { 0x8870 } else { 0x889B },
            drx_tune0b: match config.data_rate {
                Kbps110 => 0x000A,
                Kbps850 | Mbps6_8 => 0x0001,
            },
            drx_tune1a: if prf16 { 0x0087 } else { 0x008D },
            drx_tune1b,
            drx_tune2,
            drx_tune4h: if symbols == 64 { 0x0010 } else { 0x0028 },
            rf_rxctrlh: match config.channel {
                Ch4 | Ch7 => 0xBC,
                _ => 0xD8,
            },
            rf_txctrl: match config.channel {
                Ch1 => 0x0000_5C40,
                Ch2 => 0x0004_5CA0,
                Ch3 => 0x0008_6CC0,
                Ch4 => 0x0004_5C80,
                Ch5 => 0x001E_3FE0,
                Ch7 => 0x001E_7DE0,
            },
            tc_pgdelay: match config.channel {
                Ch1 => 0xC9,
                Ch2 => 0xC2,
                Ch3 => 0xC5,
                Ch4 => 0x95,
                Ch5 => 0xC0,
                Ch7 => 0x93,
            },
            fs_pllcfg: match config.channel {
                Ch1 => 0x0900_0407,
                Ch2 | Ch4 => 0x0840_0508,
                Ch3 => 0x0840_1009,
                Ch5 | Ch7 => 0x0800_041D,
            },
            fs_plltune: match config.channel {
                Ch1 => 0x1E,
                Ch2 | Ch4 => 0x26,
                Ch3 => 0x56,
                Ch5 | Ch7 => 0xBE,
            },
            lde_cfg2: if prf16 { 0x1607 } else { 0x0607 },
            // At 110 kbps the replica coefficient is scaled down by 8.
            lde_repc: match config.data_rate {
                Kbps110 => repc >> 3,
                _ => repc,
            },
            tx_power: match (config.channel, prf16) {
                (Ch1 | Ch2, true) => 0x7575_7575,
                (Ch1 | Ch2, false) => 0x6767_6767,
                (Ch3, true) => 0x6F6F_6F6F,
                (Ch3, false) => 0x8B8B_8B8B,
                (Ch4, true) => 0x5F5F_5F5F,
                (Ch4, false) => 0x9A9A_9A9A,
                (Ch5, true) => 0x4848_4848,
                (Ch5, false) => 0x8585_8585,
                (Ch7, true) => 0x9292_9292,
                (Ch7, false) => 0xD1D1_D1D1,
            },
        }
    }
}

/// Leading edge detection replica coefficient per preamble code.
const fn lde_repc(code: u8) -> u16 {
    match code {
        1 | 2 => 0x5998,
        3 | 8 => 0x51EA,
        4 => 0x428E,
        5 => 0x451E,
        6 => 0x2E14,
        7 => 0x8000,
        9 => 0x28F4,
        10 | 17 => 0x3332,
        11 | 13 | 21 => 0x3AE0,
        12 => 0x3D70,
        14 | 16 | 18 | 19 => 0x35C2,
        15 => 0x2B84,
        20 => 0x47AE,
        22 | 24 => 0x3850,
        23 => 0x30A2,
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_control_packing() {
        assert_eq!(chan_ctrl(&RadioConfig::default()), 0x2104_0055);
    }

    #[test]
    fn frame_control_packing() {
        assert_eq!(tx_fctrl(&RadioConfig::default(), 12), 0x0009_000C);

        let fast = RadioConfig::default()
            .with_data_rate(DataRate::Mbps6_8)
            .with_prf(PulseRepetitionFrequency::Mhz64)
            .with_preamble_length(PreambleLength::Symbols128);
        assert_eq!(tx_fctrl(&fast, 127), 0x7F | (2 << 13) | (2 << 16) | (1 << 18) | (1 << 20));
    }

    #[test]
    fn default_tuning() {
        let tuning = Tuning::new(&RadioConfig::default());
        assert_eq!(tuning.drx_tune0b, 0x000A);
        assert_eq!(tuning.drx_tune1b, 0x0064);
        assert_eq!(tuning.drx_tune2, 0x351A_009A);
        assert_eq!(tuning.rf_txctrl, 0x001E_3FE0);
        assert_eq!(tuning.fs_pllcfg, 0x0800_041D);
        assert_eq!(tuning.lde_repc, 0x428E >> 3);
        assert_eq!(tuning.tx_power, 0x4848_4848);
    }

    #[test]
    fn preamble_codes_follow_channel_and_prf() {
        assert!(RadioConfig::default().is_valid());
        assert!(!RadioConfig::default().with_preamble_code(9).is_valid());
        assert!(
            RadioConfig::default()
                .with_prf(PulseRepetitionFrequency::Mhz64)
                .with_preamble_code(9)
                .is_valid()
        );
        assert!(Channel::Ch7.supports_code(PulseRepetitionFrequency::Mhz64, 18));
        assert!(!Channel::Ch7.supports_code(PulseRepetitionFrequency::Mhz64, 10));
    }
}
