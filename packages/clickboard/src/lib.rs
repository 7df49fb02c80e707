//! # clickboard
//!
//! Blocking drivers for MikroElektronika Click boards, written against the
//! [`embedded-hal`](https://crates.io/crates/embedded-hal) 1.0 and
//! [`embedded-io`](https://crates.io/crates/embedded-io) traits.
//!
//! Each board lives behind a cargo feature of the same name (all enabled by default), and every
//! driver follows the same shape: construct it from the bus and pins, call `init` or
//! `default_cfg` where the board has one, use it, and get the parts back with `release`.
//!
//! ```ignore
//! use clickboard::prelude::*;
//!
//! let mut rtc = Rtc8::new(I2cInterface::new(i2c, rtc8::I2C_ADDRESS, AddressMask::NONE), delay, NoPin, Default::default());
//! rtc.default_cfg()?;
//! let now = rtc.unix_time()?;
//! ```
//!
//! This crate only re-exports [`clickboard_core`] and [`clickboard_drivers`].

#![no_std]

#[doc(inline)]
pub use clickboard_core::{Accumulator, BusError, at, error, interface, pin, time};
#[doc(inline)]
#[cfg(feature = "mock")]
pub use clickboard_core::mock;
#[doc(inline)]
#[cfg(any(feature = "lteiot11", feature = "lteiot19", feature = "nbiot7"))]
pub use clickboard_drivers::cellular;
#[doc(inline)]
#[cfg(feature = "ntag5link")]
pub use clickboard_drivers::nfc;
#[doc(inline)]
#[cfg(any(feature = "uwbtransceiver", feature = "bt122a", feature = "xbee3"))]
pub use clickboard_drivers::radio;
#[doc(inline)]
#[cfg(feature = "rtc8")]
pub use clickboard_drivers::rtc;
#[doc(inline)]
#[cfg(any(feature = "accel21", feature = "environment2"))]
pub use clickboard_drivers::sensor;
#[doc(inline)]
#[cfg(feature = "calypso")]
pub use clickboard_drivers::wifi;

/// Commonly used types.
///
/// This module is meant to be glob imported.
pub mod prelude {
    pub use clickboard_core::{
        AddressMask, BusError, I2cInterface, RegisterInterface, SpiInterface, pin::NoPin,
    };

    #[cfg(any(feature = "lteiot11", feature = "lteiot19", feature = "nbiot7"))]
    pub use crate::cellular::{CellularError, CellularModem};
    #[cfg(feature = "lteiot11")]
    pub use crate::cellular::lteiot11::LteIot11;
    #[cfg(feature = "lteiot19")]
    pub use crate::cellular::lteiot19::LteIot19;
    #[cfg(feature = "nbiot7")]
    pub use crate::cellular::nbiot7::NbIot7;
    #[cfg(feature = "ntag5link")]
    pub use crate::nfc::ntag5link::{Ntag5Link, Ntag5LinkError};
    #[cfg(feature = "bt122a")]
    pub use crate::radio::bt122a::{Bt122a, Bt122aError};
    #[cfg(feature = "uwbtransceiver")]
    pub use crate::radio::uwbtransceiver::{UwbTransceiver, UwbTransceiverError};
    #[cfg(feature = "xbee3")]
    pub use crate::radio::xbee3::{Xbee3, Xbee3Error};
    #[cfg(feature = "rtc8")]
    pub use crate::rtc::rtc8::{self, Rtc8, Rtc8Error};
    #[cfg(feature = "accel21")]
    pub use crate::sensor::accel21::{Accel21, Accel21Error};
    #[cfg(feature = "environment2")]
    pub use crate::sensor::environment2::{Environment2, Environment2Error};
    #[cfg(feature = "calypso")]
    pub use crate::wifi::calypso::{Calypso, CalypsoError};
}
