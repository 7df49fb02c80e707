//! Drivers for MikroElektronika Click boards.
//!
//! # Overview
//!
//! Every driver in this crate is a thin, blocking shim between a Click board and the
//! [`embedded-hal`](embedded_hal) / [`embedded-io`](embedded_io) traits implemented by your
//! microcontroller's HAL. Drivers own the bus handle and control pins they are given, keep a
//! small amount of cached device state, and hand everything back through `release`.
//!
//! Register devices are generic over a [`RegisterInterface`](clickboard_core::RegisterInterface),
//! so the same driver works on whichever bus the board is jumpered for:
//!
//! ```ignore
//! use clickboard_core::{AddressMask, I2cInterface, pin::NoPin};
//! use clickboard_drivers::sensor::accel21::{Accel21, I2C_ADDRESS_HIGH};
//!
//! let interface = I2cInterface::new(i2c, I2C_ADDRESS_HIGH, AddressMask::multi(0x80));
//! let mut accel = Accel21::new(interface, NoPin, Default::default());
//! accel.init()?;
//! accel.default_cfg()?;
//! let mg = accel.axes_mg()?;
//! ```
//!
//! Command devices (modems and radio modules) are generic over a UART and a delay, and speak
//! through an [`AtPort`](clickboard_core::at::AtPort) or their own binary framing.
//!
//! Drivers are grouped by category and each one is gated behind a cargo feature of the same
//! name. All of them are enabled by default.

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "cellular")]
pub mod cellular;
#[cfg(feature = "ntag5link")]
pub mod nfc;
#[cfg(any(feature = "uwbtransceiver", feature = "bt122a", feature = "xbee3"))]
pub mod radio;
#[cfg(feature = "rtc8")]
pub mod rtc;
#[cfg(any(feature = "accel21", feature = "environment2"))]
pub mod sensor;
#[cfg(feature = "calypso")]
pub mod wifi;
