//! Low level plumbing shared by every [`clickboard`](https://crates.io/crates/clickboard) driver.
//!
//! Click boards talk to the host over the MikroBUS header: I2C, SPI, UART and a handful of
//! GPIO lines. This crate does not implement any of those buses. It consumes the
//! [`embedded-hal`](embedded_hal) and [`embedded-io`](embedded_io) traits instead and adds the
//! small amount of glue every driver needs on top of them.
//!
//! Included in this crate:
//! - A bus error type that erases the HAL's error types: [`BusError`]
//! - Register transports with per-device address masks: [`interface`]
//! - Placeholder and pulse helpers for control lines: [`pin`]
//! - Millisecond busy-wait counters: [`time`]
//! - AT command encoding and response polling: [`at`]
//! - Host-side bus doubles for tests (feature `mock`): `mock`

#![cfg_attr(not(any(test, feature = "mock")), no_std)]

pub mod at;
pub mod error;
pub mod interface;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pin;
pub mod time;

pub use error::{Accumulator, BusError};
pub use interface::{AddressMask, I2cInterface, RegisterInterface, SpiInterface};
