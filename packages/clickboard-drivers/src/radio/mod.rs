//! Short range radio boards.
//!
//! - [`uwbtransceiver`]: IEEE 802.15.4 UWB transceiver (DW1000), SPI.
//! - [`bt122a`]: Bluetooth Classic module speaking binary BGAPI, UART.
//! - [`xbee3`]: Digi XBee 3 module in transparent or API mode, UART.

#[cfg(feature = "bt122a")]
pub mod bt122a;
#[cfg(feature = "uwbtransceiver")]
pub mod uwbtransceiver;
#[cfg(feature = "xbee3")]
pub mod xbee3;
