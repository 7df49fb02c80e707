//! Sensor boards.
//!
//! - [`accel21`]: 3-axis accelerometer (LIS2DH12), I2C or SPI.
//! - [`environment2`]: temperature, humidity and VOC index (SHT40 + SGP40), I2C.

#[cfg(feature = "accel21")]
pub mod accel21;
#[cfg(feature = "environment2")]
pub mod environment2;
