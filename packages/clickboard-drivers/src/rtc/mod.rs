//! Real-time clock boards.

#[cfg(feature = "rtc8")]
pub mod rtc8;
