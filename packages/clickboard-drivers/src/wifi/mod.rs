//! Wi-Fi modules.

#[cfg(feature = "calypso")]
pub mod calypso;
