//! NFC boards.
//!
//! - [`ntag5link`]: NFC Forum Type 5 tag with an I2C host interface (NTAG 5 link).
//! - [`ndef`]: builders for the NDEF records and TLVs written to tag memory.

pub mod ndef;
pub mod ntag5link;
