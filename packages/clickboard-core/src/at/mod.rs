//! AT command plumbing.
//!
//! Modems and radio modules on Click boards speak line-based ASCII command protocols derived
//! from the Hayes command set. A command is written to the UART, then the driver polls the
//! UART into a bounded response buffer until a line matching one of the dialect's final result
//! codes arrives, or a millisecond budget runs out.
//!
//! - [`AtCommand`] encodes the four command shapes (`run`, `set`, `get`, `test`).
//! - [`ResponseBuffer`] accumulates response bytes and recognises result codes.
//! - [`AtPort`] owns the UART and a delay and ties the two together.
//!
//! There is no retry and no resynchronisation: if no result code arrives in time the caller
//! gets [`AtError::Timeout`] and decides what to do.

mod command;
mod port;
mod response;

pub use command::{AtCommand, TextBuffer};
pub use port::AtPort;
pub use response::{Outcome, ResponseBuffer, ResponseTokens};
use snafu::Snafu;

use crate::BusError;

/// The default budget for a command's final result code.
pub const DEFAULT_TIMEOUT_MS: u32 = 5_000;

/// Errors that can occur while exchanging AT commands.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Snafu)]
pub enum AtError {
    /// No final result code arrived within the budget.
    #[snafu(display("no response within {timeout_ms} ms"))]
    Timeout {
        /// The budget that was exhausted.
        timeout_ms: u32,
    },

    /// The device answered with an error result code.
    Command,

    /// A command argument did not fit into its fixed-size buffer.
    Format,

    /// The device answered, but not in the expected shape.
    UnexpectedResponse,

    /// Generic bus related error.
    #[snafu(transparent)]
    Bus {
        /// The source of the error.
        source: BusError,
    },
}
