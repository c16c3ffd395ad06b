//! Link Transport
//!
//! The IMC sits on a half-duplex, single-peer serial link. Every interaction is one short
//! session: open the port, write one carriage-return terminated command (or wait for one
//! telemetry line), then close the port again. Nothing is held open across a blocking read.
//!
//! - [`LinkTransport`] is the seam used by the command protocol and the sampling loop.
//! - [`SerialLink`] implements it over any [`PortOpener`]; [`SerialPortOpener`] opens the
//!   real device.
//! - [`mock::MockLink`] is a scripted transport for tests.
//!
//! The transport never retries; callers decide what a failure means.

pub mod mock;
mod serial;

pub use serial::{DynSerial, PortOpener, SerialLink, SerialPortIO, SerialPortOpener};

use crate::error::AppResult;
use async_trait::async_trait;
use std::fmt;

/// Command terminator expected by the IMC line parser.
pub const COMMAND_TERMINATOR: char = '\r';

/// One command line: an opcode or a single parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    token: String,
}

impl Command {
    /// Build a command from its token (without terminator).
    pub fn new(token: impl fmt::Display) -> Self {
        Self {
            token: token.to_string(),
        }
    }

    /// The token as written before the terminator.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Bytes on the wire: token followed by a carriage return.
    pub fn wire(&self) -> String {
        format!("{}{}", self.token, COMMAND_TERMINATOR)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// A half-duplex link to one device.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Send one command in its own session, draining and logging any immediate response.
    async fn exchange(&self, command: &Command) -> AppResult<()>;

    /// Wait (bounded) for one line.
    ///
    /// Returns an empty string if nothing arrived before the timeout. Callers in the
    /// streaming loop treat that as a dead link.
    async fn read_line(&self) -> AppResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_carriage_return_terminated() {
        let cmd = Command::new('s');
        assert_eq!(cmd.token(), "s");
        assert_eq!(cmd.wire(), "s\r");
        assert_eq!(Command::new(3).wire(), "3\r");
        assert_eq!(cmd.to_string(), "s");
    }
}
