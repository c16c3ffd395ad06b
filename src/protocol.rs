//! IMC Command Protocol
//!
//! Protocol Overview:
//! - Format: one ASCII token per line, carriage-return terminated
//! - The IMC is a stateful line parser: an opcode line is followed by its parameter
//!   lines, in order, each sent as its own exchange
//! - Opcodes: `s` (set channel), `c` (cycle channel), `t` (toggle channel), `m` (mode)
//! - Modes: `1` = continuous streaming, `0` = idle/poll
//!
//! Acknowledgements are drained and logged by the transport but never interpreted, so an
//! operation "succeeds" when every exchange in its sequence completed without error.
//! A device that silently rejects a command is not detected.

use crate::channel::{ChannelId, ChannelTable};
use crate::error::AppResult;
use crate::logging::ControlLog;
use crate::transport::{Command, LinkTransport};
use std::fmt;

/// Command opcodes understood by the IMC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Set a channel on or off
    Set,
    /// Power-cycle a channel
    Cycle,
    /// Toggle a channel
    Toggle,
    /// Select telemetry mode
    Mode,
}

impl Opcode {
    /// Opcode character on the wire.
    pub fn as_char(self) -> char {
        match self {
            Opcode::Set => 's',
            Opcode::Cycle => 'c',
            Opcode::Toggle => 't',
            Opcode::Mode => 'm',
        }
    }
}

/// Requested channel power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Channel off (`0`)
    Off,
    /// Channel on (`1`)
    On,
}

impl PowerState {
    /// Wire value.
    pub fn code(self) -> u8 {
        match self {
            PowerState::Off => 0,
            PowerState::On => 1,
        }
    }
}

impl From<bool> for PowerState {
    fn from(on: bool) -> Self {
        if on {
            PowerState::On
        } else {
            PowerState::Off
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// IMC telemetry mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryMode {
    /// Idle / poll mode (`0`)
    Poll,
    /// Continuous streaming (`1`)
    Stream,
}

impl TelemetryMode {
    /// Wire value.
    pub fn code(self) -> u8 {
        match self {
            TelemetryMode::Poll => 0,
            TelemetryMode::Stream => 1,
        }
    }
}

impl fmt::Display for TelemetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Semantic IMC operations over a [`LinkTransport`].
pub struct ImcCommander<L> {
    link: L,
    channels: ChannelTable,
    payload_channels: [ChannelId; 2],
    log: ControlLog,
}

impl<L: LinkTransport> ImcCommander<L> {
    /// Create a commander.
    ///
    /// `payload_channels` are switched by [`activate_payload`](Self::activate_payload) and
    /// [`deactivate_payload`](Self::deactivate_payload), in the given order.
    pub fn new(
        link: L,
        channels: ChannelTable,
        payload_channels: [ChannelId; 2],
        log: ControlLog,
    ) -> Self {
        Self {
            link,
            channels,
            payload_channels,
            log,
        }
    }

    /// The underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// The channel → device table.
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// The control log used for command events.
    pub fn log(&self) -> &ControlLog {
        &self.log
    }

    /// Send each command as its own exchange, stopping at the first failure.
    async fn send_sequence(&self, commands: &[Command]) -> AppResult<()> {
        for command in commands {
            self.link.exchange(command).await?;
        }
        Ok(())
    }

    /// Switch a channel on or off: `s`, channel, state.
    pub async fn set_channel(&self, channel: ChannelId, state: PowerState) -> AppResult<()> {
        let device = self.channels.label(channel);
        self.log.pending(format!("SET: {} {}", device, state));
        self.send_sequence(&[
            Command::new(Opcode::Set.as_char()),
            Command::new(channel),
            Command::new(state),
        ])
        .await?;
        self.log.done(format!("SET: {} {}", device, state));
        Ok(())
    }

    /// Power-cycle a channel: `c`, channel.
    pub async fn cycle_channel(&self, channel: ChannelId) -> AppResult<()> {
        let device = self.channels.label(channel);
        self.log.pending(format!("CYCLE: {}", device));
        self.send_sequence(&[Command::new(Opcode::Cycle.as_char()), Command::new(channel)])
            .await?;
        self.log.done(format!("CYCLE: {}", device));
        Ok(())
    }

    /// Toggle a channel: `t`, channel.
    pub async fn toggle_channel(&self, channel: ChannelId) -> AppResult<()> {
        let device = self.channels.label(channel);
        self.log.pending(format!("TOGGLE: {}", device));
        self.send_sequence(&[Command::new(Opcode::Toggle.as_char()), Command::new(channel)])
            .await?;
        self.log.done(format!("TOGGLE: {}", device));
        Ok(())
    }

    /// Select the telemetry mode: `m`, mode.
    pub async fn set_mode(&self, mode: TelemetryMode) -> AppResult<()> {
        self.log.pending(format!("MODE: {}", mode));
        self.send_sequence(&[Command::new(Opcode::Mode.as_char()), Command::new(mode)])
            .await?;
        self.log.done(format!("MODE: {}", mode));
        Ok(())
    }

    /// Power on both payload channels, in order.
    pub async fn activate_payload(&self) -> AppResult<()> {
        for channel in self.payload_channels {
            self.set_channel(channel, PowerState::On).await?;
        }
        self.log.done("PYL ACTIVE");
        Ok(())
    }

    /// Power off both payload channels, in order.
    pub async fn deactivate_payload(&self) -> AppResult<()> {
        for channel in self.payload_channels {
            self.set_channel(channel, PowerState::Off).await?;
        }
        self.log.done("PYL DISABLED");
        Ok(())
    }
}
