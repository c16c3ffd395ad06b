//! Scripted link transport for testing without an IMC attached.
//!
//! `MockLink` records every exchanged command token and every read, in order, and replays
//! a queue of scripted read results. Once the script runs out, every read times out
//! (returns an empty line), which is what a dead link looks like.
//!
//! # Example
//!
//! ```rust
//! use imc_core::transport::mock::{LinkEvent, MockLink};
//! use imc_core::transport::{Command, LinkTransport};
//!
//! # tokio_test::block_on(async {
//! let link = MockLink::new();
//! link.push_line("1,1,5.0,50;300.5");
//!
//! link.exchange(&Command::new('m')).await.unwrap();
//! assert_eq!(link.read_line().await.unwrap(), "1,1,5.0,50;300.5");
//! assert_eq!(link.read_line().await.unwrap(), "");
//! assert_eq!(link.commands(), vec!["m"]);
//! assert_eq!(link.events().last(), Some(&LinkEvent::Read));
//! # });
//! ```

use super::{Command, LinkTransport};
use crate::error::{AppResult, ImcError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// One scripted result for `read_line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRead {
    /// A line arrives
    Line(String),
    /// Nothing arrives before the timeout
    Silence,
    /// The read fails with a transport error
    Fault(String),
}

/// Something that happened on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A command was exchanged (token without terminator)
    Exchange(String),
    /// A read was attempted
    Read,
}

#[derive(Default)]
struct MockState {
    reads: VecDeque<ScriptedRead>,
    events: Vec<LinkEvent>,
    failing_exchanges: usize,
}

/// Scripted [`LinkTransport`]. Clones share the same script and event log.
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// A link with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// A link with the given read script.
    pub fn with_reads(reads: impl IntoIterator<Item = ScriptedRead>) -> Self {
        let link = Self::new();
        link.state.lock().reads.extend(reads);
        link
    }

    /// Queue a line.
    pub fn push_line(&self, line: impl Into<String>) {
        self.state.lock().reads.push_back(ScriptedRead::Line(line.into()));
    }

    /// Queue a timed-out read.
    pub fn push_silence(&self) {
        self.state.lock().reads.push_back(ScriptedRead::Silence);
    }

    /// Queue a failing read.
    pub fn push_fault(&self, message: impl Into<String>) {
        self.state
            .lock()
            .reads
            .push_back(ScriptedRead::Fault(message.into()));
    }

    /// Make the next `count` exchanges fail with a transport error.
    pub fn fail_next_exchanges(&self, count: usize) {
        self.state.lock().failing_exchanges = count;
    }

    /// Everything that happened on the link, in order.
    pub fn events(&self) -> Vec<LinkEvent> {
        self.state.lock().events.clone()
    }

    /// Tokens of all exchanged commands, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                LinkEvent::Exchange(token) => Some(token.clone()),
                LinkEvent::Read => None,
            })
            .collect()
    }

    /// Number of reads attempted.
    pub fn read_count(&self) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, LinkEvent::Read))
            .count()
    }

    /// Scripted reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.state.lock().reads.len()
    }
}

#[async_trait]
impl LinkTransport for MockLink {
    async fn exchange(&self, command: &Command) -> AppResult<()> {
        let mut state = self.state.lock();
        state
            .events
            .push(LinkEvent::Exchange(command.token().to_string()));
        if state.failing_exchanges > 0 {
            state.failing_exchanges -= 1;
            return Err(ImcError::Transport(format!(
                "scripted failure sending '{}'",
                command
            )));
        }
        Ok(())
    }

    async fn read_line(&self) -> AppResult<String> {
        let mut state = self.state.lock();
        state.events.push(LinkEvent::Read);
        match state.reads.pop_front() {
            Some(ScriptedRead::Line(line)) => Ok(line),
            Some(ScriptedRead::Silence) | None => Ok(String::new()),
            Some(ScriptedRead::Fault(message)) => Err(ImcError::Transport(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_then_goes_silent() {
        let link = MockLink::with_reads(vec![
            ScriptedRead::Line("a".into()),
            ScriptedRead::Fault("framing".into()),
        ]);

        assert_eq!(link.read_line().await.unwrap(), "a");
        assert!(link.read_line().await.is_err());
        assert_eq!(link.read_line().await.unwrap(), "");
        assert_eq!(link.read_count(), 3);
        assert_eq!(link.pending_reads(), 0);
    }

    #[tokio::test]
    async fn scripted_exchange_failures_are_recorded() {
        let link = MockLink::new();
        link.fail_next_exchanges(1);

        assert!(link.exchange(&Command::new('s')).await.is_err());
        assert!(link.exchange(&Command::new(3)).await.is_ok());
        assert_eq!(link.commands(), vec!["s", "3"]);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let link = MockLink::new();
        let handle = link.clone();
        link.exchange(&Command::new('t')).await.unwrap();
        assert_eq!(handle.events(), vec![LinkEvent::Exchange("t".into())]);
    }
}
