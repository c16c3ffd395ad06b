//! Control-event log with severity markers.

use super::LogStream;
use std::fmt::Display;
use std::sync::Arc;

/// Severity marker written at the start of every control-log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// An operation is about to run (`[o]`)
    Pending,
    /// An operation completed (`[+]`)
    Done,
    /// Something failed (`[-]`)
    Fault,
    /// The sampling session is being restarted (`[x]`)
    Restart,
}

impl Marker {
    /// The marker text.
    pub fn symbol(self) -> &'static str {
        match self {
            Marker::Pending => "[o]",
            Marker::Done => "[+]",
            Marker::Fault => "[-]",
            Marker::Restart => "[x]",
        }
    }
}

/// System/control log for one component.
///
/// Lines look like `[o] (IMC Control) TX: s`. Each line is also emitted as a `tracing`
/// event so it shows up on the console. Failing to append is reported through `tracing`
/// and otherwise ignored: losing a log line must not stop the control loop.
#[derive(Clone)]
pub struct ControlLog {
    stream: Arc<dyn LogStream>,
    component: &'static str,
}

impl ControlLog {
    /// Wrap a stream for a component (e.g. `"IMC Control"`).
    pub fn new(stream: Arc<dyn LogStream>, component: &'static str) -> Self {
        Self { stream, component }
    }

    /// Log an operation about to start.
    pub fn pending(&self, message: impl Display) {
        self.write(Marker::Pending, message);
    }

    /// Log a completed operation.
    pub fn done(&self, message: impl Display) {
        self.write(Marker::Done, message);
    }

    /// Log a fault.
    pub fn fault(&self, message: impl Display) {
        self.write(Marker::Fault, message);
    }

    /// Log a session restart.
    pub fn restart(&self, message: impl Display) {
        self.write(Marker::Restart, message);
    }

    /// Log with an explicit marker.
    pub fn write(&self, marker: Marker, message: impl Display) {
        let line = format!("{} ({}) {}", marker.symbol(), self.component, message);

        match marker {
            Marker::Fault | Marker::Restart => {
                tracing::warn!(component = self.component, "{}", line)
            }
            Marker::Pending | Marker::Done => {
                tracing::info!(component = self.component, "{}", line)
            }
        }

        if let Err(e) = self.stream.append(&line) {
            tracing::warn!(stream = self.stream.name(), error = %e, "control log append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemoryLogStream;
    use tracing_test::traced_test;

    #[test]
    fn lines_carry_marker_and_component() {
        let stream = Arc::new(MemoryLogStream::new("imc_control"));
        let log = ControlLog::new(stream.clone(), "IMC Control");

        log.pending("MODE: 1");
        log.done("MODE: 1");
        log.fault("NO DATA FROM IMC");
        log.restart("RESTART SAMPLING");

        assert_eq!(
            stream.lines(),
            vec![
                "[o] (IMC Control) MODE: 1",
                "[+] (IMC Control) MODE: 1",
                "[-] (IMC Control) NO DATA FROM IMC",
                "[x] (IMC Control) RESTART SAMPLING",
            ]
        );
    }

    #[test]
    #[traced_test]
    fn lines_are_mirrored_to_tracing() {
        let log = ControlLog::new(Arc::new(MemoryLogStream::new("imc_control")), "IMC Control");

        log.fault("NO DATA FROM IMC");
        log.done("PYL ACTIVE");

        assert!(logs_contain("[-] (IMC Control) NO DATA FROM IMC"));
        assert!(logs_contain("[+] (IMC Control) PYL ACTIVE"));
    }
}
