//! Append-only log streams.
//!
//! Every logical record stream (control events, power telemetry, ambient light, instrument
//! data) is a [`LogStream`]: a handle that appends whole lines. Streams are created through
//! a [`LogSink`], which decides where they live:
//!
//! - [`FileLogSink`] writes date-rotated files on disk.
//! - [`MemoryLogSink`] keeps lines in memory so tests can inspect them.
//!
//! Handles are passed to each component at construction; nothing in the crate reaches for
//! a process-wide logger. An `append` always lands as one complete line, even when several
//! workers share a stream.

mod control;
mod file;
mod memory;

pub use control::{ControlLog, Marker};
pub use file::{FileLogSink, FileLogStream};
pub use memory::{MemoryLogSink, MemoryLogStream};

use crate::config::LoggingConfig;
use crate::error::AppResult;
use std::path::Path;
use std::sync::Arc;

/// Header of the power telemetry stream.
pub const POWER_HEADER: &str = "DEVICE,CHANNEL,STATE,VOLTAGE(V),CURRENT(mA)";

/// Header of the ambient-light stream.
pub const AMBIENT_HEADER: &str = "PAR";

/// A single append-only record stream.
pub trait LogStream: Send + Sync {
    /// Stream name, for diagnostics.
    fn name(&self) -> &str;

    /// Append one line. The line must not contain a newline.
    fn append(&self, line: &str) -> AppResult<()>;
}

/// Factory for log streams.
pub trait LogSink: Send + Sync {
    /// Create a stream named `name`, stored under `directory` using `base_filename`.
    ///
    /// `header`, when given, is written once as the first line of the stream.
    fn create_stream(
        &self,
        name: &str,
        directory: &Path,
        base_filename: &str,
        header: Option<&str>,
    ) -> AppResult<Arc<dyn LogStream>>;
}

/// The streams used by the IMC sampling loop.
#[derive(Clone)]
pub struct ImcStreams {
    /// Control events (commands, faults, restarts)
    pub control: ControlLog,
    /// One line per channel record
    pub power: Arc<dyn LogStream>,
    /// One ambient reading per channel record
    pub ambient: Arc<dyn LogStream>,
}

impl ImcStreams {
    /// Create the control, power and ambient streams in the configured directories.
    pub fn create(sink: &dyn LogSink, config: &LoggingConfig) -> AppResult<Self> {
        let imc_dir = config.directory.join("imc");
        let control = sink.create_stream("imc_control", &imc_dir, "imc_control_log", None)?;
        let power = sink.create_stream(
            "imc_power",
            &imc_dir.join("power_logs"),
            "imc_power_log",
            Some(POWER_HEADER),
        )?;
        let ambient = sink.create_stream(
            "par",
            &config.data_directory.join("par"),
            "par",
            Some(AMBIENT_HEADER),
        )?;

        Ok(Self {
            control: ControlLog::new(control, "IMC Control"),
            power,
            ambient,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn imc_streams_write_headers_once() {
        let sink = MemoryLogSink::new();
        let config = LoggingConfig {
            directory: PathBuf::from("logs"),
            data_directory: PathBuf::from("data"),
        };

        let streams = ImcStreams::create(&sink, &config).unwrap();
        streams.power.append("par,4,1,5.0,50").unwrap();

        assert_eq!(
            sink.lines("imc_power"),
            vec![POWER_HEADER.to_string(), "par,4,1,5.0,50".to_string()]
        );
        assert_eq!(sink.lines("par"), vec![AMBIENT_HEADER.to_string()]);
        assert!(sink.lines("imc_control").is_empty());
    }
}
