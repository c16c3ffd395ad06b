//! Date-rotated, append-only log files.
//!
//! A stream named `imc_power` with base filename `imc_power_log` in `logs/imc` writes to
//! `logs/imc/imc_power_log_2026-10-16.log`, moving to a new file when the local date
//! changes. Each line is prefixed with a local timestamp.

use super::{LogSink, LogStream};
use crate::error::{AppResult, ImcError};
use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct OpenFile {
    date: NaiveDate,
    file: File,
}

/// A file-backed [`LogStream`].
pub struct FileLogStream {
    name: String,
    directory: PathBuf,
    base_filename: String,
    current: Mutex<OpenFile>,
}

impl FileLogStream {
    /// Open (or create) today's file for the stream and write the optional header.
    pub fn open(
        name: &str,
        directory: &Path,
        base_filename: &str,
        header: Option<&str>,
    ) -> AppResult<Self> {
        fs::create_dir_all(directory).map_err(|source| ImcError::LogStream {
            stream: name.to_string(),
            source,
        })?;

        let date = Local::now().date_naive();
        let file = open_for_date(directory, base_filename, date).map_err(|source| {
            ImcError::LogStream {
                stream: name.to_string(),
                source,
            }
        })?;

        let stream = Self {
            name: name.to_string(),
            directory: directory.to_path_buf(),
            base_filename: base_filename.to_string(),
            current: Mutex::new(OpenFile { date, file }),
        };

        if let Some(header) = header {
            stream.append(header)?;
        }
        Ok(stream)
    }

    /// Path of the file currently being written.
    pub fn current_path(&self) -> PathBuf {
        let date = self.current.lock().date;
        file_path(&self.directory, &self.base_filename, date)
    }
}

impl LogStream for FileLogStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&self, line: &str) -> AppResult<()> {
        let now = Local::now();
        let entry = format!("{} {}\n", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);

        let mut current = self.current.lock();
        let result = (|| {
            if now.date_naive() != current.date {
                let date = now.date_naive();
                current.file = open_for_date(&self.directory, &self.base_filename, date)?;
                current.date = date;
            }
            // One write per line keeps concurrent appenders from interleaving
            current.file.write_all(entry.as_bytes())
        })();

        result.map_err(|source| ImcError::LogStream {
            stream: self.name.clone(),
            source,
        })
    }
}

fn file_path(directory: &Path, base_filename: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}_{}.log", base_filename, date.format("%Y-%m-%d")))
}

fn open_for_date(directory: &Path, base_filename: &str, date: NaiveDate) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path(directory, base_filename, date))
}

/// Sink creating [`FileLogStream`]s under a root directory.
///
/// Directories passed to `create_stream` are resolved relative to the root.
#[derive(Debug, Clone)]
pub struct FileLogSink {
    root: PathBuf,
}

impl FileLogSink {
    /// Create a sink rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LogSink for FileLogSink {
    fn create_stream(
        &self,
        name: &str,
        directory: &Path,
        base_filename: &str,
        header: Option<&str>,
    ) -> AppResult<Arc<dyn LogStream>> {
        let stream = FileLogStream::open(name, &self.root.join(directory), base_filename, header)?;
        tracing::debug!(stream = name, path = %stream.current_path().display(), "log stream opened");
        Ok(Arc::new(stream))
    }
}
