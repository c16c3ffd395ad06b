//! In-memory log streams for tests and dry runs.

use super::{LogSink, LogStream};
use crate::error::AppResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A stream that keeps every appended line.
pub struct MemoryLogStream {
    name: String,
    lines: Mutex<Vec<String>>,
}

impl MemoryLogStream {
    /// Create an empty stream.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of all lines appended so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl LogStream for MemoryLogStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&self, line: &str) -> AppResult<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

/// Sink that hands out [`MemoryLogStream`]s and remembers them by name.
///
/// Creating a stream with a name that already exists returns the existing stream.
#[derive(Clone, Default)]
pub struct MemoryLogSink {
    streams: Arc<Mutex<HashMap<String, Arc<MemoryLogStream>>>>,
}

impl MemoryLogSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stream by name.
    pub fn stream(&self, name: &str) -> Option<Arc<MemoryLogStream>> {
        self.streams.lock().get(name).cloned()
    }

    /// Lines of a stream, or nothing if it was never created.
    pub fn lines(&self, name: &str) -> Vec<String> {
        self.stream(name).map(|s| s.lines()).unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn create_stream(
        &self,
        name: &str,
        _directory: &Path,
        _base_filename: &str,
        header: Option<&str>,
    ) -> AppResult<Arc<dyn LogStream>> {
        let mut streams = self.streams.lock();
        if let Some(existing) = streams.get(name) {
            return Ok(existing.clone());
        }

        let stream = Arc::new(MemoryLogStream::new(name));
        if let Some(header) = header {
            stream.append(header)?;
        }
        streams.insert(name.to_string(), stream.clone());
        Ok(stream)
    }
}
