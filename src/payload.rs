//! Peer payload instrument worker.
//!
//! The instrument is the second worker the supervisor runs next to the IMC sampling loop.
//! It owns its own serial link (never the IMC's) and copies each line the instrument emits
//! into its data stream. An empty read is just a quiet period here: unlike the IMC
//! stream, a silent instrument is not treated as link death.

use crate::clock::{Sleeper, TokioSleeper};
use crate::error::{AppResult, ImcError};
use crate::logging::{ControlLog, LogStream};
use crate::shutdown::ShutdownListener;
use crate::transport::LinkTransport;
use crate::worker::{SupervisedWorker, WorkerSummary};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Reads lines from a payload instrument and logs them.
pub struct InstrumentLogger<L> {
    name: String,
    link: L,
    data: Arc<dyn LogStream>,
    log: ControlLog,
    interval: Duration,
    samples: u64,
    sleeper: Arc<dyn Sleeper>,
}

impl<L: LinkTransport> InstrumentLogger<L> {
    /// Create a logger reading at `frequency_hz`.
    ///
    /// `samples` is the number of lines to log before finishing; `0` runs until shutdown.
    ///
    /// # Errors
    /// Returns an error if `frequency_hz` is not a positive number.
    pub fn new(
        name: impl Into<String>,
        link: L,
        data: Arc<dyn LogStream>,
        log: ControlLog,
        frequency_hz: f64,
        samples: u64,
    ) -> AppResult<Self> {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(ImcError::Configuration(format!(
                "instrument frequency must be positive, got {}",
                frequency_hz
            )));
        }
        Ok(Self {
            name: name.into(),
            link,
            data,
            log,
            interval: Duration::from_secs_f64(1.0 / frequency_hz),
            samples,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Set the sleeper used for pacing.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The instrument link.
    pub fn link(&self) -> &L {
        &self.link
    }

    async fn run(&self, mut shutdown: ShutdownListener) -> AppResult<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        self.log.pending(format!("{} SAMPLING", self.name));

        while self.samples == 0 || summary.samples < self.samples {
            let paced = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                _ = self.sleeper.sleep(self.interval) => true,
            };
            if !paced {
                summary.cancelled = true;
                break;
            }

            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                read = self.link.read_line() => read,
            };

            match read {
                Ok(line) => {
                    let line = line.trim_end_matches(&['\r', '\n'][..]);
                    if line.is_empty() {
                        continue;
                    }
                    self.data.append(line)?;
                    summary.samples += 1;
                }
                Err(e) => self.log.fault(format!("{} READ: {}", self.name, e)),
            }
        }

        self.log.done(format!("{} SAMPLING", self.name));
        Ok(summary)
    }
}

#[async_trait]
impl<L: LinkTransport + 'static> SupervisedWorker for InstrumentLogger<L> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn sample(&mut self, shutdown: ShutdownListener) -> AppResult<WorkerSummary> {
        self.run(shutdown).await
    }
}

/// Stand-in worker used when no payload instrument is configured.
pub struct IdleInstrument {
    log: ControlLog,
}

impl IdleInstrument {
    /// Create an idle worker that reports through `log`.
    pub fn new(log: ControlLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl SupervisedWorker for IdleInstrument {
    fn name(&self) -> &str {
        "payload"
    }

    async fn sample(&mut self, _shutdown: ShutdownListener) -> AppResult<WorkerSummary> {
        self.log.done("NO PAYLOAD INSTRUMENT ATTACHED");
        Ok(WorkerSummary::default())
    }
}
