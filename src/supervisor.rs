//! Core Supervisor
//!
//! Starts the IMC sampling loop and the payload instrument worker as two independent tokio
//! tasks and waits for both. The workers share nothing but their log stream handles.
//!
//! Whatever escapes a worker (an error or a panic) is caught at the join boundary, written
//! to the supervisor log and turned into a [`WorkerOutcome`]. The sibling keeps running: the
//! supervisor never cancels one worker because the other ended. Only an explicit
//! [`ShutdownSignal::trigger`] asks both to stop.

use crate::config::ImcConfig;
use crate::error::AppResult;
use crate::logging::{ControlLog, ImcStreams, LogSink};
use crate::payload::{IdleInstrument, InstrumentLogger};
use crate::protocol::ImcCommander;
use crate::session::{RestartPolicy, SamplingLoop, SamplingPlan};
use crate::shutdown::ShutdownSignal;
use crate::transport::{SerialLink, SerialPortOpener};
use crate::worker::{SupervisedWorker, WorkerSummary};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;

/// How one worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The worker returned normally
    Completed(WorkerSummary),
    /// The worker returned an error
    Faulted(String),
    /// The worker task panicked
    Panicked(String),
}

impl WorkerOutcome {
    /// Whether the worker ended without a fault.
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Completed(_))
    }
}

/// Overall result of a supervisor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Both workers completed
    Success,
    /// At least one worker faulted or panicked
    Failure,
}

/// One worker's name and outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker name
    pub name: String,
    /// How it ended
    pub outcome: WorkerOutcome,
}

/// Outcomes of both workers plus the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Per-worker outcomes: sampling loop first, payload second
    pub workers: Vec<WorkerReport>,
    /// `Failure` if any worker faulted or panicked
    pub outcome: Outcome,
}

/// Runs the sampling loop and the payload worker side by side.
pub struct CoreSupervisor {
    sampling: Box<dyn SupervisedWorker>,
    payload: Box<dyn SupervisedWorker>,
    log: ControlLog,
    signal: Arc<ShutdownSignal>,
}

impl CoreSupervisor {
    /// Create a supervisor over two workers.
    pub fn new(
        sampling: Box<dyn SupervisedWorker>,
        payload: Box<dyn SupervisedWorker>,
        log: ControlLog,
    ) -> Self {
        let (signal, _) = ShutdownSignal::new();
        Self {
            sampling,
            payload,
            log,
            signal: Arc::new(signal),
        }
    }

    /// Build the serial links, log streams and workers described by `config`.
    ///
    /// No port is opened here; each link opens its port per exchange once running.
    pub fn from_config(config: &ImcConfig, sink: &dyn LogSink) -> AppResult<Self> {
        let supervisor_stream =
            sink.create_stream("supervisor", &config.logging.directory, "core_log", None)?;
        let streams = ImcStreams::create(sink, &config.logging)?;

        let imc = &config.imc;
        let link = SerialLink::new(
            SerialPortOpener::new(imc.port.clone(), imc.baud_rate),
            imc.read_timeout(),
            imc.drain_window(),
            streams.control.clone(),
        );
        let commander = ImcCommander::new(
            link,
            config.channel_table()?,
            config.payload_channels()?,
            streams.control.clone(),
        );
        let plan = SamplingPlan::new(config.sampling.samples, config.sampling.frequency_hz)?;
        let sampling = SamplingLoop::new(commander, streams.power, streams.ambient, plan)
            .with_restart_policy(RestartPolicy {
                cooldown: config.sampling.restart_cooldown(),
                max_restarts: config.sampling.max_restarts,
            });

        let payload_log = ControlLog::new(supervisor_stream.clone(), "Payload");
        let payload: Box<dyn SupervisedWorker> = match &config.payload {
            Some(instrument) => {
                let data = sink.create_stream(
                    &instrument.name,
                    &config.logging.data_directory.join(&instrument.name),
                    &instrument.name,
                    None,
                )?;
                let link = SerialLink::new(
                    SerialPortOpener::new(instrument.port.clone(), instrument.baud_rate),
                    Duration::from_millis(instrument.read_timeout_ms),
                    imc.drain_window(),
                    payload_log.clone(),
                );
                Box::new(InstrumentLogger::new(
                    instrument.name.clone(),
                    link,
                    data,
                    payload_log,
                    instrument.frequency_hz,
                    instrument.samples,
                )?)
            }
            None => Box::new(IdleInstrument::new(payload_log)),
        };

        Ok(Self::new(
            Box::new(sampling),
            payload,
            ControlLog::new(supervisor_stream, "Core"),
        ))
    }

    /// Handle used to request shutdown of both workers.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.signal)
    }

    /// Start both workers and wait until both have finished.
    pub async fn run(self) -> SupervisorReport {
        let Self {
            mut sampling,
            mut payload,
            log,
            signal,
        } = self;

        let sampling_name = sampling.name().to_string();
        let payload_name = payload.name().to_string();
        log.pending(format!("START {} + {}", sampling_name, payload_name));

        let sampling_listener = signal.listener();
        let sampling_task =
            tokio::spawn(async move { sampling.sample(sampling_listener).await });
        let payload_listener = signal.listener();
        let payload_task = tokio::spawn(async move { payload.sample(payload_listener).await });

        let (sampling_result, payload_result) = tokio::join!(sampling_task, payload_task);

        let workers = vec![
            settle(&log, sampling_name, sampling_result),
            settle(&log, payload_name, payload_result),
        ];
        let outcome = if workers.iter().all(|w| w.outcome.is_success()) {
            log.done("ALL WORKERS FINISHED");
            Outcome::Success
        } else {
            log.fault("WORKER FAILURE");
            Outcome::Failure
        };

        SupervisorReport { workers, outcome }
    }
}

fn settle(
    log: &ControlLog,
    name: String,
    result: Result<AppResult<WorkerSummary>, JoinError>,
) -> WorkerReport {
    let outcome = match result {
        Ok(Ok(summary)) => {
            log.done(format!(
                "{} FINISHED: {} samples, {} restarts{}",
                name,
                summary.samples,
                summary.restarts,
                if summary.cancelled { " (shutdown)" } else { "" }
            ));
            WorkerOutcome::Completed(summary)
        }
        Ok(Err(e)) => {
            log.fault(format!("{} FAILED: {}", name, e));
            WorkerOutcome::Faulted(e.to_string())
        }
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            log.fault(format!("{} PANICKED: {}", name, message));
            WorkerOutcome::Panicked(message)
        }
        Err(e) => {
            log.fault(format!("{} ABORTED: {}", name, e));
            WorkerOutcome::Faulted(e.to_string())
        }
    };
    WorkerReport { name, outcome }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
