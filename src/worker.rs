//! The interface the supervisor uses to run long-lived loops.

use crate::error::AppResult;
use crate::shutdown::ShutdownListener;
use async_trait::async_trait;

/// What a worker reports when it finishes cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Samples (telemetry frames or instrument lines) logged
    pub samples: u64,
    /// Times the worker restarted its own session
    pub restarts: u32,
    /// Whether the worker stopped because shutdown was requested
    pub cancelled: bool,
}

/// A long-running loop started by the supervisor.
///
/// `sample` runs until the worker's own completion condition (sample budget, restart
/// limit, fault) or until `shutdown` fires. Errors returned here are the faults the
/// supervisor reports.
#[async_trait]
pub trait SupervisedWorker: Send {
    /// Name used in supervisor logs.
    fn name(&self) -> &str;

    /// Run to completion.
    async fn sample(&mut self, shutdown: ShutdownListener) -> AppResult<WorkerSummary>;
}
