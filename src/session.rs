//! Sampling Session
//!
//! One session is a bounded arm → stream → deactivate cycle:
//!
//! ```text
//! IDLE ──activate payload, mode 1──▶ ARMED ──▶ STREAMING ──budget spent──┐
//!                                                 │                      │
//!                                          empty read                    │
//!                                                 ▼                      ▼
//!                                              STALLED ──────────▶ DEACTIVATING ──▶ IDLE
//! ```
//!
//! - Each sample waits `1 / frequency` (a pacing ceiling, not a real-time guarantee), then
//!   reads one line.
//! - A read error or a bad line costs only that sample: it is logged and streaming
//!   continues.
//! - An empty read means the link died. Streaming stops at once, so a dead link does not
//!   burn the rest of the budget, and the session is flagged for restart.
//! - Every way out of streaming (budget spent, stall, error, shutdown) goes through
//!   DEACTIVATING: payload off, then mode 0. The payload is never left powered.
//!
//! [`SamplingLoop`] repeats sessions after a stall: it waits out a cooldown and starts a
//! fresh session with the same budget. Restarts are bounded by [`RestartPolicy`].

use crate::clock::{Sleeper, TokioSleeper};
use crate::error::{AppResult, ImcError};
use crate::logging::LogStream;
use crate::protocol::{ImcCommander, TelemetryMode};
use crate::shutdown::ShutdownListener;
use crate::telemetry::parse_frame;
use crate::transport::LinkTransport;
use crate::worker::{SupervisedWorker, WorkerSummary};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Sample budget and target rate of one session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
    samples: u32,
    frequency_hz: f64,
}

impl SamplingPlan {
    /// Create a plan.
    ///
    /// # Errors
    /// Returns an error if `samples` is zero or `frequency_hz` is not a positive number.
    pub fn new(samples: u32, frequency_hz: f64) -> AppResult<Self> {
        if samples == 0 {
            return Err(ImcError::Configuration("sample count must be >= 1".into()));
        }
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(ImcError::Configuration(format!(
                "sampling frequency must be positive, got {}",
                frequency_hz
            )));
        }
        Ok(Self {
            samples,
            frequency_hz,
        })
    }

    /// Samples per session.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Target rate in Hz.
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Pause before each read.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }
}

/// When and how often a stalled session is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Wait between the stall and the next session
    pub cooldown: Duration,
    /// Restarts allowed before the loop gives up
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(2),
            max_restarts: 10,
        }
    }
}

/// Session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Payload off, telemetry idle
    Idle,
    /// Payload on, streaming mode selected
    Armed,
    /// Reading samples
    Streaming,
    /// An empty read ended streaming
    Stalled,
    /// Powering the payload down and returning to idle mode
    Deactivating,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Armed => "ARMED",
            SessionState::Streaming => "STREAMING",
            SessionState::Stalled => "STALLED",
            SessionState::Deactivating => "DEACTIVATING",
        };
        f.write_str(name)
    }
}

/// Why streaming ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// All samples were attempted
    BudgetExhausted,
    /// Sample `sample` (1-based) read nothing
    Stalled {
        /// The sample that stalled
        sample: u32,
    },
    /// Shutdown was requested
    Cancelled,
    /// Arming or streaming failed outright
    Faulted(String),
}

/// Outcome of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Budget the session ran with
    pub plan: SamplingPlan,
    /// Reads attempted
    pub samples_attempted: u32,
    /// Lines parsed and dispatched
    pub frames: u32,
    /// Channel records written to the power log
    pub records: usize,
    /// Samples lost to read or dispatch errors
    pub sample_faults: u32,
    /// Why streaming ended
    pub exit: RunExit,
    /// Error raised while deactivating, if any
    pub cleanup_error: Option<String>,
    /// States visited, in order
    pub transitions: Vec<SessionState>,
}

/// All sessions run by one [`SamplingLoop::run`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    /// One entry per session, in order
    pub runs: Vec<RunSummary>,
    /// Restarts after a stall
    pub restarts: u32,
    /// Whether the loop stopped because shutdown was requested
    pub cancelled: bool,
}

impl SessionReport {
    /// Frames dispatched across all sessions.
    pub fn frames(&self) -> u64 {
        self.runs.iter().map(|run| u64::from(run.frames)).sum()
    }
}

/// One transient session: its budget, its state and its restart flag.
#[derive(Debug)]
pub struct SamplingSession {
    plan: SamplingPlan,
    state: SessionState,
    restart: bool,
    transitions: Vec<SessionState>,
    fault: Option<ImcError>,
}

impl SamplingSession {
    /// A fresh, idle session.
    pub fn new(plan: SamplingPlan) -> Self {
        Self {
            plan,
            state: SessionState::Idle,
            restart: false,
            transitions: vec![SessionState::Idle],
            fault: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session asked to be restarted.
    pub fn restart_requested(&self) -> bool {
        self.restart
    }

    /// Take the first error that ended the session, if any.
    pub fn take_fault(&mut self) -> Option<ImcError> {
        self.fault.take()
    }

    fn enter(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "sampling session transition");
        self.state = next;
        self.transitions.push(next);
    }
}

/// Runs sampling sessions against the IMC, restarting after stalls.
pub struct SamplingLoop<L> {
    commander: ImcCommander<L>,
    power: Arc<dyn LogStream>,
    ambient: Arc<dyn LogStream>,
    plan: SamplingPlan,
    policy: RestartPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<L: LinkTransport> SamplingLoop<L> {
    /// Create a loop with the default restart policy and real-time sleeping.
    pub fn new(
        commander: ImcCommander<L>,
        power: Arc<dyn LogStream>,
        ambient: Arc<dyn LogStream>,
        plan: SamplingPlan,
    ) -> Self {
        Self {
            commander,
            power,
            ambient,
            plan,
            policy: RestartPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set the restart policy.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the sleeper used for pacing and cooldowns.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// The command protocol driver.
    pub fn commander(&self) -> &ImcCommander<L> {
        &self.commander
    }

    /// Run sessions until one completes, shutdown is requested, or a fault escapes.
    ///
    /// # Errors
    /// - a session faulted while arming or streaming, or failed to deactivate
    /// - the link stalled more than `max_restarts` times in a row
    pub async fn run(&self, mut shutdown: ShutdownListener) -> AppResult<SessionReport> {
        let log = self.commander.log();
        let mut report = SessionReport::default();
        log.pending("ACTIVE");

        loop {
            let mut session = SamplingSession::new(self.plan);
            let summary = self.run_session(&mut session, &mut shutdown).await;
            report.runs.push(summary);

            if let Some(fault) = session.take_fault() {
                log.fault(format!("SAMPLE IMC ABORTED: {}", fault));
                return Err(fault);
            }

            if !session.restart_requested() {
                report.cancelled = matches!(
                    report.runs.last().map(|run| &run.exit),
                    Some(RunExit::Cancelled)
                );
                log.pending("END");
                return Ok(report);
            }

            if report.restarts >= self.policy.max_restarts {
                log.fault(format!(
                    "RESTART LIMIT REACHED ({} restarts)",
                    report.restarts
                ));
                return Err(ImcError::RestartLimit(report.restarts));
            }

            log.restart("RESTART SAMPLING");
            if !self.pause(self.policy.cooldown, &mut shutdown).await {
                report.cancelled = true;
                log.pending("END");
                return Ok(report);
            }
            report.restarts += 1;
        }
    }

    /// Run one session to completion, always deactivating afterwards.
    pub async fn run_session(
        &self,
        session: &mut SamplingSession,
        shutdown: &mut ShutdownListener,
    ) -> RunSummary {
        let log = self.commander.log();
        log.pending("SAMPLE IMC");

        let mut summary = RunSummary {
            plan: session.plan,
            samples_attempted: 0,
            frames: 0,
            records: 0,
            sample_faults: 0,
            exit: RunExit::BudgetExhausted,
            cleanup_error: None,
            transitions: Vec::new(),
        };

        summary.exit = match self.arm_and_stream(session, &mut summary, shutdown).await {
            Ok(exit) => exit,
            Err(e) => {
                log.fault(format!("SAMPLE IMC: {}", e));
                let exit = RunExit::Faulted(e.to_string());
                session.fault = Some(e);
                exit
            }
        };

        session.enter(SessionState::Deactivating);
        if let Err(e) = self.deactivate().await {
            log.fault(format!("DEACTIVATE: {}", e));
            summary.cleanup_error = Some(e.to_string());
            session.fault.get_or_insert(e);
        }
        session.enter(SessionState::Idle);

        log.done("SAMPLE IMC");
        summary.transitions = session.transitions.clone();
        summary
    }

    async fn arm_and_stream(
        &self,
        session: &mut SamplingSession,
        summary: &mut RunSummary,
        shutdown: &mut ShutdownListener,
    ) -> AppResult<RunExit> {
        let log = self.commander.log();

        self.commander.activate_payload().await?;
        self.commander.set_mode(TelemetryMode::Stream).await?;
        session.enter(SessionState::Armed);

        let interval = session.plan.interval();
        session.enter(SessionState::Streaming);

        for sample in 1..=session.plan.samples() {
            if !self.pause(interval, shutdown).await {
                return Ok(RunExit::Cancelled);
            }

            summary.samples_attempted += 1;
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(RunExit::Cancelled),
                read = self.commander.link().read_line() => read,
            };

            match read {
                Ok(line) if line.is_empty() => {
                    log.fault("NO DATA FROM IMC");
                    session.enter(SessionState::Stalled);
                    session.restart = true;
                    return Ok(RunExit::Stalled { sample });
                }
                Ok(line) => match self.dispatch(&line) {
                    Ok(records) => {
                        summary.frames += 1;
                        summary.records += records;
                    }
                    Err(e) => {
                        summary.sample_faults += 1;
                        log.fault(format!("SAMPLE IMC {}: {}", sample, e));
                    }
                },
                Err(e) => {
                    summary.sample_faults += 1;
                    log.fault(format!("SAMPLE IMC {}: {}", sample, e));
                }
            }
        }

        Ok(RunExit::BudgetExhausted)
    }

    fn dispatch(&self, line: &str) -> AppResult<usize> {
        let frame = parse_frame(line, self.commander.channels());
        frame.dispatch(self.power.as_ref(), self.ambient.as_ref())
    }

    /// Payload off, then idle mode. Both are attempted; the first error is returned.
    async fn deactivate(&self) -> AppResult<()> {
        let payload = self.commander.deactivate_payload().await;
        let mode = self.commander.set_mode(TelemetryMode::Poll).await;
        payload.and(mode)
    }

    /// Sleep unless shutdown fires first. Returns `false` if cancelled.
    async fn pause(&self, duration: Duration, shutdown: &mut ShutdownListener) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = self.sleeper.sleep(duration) => true,
        }
    }
}

#[async_trait]
impl<L: LinkTransport + 'static> SupervisedWorker for SamplingLoop<L> {
    fn name(&self) -> &str {
        "imc-sampling"
    }

    async fn sample(&mut self, shutdown: ShutdownListener) -> AppResult<WorkerSummary> {
        let report = self.run(shutdown).await?;
        Ok(WorkerSummary {
            samples: report.frames(),
            restarts: report.restarts,
            cancelled: report.cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{default_channel_entries, ChannelId, ChannelTable};
    use crate::clock::RecordingSleeper;
    use crate::logging::{ControlLog, MemoryLogStream};
    use crate::shutdown::ShutdownSignal;
    use crate::transport::mock::{LinkEvent, MockLink};

    struct Harness {
        sampling: SamplingLoop<MockLink>,
        link: MockLink,
        control: Arc<MemoryLogStream>,
        power: Arc<MemoryLogStream>,
        ambient: Arc<MemoryLogStream>,
        sleeper: RecordingSleeper,
    }

    fn harness(samples: u32, frequency_hz: f64, link: MockLink) -> Harness {
        let control = Arc::new(MemoryLogStream::new("imc_control"));
        let power = Arc::new(MemoryLogStream::new("imc_power"));
        let ambient = Arc::new(MemoryLogStream::new("par"));
        let sleeper = RecordingSleeper::new();

        let commander = ImcCommander::new(
            link.clone(),
            ChannelTable::from_entries(&default_channel_entries()).unwrap(),
            [ChannelId::new(3).unwrap(), ChannelId::new(4).unwrap()],
            ControlLog::new(control.clone(), "IMC Control"),
        );
        let sampling = SamplingLoop::new(
            commander,
            power.clone(),
            ambient.clone(),
            SamplingPlan::new(samples, frequency_hz).unwrap(),
        )
        .with_restart_policy(RestartPolicy {
            cooldown: Duration::from_secs(2),
            max_restarts: 3,
        })
        .with_sleeper(Arc::new(sleeper.clone()));

        Harness {
            sampling,
            link,
            control,
            power,
            ambient,
            sleeper,
        }
    }

    const ARM: [&str; 8] = ["s", "3", "1", "s", "4", "1", "m", "1"];
    const DISARM: [&str; 8] = ["s", "3", "0", "s", "4", "0", "m", "0"];

    fn exchanges(tokens: &[&str]) -> Vec<LinkEvent> {
        tokens
            .iter()
            .map(|t| LinkEvent::Exchange(t.to_string()))
            .collect()
    }

    #[test]
    fn plan_rejects_bad_parameters() {
        assert!(SamplingPlan::new(0, 5.0).is_err());
        assert!(SamplingPlan::new(10, 0.0).is_err());
        assert!(SamplingPlan::new(10, -1.0).is_err());
        assert!(SamplingPlan::new(10, f64::INFINITY).is_err());
        assert_eq!(
            SamplingPlan::new(10, 5.0).unwrap().interval(),
            Duration::from_millis(200)
        );
    }

    #[tokio::test]
    async fn full_budget_arms_streams_and_deactivates() {
        let link = MockLink::new();
        link.push_line("3,1,12.0,200;4,1,5.0,40;301.0\r\n");
        link.push_line("3,1,12.1,210;4,1,5.0,41;302.0\r\n");
        let h = harness(2, 5.0, link);

        let report = h.sampling.run(ShutdownListener::never()).await.unwrap();

        let mut expected = exchanges(&ARM);
        expected.extend([LinkEvent::Read, LinkEvent::Read]);
        expected.extend(exchanges(&DISARM));
        assert_eq!(h.link.events(), expected);

        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.restarts, 0);
        let run = &report.runs[0];
        assert_eq!(run.exit, RunExit::BudgetExhausted);
        assert_eq!(run.frames, 2);
        assert_eq!(run.records, 4);
        assert_eq!(
            run.transitions,
            vec![
                SessionState::Idle,
                SessionState::Armed,
                SessionState::Streaming,
                SessionState::Deactivating,
                SessionState::Idle,
            ]
        );

        assert_eq!(h.power.lines().len(), 4);
        assert_eq!(h.ambient.lines(), vec!["301.0", "301.0", "302.0", "302.0"]);
        assert_eq!(h.sleeper.sleeps(), vec![Duration::from_millis(200); 2]);
    }

    #[tokio::test]
    async fn read_faults_cost_only_their_sample() {
        let link = MockLink::new();
        link.push_fault("framing error");
        link.push_line("4,1,5.0,40;300.0");
        link.push_fault("overrun");
        let h = harness(3, 10.0, link);

        let report = h.sampling.run(ShutdownListener::never()).await.unwrap();

        let run = &report.runs[0];
        assert_eq!(run.exit, RunExit::BudgetExhausted);
        assert_eq!(run.samples_attempted, 3);
        assert_eq!(run.sample_faults, 2);
        assert_eq!(run.frames, 1);
        assert_eq!(h.power.lines(), vec!["par,4,1,5.0,40"]);
        assert!(h
            .control
            .lines()
            .iter()
            .any(|l| l.starts_with("[-] (IMC Control) SAMPLE IMC 1: ")));
    }

    #[tokio::test]
    async fn stall_stops_streaming_immediately_and_restarts_with_same_plan() {
        let link = MockLink::new();
        link.push_line("4,1,5.0,40;300.0");
        link.push_silence();
        link.push_line("never read in the first session");
        link.push_line("4,1,5.0,40;301.0");
        link.push_line("4,1,5.0,40;302.0");
        let h = harness(3, 5.0, link);

        let report = h.sampling.run(ShutdownListener::never()).await.unwrap();

        assert_eq!(report.restarts, 1);
        assert_eq!(report.runs.len(), 2);
        let first = &report.runs[0];
        assert_eq!(first.exit, RunExit::Stalled { sample: 2 });
        assert_eq!(first.samples_attempted, 2);
        assert!(first.transitions.contains(&SessionState::Stalled));
        assert_eq!(report.runs[1].plan, first.plan);
        assert_eq!(report.runs[1].exit, RunExit::BudgetExhausted);
        assert_eq!(report.runs[1].samples_attempted, 3);

        // stall → deactivate → idle mode, then re-arm
        let mut expected = exchanges(&ARM);
        expected.extend([LinkEvent::Read, LinkEvent::Read]);
        expected.extend(exchanges(&DISARM));
        expected.extend(exchanges(&ARM));
        expected.extend([LinkEvent::Read, LinkEvent::Read, LinkEvent::Read]);
        expected.extend(exchanges(&DISARM));
        assert_eq!(h.link.events(), expected);

        // cooldown between the two sessions
        let pace = Duration::from_millis(200);
        assert_eq!(
            h.sleeper.sleeps(),
            vec![pace, pace, Duration::from_secs(2), pace, pace, pace]
        );
        assert!(h
            .control
            .lines()
            .contains(&"[x] (IMC Control) RESTART SAMPLING".to_string()));
    }

    #[tokio::test]
    async fn dead_link_hits_the_restart_limit() {
        let h = harness(5, 5.0, MockLink::new());

        let err = h.sampling.run(ShutdownListener::never()).await.unwrap_err();

        assert!(matches!(err, ImcError::RestartLimit(3)));
        // one read per session, four sessions
        assert_eq!(h.link.read_count(), 4);
        // every session armed and disarmed
        assert_eq!(
            h.link
                .commands()
                .iter()
                .filter(|token| token.as_str() == "m")
                .count(),
            8
        );
    }

    #[tokio::test]
    async fn arming_failure_still_deactivates() {
        let link = MockLink::new();
        link.fail_next_exchanges(1);
        let h = harness(3, 5.0, link);

        let err = h.sampling.run(ShutdownListener::never()).await.unwrap_err();

        assert!(err.is_transport_fault());
        let mut expected = vec!["s".to_string()];
        expected.extend(DISARM.iter().map(|t| t.to_string()));
        assert_eq!(h.link.commands(), expected);
        assert_eq!(h.link.read_count(), 0);
    }

    struct UnbuiltSerialLink;

    #[async_trait]
    impl LinkTransport for UnbuiltSerialLink {
        async fn exchange(&self, _command: &crate::transport::Command) -> AppResult<()> {
            Err(ImcError::SerialFeatureDisabled)
        }

        async fn read_line(&self) -> AppResult<String> {
            Err(ImcError::SerialFeatureDisabled)
        }
    }

    #[tokio::test]
    async fn arming_failure_keeps_its_error_kind() {
        let commander = ImcCommander::new(
            UnbuiltSerialLink,
            ChannelTable::from_entries(&default_channel_entries()).unwrap(),
            [ChannelId::new(3).unwrap(), ChannelId::new(4).unwrap()],
            ControlLog::new(Arc::new(MemoryLogStream::new("imc_control")), "IMC Control"),
        );
        let sampling = SamplingLoop::new(
            commander,
            Arc::new(MemoryLogStream::new("imc_power")),
            Arc::new(MemoryLogStream::new("par")),
            SamplingPlan::new(3, 5.0).unwrap(),
        )
        .with_sleeper(Arc::new(RecordingSleeper::new()));

        let err = sampling.run(ShutdownListener::never()).await.unwrap_err();

        assert!(matches!(err, ImcError::SerialFeatureDisabled));
        assert!(!err.is_transport_fault());
    }

    #[tokio::test]
    async fn shutdown_before_first_sample_still_deactivates() {
        let link = MockLink::new();
        link.push_line("4,1,5.0,40;300.0");
        let h = harness(3, 5.0, link);
        let (signal, listener) = ShutdownSignal::new();
        signal.trigger();

        let report = h.sampling.run(listener).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.runs[0].exit, RunExit::Cancelled);
        assert_eq!(h.link.read_count(), 0);
        let mut expected: Vec<String> = ARM.iter().map(|t| t.to_string()).collect();
        expected.extend(DISARM.iter().map(|t| t.to_string()));
        assert_eq!(h.link.commands(), expected);
    }

    #[tokio::test]
    async fn worker_summary_reports_frames_and_restarts() {
        let link = MockLink::new();
        link.push_silence();
        link.push_line("3,1,12.0,200;300.0");
        let mut h = harness(1, 5.0, link);

        let summary = h.sampling.sample(ShutdownListener::never()).await.unwrap();

        assert_eq!(
            summary,
            WorkerSummary {
                samples: 1,
                restarts: 1,
                cancelled: false,
            }
        );
        assert_eq!(h.sampling.name(), "imc-sampling");
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn stall_and_transitions_reach_the_console() {
        let h = harness(1, 5.0, MockLink::new());
        let _ = h.sampling.run(ShutdownListener::never()).await;

        assert!(logs_contain("NO DATA FROM IMC"));
        assert!(logs_contain("RESTART SAMPLING"));
        assert!(logs_contain("sampling session transition"));
    }
}
