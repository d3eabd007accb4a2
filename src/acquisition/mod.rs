//! Acquisition state machine.
//!
//! Drives one measurement session at a time:
//!
//! ```text
//! STANDBY → CONNECTING → COLLECTING → ANALYZING → COMPLETE | FAILED → STANDBY
//! ```
//!
//! Everything the machine reacts to arrives on a single ordered queue: connection
//! events from the supervisor, the analysis worker's result, and cancel requests.
//! Timers are deadlines on that queue, so the controller never busy-waits.

mod events;

pub use events::{AcquisitionEvent, CancelHandle};

use crate::buffer::SampleBuffer;
use crate::config::{Config, ConfigError, SessionConfig};
use crate::core::classifier::panic_message;
use crate::core::{
    analyze, AnalysisFailure, AnalysisReport, DriftModel, FailureReason, Session,
    SessionFailure, SessionOutcome, SessionResult, SessionStatus, Transition,
};
use crate::stats::SharedStats;
use crate::stream::{
    ConnectionEvent, Connector, EventSink, Sample, StreamSupervisor, SupervisorError,
    SupervisorEvent,
};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long `run_to_completion` waits per poll.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reasons a start command is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("no drift model loaded")]
    ModelNotLoaded,
    #[error("a session is already {0}")]
    SessionActive(SessionStatus),
}

/// Reasons a configuration change is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("cannot reconfigure while a session is {0}")]
    SessionActive(SessionStatus),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Settings and model captured at start; fixed for the session's lifetime.
struct Frozen {
    config: SessionConfig,
    model: Arc<dyn DriftModel>,
}

/// Orchestrates measurement sessions over a telemetry connection.
pub struct AcquisitionStateMachine {
    config: Config,
    connector: Arc<dyn Connector>,
    stats: SharedStats,
    buffer: Arc<SampleBuffer>,
    supervisor: StreamSupervisor,
    model: Option<Arc<dyn DriftModel>>,

    events_tx: Sender<AcquisitionEvent>,
    events_rx: Receiver<AcquisitionEvent>,

    status: SessionStatus,
    session: Option<Session>,
    frozen: Option<Frozen>,
    history: Vec<Transition>,
    connection_id: Option<u64>,
    deadline: Option<Instant>,
    collecting_since: Option<DateTime<Utc>>,
    worker: Option<JoinHandle<()>>,
    outcome: Option<SessionOutcome>,
}

impl AcquisitionStateMachine {
    /// Create an idle machine reading from `connector`.
    pub fn new(
        config: Config,
        connector: Arc<dyn Connector>,
        stats: SharedStats,
    ) -> Result<Self, ConfigureError> {
        config.validate()?;

        let (events_tx, events_rx) = unbounded();
        let buffer = Arc::new(SampleBuffer::new(config.buffer_capacity));
        let supervisor = build_supervisor(&config, &connector, &buffer, &stats, &events_tx)?;

        Ok(Self {
            config,
            connector,
            stats,
            buffer,
            supervisor,
            model: None,
            events_tx,
            events_rx,
            status: SessionStatus::Standby,
            session: None,
            frozen: None,
            history: Vec::new(),
            connection_id: None,
            deadline: None,
            collecting_since: None,
            worker: None,
            outcome: None,
        })
    }

    /// Install the drift model used by subsequent sessions.
    pub fn load_model(&mut self, model: Arc<dyn DriftModel>) {
        tracing::info!(version = model.version(), "drift model installed");
        self.model = Some(model);
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Replace the configuration. Rejected while a session is in flight.
    ///
    /// A changed buffer capacity or reconnect delay rebuilds the buffer and the
    /// supervisor.
    pub fn configure(&mut self, config: Config) -> Result<(), ConfigureError> {
        if self.status.is_active() {
            return Err(ConfigureError::SessionActive(self.status));
        }
        config.validate()?;

        if config.buffer_capacity != self.config.buffer_capacity
            || config.reconnect_delay != self.config.reconnect_delay
        {
            let buffer = Arc::new(SampleBuffer::new(config.buffer_capacity));
            let supervisor =
                build_supervisor(&config, &self.connector, &buffer, &self.stats, &self.events_tx)?;
            self.supervisor = supervisor;
            self.buffer = buffer;
        }

        tracing::info!(
            threshold = config.fault_threshold,
            collection_secs = config.collection_duration.as_secs_f64(),
            timeout_secs = config.connection_timeout.as_secs_f64(),
            "configuration updated"
        );
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Begin a new session.
    ///
    /// A finished session whose outcome was never taken is discarded first.
    pub fn start(&mut self) -> Result<Uuid, StartError> {
        if self.status.is_active() {
            return Err(StartError::SessionActive(self.status));
        }
        let model = self.model.clone().ok_or(StartError::ModelNotLoaded)?;

        if self.status.is_terminal() {
            if let Some(outcome) = self.outcome.take() {
                tracing::warn!(
                    session_id = %outcome.session().id,
                    "discarding untaken session outcome"
                );
            }
            self.transition(SessionStatus::Standby);
        }

        self.supervisor.disconnect();
        self.buffer.clear();
        while self.events_rx.try_recv().is_ok() {}
        self.history.clear();
        self.outcome = None;
        self.collecting_since = None;

        let frozen = Frozen {
            config: self.config.session_config(),
            model,
        };
        let session = Session::new();
        let session_id = session.id;
        tracing::info!(
            %session_id,
            source = %self.supervisor.describe_source(),
            threshold = frozen.config.fault_threshold,
            "session started"
        );

        self.deadline = Some(Instant::now() + frozen.config.connection_timeout);
        self.session = Some(session);
        self.frozen = Some(frozen);
        self.transition(SessionStatus::Connecting);
        self.connection_id = Some(self.supervisor.connect());

        Ok(session_id)
    }

    /// Abort the in-flight session, if any, and start a fresh one.
    pub fn restart(&mut self) -> Result<Uuid, StartError> {
        if self.cancel() {
            self.outcome = None;
        }
        self.start()
    }

    /// Abort the in-flight session. Returns whether there was one.
    ///
    /// The supervisor is disconnected, the buffer cleared, and any analysis still
    /// running is abandoned; its result will be ignored.
    pub fn cancel(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }

        tracing::info!(status = %self.status, "cancelling session");
        // Detach rather than join; the worker only sends one event and exits.
        self.worker = None;
        self.fail(FailureReason::Cancelled);
        self.buffer.clear();
        true
    }

    /// A handle other threads (e.g. a signal handler) can use to cancel.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.events_tx.clone())
    }

    /// Wait up to `max_wait` for the next event or deadline, act on it, and
    /// return the resulting status.
    pub fn poll(&mut self, max_wait: Duration) -> SessionStatus {
        let wake = Instant::now() + max_wait;
        let until = match self.deadline {
            Some(deadline) if deadline < wake => deadline,
            _ => wake,
        };

        match self.events_rx.recv_deadline(until) {
            Ok(event) => self.handle_event(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }

        // Drain whatever else is already queued, in order.
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }

        self.check_deadline();
        self.status
    }

    /// Drive the current session until it ends and take its outcome.
    ///
    /// Returns `None` when no session was started.
    pub fn run_to_completion(&mut self) -> Option<SessionOutcome> {
        while self.status.is_active() {
            self.poll(POLL_INTERVAL);
        }
        self.take_outcome()
    }

    /// Hand out the finished session's outcome and return to STANDBY.
    ///
    /// Yields each outcome once.
    pub fn take_outcome(&mut self) -> Option<SessionOutcome> {
        if !self.status.is_terminal() {
            return None;
        }
        let outcome = self.outcome.take();
        self.transition(SessionStatus::Standby);
        outcome
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The current or most recent session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// State changes of the current session, oldest first.
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    fn handle_event(&mut self, event: AcquisitionEvent) {
        match event {
            AcquisitionEvent::Stream(event) => self.handle_stream_event(event),
            AcquisitionEvent::AnalysisFinished {
                session_id,
                samples,
                result,
            } => self.handle_analysis(session_id, samples, result),
            AcquisitionEvent::Cancel => {
                self.cancel();
            }
        }
    }

    fn handle_stream_event(&mut self, event: SupervisorEvent) {
        if self.connection_id != Some(event.connection_id) {
            tracing::trace!(connection_id = event.connection_id, "ignoring stale event");
            return;
        }

        match event.kind {
            // Either signal means data is flowing; the status guard makes the
            // transition fire once.
            ConnectionEvent::Connected | ConnectionEvent::FirstSample => {
                if self.status == SessionStatus::Connecting {
                    self.enter_collecting();
                }
            }
            ConnectionEvent::Disconnected => {
                if self.status == SessionStatus::Collecting {
                    tracing::warn!("telemetry dropped during collection");
                }
            }
            ConnectionEvent::Error(message) => {
                tracing::warn!(status = %self.status, "telemetry error: {message}");
            }
        }
    }

    fn handle_analysis(
        &mut self,
        session_id: Uuid,
        samples: Vec<Sample>,
        result: Result<AnalysisReport, AnalysisFailure>,
    ) {
        let current = self.session.as_ref().map(|s| s.id);
        if self.status != SessionStatus::Analyzing || current != Some(session_id) {
            tracing::debug!(%session_id, "ignoring result of abandoned analysis");
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        match result {
            Ok(report) => self.complete(report, samples),
            Err(failure) => self.fail(FailureReason::AnalysisError {
                message: failure.to_string(),
            }),
        }
    }

    fn check_deadline(&mut self) {
        let Some(deadline) = self.deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }

        match self.status {
            SessionStatus::Connecting => {
                let timeout_secs = self
                    .frozen
                    .as_ref()
                    .map(|f| f.config.connection_timeout.as_secs_f64())
                    .unwrap_or_default();
                tracing::warn!(timeout_secs, "no data before connection timeout");
                self.fail(FailureReason::ConnectionTimeout { timeout_secs });
            }
            SessionStatus::Collecting => self.finish_collection(),
            _ => self.deadline = None,
        }
    }

    fn enter_collecting(&mut self) {
        let Some(frozen) = self.frozen.as_ref() else {
            return;
        };
        self.deadline = Some(Instant::now() + frozen.config.collection_duration);
        self.collecting_since = Some(Utc::now());
        self.transition(SessionStatus::Collecting);
    }

    fn finish_collection(&mut self) {
        self.deadline = None;
        self.supervisor.disconnect();
        self.connection_id = None;
        self.transition(SessionStatus::Analyzing);

        let (Some(frozen), Some(session)) = (self.frozen.as_ref(), self.session.as_ref()) else {
            self.fail(FailureReason::AnalysisError {
                message: "session state lost before analysis".to_string(),
            });
            return;
        };

        let snapshot = self.buffer.snapshot();
        tracing::info!(samples = snapshot.len(), "collection finished, analyzing");

        let session_id = session.id;
        let analysis_config = frozen.config.analysis_config();
        let model = Arc::clone(&frozen.model);
        let tx = self.events_tx.clone();

        let spawned = std::thread::Builder::new()
            .name("drift-analysis".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    analyze(&snapshot, &analysis_config, model.as_ref())
                }))
                .unwrap_or_else(|panic| {
                    Err(AnalysisFailure::Aborted(panic_message(panic.as_ref())))
                });
                let _ = tx.send(AcquisitionEvent::AnalysisFinished {
                    session_id,
                    samples: snapshot,
                    result,
                });
            });

        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => self.fail(FailureReason::AnalysisError {
                message: format!("failed to start analysis worker: {e}"),
            }),
        }
    }

    fn complete(&mut self, report: AnalysisReport, samples: Vec<Sample>) {
        let (Some(frozen), Some(mut session)) = (self.frozen.take(), self.session.clone()) else {
            return;
        };

        let now = Utc::now();
        let collection_duration_secs = self
            .collecting_since
            .map(|since| (now - since).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        session.end_time = Some(now);
        session.status = SessionStatus::Complete;

        let result = SessionResult::from_report(
            session,
            report,
            samples,
            collection_duration_secs,
            frozen.config.fault_threshold,
        );
        tracing::info!(
            session_id = %result.session_id(),
            diagnosed = result.diagnoses.len(),
            skipped = result.skipped.len(),
            faulty = result.fault_count(),
            "session complete"
        );

        self.stats.record_session_completed();
        self.outcome = Some(SessionOutcome::Complete(result));
        self.transition(SessionStatus::Complete);
        if let Some(session) = self.session.as_mut() {
            session.end_time = Some(now);
        }
    }

    fn fail(&mut self, reason: FailureReason) {
        self.deadline = None;
        self.supervisor.disconnect();
        self.connection_id = None;
        self.frozen = None;

        let now = Utc::now();
        self.transition(SessionStatus::Failed);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.end_time = Some(now);

        tracing::warn!(session_id = %session.id, code = reason.code(), "session failed: {reason}");
        self.stats.record_session_failed();
        self.outcome = Some(SessionOutcome::Failed(SessionFailure {
            session: session.clone(),
            reason,
            at: now,
        }));
    }

    fn transition(&mut self, to: SessionStatus) {
        let from = self.status;
        if from == to {
            return;
        }

        let at = Utc::now();
        tracing::info!(
            session_id = ?self.session.as_ref().map(|s| s.id),
            "state {from} -> {to}"
        );
        self.history.push(Transition { from, to, at });
        self.status = to;
        // The session keeps its terminal status once the machine is idle again.
        if to != SessionStatus::Standby {
            if let Some(session) = self.session.as_mut() {
                session.status = to;
            }
        }
    }
}

impl Drop for AcquisitionStateMachine {
    fn drop(&mut self) {
        self.supervisor.disconnect();
    }
}

fn build_supervisor(
    config: &Config,
    connector: &Arc<dyn Connector>,
    buffer: &Arc<SampleBuffer>,
    stats: &SharedStats,
    events_tx: &Sender<AcquisitionEvent>,
) -> Result<StreamSupervisor, SupervisorError> {
    let tx = events_tx.clone();
    let sink: EventSink = Arc::new(move |event| {
        let _ = tx.send(AcquisitionEvent::Stream(event));
    });

    StreamSupervisor::new(
        Arc::clone(connector),
        Arc::clone(buffer),
        Arc::clone(stats),
        sink,
        config.reconnect_delay,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FnDriftModel, RawPrediction};
    use crate::stats::IngestStats;
    use crate::stream::ReplayConnector;

    fn quick_config() -> Config {
        Config {
            collection_duration: Duration::from_millis(200),
            connection_timeout: Duration::from_millis(300),
            reconnect_delay: None,
            ..Config::default()
        }
    }

    fn machine(messages: Vec<String>) -> AcquisitionStateMachine {
        let connector = Arc::new(ReplayConnector::new(messages, Duration::from_millis(5)));
        AcquisitionStateMachine::new(quick_config(), connector, Arc::new(IngestStats::new()))
            .unwrap()
    }

    fn model() -> Arc<dyn DriftModel> {
        Arc::new(FnDriftModel::constant(
            "fixed",
            RawPrediction::Flat(vec![0.1, -0.2, 0.05]),
        ))
    }

    #[test]
    fn test_start_requires_model() {
        let mut machine = machine(vec![]);
        assert_eq!(machine.start(), Err(StartError::ModelNotLoaded));
        assert_eq!(machine.status(), SessionStatus::Standby);
        assert!(machine.session().is_none());
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let mut machine = machine(vec![]);
        machine.load_model(model());

        let first = machine.start().unwrap();
        assert_eq!(
            machine.start(),
            Err(StartError::SessionActive(SessionStatus::Connecting))
        );
        assert_eq!(machine.session().map(|s| s.id), Some(first));
    }

    #[test]
    fn test_configure_rejected_while_active() {
        let mut machine = machine(vec![]);
        machine.load_model(model());
        machine.start().unwrap();

        assert!(matches!(
            machine.configure(Config::default()),
            Err(ConfigureError::SessionActive(SessionStatus::Connecting))
        ));
    }

    #[test]
    fn test_cancel_fails_session_once() {
        let mut machine = machine(vec![]);
        machine.load_model(model());
        machine.start().unwrap();

        assert!(machine.cancel());
        assert!(!machine.cancel());
        assert_eq!(machine.status(), SessionStatus::Failed);

        match machine.take_outcome() {
            Some(SessionOutcome::Failed(failure)) => {
                assert_eq!(failure.reason, FailureReason::Cancelled)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(machine.take_outcome().is_none());
        assert_eq!(machine.status(), SessionStatus::Standby);
    }

    #[test]
    fn test_history_records_transitions() {
        let mut machine = machine(vec![]);
        machine.load_model(model());
        machine.start().unwrap();
        machine.cancel();

        let path: Vec<SessionStatus> = machine.history().iter().map(|t| t.to).collect();
        assert_eq!(path, vec![SessionStatus::Connecting, SessionStatus::Failed]);
    }
}
