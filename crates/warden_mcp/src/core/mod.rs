//! Core Module - Single-Owner State Management
//!
//! The Core thread exclusively owns all mutable queue and approval state
//! (the JobStore and the bridged-jobs map), receiving Commands and
//! emitting Events over bounded-purpose channels.
//!
//! # Design Principles
//!
//! 1. **Single owner**: Core owns JobStore and BridgeState
//! 2. **Message passing**: every state change flows through Command/Event
//! 3. **No async**: synchronous execution on std threads and channels
//! 4. **Ordering**: decision events are emitted only after the on-disk
//!    transition, so an observer of `RequestDecided` always sees the moved
//!    record

mod command;
mod event;

pub use command::{CancelOutcome, Command, Responder};
pub use event::Event;

use crate::approvals::{ApprovalError, ApprovalRequestId, ApprovalView, BridgeState, Decision};
use crate::queue::processor::WorkSignal;
use crate::queue::store::{JobStore, QueueError, QueueStats};
use crate::queue::{ExecOutcome, JobError, JobId, JobRecord, JobSummary, ListFilter, Submission};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};
use warden_protocol::{defaults, JobStatus};

/// Configuration for the Core thread.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of the on-disk queue.
    pub queue_dir: PathBuf,
    /// Maximum non-terminal jobs admitted.
    pub capacity: usize,
    /// Window a job may wait in `pending_approval`.
    pub approval_timeout_ms: u64,
    /// How long decided bridge entries linger for stats.
    pub bridge_linger_ms: u64,
    /// Execution concurrency, for load-band computation.
    pub execution_capacity: usize,
    /// Retention window for terminal jobs.
    pub retention_ms: u64,
}

impl CoreConfig {
    pub fn new(queue_dir: PathBuf) -> Self {
        Self {
            queue_dir,
            capacity: defaults::DEFAULT_QUEUE_CAPACITY,
            approval_timeout_ms: defaults::DEFAULT_APPROVAL_TIMEOUT_MS,
            bridge_linger_ms: defaults::BRIDGE_LINGER_MS,
            execution_capacity: defaults::DEFAULT_MAX_CONCURRENT,
            retention_ms: defaults::DEFAULT_RETENTION_MS,
        }
    }
}

/// Queue + bridge statistics in one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStats {
    pub queue: QueueStats,
    pub bridge_pending: usize,
    pub bridge_decided: usize,
}

/// Handle for interacting with the Core from other threads.
///
/// Can be cloned and shared. All operations send Commands to Core and wait
/// for responses via one-shot channels.
#[derive(Clone)]
pub struct CoreHandle {
    cmd_tx: Sender<Command>,
}

impl CoreHandle {
    fn new(cmd_tx: Sender<Command>) -> Self {
        Self { cmd_tx }
    }

    fn send_and_wait<T>(&self, make_cmd: impl FnOnce(Responder<T>) -> Command) -> Result<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(make_cmd(tx))
            .map_err(|_| anyhow::anyhow!("Core channel closed"))?;
        rx.recv()
            .map_err(|_| anyhow::anyhow!("Core response channel closed"))
    }

    /// Persist a validated submission.
    pub fn submit(&self, submission: Submission) -> Result<Result<JobRecord, QueueError>> {
        self.send_and_wait(|respond| Command::Submit {
            submission,
            respond,
        })
    }

    /// Fetch a job, optionally applying the poll side effect.
    pub fn get_job(&self, id: JobId, poll: bool) -> Result<Result<Option<JobRecord>, QueueError>> {
        self.send_and_wait(|respond| Command::GetJob { id, poll, respond })
    }

    /// Filtered listing.
    pub fn list_jobs(&self, filter: ListFilter) -> Result<Result<Vec<JobSummary>, QueueError>> {
        self.send_and_wait(|respond| Command::ListJobs { filter, respond })
    }

    /// Queue + bridge statistics.
    pub fn stats(&self) -> Result<Result<SystemStats, QueueError>> {
        self.send_and_wait(|respond| Command::Stats { respond })
    }

    /// Claim up to `max` approved jobs for execution.
    pub fn claim_approved(&self, max: usize) -> Result<Result<Vec<JobRecord>, QueueError>> {
        self.send_and_wait(|respond| Command::ClaimApproved { max, respond })
    }

    /// Progress update for an executing job.
    pub fn set_progress(
        &self,
        id: JobId,
        message: String,
        percentage: Option<u8>,
    ) -> Result<Result<(), QueueError>> {
        self.send_and_wait(|respond| Command::SetProgress {
            id,
            message,
            percentage,
            respond,
        })
    }

    /// Report a finished execution.
    pub fn finish_execution(
        &self,
        id: JobId,
        outcome: ExecOutcome,
        error: Option<JobError>,
    ) -> Result<Result<JobRecord, QueueError>> {
        self.send_and_wait(|respond| Command::FinishExecution {
            id,
            outcome,
            error,
            respond,
        })
    }

    /// Report a spawn that never produced a child.
    pub fn fail_spawn(&self, id: JobId, error: JobError) -> Result<Result<(), QueueError>> {
        self.send_and_wait(|respond| Command::FailSpawn { id, error, respond })
    }

    /// Return a claimed job to `approved` (lost the slot race).
    pub fn requeue_job(&self, id: JobId) -> Result<Result<(), QueueError>> {
        self.send_and_wait(|respond| Command::RequeueJob { id, respond })
    }

    /// Cancel a job.
    pub fn cancel_job(&self, id: JobId) -> Result<Result<CancelOutcome, QueueError>> {
        self.send_and_wait(|respond| Command::CancelJob { id, respond })
    }

    /// Run a retention sweep now.
    pub fn retention_sweep(
        &self,
    ) -> Result<Result<crate::queue::store::RetentionReport, QueueError>> {
        self.send_and_wait(|respond| Command::RetentionSweep { respond })
    }

    /// Run a bridge scan now; returns newly bridged views.
    pub fn bridge_scan(&self) -> Result<Result<Vec<ApprovalView>, QueueError>> {
        self.send_and_wait(|respond| Command::BridgeScan { respond })
    }

    /// Expire pending approvals past their window.
    pub fn sweep_approval_timeouts(&self) -> Result<Result<usize, QueueError>> {
        self.send_and_wait(|respond| Command::SweepApprovalTimeouts { respond })
    }

    /// Park a synchronous execution on the approval plane.
    pub fn create_direct_approval(
        &self,
        command: String,
        args: Vec<String>,
        working_directory: PathBuf,
        user_description: Option<String>,
        waiter: Sender<Decision>,
    ) -> Result<ApprovalView> {
        self.send_and_wait(|respond| Command::CreateDirectApproval {
            command,
            args,
            working_directory,
            user_description,
            waiter,
            respond,
        })
    }

    /// Apply a human decision.
    pub fn decide(
        &self,
        request_id: ApprovalRequestId,
        decision: Decision,
    ) -> Result<Result<ApprovalView, ApprovalError>> {
        self.send_and_wait(|respond| Command::Decide {
            request_id,
            decision,
            respond,
        })
    }

    /// Pending approval requests.
    pub fn pending_approvals(&self) -> Result<Vec<ApprovalView>> {
        self.send_and_wait(|respond| Command::PendingApprovals { respond })
    }

    /// One approval request.
    pub fn get_approval(&self, request_id: ApprovalRequestId) -> Result<Option<ApprovalView>> {
        self.send_and_wait(|respond| Command::GetApproval {
            request_id,
            respond,
        })
    }

    /// Request shutdown.
    pub fn shutdown(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::Shutdown)
            .map_err(|_| anyhow::anyhow!("Core channel closed"))
    }
}

impl std::fmt::Debug for CoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreHandle").finish_non_exhaustive()
    }
}

/// Fan-out of Core events to any number of subscribers.
///
/// Subscribers that stop draining are dropped on the next failed send.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(tx);
        rx
    }

    pub fn publish(&self, event: &Event) {
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Core - single-owner state management thread.
pub struct Core {
    store: JobStore,
    bridge: BridgeState,
    config: CoreConfig,
    commands: Receiver<Command>,
    events: EventBus,
    /// Wakes the queue worker on submissions and decisions.
    worker_wake: Option<Sender<WorkSignal>>,
}

impl Core {
    /// Create a Core and its handle. The Core runs in its own thread via
    /// [`spawn_core`].
    pub fn new(
        config: CoreConfig,
        events: EventBus,
        worker_wake: Option<Sender<WorkSignal>>,
    ) -> Result<(Self, CoreHandle), QueueError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let store = JobStore::new(config.queue_dir.clone())?;
        let healed = store.recover()?;
        if healed > 0 {
            info!(healed, "queue recovery completed");
        }

        let core = Self {
            store,
            bridge: BridgeState::new(),
            config,
            commands: cmd_rx,
            events,
            worker_wake,
        };
        Ok((core, CoreHandle::new(cmd_tx)))
    }

    /// Run the Core loop. Blocks until shutdown.
    pub fn run(&mut self) {
        info!("Core started");

        loop {
            match self.commands.recv() {
                Ok(Command::Shutdown) => {
                    info!("Core received shutdown command");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => {
                    info!("Core command channel closed");
                    break;
                }
            }
        }

        info!("Core stopped");
    }

    fn wake_worker(&self) {
        if let Some(wake) = &self.worker_wake {
            let _ = wake.send(WorkSignal::Wake);
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit {
                submission,
                respond,
            } => {
                let record = JobRecord::new(submission);
                let result = self
                    .store
                    .submit(&record, self.config.capacity)
                    .map(|_| record);
                if let Ok(ref record) = result {
                    self.events.publish(&Event::JobSubmitted {
                        job_id: record.id.clone(),
                    });
                    // Immediate-scan trigger: a pending job should be
                    // bridged (or an approved one claimed) without waiting
                    // a full tick.
                    self.wake_worker();
                }
                let _ = respond.send(result);
            }

            Command::GetJob { id, poll, respond } => {
                let result = if poll {
                    self.store.record_poll(&id)
                } else {
                    self.store.load(&id)
                };
                let _ = respond.send(result);
            }

            Command::ListJobs { filter, respond } => {
                let _ = respond.send(self.store.list(&filter));
            }

            Command::Stats { respond } => {
                let result = self
                    .store
                    .stats(self.config.execution_capacity)
                    .map(|queue| {
                        let (bridge_pending, bridge_decided) = self.bridge.counts();
                        SystemStats {
                            queue,
                            bridge_pending,
                            bridge_decided,
                        }
                    });
                let _ = respond.send(result);
            }

            Command::ClaimApproved { max, respond } => {
                let _ = respond.send(self.claim_approved(max));
            }

            Command::SetProgress {
                id,
                message,
                percentage,
                respond,
            } => {
                let result = self
                    .store
                    .transition(&id, JobStatus::Executing, |record| {
                        record.set_progress(message.clone(), percentage)
                    })
                    .map(|_| ());
                if result.is_ok() {
                    self.events.publish(&Event::JobProgress {
                        job_id: id,
                        message,
                        percentage,
                    });
                }
                let _ = respond.send(result);
            }

            Command::FinishExecution {
                id,
                outcome,
                error,
                respond,
            } => {
                let _ = respond.send(self.finish_execution(id, outcome, error));
            }

            Command::FailSpawn { id, error, respond } => {
                let result = self
                    .store
                    .transition(&id, JobStatus::Executing, |record| {
                        record.fail_spawn(error.clone())
                    })
                    .map(|record| {
                        self.events.publish(&Event::JobFinished {
                            job_id: record.id.clone(),
                            status: record.status,
                        });
                    });
                let _ = respond.send(result);
            }

            Command::RequeueJob { id, respond } => {
                let result = self
                    .store
                    .transition(&id, JobStatus::Executing, |record| {
                        record.status = JobStatus::Approved;
                        record.started_at = None;
                        record.current_phase = "execution".to_string();
                        record.progress_message = "Waiting for a free execution slot".to_string();
                    })
                    .map(|_| ());
                let _ = respond.send(result);
            }

            Command::CancelJob { id, respond } => {
                let _ = respond.send(self.cancel_job(id));
            }

            Command::RetentionSweep { respond } => {
                let result = self.store.retention_sweep(self.config.retention_ms);
                if result.is_ok() {
                    if let Err(e) = self.store.write_stats(self.config.execution_capacity) {
                        warn!(error = %e, "failed to refresh stats.json");
                    }
                }
                let _ = respond.send(result);
            }

            Command::BridgeScan { respond } => {
                let _ = respond.send(self.bridge_scan());
            }

            Command::SweepApprovalTimeouts { respond } => {
                let _ = respond.send(self.sweep_approval_timeouts());
            }

            Command::CreateDirectApproval {
                command,
                args,
                working_directory,
                user_description,
                waiter,
                respond,
            } => {
                let view = self.bridge.create_direct(
                    command,
                    args,
                    working_directory,
                    user_description,
                    waiter,
                );
                self.events.publish(&Event::RequestCreated { view: view.clone() });
                let _ = respond.send(view);
            }

            Command::Decide {
                request_id,
                decision,
                respond,
            } => {
                let _ = respond.send(self.decide(request_id, decision));
            }

            Command::PendingApprovals { respond } => {
                let _ = respond.send(self.bridge.pending_views());
            }

            Command::GetApproval {
                request_id,
                respond,
            } => {
                let _ = respond.send(self.bridge.get(&request_id));
            }

            Command::Shutdown => {
                // Handled in the main loop.
            }
        }
    }

    fn claim_approved(&mut self, max: usize) -> Result<Vec<JobRecord>, QueueError> {
        let mut claimed = Vec::new();
        for id in self.store.list_ids(JobStatus::Approved)? {
            if claimed.len() >= max {
                break;
            }
            // Re-fetch under the single writer: only still-approved jobs
            // move; a concurrent cancel wins.
            match self
                .store
                .transition(&id, JobStatus::Approved, |record| record.begin_execution())
            {
                Ok(record) => {
                    self.events.publish(&Event::JobStarted {
                        job_id: record.id.clone(),
                    });
                    claimed.push(record);
                }
                Err(QueueError::WrongStatus { .. }) | Err(QueueError::JobNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(claimed)
    }

    fn finish_execution(
        &mut self,
        id: JobId,
        outcome: ExecOutcome,
        error: Option<JobError>,
    ) -> Result<JobRecord, QueueError> {
        let record = if outcome.success() {
            // Results are already flushed by the processor; the token is
            // minted strictly afterwards.
            let token = JobStore::mint_token();
            self.store.transition(&id, JobStatus::Executing, |record| {
                record.complete(&outcome, token.clone())
            })?
        } else {
            let error = error.unwrap_or_else(|| default_execution_error(&outcome));
            self.store.transition(&id, JobStatus::Executing, |record| {
                record.fail_execution(&outcome, error.clone())
            })?
        };

        self.events.publish(&Event::JobFinished {
            job_id: record.id.clone(),
            status: record.status,
        });
        Ok(record)
    }

    fn cancel_job(&mut self, id: JobId) -> Result<CancelOutcome, QueueError> {
        let status = self
            .store
            .locate(&id)
            .ok_or_else(|| QueueError::JobNotFound { id: id.0.clone() })?;

        match status {
            JobStatus::PendingApproval | JobStatus::Approved => {
                self.store
                    .transition(&id, status, |record| record.cancel())?;
                self.events.publish(&Event::JobFinished {
                    job_id: id,
                    status: JobStatus::Cancelled,
                });
                Ok(CancelOutcome::Cancelled)
            }
            JobStatus::Executing => Ok(CancelOutcome::Executing),
            terminal => Ok(CancelOutcome::AlreadyTerminal(terminal)),
        }
    }

    fn bridge_scan(&mut self) -> Result<Vec<ApprovalView>, QueueError> {
        let pending_ids = self.store.list_ids(JobStatus::PendingApproval)?;
        let mut live = HashSet::new();
        let mut created = Vec::new();

        for id in &pending_ids {
            live.insert(id.clone());
            if let Some(record) = self.store.load(id)? {
                if let Some(view) = self.bridge.bridge_job(&record) {
                    self.events.publish(&Event::RequestCreated { view: view.clone() });
                    created.push(view);
                }
            }
        }

        self.bridge.retain_jobs(&live);
        self.bridge
            .evict_decided(Duration::from_millis(self.config.bridge_linger_ms));
        Ok(created)
    }

    fn sweep_approval_timeouts(&mut self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut expired = 0;
        for id in self.store.list_ids(JobStatus::PendingApproval)? {
            let record = match self.store.load(&id)? {
                Some(r) => r,
                None => continue,
            };
            let age_ms = now
                .signed_duration_since(record.submitted_at)
                .num_milliseconds()
                .max(0) as u64;
            if age_ms < self.config.approval_timeout_ms {
                continue;
            }
            match self
                .store
                .transition(&id, JobStatus::PendingApproval, |r| r.expire_approval())
            {
                Ok(record) => {
                    expired += 1;
                    self.events.publish(&Event::JobFinished {
                        job_id: record.id.clone(),
                        status: record.status,
                    });
                }
                Err(QueueError::WrongStatus { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(expired)
    }

    fn decide(
        &mut self,
        request_id: ApprovalRequestId,
        decision: Decision,
    ) -> Result<ApprovalView, ApprovalError> {
        use crate::approvals::ApprovalSource;

        let source = self
            .bridge
            .source_of(&request_id)
            .ok_or_else(|| ApprovalError::System {
                message: format!("unknown approval request: {}", request_id),
            })?;

        match source {
            ApprovalSource::QueuedJob { job_id } => {
                // Disk first, memory second, event last: anyone who sees
                // `requestDecided` can also see the moved record.
                let transition = self
                    .store
                    .transition(&job_id, JobStatus::PendingApproval, |record| {
                        if decision.approve {
                            record.approve(&decision.decided_by);
                        } else {
                            record.reject(&decision.decided_by, decision.reason.clone());
                        }
                    });
                if let Err(e) = transition {
                    return Err(ApprovalError::System {
                        message: format!("queue transition failed: {}", e),
                    });
                }

                self.bridge.mark_decided(&request_id, decision.approve);
                let view = self
                    .bridge
                    .get(&request_id)
                    .ok_or_else(|| ApprovalError::System {
                        message: "bridged request vanished mid-decision".to_string(),
                    })?;
                self.events
                    .publish(&Event::RequestDecided { view: view.clone() });
                if decision.approve {
                    self.wake_worker();
                }
                Ok(view)
            }
            ApprovalSource::Direct => {
                if !self.bridge.resolve_direct(&request_id, decision) {
                    return Err(ApprovalError::System {
                        message: format!("direct request vanished: {}", request_id),
                    });
                }
                let view = self
                    .bridge
                    .get(&request_id)
                    .ok_or_else(|| ApprovalError::System {
                        message: "direct request vanished mid-decision".to_string(),
                    })?;
                self.events
                    .publish(&Event::RequestDecided { view: view.clone() });
                Ok(view)
            }
        }
    }
}

/// Spawn Core in a dedicated thread.
pub fn spawn_core(
    config: CoreConfig,
    events: EventBus,
    worker_wake: Option<Sender<WorkSignal>>,
) -> Result<(CoreHandle, JoinHandle<()>)> {
    let (mut core, handle) = Core::new(config, events, worker_wake)?;

    let thread_handle = thread::Builder::new()
        .name("warden-core".to_string())
        .spawn(move || {
            core.run();
        })?;

    Ok((handle, thread_handle))
}

fn default_execution_error(outcome: &ExecOutcome) -> JobError {
    if outcome.timed_out {
        JobError {
            code: "EXECUTION_TIMEOUT".to_string(),
            message: format!(
                "command exceeded its timeout after {} ms",
                outcome.execution_time_ms
            ),
            suggested_action: Some("Raise the timeout or split the work".to_string()),
        }
    } else if outcome.killed {
        JobError {
            code: "EXECUTION_FAILED".to_string(),
            message: "command was terminated by a signal".to_string(),
            suggested_action: None,
        }
    } else {
        let code = outcome.exit_code.unwrap_or(-1);
        JobError {
            code: format!("EXIT_CODE_{}", code),
            message: format!("command exited with status {}", code),
            suggested_action: Some("Inspect stderr.log for details".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::ApprovalState;
    use crate::queue::Submission;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn spawn_test_core() -> (CoreHandle, EventBus, TempDir, JoinHandle<()>) {
        let temp = TempDir::new().unwrap();
        let mut config = CoreConfig::new(temp.path().to_path_buf());
        config.approval_timeout_ms = 50;
        let events = EventBus::new();
        let (handle, thread) = spawn_core(config, events.clone(), None).unwrap();
        (handle, events, temp, thread)
    }

    fn submission(requires_confirmation: bool) -> Submission {
        Submission {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            working_directory: PathBuf::from("/tmp"),
            timeout_ms: 30_000,
            requires_confirmation,
            session_id: "session".to_string(),
            conversation_id: None,
            user_description: None,
        }
    }

    fn outcome_ok() -> ExecOutcome {
        ExecOutcome {
            exit_code: Some(0),
            execution_time_ms: 5,
            timed_out: false,
            killed: false,
            pid: 1,
            stdout_bytes: 0,
            stderr_bytes: 0,
        }
    }

    #[test]
    fn submit_claim_finish_lifecycle() {
        let (core, _events, _temp, thread) = spawn_test_core();

        let record = core.submit(submission(false)).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Approved);

        let claimed = core.claim_approved(4).unwrap().unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::Executing);

        let finished = core
            .finish_execution(record.id.clone(), outcome_ok(), None)
            .unwrap()
            .unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(finished.execution_token.is_some());

        core.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn decision_reaches_disk_before_event() {
        let (core, events, _temp, thread) = spawn_test_core();
        let rx = events.subscribe();

        let record = core.submit(submission(true)).unwrap().unwrap();
        let created = core.bridge_scan().unwrap().unwrap();
        assert_eq!(created.len(), 1);

        let view = core
            .decide(
                created[0].request_id.clone(),
                Decision {
                    approve: true,
                    decided_by: "operator".to_string(),
                    reason: None,
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(view.status, ApprovalState::Approved);

        // Once the RequestDecided event arrives, the record must already
        // be in `approved`.
        let mut saw_decided = false;
        while let Ok(event) = rx.try_recv() {
            if let Event::RequestDecided { view } = event {
                saw_decided = true;
                assert_eq!(view.status, ApprovalState::Approved);
                let loaded = core.get_job(record.id.clone(), false).unwrap().unwrap();
                assert_eq!(loaded.unwrap().status, JobStatus::Approved);
            }
        }
        assert!(saw_decided);

        core.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn reject_moves_job_to_rejected() {
        let (core, _events, _temp, thread) = spawn_test_core();

        let record = core.submit(submission(true)).unwrap().unwrap();
        let created = core.bridge_scan().unwrap().unwrap();
        core.decide(
            created[0].request_id.clone(),
            Decision {
                approve: false,
                decided_by: "operator".to_string(),
                reason: Some("no".to_string()),
            },
        )
        .unwrap()
        .unwrap();

        let loaded = core
            .get_job(record.id, false)
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, JobStatus::Rejected);
        assert_eq!(loaded.rejection_reason.as_deref(), Some("no"));

        core.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn approval_timeout_sweep_expires_old_pending() {
        let (core, _events, _temp, thread) = spawn_test_core();

        let record = core.submit(submission(true)).unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(80));
        let expired = core.sweep_approval_timeouts().unwrap().unwrap();
        assert_eq!(expired, 1);

        let loaded = core
            .get_job(record.id, false)
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, JobStatus::ApprovalTimeout);

        core.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn cancel_outcomes_by_status() {
        let (core, _events, _temp, thread) = spawn_test_core();

        let pending = core.submit(submission(true)).unwrap().unwrap();
        let outcome = core.cancel_job(pending.id.clone()).unwrap().unwrap();
        assert!(matches!(outcome, CancelOutcome::Cancelled));

        let again = core.cancel_job(pending.id).unwrap().unwrap();
        assert!(matches!(
            again,
            CancelOutcome::AlreadyTerminal(JobStatus::Cancelled)
        ));

        let executing = core.submit(submission(false)).unwrap().unwrap();
        core.claim_approved(1).unwrap().unwrap();
        let outcome = core.cancel_job(executing.id).unwrap().unwrap();
        assert!(matches!(outcome, CancelOutcome::Executing));

        core.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn direct_approval_round_trip() {
        let (core, _events, _temp, thread) = spawn_test_core();

        let (tx, rx) = mpsc::channel();
        let view = core
            .create_direct_approval(
                "git".to_string(),
                vec!["push".to_string()],
                PathBuf::from("/work"),
                None,
                tx,
            )
            .unwrap();

        assert_eq!(core.pending_approvals().unwrap().len(), 1);

        core.decide(
            view.request_id,
            Decision {
                approve: true,
                decided_by: "operator".to_string(),
                reason: None,
            },
        )
        .unwrap()
        .unwrap();

        let decision = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(decision.approve);

        core.shutdown().unwrap();
        thread.join().unwrap();
    }
}
