//! Session Facade - The Entry Point For The RPC Layer
//!
//! Every tool call lands here. The facade validates commands before
//! anything touches the queue or a process, owns the wiring between Core,
//! queue worker, supervisor, and approval server, and orchestrates
//! shutdown in the required order: processor (draining its children),
//! then Core, then the approval server, then a residual sweep of anything
//! still in the process table.

use crate::approvals::{ApprovalError, ApprovalServer, ApprovalView, Decision};
use crate::core::{spawn_core, CancelOutcome, CoreConfig, CoreHandle, EventBus};
use crate::queue::processor::{QueueWorker, QueueWorkerHandle, WorkerConfig, WorkSignal};
use crate::queue::store::{QueueError, ResultsLayout};
use crate::queue::{JobId, JobRecord, JobSummary, ListFilter, Submission};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;
use warden_logging::{LogBuffer, LogQuery, LogRecord};
use warden_protocol::{defaults, JobStatus, WardenConfig};
use warden_security::{build_child_env, CommandValidator, ValidationError};
use warden_worker::{
    KillTarget, ProcessSupervisor, Signal, SpawnError, SpawnRequest, StreamKind,
};

/// Sentinel identity for decisions the system makes on its own behalf.
const SYSTEM_DECIDER: &str = "system:approval-timeout";

/// In-memory buffer cap for synchronous executions; the RPC response
/// budget makes anything bigger pointless.
const SYNC_BUFFER_CAP: usize = 1024 * 1024;

/// Errors surfaced to the RPC layer. Display always leads with the stable
/// error code so the transport envelope can carry it verbatim.
#[derive(Debug)]
pub enum FacadeError {
    Validation(ValidationError),
    Approval(ApprovalError),
    Spawn(SpawnError),
    Queue(QueueError),
    ExecutionTimeout { execution_time_ms: u64 },
    Internal(String),
}

impl FacadeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.code(),
            Self::Approval(e) => e.code(),
            Self::Spawn(e) => e.code(),
            Self::Queue(e) => e.code(),
            Self::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
            Self::Internal(_) => "QUEUE_IO_ERROR",
        }
    }
}

impl fmt::Display for FacadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{}: {}", e.code(), e),
            Self::Approval(e) => write!(f, "{}: {}", e.code(), e),
            Self::Spawn(e) => write!(f, "{}: {} ({})", e.code(), e, e.suggested_action()),
            Self::Queue(e) => write!(f, "{}: {}", e.code(), e),
            Self::ExecutionTimeout { execution_time_ms } => write!(
                f,
                "EXECUTION_TIMEOUT: command exceeded its timeout after {} ms",
                execution_time_ms
            ),
            Self::Internal(message) => write!(f, "QUEUE_IO_ERROR: {}", message),
        }
    }
}

impl std::error::Error for FacadeError {}

impl From<ValidationError> for FacadeError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<ApprovalError> for FacadeError {
    fn from(e: ApprovalError) -> Self {
        Self::Approval(e)
    }
}

impl From<SpawnError> for FacadeError {
    fn from(e: SpawnError) -> Self {
        Self::Spawn(e)
    }
}

impl From<QueueError> for FacadeError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<anyhow::Error> for FacadeError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", e))
    }
}

/// One synchronous or asynchronous execution request.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub env: HashMap<String, String>,
    pub conversation_id: Option<String>,
    pub user_description: Option<String>,
}

/// Synchronous execution response.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time: u64,
    pub timed_out: bool,
    pub killed: bool,
    pub pid: u32,
}

/// Async submission response.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_approval_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_url: Option<String>,
}

/// Completed-job results.
#[derive(Debug, Clone, Serialize)]
pub struct ResultResponse {
    pub job_id: JobId,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub truncated_inline: bool,
}

/// Per-conversation queue digest.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationJobs {
    pub jobs: Vec<JobSummary>,
    pub active: usize,
    pub completed: usize,
}

/// The facade owns every long-lived component of the service.
pub struct SessionFacade {
    config: WardenConfig,
    session_id: String,
    queue_dir: PathBuf,
    core: CoreHandle,
    supervisor: ProcessSupervisor,
    worker: QueueWorkerHandle,
    events: EventBus,
    approval_server: Mutex<Option<ApprovalServer>>,
    log_buffer: Option<LogBuffer>,
    core_thread: Mutex<Option<JoinHandle<()>>>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionFacade {
    /// Boot the service: store recovery, Core thread, queue worker.
    pub fn start(
        config: WardenConfig,
        queue_dir: PathBuf,
        log_buffer: Option<LogBuffer>,
    ) -> Result<Self, FacadeError> {
        let events = EventBus::new();
        let (wake_tx, wake_rx) = mpsc::channel::<WorkSignal>();

        let core_config = CoreConfig {
            queue_dir: queue_dir.clone(),
            capacity: config.queue.capacity,
            approval_timeout_ms: config.approval_timeout_ms,
            bridge_linger_ms: defaults::BRIDGE_LINGER_MS,
            execution_capacity: config.max_concurrent,
            retention_ms: config.queue.retention_ms,
        };
        let (core, core_thread) =
            spawn_core(core_config, events.clone(), Some(wake_tx.clone()))
                .map_err(|e| FacadeError::Internal(format!("{:#}", e)))?;

        let supervisor = ProcessSupervisor::new(config.max_concurrent);

        let worker_config = WorkerConfig {
            tick: Duration::from_millis(defaults::QUEUE_TICK_MS),
            cleanup_interval: Duration::from_millis(config.queue.cleanup_interval_ms),
            env_policy: config.env.clone(),
        };
        let (worker, worker_handle) = QueueWorker::new(
            core.clone(),
            supervisor.clone(),
            ResultsLayout::new(queue_dir.clone()),
            worker_config,
            wake_rx,
            wake_tx,
        );
        let worker_thread = worker.spawn();

        let session_id = Uuid::new_v4().to_string();
        info!(%session_id, "session facade started");
        Ok(Self {
            config,
            session_id,
            queue_dir,
            core,
            supervisor,
            worker: worker_handle,
            events,
            approval_server: Mutex::new(None),
            log_buffer,
            core_thread: Mutex::new(Some(core_thread)),
            worker_thread: Mutex::new(Some(worker_thread)),
        })
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn core(&self) -> &CoreHandle {
        &self.core
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    // ========================================================================
    // Synchronous execution
    // ========================================================================

    /// Validate and execute a command, blocking until it finishes.
    pub fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResponse, FacadeError> {
        self.execute_with_sink(request, |_, _| {})
    }

    /// Like [`SessionFacade::execute`], forwarding chunks to `sink` as they
    /// arrive (the streaming flavour of the tool).
    pub fn execute_with_sink(
        &self,
        request: ExecuteRequest,
        mut sink: impl FnMut(StreamKind, &[u8]),
    ) -> Result<ExecuteResponse, FacadeError> {
        let validation = self.validate(&request)?;

        if validation.requires_confirmation {
            self.gate_synchronous(&request, &validation)?;
        }

        let env = build_child_env(&self.config.env, &request.env)?;
        let timeout_ms = request.timeout_ms.unwrap_or(validation.timeout_ms);

        let mut spawn = SpawnRequest::new(
            validation.matched_command.clone(),
            validation.sanitized_args.clone(),
            validation.resolved_working_dir.clone(),
        );
        spawn.env = env;
        spawn.timeout_ms = timeout_ms;
        spawn.buffer_cap = SYNC_BUFFER_CAP;

        let result = self.supervisor.spawn(spawn, Some(&mut sink))?;

        if result.timed_out {
            return Err(FacadeError::ExecutionTimeout {
                execution_time_ms: result.execution_time_ms,
            });
        }

        Ok(ExecuteResponse {
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            execution_time: result.execution_time_ms,
            timed_out: result.timed_out,
            killed: result.killed,
            pid: result.pid,
        })
    }

    /// Park the caller on the approval plane until a human (or the window)
    /// decides.
    fn gate_synchronous(
        &self,
        request: &ExecuteRequest,
        validation: &warden_security::Validation,
    ) -> Result<(), FacadeError> {
        let (tx, rx) = mpsc::channel::<Decision>();
        let view = self.core.create_direct_approval(
            validation.matched_command.clone(),
            validation.sanitized_args.clone(),
            validation.resolved_working_dir.clone(),
            request.user_description.clone(),
            tx,
        )?;

        let window = Duration::from_millis(self.config.approval_timeout_ms);
        let decision = match rx.recv_timeout(window) {
            Ok(decision) => decision,
            Err(RecvTimeoutError::Timeout) => {
                // Close the request as rejected-by-timeout; if a human beat
                // us to it the first decision is already queued.
                let _ = self.core.decide(
                    view.request_id.clone(),
                    Decision {
                        approve: false,
                        decided_by: SYSTEM_DECIDER.to_string(),
                        reason: Some("approval window elapsed".to_string()),
                    },
                );
                match rx.try_recv() {
                    Ok(decision) => decision,
                    Err(_) => return Err(ApprovalError::Timeout.into()),
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ApprovalError::System {
                    message: "approval plane went away".to_string(),
                }
                .into())
            }
        };

        if decision.decided_by == SYSTEM_DECIDER {
            return Err(ApprovalError::Timeout.into());
        }
        if !decision.approve {
            return Err(ApprovalError::UserRejected {
                decided_by: decision.decided_by,
                reason: decision.reason,
            }
            .into());
        }
        Ok(())
    }

    // ========================================================================
    // Async queue
    // ========================================================================

    /// Submit a command to the durable queue.
    pub fn submit_async(&self, request: ExecuteRequest) -> Result<SubmitResponse, FacadeError> {
        let validation = self.validate(&request)?;

        let submission = Submission {
            command: validation.matched_command.clone(),
            args: validation.sanitized_args.clone(),
            working_directory: validation.resolved_working_dir.clone(),
            timeout_ms: request.timeout_ms.unwrap_or(validation.timeout_ms),
            requires_confirmation: validation.requires_confirmation,
            session_id: self.session_id.clone(),
            conversation_id: request.conversation_id.clone(),
            user_description: request.user_description.clone(),
        };

        let record = self.core.submit(submission)??;

        let estimated_approval_time_ms = if record.status == JobStatus::PendingApproval {
            let average = self
                .core
                .stats()
                .ok()
                .and_then(|r| r.ok())
                .and_then(|s| s.queue.average_decision_ms);
            Some(average.unwrap_or(defaults::APPROVAL_POLL_CAP_MS * 10))
        } else {
            None
        };

        Ok(SubmitResponse {
            job_id: record.id.clone(),
            status: record.status,
            submitted_at: record.submitted_at,
            estimated_approval_time_ms,
            approval_url: self.approval_url(),
        })
    }

    /// Fetch a job with the poll side effect.
    pub fn check_status(&self, job_id: &str) -> Result<JobRecord, FacadeError> {
        self.core
            .get_job(JobId::from_string(job_id), true)??
            .ok_or_else(|| {
                QueueError::JobNotFound {
                    id: job_id.to_string(),
                }
                .into()
            })
    }

    /// Fetch results, gated on the execution token.
    pub fn get_result(&self, job_id: &str, token: &str) -> Result<ResultResponse, FacadeError> {
        let record = self
            .core
            .get_job(JobId::from_string(job_id), false)??
            .ok_or(QueueError::JobNotFound {
                id: job_id.to_string(),
            })?;

        let expected = match (&record.status, &record.execution_token) {
            (JobStatus::Completed, Some(expected)) => expected,
            _ => {
                return Err(QueueError::InvalidExecutionToken {
                    id: job_id.to_string(),
                }
                .into())
            }
        };
        if !constant_time_eq(expected, token) {
            return Err(QueueError::InvalidExecutionToken {
                id: job_id.to_string(),
            }
            .into());
        }

        let layout = ResultsLayout::new(self.queue_dir());
        let stdout_path = layout.stdout_path(&record.id);
        let stderr_path = layout.stderr_path(&record.id);
        let stdout_bytes = file_len(&stdout_path);
        let stderr_bytes = file_len(&stderr_path);
        let inline_ok = stdout_bytes <= defaults::INLINE_RESULT_MAX_BYTES
            && stderr_bytes <= defaults::INLINE_RESULT_MAX_BYTES;

        let (stdout, stderr) = if inline_ok {
            (
                std::fs::read_to_string(&stdout_path).ok(),
                std::fs::read_to_string(&stderr_path).ok(),
            )
        } else {
            (None, None)
        };

        Ok(ResultResponse {
            job_id: record.id.clone(),
            exit_code: record.exit_code,
            execution_time_ms: record.execution_time_ms,
            stdout,
            stderr,
            stdout_path,
            stderr_path,
            stdout_bytes,
            stderr_bytes,
            truncated_inline: !inline_ok,
        })
    }

    /// Filtered job listing.
    pub fn list_jobs(&self, filter: ListFilter) -> Result<Vec<JobSummary>, FacadeError> {
        Ok(self.core.list_jobs(filter)??)
    }

    /// Digest of a conversation's jobs.
    pub fn check_conversation_jobs(
        &self,
        conversation_id: Option<String>,
    ) -> Result<ConversationJobs, FacadeError> {
        let jobs = self.list_jobs(ListFilter {
            conversation_id,
            limit: 100,
            ..ListFilter::default()
        })?;
        let active = jobs.iter().filter(|j| !j.status.is_terminal()).count();
        let completed = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .count();
        Ok(ConversationJobs {
            jobs,
            active,
            completed,
        })
    }

    /// Kill a job (by id) or a raw child (by pid).
    ///
    /// Queued jobs are cancelled without ever spawning; executing jobs get
    /// the signal through the supervisor.
    pub fn kill(&self, process_id: &str, signal: Option<&str>) -> Result<String, FacadeError> {
        let signal = match signal {
            Some(name) => Signal::from_name(name).ok_or_else(|| {
                FacadeError::Internal(format!("unknown signal: {}", name))
            })?,
            None => Signal::Term,
        };

        if let Ok(pid) = process_id.parse::<u32>() {
            return if self.supervisor.kill(KillTarget::Pid(pid), signal) {
                Ok(format!("signalled pid {}", pid))
            } else {
                Err(QueueError::JobNotFound {
                    id: process_id.to_string(),
                }
                .into())
            };
        }

        match self.core.cancel_job(JobId::from_string(process_id))?? {
            CancelOutcome::Cancelled => Ok(format!("job {} cancelled", process_id)),
            CancelOutcome::Executing => {
                if self.supervisor.kill_job(process_id, signal) {
                    Ok(format!("job {} signalled", process_id))
                } else {
                    // The child finished in the window between the status
                    // read and the signal; nothing left to kill.
                    Ok(format!("job {} already finished", process_id))
                }
            }
            CancelOutcome::AlreadyTerminal(status) => {
                Ok(format!("job {} already {}", process_id, status))
            }
        }
    }

    // ========================================================================
    // Approval center
    // ========================================================================

    /// Start (or restart) the approval UI; returns its URL.
    pub fn launch_approval_center(&self, force_restart: bool) -> Result<String, FacadeError> {
        let mut guard = self
            .approval_server
            .lock()
            .map_err(|_| FacadeError::Internal("approval server lock poisoned".to_string()))?;

        if let Some(server) = guard.as_mut() {
            if !force_restart {
                return Ok(server.url());
            }
            server.stop();
            *guard = None;
        }

        let server = ApprovalServer::start(
            self.core.clone(),
            &self.events,
            self.config.launch_browser,
        )
        .map_err(|e| FacadeError::Internal(format!("{}: {}", e.code(), e)))?;
        let url = server.url();
        *guard = Some(server);
        Ok(url)
    }

    /// URL of the running approval center, if any.
    pub fn approval_url(&self) -> Option<String> {
        self.approval_server
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.url()))
    }

    /// Pending approvals + server state, for `get_approval_status`.
    pub fn approval_status(&self) -> Result<(Vec<ApprovalView>, Option<String>), FacadeError> {
        let pending = self.core.pending_approvals()?;
        Ok((pending, self.approval_url()))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn log_buffer(&self) -> Option<&LogBuffer> {
        self.log_buffer.as_ref()
    }

    pub fn query_logs(&self, query: &LogQuery) -> Vec<LogRecord> {
        self.log_buffer
            .as_ref()
            .map(|buffer| buffer.query(query))
            .unwrap_or_default()
    }

    fn queue_dir(&self) -> PathBuf {
        self.queue_dir.clone()
    }

    fn validate(
        &self,
        request: &ExecuteRequest,
    ) -> Result<warden_security::Validation, FacadeError> {
        let validator = CommandValidator::new(&self.config);
        Ok(validator.validate(
            &request.command,
            &request.args,
            request.working_directory.as_deref(),
            &self.config.start_directory,
        )?)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop everything, in order: processor, Core, approval server, then a
    /// residual sweep of the process table.
    pub fn shutdown(&self) {
        info!("session facade shutting down");

        // 1. Processor stop. Its stop contract includes draining its own
        //    children: stop the tick, wait out the shutdown window, then
        //    force-kill. Core must still be up here so the job threads can
        //    record their final state.
        self.worker.shutdown();
        if let Ok(mut guard) = self.worker_thread.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_timeout_ms);
        while self.supervisor.active_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(100));
        }
        let leftover = self.supervisor.active_count();
        if leftover > 0 {
            warn!(leftover, "force-killing children at shutdown");
            self.supervisor.kill_all(Signal::Kill);
            while self.supervisor.active_count() > 0 {
                std::thread::sleep(Duration::from_millis(50));
            }
        }
        // Let the job threads report their final state before Core goes.
        std::thread::sleep(Duration::from_millis(200));

        // 2. Core.
        let _ = self.core.shutdown();
        if let Ok(mut guard) = self.core_thread.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }

        // 3. Approval server.
        if let Ok(mut guard) = self.approval_server.lock() {
            if let Some(server) = guard.as_mut() {
                server.stop();
            }
            *guard = None;
        }

        // 4. Residual children: a synchronous execution that raced the
        //    steps above is still in the table; nothing may outlive us.
        let residual = self.supervisor.kill_all(Signal::Kill);
        if residual > 0 {
            warn!(residual, "killed residual children at shutdown");
            while self.supervisor.active_count() > 0 {
                std::thread::sleep(Duration::from_millis(50));
            }
        }

        info!("session facade stopped");
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Length-safe comparison for execution tokens.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_errors_lead_with_the_code() {
        let err = FacadeError::from(ValidationError::NotWhitelisted {
            command: "rm".to_string(),
        });
        assert!(err.to_string().starts_with("NOT_WHITELISTED:"));
        assert_eq!(err.code(), "NOT_WHITELISTED");

        let err = FacadeError::ExecutionTimeout {
            execution_time_ms: 5500,
        };
        assert!(err.to_string().starts_with("EXECUTION_TIMEOUT:"));
    }

    #[test]
    fn token_comparison_is_exact() {
        assert!(constant_time_eq("deadbeef", "deadbeef"));
        assert!(!constant_time_eq("deadbeef", "deadbeee"));
        assert!(!constant_time_eq("deadbeef", "dead"));
    }
}
