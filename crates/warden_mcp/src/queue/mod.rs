//! Async Job Queue
//!
//! Persistent, filesystem-backed queue for command executions that outlive
//! the controller connection:
//! - Job records sharded by lifecycle status on disk
//! - Background processor driving approved jobs through the supervisor
//! - Result capture to per-job log files and a completion token
//!
//! # Design
//!
//! Submission returns immediately with a job_id once the record is durable.
//! Clients poll via `check_job_status` and fetch results with the token
//! minted at completion.

pub mod processor;
pub mod store;

pub use processor::{QueueWorker, QueueWorkerHandle};
pub use store::{JobStore, QueueStats, StatusCounts};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;
use warden_protocol::{defaults, JobStatus, OperationType};

/// Unique job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new random job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Structured execution error carried on the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Stable error code (`EXECUTION_TIMEOUT`, `EXIT_CODE_2`, ...).
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// A submission as it arrives from the facade, already validated.
#[derive(Debug, Clone)]
pub struct Submission {
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub timeout_ms: u64,
    pub requires_confirmation: bool,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub user_description: Option<String>,
}

/// The central persistent entity: one requested command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    // Identity
    pub id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub session_id: String,

    // Request
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub requested_timeout_ms: u64,
    pub operation_type: OperationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_description: Option<String>,
    pub requires_confirmation: bool,

    // Timestamps (Unix milliseconds on disk)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub submitted_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_polled_at: Option<DateTime<Utc>>,

    // Lifecycle
    pub status: JobStatus,
    pub current_phase: String,
    pub progress_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u8>,

    // Execution result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub killed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    // Access control: present exactly when status == completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_token: Option<String>,

    // Controls
    pub poll_count: u64,
    pub retry_count: u32,
    pub can_retry: bool,
    pub estimated_duration_ms: u64,

    // Approval provenance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl JobRecord {
    /// Build the initial record for a submission.
    ///
    /// Auto-approval is atomic with submission: a pattern without
    /// confirmation lands directly in `approved` with
    /// `approved_at == submitted_at`.
    pub fn new(submission: Submission) -> Self {
        let now = Utc::now();
        let operation_type = OperationType::classify(&submission.command, &submission.args);
        let (status, phase, message, approved_at) = if submission.requires_confirmation {
            (
                JobStatus::PendingApproval,
                "approval",
                "Submitted for approval",
                None,
            )
        } else {
            (
                JobStatus::Approved,
                "execution",
                "Approved automatically",
                Some(now),
            )
        };

        Self {
            id: JobId::new(),
            conversation_id: submission.conversation_id,
            session_id: submission.session_id,
            command: submission.command,
            args: submission.args,
            working_directory: submission.working_directory,
            requested_timeout_ms: submission.timeout_ms,
            operation_type,
            user_description: submission.user_description,
            requires_confirmation: submission.requires_confirmation,
            submitted_at: now,
            last_updated: now,
            started_at: None,
            completed_at: None,
            approved_at,
            last_polled_at: None,
            status,
            current_phase: phase.to_string(),
            progress_message: message.to_string(),
            progress_percentage: None,
            exit_code: None,
            execution_time_ms: None,
            timed_out: None,
            killed: None,
            pid: None,
            error: None,
            execution_token: None,
            poll_count: 0,
            retry_count: 0,
            can_retry: false,
            estimated_duration_ms: operation_type.estimated_duration_ms(),
            approved_by: None,
            rejected_by: None,
            rejection_reason: None,
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// pending_approval -> approved
    pub fn approve(&mut self, decided_by: &str) {
        self.status = JobStatus::Approved;
        self.approved_at = Some(Utc::now());
        self.approved_by = Some(decided_by.to_string());
        self.current_phase = "execution".to_string();
        self.progress_message = format!("Approved by {}", decided_by);
        self.touch();
    }

    /// pending_approval -> rejected
    pub fn reject(&mut self, decided_by: &str, reason: Option<String>) {
        self.status = JobStatus::Rejected;
        self.rejected_by = Some(decided_by.to_string());
        self.rejection_reason = reason;
        self.current_phase = "rejected".to_string();
        self.progress_message = format!("Rejected by {}", decided_by);
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    /// pending_approval -> approval_timeout
    pub fn expire_approval(&mut self) {
        self.status = JobStatus::ApprovalTimeout;
        self.current_phase = "approval".to_string();
        self.progress_message = "Approval window elapsed".to_string();
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    /// approved -> executing
    pub fn begin_execution(&mut self) {
        self.status = JobStatus::Executing;
        self.started_at = Some(Utc::now());
        self.current_phase = "execution".to_string();
        self.progress_message = "Executing command...".to_string();
        self.touch();
    }

    /// Progress update while executing.
    pub fn set_progress(&mut self, message: impl Into<String>, percentage: Option<u8>) {
        self.progress_message = message.into();
        if let Some(pct) = percentage {
            self.progress_percentage = Some(pct.min(100));
        }
        self.touch();
    }

    /// executing -> completed. The token is minted by the store so it is
    /// generated strictly after results are flushed.
    pub fn complete(&mut self, outcome: &ExecOutcome, token: String) {
        self.status = JobStatus::Completed;
        self.apply_outcome(outcome);
        self.execution_token = Some(token);
        self.current_phase = "completed".to_string();
        self.progress_message = "Command completed".to_string();
        self.progress_percentage = Some(100);
        self.completed_at = Some(Utc::now());
        self.can_retry = false;
        self.touch();
    }

    /// executing -> execution_timeout | execution_failed
    pub fn fail_execution(&mut self, outcome: &ExecOutcome, error: JobError) {
        self.status = if outcome.timed_out {
            JobStatus::ExecutionTimeout
        } else {
            JobStatus::ExecutionFailed
        };
        self.apply_outcome(outcome);
        self.error = Some(error);
        self.current_phase = "failed".to_string();
        self.progress_message = "Command failed".to_string();
        self.progress_percentage = Some(100);
        self.completed_at = Some(Utc::now());
        self.can_retry = true;
        self.touch();
    }

    /// Spawn never happened (validation raced, binary vanished, ...).
    pub fn fail_spawn(&mut self, error: JobError) {
        self.status = JobStatus::ExecutionFailed;
        self.error = Some(error);
        self.current_phase = "failed".to_string();
        self.progress_message = "Command could not be started".to_string();
        self.completed_at = Some(Utc::now());
        self.can_retry = true;
        self.touch();
    }

    /// pending_approval | approved -> cancelled
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.current_phase = "cancelled".to_string();
        self.progress_message = "Cancelled before execution".to_string();
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    fn apply_outcome(&mut self, outcome: &ExecOutcome) {
        self.exit_code = outcome.exit_code;
        self.execution_time_ms = Some(outcome.execution_time_ms);
        self.timed_out = Some(outcome.timed_out);
        self.killed = Some(outcome.killed);
        self.pid = Some(outcome.pid);
    }

    /// Poll-backoff recommendation, per the published schedule.
    pub fn next_poll_recommendation_ms(&self) -> u64 {
        let (initial, cap, factor) = match self.status {
            JobStatus::PendingApproval => (
                defaults::APPROVAL_POLL_INITIAL_MS,
                defaults::APPROVAL_POLL_CAP_MS,
                defaults::APPROVAL_POLL_FACTOR,
            ),
            _ => (
                defaults::EXECUTION_POLL_INITIAL_MS,
                defaults::EXECUTION_POLL_CAP_MS,
                defaults::EXECUTION_POLL_FACTOR,
            ),
        };
        let steps = self.poll_count.min(16) as i32;
        let raw = initial as f64 * factor.powi(steps);
        (raw as u64).min(cap)
    }

    /// Projection used by listings; omits output-sized fields.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            status: self.status,
            operation_type: self.operation_type,
            submitted_at: self.submitted_at,
            completed_at: self.completed_at,
            conversation_id: self.conversation_id.clone(),
            user_description: self.user_description.clone(),
            current_phase: self.current_phase.clone(),
            progress_message: self.progress_message.clone(),
            progress_percentage: self.progress_percentage,
            requires_confirmation: self.requires_confirmation,
        }
    }
}

/// Result of one supervised execution, as the processor reports it.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub killed: bool,
    pub pid: u32,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.killed
    }
}

/// Listing projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub command: String,
    pub args: Vec<String>,
    pub status: JobStatus,
    pub operation_type: OperationType,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_description: Option<String>,
    pub current_phase: String,
    pub progress_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<u8>,
    pub requires_confirmation: bool,
}

/// Filters accepted by listings.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
    pub operation_type: Option<OperationType>,
    pub conversation_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(requires_confirmation: bool) -> Submission {
        Submission {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            working_directory: PathBuf::from("/tmp"),
            timeout_ms: 30_000,
            requires_confirmation,
            session_id: "session-1".to_string(),
            conversation_id: None,
            user_description: None,
        }
    }

    #[test]
    fn auto_approval_is_atomic_with_submission() {
        let record = JobRecord::new(submission(false));
        assert_eq!(record.status, JobStatus::Approved);
        assert_eq!(record.approved_at, Some(record.submitted_at));
        assert_eq!(record.progress_message, "Approved automatically");
    }

    #[test]
    fn confirmation_lands_in_pending_approval() {
        let record = JobRecord::new(submission(true));
        assert_eq!(record.status, JobStatus::PendingApproval);
        assert!(record.approved_at.is_none());
        assert_eq!(record.current_phase, "approval");
    }

    #[test]
    fn token_present_exactly_at_completed() {
        let mut record = JobRecord::new(submission(false));
        assert!(record.execution_token.is_none());

        record.begin_execution();
        assert!(record.execution_token.is_none());
        assert!(record.started_at.unwrap() >= record.approved_at.unwrap());

        let outcome = ExecOutcome {
            exit_code: Some(0),
            execution_time_ms: 12,
            timed_out: false,
            killed: false,
            pid: 4242,
            stdout_bytes: 6,
            stderr_bytes: 0,
        };
        record.complete(&outcome, "token".to_string());
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.execution_token.is_some());
        assert_eq!(record.progress_percentage, Some(100));
    }

    #[test]
    fn timeout_outcome_selects_execution_timeout() {
        let mut record = JobRecord::new(submission(false));
        record.begin_execution();
        let outcome = ExecOutcome {
            exit_code: None,
            execution_time_ms: 5_500,
            timed_out: true,
            killed: true,
            pid: 4242,
            stdout_bytes: 0,
            stderr_bytes: 0,
        };
        record.fail_execution(
            &outcome,
            JobError {
                code: "EXECUTION_TIMEOUT".to_string(),
                message: "timed out".to_string(),
                suggested_action: None,
            },
        );
        assert_eq!(record.status, JobStatus::ExecutionTimeout);
        assert!(record.can_retry);
        assert!(record.execution_token.is_none());
    }

    #[test]
    fn poll_backoff_grows_and_caps() {
        let mut record = JobRecord::new(submission(true));
        assert_eq!(
            record.next_poll_recommendation_ms(),
            defaults::APPROVAL_POLL_INITIAL_MS
        );
        record.poll_count = 2;
        assert_eq!(record.next_poll_recommendation_ms(), 22_500);
        record.poll_count = 50;
        assert_eq!(
            record.next_poll_recommendation_ms(),
            defaults::APPROVAL_POLL_CAP_MS
        );
    }

    #[test]
    fn record_round_trips_as_json_with_ms_timestamps() {
        let record = JobRecord::new(submission(false));
        let json = serde_json::to_string(&record).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["submitted_at"].is_i64());

        let parsed: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.status, record.status);
    }
}
