//! Command types for Core message passing
//!
//! Commands are sent from tool handlers, the queue worker, and the approval
//! server to the Core thread. Each command carries a Responder channel for
//! returning results.

use crate::approvals::{ApprovalError, ApprovalRequestId, ApprovalView, Decision};
use crate::queue::store::{QueueError, RetentionReport};
use crate::queue::{ExecOutcome, JobError, JobId, JobRecord, JobSummary, ListFilter, Submission};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use warden_protocol::JobStatus;

/// One-shot channel for returning results from Core
pub type Responder<T> = Sender<T>;

/// Result of a cancellation request, interpreted by the facade.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// Record moved to `cancelled` before any child existed.
    Cancelled,
    /// The job is executing; the caller must signal the child.
    Executing,
    /// Nothing to do.
    AlreadyTerminal(JobStatus),
}

/// Commands processed by the Core thread
pub enum Command {
    // ========================================================================
    // Queue Commands
    // ========================================================================
    /// Persist a validated submission
    Submit {
        submission: Submission,
        respond: Responder<Result<JobRecord, QueueError>>,
    },

    /// Fetch a job; `poll` applies the poll-count side effect
    GetJob {
        id: JobId,
        poll: bool,
        respond: Responder<Result<Option<JobRecord>, QueueError>>,
    },

    /// Filtered listing
    ListJobs {
        filter: ListFilter,
        respond: Responder<Result<Vec<JobSummary>, QueueError>>,
    },

    /// Queue + bridge statistics
    Stats {
        respond: Responder<Result<super::SystemStats, QueueError>>,
    },

    /// Claim up to `max` approved jobs, moving each to `executing`
    ClaimApproved {
        max: usize,
        respond: Responder<Result<Vec<JobRecord>, QueueError>>,
    },

    /// Progress update for an executing job
    SetProgress {
        id: JobId,
        message: String,
        percentage: Option<u8>,
        respond: Responder<Result<(), QueueError>>,
    },

    /// Execution finished; Core picks completed/timeout/failed and mints
    /// the token for successful runs
    FinishExecution {
        id: JobId,
        outcome: ExecOutcome,
        error: Option<JobError>,
        respond: Responder<Result<JobRecord, QueueError>>,
    },

    /// The child never spawned
    FailSpawn {
        id: JobId,
        error: JobError,
        respond: Responder<Result<(), QueueError>>,
    },

    /// The supervisor slot was taken in the claim-to-spawn window; put the
    /// job back in `approved` for the next pass
    RequeueJob {
        id: JobId,
        respond: Responder<Result<(), QueueError>>,
    },

    /// Cancel a job that has not finished
    CancelJob {
        id: JobId,
        respond: Responder<Result<CancelOutcome, QueueError>>,
    },

    /// Retention sweep + stats refresh
    RetentionSweep {
        respond: Responder<Result<RetentionReport, QueueError>>,
    },

    // ========================================================================
    // Approval Commands
    // ========================================================================
    /// Bridge scan: materialise new pending jobs, drop vanished ones,
    /// evict lingering decided entries
    BridgeScan {
        respond: Responder<Result<Vec<ApprovalView>, QueueError>>,
    },

    /// Move pending jobs past the approval window to `approval_timeout`
    SweepApprovalTimeouts {
        respond: Responder<Result<usize, QueueError>>,
    },

    /// Park a synchronous execution on the approval plane
    CreateDirectApproval {
        command: String,
        args: Vec<String>,
        working_directory: PathBuf,
        user_description: Option<String>,
        waiter: Sender<Decision>,
        respond: Responder<ApprovalView>,
    },

    /// A human decision from the approval UI
    Decide {
        request_id: ApprovalRequestId,
        decision: Decision,
        respond: Responder<Result<ApprovalView, ApprovalError>>,
    },

    /// Pending requests, bridged and direct
    PendingApprovals {
        respond: Responder<Vec<ApprovalView>>,
    },

    /// One request by id
    GetApproval {
        request_id: ApprovalRequestId,
        respond: Responder<Option<ApprovalView>>,
    },

    // ========================================================================
    // Control Commands
    // ========================================================================
    /// Request graceful shutdown
    Shutdown,
}
