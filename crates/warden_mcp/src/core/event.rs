//! Event types emitted by Core
//!
//! Events are broadcast to subscribers (the SSE stream, tests) when state
//! changes occur. The ordering contract matters: decision events are
//! emitted only after the on-disk transition completed, so anything that
//! observes an event can also observe its effect.

use crate::approvals::ApprovalView;
use crate::queue::JobId;
use warden_protocol::JobStatus;

/// Events emitted by the Core thread
#[derive(Debug, Clone)]
pub enum Event {
    /// A job record became durable
    JobSubmitted { job_id: JobId },

    /// A request entered the approval plane
    RequestCreated { view: ApprovalView },

    /// A request was decided (after the disk transition)
    RequestDecided { view: ApprovalView },

    /// A job moved to executing
    JobStarted { job_id: JobId },

    /// Progress update from the processor
    JobProgress {
        job_id: JobId,
        message: String,
        percentage: Option<u8>,
    },

    /// A job reached a terminal execution state
    JobFinished { job_id: JobId, status: JobStatus },
}
