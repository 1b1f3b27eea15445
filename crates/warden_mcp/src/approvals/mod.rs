//! Approval Plane
//!
//! Human-in-the-loop gating for confirmed commands. Two kinds of request
//! meet in one UI:
//!
//! - **Bridged jobs**: queued jobs sitting in `pending_approval`, projected
//!   into memory by the bridge scan and folded back into the queue when
//!   decided.
//! - **Direct requests**: synchronous executions blocking on a decision,
//!   parked on a channel until the UI (or a timeout) answers.
//!
//! The UI cannot tell them apart; the [`ApprovalSource`] tag (not string
//! prefixes) routes the decision to the right backend.

pub mod bridge;
pub mod server;
mod ui;

pub use bridge::BridgeState;
pub use server::{ApprovalServer, ServerError};

use crate::queue::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Unique approval request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRequestId(pub String);

impl ApprovalRequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for ApprovalRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApprovalRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which backend a decision lands in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalSource {
    /// A `pending_approval` job in the queue.
    QueuedJob { job_id: JobId },
    /// A synchronous execution blocked on the decision.
    Direct,
}

/// Decision state as the UI sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// One approval request, as exposed over the HTTP API and the SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalView {
    pub request_id: ApprovalRequestId,
    pub source: ApprovalSource,
    pub command: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub risk_score: u8,
    pub risk_factors: Vec<String>,
    pub risk_class: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub submitted_at: DateTime<Utc>,
    pub status: ApprovalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_description: Option<String>,
}

/// A decision as it arrives from the UI.
#[derive(Debug, Clone)]
pub struct Decision {
    pub approve: bool,
    pub decided_by: String,
    pub reason: Option<String>,
}

/// Approval-plane failures.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("rejected by {decided_by}: {}", .reason.as_deref().unwrap_or("no reason given"))]
    UserRejected {
        decided_by: String,
        reason: Option<String>,
    },

    #[error("approval request timed out")]
    Timeout,

    #[error("approval system failure: {message}")]
    System { message: String },
}

impl ApprovalError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UserRejected { .. } => "USER_REJECTED",
            Self::Timeout => "APPROVAL_TIMEOUT",
            Self::System { .. } => "APPROVAL_SYSTEM_ERROR",
        }
    }
}

/// Heuristic risk assessment for the approval UI.
///
/// Not a security boundary (the validator is); just a triage hint so a
/// human scans the dangerous cards first.
pub fn risk_assessment(command: &str, args: &[String]) -> (u8, Vec<String>) {
    let line = format!("{} {}", command, args.join(" ")).to_lowercase();
    let mut score = 1u8;
    let mut factors = Vec::new();

    if command == "rm" || command == "del" || line.contains(" rm ") {
        score = score.max(8);
        factors.push("deletes files".to_string());
    }
    if command == "docker" {
        score = score.max(5);
        factors.push("talks to the container daemon".to_string());
    }
    if line.starts_with("npm install") || line.starts_with("npm i ") || line.ends_with("npm i") {
        score = score.max(3);
        factors.push("installs packages".to_string());
    }
    if line.contains("push") || line.contains("deploy") {
        score = score.max(5);
        factors.push("publishes to a remote".to_string());
    }
    if factors.is_empty() {
        factors.push("whitelisted command".to_string());
    }

    (score, factors)
}

/// UI severity bucket: <=3 low, <=6 medium, else high.
pub fn risk_class(score: u8) -> &'static str {
    match score {
        0..=3 => "low",
        4..=6 => "medium",
        _ => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_scores_follow_the_triage_table() {
        let (rm, _) = risk_assessment("rm", &["-r".to_string()]);
        assert_eq!(rm, 8);

        let (docker, _) = risk_assessment("docker", &["build".to_string()]);
        assert_eq!(docker, 5);

        let (npm, _) = risk_assessment("npm", &["install".to_string()]);
        assert_eq!(npm, 3);

        let (echo, factors) = risk_assessment("echo", &["hi".to_string()]);
        assert_eq!(echo, 1);
        assert!(!factors.is_empty());
    }

    #[test]
    fn risk_classes_bucket_correctly() {
        assert_eq!(risk_class(1), "low");
        assert_eq!(risk_class(3), "low");
        assert_eq!(risk_class(5), "medium");
        assert_eq!(risk_class(8), "high");
    }

    #[test]
    fn source_tags_serialize_distinctly() {
        let queued = ApprovalSource::QueuedJob {
            job_id: JobId::from_string("abc"),
        };
        let json = serde_json::to_string(&queued).unwrap();
        assert!(json.contains("queued_job"));

        let direct = serde_json::to_string(&ApprovalSource::Direct).unwrap();
        assert!(direct.contains("direct"));
    }
}
