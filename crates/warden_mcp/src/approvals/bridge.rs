//! Bridged-jobs state: the in-memory projection of the approval plane.
//!
//! Owned exclusively by the Core thread; every read and write arrives as a
//! Core command, so no locking happens here. Decided entries linger for a
//! short window so stats spanning the queue and the bridge stay coherent,
//! then get evicted.

use super::{
    risk_assessment, risk_class, ApprovalRequestId, ApprovalSource, ApprovalState, ApprovalView,
    Decision,
};
use crate::queue::{JobId, JobRecord};
use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};
use tracing::debug;

struct BridgedJob {
    view: ApprovalView,
    decided_at: Option<Instant>,
}

struct DirectRequest {
    view: ApprovalView,
    waiter: Sender<Decision>,
    decided_at: Option<Instant>,
}

/// All in-memory approval state.
#[derive(Default)]
pub struct BridgeState {
    bridged: HashMap<ApprovalRequestId, BridgedJob>,
    by_job: HashMap<JobId, ApprovalRequestId>,
    direct: HashMap<ApprovalRequestId, DirectRequest>,
}

impl BridgeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialise a `pending_approval` job into the approval plane.
    ///
    /// Returns the new view for the `requestCreated` event, or `None` when
    /// the job is already bridged.
    pub fn bridge_job(&mut self, record: &JobRecord) -> Option<ApprovalView> {
        if self.by_job.contains_key(&record.id) {
            return None;
        }

        let (risk_score, risk_factors) = risk_assessment(&record.command, &record.args);
        let request_id = ApprovalRequestId::new();
        let view = ApprovalView {
            request_id: request_id.clone(),
            source: ApprovalSource::QueuedJob {
                job_id: record.id.clone(),
            },
            command: record.command.clone(),
            args: record.args.clone(),
            working_directory: record.working_directory.clone(),
            risk_score,
            risk_class: risk_class(risk_score).to_string(),
            risk_factors,
            submitted_at: record.submitted_at,
            status: ApprovalState::Pending,
            user_description: record.user_description.clone(),
        };

        debug!(job_id = %record.id, request_id = %request_id, "job bridged into approval plane");
        self.by_job.insert(record.id.clone(), request_id.clone());
        self.bridged.insert(
            request_id,
            BridgedJob {
                view: view.clone(),
                decided_at: None,
            },
        );
        Some(view)
    }

    /// Register a synchronous request waiting on `waiter`.
    pub fn create_direct(
        &mut self,
        command: String,
        args: Vec<String>,
        working_directory: std::path::PathBuf,
        user_description: Option<String>,
        waiter: Sender<Decision>,
    ) -> ApprovalView {
        let (risk_score, risk_factors) = risk_assessment(&command, &args);
        let request_id = ApprovalRequestId::new();
        let view = ApprovalView {
            request_id: request_id.clone(),
            source: ApprovalSource::Direct,
            command,
            args,
            working_directory,
            risk_score,
            risk_class: risk_class(risk_score).to_string(),
            risk_factors,
            submitted_at: chrono::Utc::now(),
            status: ApprovalState::Pending,
            user_description,
        };
        self.direct.insert(
            request_id,
            DirectRequest {
                view: view.clone(),
                waiter,
                decided_at: None,
            },
        );
        view
    }

    /// Route a decision to its backend.
    ///
    /// For queued jobs the caller performs the on-disk transition first and
    /// then calls [`BridgeState::mark_decided`]; this only resolves what
    /// kind of request the id names.
    pub fn source_of(&self, request_id: &ApprovalRequestId) -> Option<ApprovalSource> {
        if let Some(bridged) = self.bridged.get(request_id) {
            return Some(bridged.view.source.clone());
        }
        if self.direct.contains_key(request_id) {
            return Some(ApprovalSource::Direct);
        }
        None
    }

    /// Mark a bridged request decided (after the disk transition).
    pub fn mark_decided(&mut self, request_id: &ApprovalRequestId, approve: bool) {
        if let Some(bridged) = self.bridged.get_mut(request_id) {
            bridged.view.status = if approve {
                ApprovalState::Approved
            } else {
                ApprovalState::Rejected
            };
            bridged.decided_at = Some(Instant::now());
        }
    }

    /// Deliver a decision to a parked synchronous request.
    ///
    /// Returns false when the id names no direct request.
    pub fn resolve_direct(&mut self, request_id: &ApprovalRequestId, decision: Decision) -> bool {
        match self.direct.get_mut(request_id) {
            Some(request) => {
                request.view.status = if decision.approve {
                    ApprovalState::Approved
                } else {
                    ApprovalState::Rejected
                };
                request.decided_at = Some(Instant::now());
                // A dropped waiter means the caller gave up (timeout); the
                // decision still stands for the stats window.
                let _ = request.waiter.send(decision);
                true
            }
            None => false,
        }
    }

    /// Look up a single view.
    pub fn get(&self, request_id: &ApprovalRequestId) -> Option<ApprovalView> {
        self.bridged
            .get(request_id)
            .map(|b| b.view.clone())
            .or_else(|| self.direct.get(request_id).map(|d| d.view.clone()))
    }

    /// All requests still pending, bridged and direct alike.
    pub fn pending_views(&self) -> Vec<ApprovalView> {
        let mut views: Vec<ApprovalView> = self
            .bridged
            .values()
            .filter(|b| b.view.status == ApprovalState::Pending)
            .map(|b| b.view.clone())
            .chain(
                self.direct
                    .values()
                    .filter(|d| d.view.status == ApprovalState::Pending)
                    .map(|d| d.view.clone()),
            )
            .collect();
        views.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        views
    }

    /// Pending/decided counts for stats.
    pub fn counts(&self) -> (usize, usize) {
        let pending = self
            .bridged
            .values()
            .filter(|b| b.view.status == ApprovalState::Pending)
            .count()
            + self
                .direct
                .values()
                .filter(|d| d.view.status == ApprovalState::Pending)
                .count();
        let decided = self.bridged.len() + self.direct.len() - pending;
        (pending, decided)
    }

    /// Drop bridged entries whose job is no longer pending on disk without
    /// a decision having passed through here (cancelled, timed out).
    pub fn retain_jobs(&mut self, live_pending: &std::collections::HashSet<JobId>) {
        let stale: Vec<ApprovalRequestId> = self
            .bridged
            .iter()
            .filter(|(_, b)| b.view.status == ApprovalState::Pending)
            .filter_map(|(request_id, b)| match &b.view.source {
                ApprovalSource::QueuedJob { job_id } if !live_pending.contains(job_id) => {
                    Some(request_id.clone())
                }
                _ => None,
            })
            .collect();
        for request_id in stale {
            if let Some(removed) = self.bridged.remove(&request_id) {
                if let ApprovalSource::QueuedJob { job_id } = &removed.view.source {
                    self.by_job.remove(job_id);
                }
            }
        }
    }

    /// Evict decided entries older than the linger window.
    pub fn evict_decided(&mut self, linger: Duration) {
        let now = Instant::now();
        let expired = |decided_at: &Option<Instant>| {
            decided_at
                .map(|at| now.duration_since(at) >= linger)
                .unwrap_or(false)
        };

        let stale_bridged: Vec<ApprovalRequestId> = self
            .bridged
            .iter()
            .filter(|(_, b)| expired(&b.decided_at))
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in stale_bridged {
            if let Some(removed) = self.bridged.remove(&request_id) {
                if let ApprovalSource::QueuedJob { job_id } = &removed.view.source {
                    self.by_job.remove(job_id);
                }
            }
        }

        let stale_direct: Vec<ApprovalRequestId> = self
            .direct
            .iter()
            .filter(|(_, d)| expired(&d.decided_at))
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in stale_direct {
            self.direct.remove(&request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Submission;
    use std::path::PathBuf;
    use std::sync::mpsc;

    fn pending_record() -> JobRecord {
        JobRecord::new(Submission {
            command: "git".to_string(),
            args: vec!["push".to_string()],
            working_directory: PathBuf::from("/work"),
            timeout_ms: 30_000,
            requires_confirmation: true,
            session_id: "s".to_string(),
            conversation_id: None,
            user_description: None,
        })
    }

    #[test]
    fn bridging_is_idempotent_per_job() {
        let mut state = BridgeState::new();
        let record = pending_record();

        let view = state.bridge_job(&record).unwrap();
        assert_eq!(view.status, ApprovalState::Pending);
        assert!(state.bridge_job(&record).is_none());
        assert_eq!(state.pending_views().len(), 1);
    }

    #[test]
    fn decided_entries_linger_then_evict() {
        let mut state = BridgeState::new();
        let record = pending_record();
        let view = state.bridge_job(&record).unwrap();

        state.mark_decided(&view.request_id, true);
        assert_eq!(state.pending_views().len(), 0);
        let (pending, decided) = state.counts();
        assert_eq!((pending, decided), (0, 1));

        // Linger window still open.
        state.evict_decided(Duration::from_secs(60));
        assert_eq!(state.counts().1, 1);

        // Window elapsed.
        state.evict_decided(Duration::ZERO);
        assert_eq!(state.counts(), (0, 0));
        // The job may be re-bridged afterwards (e.g. record restored).
        assert!(state.bridge_job(&record).is_some());
    }

    #[test]
    fn direct_requests_deliver_decisions_to_waiters() {
        let mut state = BridgeState::new();
        let (tx, rx) = mpsc::channel();
        let view = state.create_direct(
            "git".to_string(),
            vec!["push".to_string()],
            PathBuf::from("/work"),
            None,
            tx,
        );

        assert_eq!(state.source_of(&view.request_id), Some(ApprovalSource::Direct));
        assert!(state.resolve_direct(
            &view.request_id,
            Decision {
                approve: false,
                decided_by: "operator".to_string(),
                reason: Some("no".to_string()),
            },
        ));

        let decision = rx.try_recv().unwrap();
        assert!(!decision.approve);
        assert_eq!(decision.decided_by, "operator");
    }

    #[test]
    fn retain_jobs_drops_vanished_pending_entries() {
        let mut state = BridgeState::new();
        let record = pending_record();
        state.bridge_job(&record).unwrap();

        // Job no longer pending on disk (cancelled out of band).
        state.retain_jobs(&std::collections::HashSet::new());
        assert_eq!(state.pending_views().len(), 0);
    }
}
