//! Job Store - Persistent Job State
//!
//! One directory per lifecycle status; a job lives in exactly one of them:
//!
//! ```text
//! <base>/
//! ├── jobs/<status>/<job_id>/job.json
//! ├── results/<job_id>/stdout.log
//! ├── results/<job_id>/stderr.log
//! ├── results/<job_id>/metadata.json
//! ├── stats.json
//! └── archive/
//! ```
//!
//! A status transition writes the updated record into the new shard via
//! write-temp-then-rename, then removes the old directory. A crash between
//! the two steps leaves the job visible in at most the new location;
//! `recover()` heals the duplicate on the next start by preferring the
//! freshest record.

use super::{JobId, JobRecord, JobSummary, ListFilter};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use warden_protocol::{JobStatus, LoadBand};

/// Persistent job store. All paths live under one base directory.
pub struct JobStore {
    base: PathBuf,
}

/// Path scheme of the per-job results directory.
///
/// Shared with the processor, which streams child output into these files
/// directly; job records themselves are only ever written by the store.
#[derive(Debug, Clone)]
pub struct ResultsLayout {
    base: PathBuf,
}

impl ResultsLayout {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn dir(&self, id: &JobId) -> PathBuf {
        self.base.join("results").join(&id.0)
    }

    pub fn stdout_path(&self, id: &JobId) -> PathBuf {
        self.dir(id).join("stdout.log")
    }

    pub fn stderr_path(&self, id: &JobId) -> PathBuf {
        self.dir(id).join("stderr.log")
    }

    pub fn metadata_path(&self, id: &JobId) -> PathBuf {
        self.dir(id).join("metadata.json")
    }
}

/// Queue failures surfaced to the RPC layer.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("job {id} is {actual}, expected {expected}")]
    WrongStatus {
        id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("job {id} is already terminal ({status})")]
    Terminal { id: String, status: JobStatus },

    #[error("queue is full ({active}/{capacity} active jobs)")]
    CapacityExceeded { active: usize, capacity: usize },

    #[error("invalid execution token for job {id}")]
    InvalidExecutionToken { id: String },

    #[error("queue I/O failure: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record at {path}: {message}")]
    Corrupt { path: String, message: String },
}

impl QueueError {
    /// Stable error code surfaced to the RPC layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::InvalidExecutionToken { .. } => "INVALID_EXECUTION_TOKEN",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::WrongStatus { .. } | Self::Terminal { .. } | Self::Io { .. } | Self::Corrupt { .. } => {
                "QUEUE_IO_ERROR"
            }
        }
    }

    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Counts per lifecycle bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending_approval: usize,
    pub approved: usize,
    pub executing: usize,
    pub completed: usize,
    pub rejected: usize,
    pub approval_timeout: usize,
    pub execution_timeout: usize,
    pub execution_failed: usize,
    pub cancelled: usize,
    pub expired: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending_approval
            + self.approved
            + self.executing
            + self.completed
            + self.rejected
            + self.approval_timeout
            + self.execution_timeout
            + self.execution_failed
            + self.cancelled
            + self.expired
    }

    pub fn active(&self) -> usize {
        self.pending_approval + self.approved + self.executing
    }

    fn bump(&mut self, status: JobStatus) {
        match status {
            JobStatus::PendingApproval => self.pending_approval += 1,
            JobStatus::Approved => self.approved += 1,
            JobStatus::Executing => self.executing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Rejected => self.rejected += 1,
            JobStatus::ApprovalTimeout => self.approval_timeout += 1,
            JobStatus::ExecutionTimeout => self.execution_timeout += 1,
            JobStatus::ExecutionFailed => self.execution_failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
            JobStatus::Expired => self.expired += 1,
        }
    }
}

/// Derived queue statistics, also persisted to `stats.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
    pub counts: StatusCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_decision_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_decision_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slowest_decision_ms: Option<u64>,
    pub load: LoadBand,
}

/// What one retention sweep did.
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub removed: usize,
    pub expired: usize,
    pub orphan_results_removed: usize,
}

impl JobStore {
    /// Open (creating if needed) a store rooted at `base`.
    pub fn new(base: PathBuf) -> Result<Self, QueueError> {
        for status in JobStatus::all() {
            let shard = base.join("jobs").join(status.dir_name());
            fs::create_dir_all(&shard)
                .map_err(|e| QueueError::io(format!("create shard {}", shard.display()), e))?;
        }
        for leaf in ["results", "archive"] {
            let dir = base.join(leaf);
            fs::create_dir_all(&dir)
                .map_err(|e| QueueError::io(format!("create {}", dir.display()), e))?;
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn shard(&self, status: JobStatus) -> PathBuf {
        self.base.join("jobs").join(status.dir_name())
    }

    fn job_dir(&self, status: JobStatus, id: &JobId) -> PathBuf {
        self.shard(status).join(&id.0)
    }

    fn job_file(&self, status: JobStatus, id: &JobId) -> PathBuf {
        self.job_dir(status, id).join("job.json")
    }

    /// The results path scheme for this store's base directory.
    pub fn results_layout(&self) -> ResultsLayout {
        ResultsLayout::new(self.base.clone())
    }

    pub fn results_dir(&self, id: &JobId) -> PathBuf {
        self.results_layout().dir(id)
    }

    pub fn stdout_path(&self, id: &JobId) -> PathBuf {
        self.results_layout().stdout_path(id)
    }

    pub fn stderr_path(&self, id: &JobId) -> PathBuf {
        self.results_layout().stderr_path(id)
    }

    pub fn metadata_path(&self, id: &JobId) -> PathBuf {
        self.results_layout().metadata_path(id)
    }

    fn stats_path(&self) -> PathBuf {
        self.base.join("stats.json")
    }

    /// Persist a freshly submitted record, enforcing queue capacity.
    ///
    /// The record is durable in its initial shard when this returns.
    pub fn submit(&self, record: &JobRecord, capacity: usize) -> Result<(), QueueError> {
        let active = self.counts()?.active();
        if active >= capacity {
            return Err(QueueError::CapacityExceeded { active, capacity });
        }
        self.write_record(record)?;
        info!(job_id = %record.id, status = %record.status, "job submitted");
        Ok(())
    }

    /// Locate the shard currently holding a job.
    pub fn locate(&self, id: &JobId) -> Option<JobStatus> {
        JobStatus::all()
            .iter()
            .copied()
            .find(|status| self.job_file(*status, id).exists())
    }

    /// Load a record by scanning the shards in order.
    pub fn load(&self, id: &JobId) -> Result<Option<JobRecord>, QueueError> {
        match self.locate(id) {
            Some(status) => self.load_in(status, id),
            None => Ok(None),
        }
    }

    fn load_in(&self, status: JobStatus, id: &JobId) -> Result<Option<JobRecord>, QueueError> {
        let path = self.job_file(status, id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| QueueError::io(format!("read {}", path.display()), e))?;
        let record = serde_json::from_str(&raw).map_err(|e| QueueError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(record))
    }

    /// `get` with the poll side effect: bumps `poll_count` and
    /// `last_polled_at` in place, without a status change.
    pub fn record_poll(&self, id: &JobId) -> Result<Option<JobRecord>, QueueError> {
        let mut record = match self.load(id)? {
            Some(r) => r,
            None => return Ok(None),
        };
        record.poll_count += 1;
        record.last_polled_at = Some(Utc::now());
        self.write_record(&record)?;
        Ok(Some(record))
    }

    /// Atomically move a job from `expected` to the status set by `mutate`.
    ///
    /// New shard is written first (temp + rename), old directory removed
    /// second; the terminal guard refuses to move anything out of a
    /// terminal status.
    pub fn transition(
        &self,
        id: &JobId,
        expected: JobStatus,
        mutate: impl FnOnce(&mut JobRecord),
    ) -> Result<JobRecord, QueueError> {
        let actual = self.locate(id).ok_or_else(|| QueueError::JobNotFound {
            id: id.0.clone(),
        })?;
        if actual != expected {
            return Err(QueueError::WrongStatus {
                id: id.0.clone(),
                expected,
                actual,
            });
        }
        if actual.is_terminal() {
            return Err(QueueError::Terminal {
                id: id.0.clone(),
                status: actual,
            });
        }

        let mut record = self
            .load_in(expected, id)?
            .ok_or_else(|| QueueError::JobNotFound { id: id.0.clone() })?;
        mutate(&mut record);

        if record.status == expected {
            // No shard move; plain in-place rewrite.
            self.write_record(&record)?;
            return Ok(record);
        }

        self.write_record(&record)?;
        let old_dir = self.job_dir(expected, id);
        if let Err(e) = fs::remove_dir_all(&old_dir) {
            // The new location is authoritative; recovery removes the stale
            // copy on next start.
            warn!(job_id = %id, error = %e, "failed to remove old status shard entry");
        }
        debug!(job_id = %id, from = %expected, to = %record.status, "job transitioned");
        Ok(record)
    }

    fn write_record(&self, record: &JobRecord) -> Result<(), QueueError> {
        let dir = self.job_dir(record.status, &record.id);
        fs::create_dir_all(&dir)
            .map_err(|e| QueueError::io(format!("create {}", dir.display()), e))?;
        let path = dir.join("job.json");
        let json = serde_json::to_string_pretty(record).map_err(|e| QueueError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        atomic_write(&path, json.as_bytes())
            .map_err(|e| QueueError::io(format!("write {}", path.display()), e))
    }

    /// Ids in one shard, oldest submission first.
    pub fn list_ids(&self, status: JobStatus) -> Result<Vec<JobId>, QueueError> {
        let mut entries: Vec<(DateTime<Utc>, JobId)> = Vec::new();
        for record in self.iter_shard(status)? {
            entries.push((record.submitted_at, record.id));
        }
        entries.sort_by_key(|(submitted, _)| *submitted);
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }

    /// Filtered listing, newest submission first, paginated.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<JobSummary>, QueueError> {
        let statuses: Vec<JobStatus> = match filter.status {
            Some(status) => vec![status],
            None => JobStatus::all().to_vec(),
        };

        let mut summaries = Vec::new();
        for status in statuses {
            for record in self.iter_shard(status)? {
                if let Some(ref op) = filter.operation_type {
                    if record.operation_type != *op {
                        continue;
                    }
                }
                if let Some(ref conversation) = filter.conversation_id {
                    if record.conversation_id.as_deref() != Some(conversation.as_str()) {
                        continue;
                    }
                }
                summaries.push(record.summary());
            }
        }

        summaries.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        let limit = if filter.limit == 0 { 20 } else { filter.limit };
        Ok(summaries
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect())
    }

    fn iter_shard(&self, status: JobStatus) -> Result<Vec<JobRecord>, QueueError> {
        let shard = self.shard(status);
        let mut records = Vec::new();
        let entries = fs::read_dir(&shard)
            .map_err(|e| QueueError::io(format!("read shard {}", shard.display()), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| QueueError::io("read shard entry", e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = JobId::from_string(entry.file_name().to_string_lossy().to_string());
            match self.load_in(status, &id) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    // One bad record must not poison a listing sweep.
                    warn!(job_id = %id, error = %e, "skipping unreadable job record");
                }
            }
        }
        Ok(records)
    }

    fn counts(&self) -> Result<StatusCounts, QueueError> {
        let mut counts = StatusCounts::default();
        for status in JobStatus::all() {
            let shard = self.shard(*status);
            let entries = fs::read_dir(&shard)
                .map_err(|e| QueueError::io(format!("read shard {}", shard.display()), e))?;
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    counts.bump(*status);
                }
            }
        }
        Ok(counts)
    }

    /// Derive statistics from directory contents.
    pub fn stats(&self, execution_capacity: usize) -> Result<QueueStats, QueueError> {
        let counts = self.counts()?;

        // Decision time: submission -> human (or automatic) decision.
        let mut decisions: Vec<u64> = Vec::new();
        for status in [
            JobStatus::Approved,
            JobStatus::Executing,
            JobStatus::Completed,
            JobStatus::Rejected,
            JobStatus::ExecutionTimeout,
            JobStatus::ExecutionFailed,
        ] {
            for record in self.iter_shard(status)? {
                let decided = record.approved_at.or(if record.rejected_by.is_some() {
                    record.completed_at
                } else {
                    None
                });
                if let Some(decided) = decided {
                    let delta = decided.signed_duration_since(record.submitted_at);
                    decisions.push(delta.num_milliseconds().max(0) as u64);
                }
            }
        }

        let (average, fastest, slowest) = if decisions.is_empty() {
            (None, None, None)
        } else {
            let sum: u64 = decisions.iter().sum();
            (
                Some(sum / decisions.len() as u64),
                decisions.iter().min().copied(),
                decisions.iter().max().copied(),
            )
        };

        Ok(QueueStats {
            generated_at: Utc::now(),
            load: LoadBand::from_utilization(counts.executing, execution_capacity),
            counts,
            average_decision_ms: average,
            fastest_decision_ms: fastest,
            slowest_decision_ms: slowest,
        })
    }

    /// Refresh `stats.json` on disk.
    pub fn write_stats(&self, execution_capacity: usize) -> Result<QueueStats, QueueError> {
        let stats = self.stats(execution_capacity)?;
        let json = serde_json::to_string_pretty(&stats).map_err(|e| QueueError::Corrupt {
            path: self.stats_path().display().to_string(),
            message: e.to_string(),
        })?;
        atomic_write(&self.stats_path(), json.as_bytes())
            .map_err(|e| QueueError::io("write stats.json", e))?;
        Ok(stats)
    }

    /// Retention sweep.
    ///
    /// - terminal jobs older than `retention_ms` are deleted (results first,
    ///   then the record, so a crash leaves a record without results rather
    ///   than orphaned results);
    /// - stale non-terminal leftovers older than the window are marked
    ///   `expired` and get deleted by a later sweep;
    /// - results directories whose record no longer exists are removed.
    pub fn retention_sweep(&self, retention_ms: u64) -> Result<RetentionReport, QueueError> {
        let now = Utc::now();
        let mut report = RetentionReport::default();

        for status in JobStatus::all() {
            for record in self.iter_shard(*status)? {
                let reference = record.completed_at.unwrap_or(record.last_updated);
                let age_ms = now
                    .signed_duration_since(reference)
                    .num_milliseconds()
                    .max(0) as u64;
                if age_ms < retention_ms {
                    continue;
                }

                if status.is_terminal() {
                    self.remove_job(&record.id, *status)?;
                    report.removed += 1;
                } else if matches!(
                    status,
                    JobStatus::PendingApproval | JobStatus::Approved
                ) {
                    // Never picked up within the whole retention window:
                    // stale leftovers from an interrupted deployment.
                    let result = self.transition(&record.id, *status, |r| {
                        r.status = JobStatus::Expired;
                        r.current_phase = "expired".to_string();
                        r.progress_message = "Expired by retention".to_string();
                        r.completed_at = Some(Utc::now());
                    });
                    if result.is_ok() {
                        report.expired += 1;
                    }
                }
            }
        }

        report.orphan_results_removed = self.sweep_orphan_results()?;
        Ok(report)
    }

    fn remove_job(&self, id: &JobId, status: JobStatus) -> Result<(), QueueError> {
        let results = self.results_dir(id);
        if results.exists() {
            fs::remove_dir_all(&results)
                .map_err(|e| QueueError::io(format!("remove {}", results.display()), e))?;
        }
        let dir = self.job_dir(status, id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .map_err(|e| QueueError::io(format!("remove {}", dir.display()), e))?;
        }
        debug!(job_id = %id, "job removed by retention");
        Ok(())
    }

    fn sweep_orphan_results(&self) -> Result<usize, QueueError> {
        let results_root = self.base.join("results");
        let mut removed = 0;
        let entries = fs::read_dir(&results_root)
            .map_err(|e| QueueError::io("read results directory", e))?;
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let id = JobId::from_string(entry.file_name().to_string_lossy().to_string());
            if self.locate(&id).is_none() {
                if fs::remove_dir_all(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Startup recovery.
    ///
    /// Heals jobs visible in two shards after a crash mid-transition
    /// (keeps the freshest record) and fails jobs stranded in `executing`
    /// whose child died with the previous process.
    pub fn recover(&self) -> Result<usize, QueueError> {
        let mut healed = 0;

        // Duplicate locations: keep the record with the newest last_updated.
        let mut seen: std::collections::HashMap<String, (JobStatus, DateTime<Utc>)> =
            std::collections::HashMap::new();
        for status in JobStatus::all() {
            for record in self.iter_shard(*status)? {
                match seen.get(&record.id.0).copied() {
                    None => {
                        seen.insert(record.id.0.clone(), (*status, record.last_updated));
                    }
                    Some((other_status, other_updated)) => {
                        let (stale_status, keep) = if record.last_updated >= other_updated {
                            (other_status, (*status, record.last_updated))
                        } else {
                            (*status, (other_status, other_updated))
                        };
                        let stale_dir = self.job_dir(stale_status, &record.id);
                        if fs::remove_dir_all(&stale_dir).is_ok() {
                            healed += 1;
                            warn!(job_id = %record.id, "healed duplicate job record");
                        }
                        seen.insert(record.id.0.clone(), keep);
                    }
                }
            }
        }

        // Children do not survive the supervisor; executing records are lies.
        for id in self.list_ids(JobStatus::Executing)? {
            let result = self.transition(&id, JobStatus::Executing, |record| {
                record.fail_spawn(super::JobError {
                    code: "QUEUE_IO_ERROR".to_string(),
                    message: "execution interrupted by service restart".to_string(),
                    suggested_action: Some("Resubmit the command".to_string()),
                });
            });
            if result.is_ok() {
                healed += 1;
                info!(job_id = %id, "marked interrupted execution as failed");
            }
        }

        Ok(healed)
    }

    /// Mint a 256-bit opaque token.
    pub fn mint_token() -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Atomic write via temp file + rename
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{ExecOutcome, Submission};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn store() -> (JobStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = JobStore::new(temp.path().to_path_buf()).unwrap();
        (store, temp)
    }

    fn submission(requires_confirmation: bool) -> Submission {
        Submission {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            working_directory: PathBuf::from("/tmp"),
            timeout_ms: 30_000,
            requires_confirmation,
            session_id: "session-1".to_string(),
            conversation_id: Some("conv-1".to_string()),
            user_description: None,
        }
    }

    fn outcome_ok() -> ExecOutcome {
        ExecOutcome {
            exit_code: Some(0),
            execution_time_ms: 10,
            timed_out: false,
            killed: false,
            pid: 100,
            stdout_bytes: 6,
            stderr_bytes: 0,
        }
    }

    #[test]
    fn submit_and_load_round_trip() {
        let (store, _temp) = store();
        let record = JobRecord::new(submission(false));
        store.submit(&record, 10).unwrap();

        let loaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.status, JobStatus::Approved);
        assert_eq!(store.locate(&record.id), Some(JobStatus::Approved));
    }

    #[test]
    fn capacity_is_enforced_at_submit() {
        let (store, _temp) = store();
        store.submit(&JobRecord::new(submission(false)), 1).unwrap();

        let err = store
            .submit(&JobRecord::new(submission(false)), 1)
            .unwrap_err();
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");
    }

    #[test]
    fn transition_moves_between_shards_exactly_once() {
        let (store, _temp) = store();
        let record = JobRecord::new(submission(true));
        store.submit(&record, 10).unwrap();

        store
            .transition(&record.id, JobStatus::PendingApproval, |r| {
                r.approve("operator")
            })
            .unwrap();

        // Single-location invariant.
        assert!(!store
            .job_file(JobStatus::PendingApproval, &record.id)
            .exists());
        assert!(store.job_file(JobStatus::Approved, &record.id).exists());
        let loaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Approved);
        assert_eq!(loaded.approved_by.as_deref(), Some("operator"));
    }

    #[test]
    fn transition_guards_expected_status() {
        let (store, _temp) = store();
        let record = JobRecord::new(submission(false));
        store.submit(&record, 10).unwrap();

        let err = store
            .transition(&record.id, JobStatus::PendingApproval, |r| {
                r.approve("nobody")
            })
            .unwrap_err();
        assert!(matches!(err, QueueError::WrongStatus { .. }));
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        let (store, _temp) = store();
        let record = JobRecord::new(submission(true));
        store.submit(&record, 10).unwrap();
        store
            .transition(&record.id, JobStatus::PendingApproval, |r| {
                r.reject("operator", Some("no".to_string()))
            })
            .unwrap();

        let err = store
            .transition(&record.id, JobStatus::Rejected, |r| r.cancel())
            .unwrap_err();
        assert!(matches!(err, QueueError::Terminal { .. }));
    }

    #[test]
    fn record_poll_bumps_count_in_place() {
        let (store, _temp) = store();
        let record = JobRecord::new(submission(false));
        store.submit(&record, 10).unwrap();

        store.record_poll(&record.id).unwrap();
        let polled = store.record_poll(&record.id).unwrap().unwrap();
        assert_eq!(polled.poll_count, 2);
        assert!(polled.last_polled_at.is_some());
        assert_eq!(polled.status, JobStatus::Approved);
    }

    #[test]
    fn listing_filters_sorts_and_paginates() {
        let (store, _temp) = store();
        for _ in 0..3 {
            store.submit(&JobRecord::new(submission(false)), 10).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let mut other = submission(false);
        other.conversation_id = Some("conv-2".to_string());
        store.submit(&JobRecord::new(other), 10).unwrap();

        let all = store
            .list(&ListFilter {
                limit: 10,
                ..ListFilter::default()
            })
            .unwrap();
        assert_eq!(all.len(), 4);
        assert!(all[0].submitted_at >= all[1].submitted_at);

        let conv = store
            .list(&ListFilter {
                conversation_id: Some("conv-1".to_string()),
                limit: 10,
                ..ListFilter::default()
            })
            .unwrap();
        assert_eq!(conv.len(), 3);

        let page = store
            .list(&ListFilter {
                limit: 2,
                offset: 2,
                ..ListFilter::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn stats_count_by_bucket() {
        let (store, _temp) = store();
        store.submit(&JobRecord::new(submission(true)), 10).unwrap();
        store.submit(&JobRecord::new(submission(false)), 10).unwrap();

        let stats = store.stats(3).unwrap();
        assert_eq!(stats.counts.pending_approval, 1);
        assert_eq!(stats.counts.approved, 1);
        assert_eq!(stats.counts.total(), 2);
        assert_eq!(stats.load, LoadBand::Low);
    }

    #[test]
    fn retention_removes_old_terminal_jobs_and_their_results() {
        let (store, _temp) = store();
        let record = JobRecord::new(submission(false));
        store.submit(&record, 10).unwrap();
        store
            .transition(&record.id, JobStatus::Approved, |r| r.begin_execution())
            .unwrap();
        fs::create_dir_all(store.results_dir(&record.id)).unwrap();
        fs::write(store.stdout_path(&record.id), "hello\n").unwrap();
        store
            .transition(&record.id, JobStatus::Executing, |r| {
                r.complete(&outcome_ok(), JobStore::mint_token())
            })
            .unwrap();

        // Not old enough yet.
        let report = store.retention_sweep(60_000).unwrap();
        assert_eq!(report.removed, 0);
        assert!(store.load(&record.id).unwrap().is_some());

        // Everything is older than zero milliseconds.
        let report = store.retention_sweep(0).unwrap();
        assert_eq!(report.removed, 1);
        assert!(store.load(&record.id).unwrap().is_none());
        assert!(!store.results_dir(&record.id).exists());
    }

    #[test]
    fn retention_removes_orphan_results() {
        let (store, _temp) = store();
        let ghost = JobId::new();
        fs::create_dir_all(store.results_dir(&ghost)).unwrap();
        fs::write(store.stdout_path(&ghost), "orphan").unwrap();

        let report = store.retention_sweep(60_000).unwrap();
        assert_eq!(report.orphan_results_removed, 1);
        assert!(!store.results_dir(&ghost).exists());
    }

    #[test]
    fn recover_fails_interrupted_executions() {
        let (store, _temp) = store();
        let record = JobRecord::new(submission(false));
        store.submit(&record, 10).unwrap();
        store
            .transition(&record.id, JobStatus::Approved, |r| r.begin_execution())
            .unwrap();

        let healed = store.recover().unwrap();
        assert_eq!(healed, 1);
        let loaded = store.load(&record.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::ExecutionFailed);
        assert!(loaded.error.is_some());
    }

    #[test]
    fn recover_heals_duplicate_locations() {
        let (store, _temp) = store();
        let mut record = JobRecord::new(submission(true));
        store.submit(&record, 10).unwrap();

        // Simulate a crash between the two transition steps: the record
        // exists in both pending_approval and approved.
        record.approve("operator");
        store.write_record(&record).unwrap();
        assert!(store
            .job_file(JobStatus::PendingApproval, &record.id)
            .exists());
        assert!(store.job_file(JobStatus::Approved, &record.id).exists());

        store.recover().unwrap();
        assert!(!store
            .job_file(JobStatus::PendingApproval, &record.id)
            .exists());
        assert_eq!(store.locate(&record.id), Some(JobStatus::Approved));
    }

    #[test]
    fn tokens_are_256_bit_and_unique() {
        let a = JobStore::mint_token();
        let b = JobStore::mint_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
