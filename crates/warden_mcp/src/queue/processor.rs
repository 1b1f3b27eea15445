//! Queue Worker - Background Job Processing
//!
//! One scheduler drives everything the queue needs in the background: the
//! approval-timeout sweep, the bridge scan, dispatch of `approved` jobs
//! into the supervisor, and (on a slower cadence) the retention sweep.
//! The tick doubles as a wake channel so a submission or an approval is
//! picked up immediately instead of on the next interval.
//!
//! Execution itself runs on one thread per claimed job. Output streams to
//! `results/<id>/{stdout,stderr}.log` as it arrives and is scanned for
//! progress heuristics; the record's completion (and its token) happens in
//! Core strictly after the files are flushed.

use crate::core::CoreHandle;
use crate::queue::store::ResultsLayout;
use crate::queue::{ExecOutcome, JobError, JobRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use warden_protocol::config::EnvPolicy;
use warden_protocol::defaults;
use warden_security::build_child_env;
use warden_worker::{ProcessSupervisor, SpawnRequest, StreamKind};

/// Signals accepted by the worker's wake channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSignal {
    /// Run a scan now instead of waiting out the tick.
    Wake,
    /// Stop the loop.
    Shutdown,
}

/// Handle for waking or stopping the worker from other threads.
#[derive(Clone)]
pub struct QueueWorkerHandle {
    wake_tx: Sender<WorkSignal>,
}

impl QueueWorkerHandle {
    pub fn wake(&self) {
        let _ = self.wake_tx.send(WorkSignal::Wake);
    }

    pub fn shutdown(&self) {
        let _ = self.wake_tx.send(WorkSignal::Shutdown);
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick: Duration,
    pub cleanup_interval: Duration,
    pub env_policy: EnvPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(defaults::QUEUE_TICK_MS),
            cleanup_interval: Duration::from_millis(defaults::DEFAULT_CLEANUP_INTERVAL_MS),
            env_policy: EnvPolicy::default(),
        }
    }
}

/// Background worker; runs in a dedicated thread.
pub struct QueueWorker {
    core: CoreHandle,
    supervisor: ProcessSupervisor,
    results: ResultsLayout,
    config: WorkerConfig,
    wake_rx: Receiver<WorkSignal>,
    job_threads: Vec<JoinHandle<()>>,
    last_cleanup: Instant,
}

impl QueueWorker {
    /// Create the worker and its handle.
    ///
    /// The wake channel is created here; clone `handle.sender()` into the
    /// Core config so submissions and decisions trigger immediate scans.
    pub fn new(
        core: CoreHandle,
        supervisor: ProcessSupervisor,
        results: ResultsLayout,
        config: WorkerConfig,
        wake_rx: Receiver<WorkSignal>,
        wake_tx: Sender<WorkSignal>,
    ) -> (Self, QueueWorkerHandle) {
        let worker = Self {
            core,
            supervisor,
            results,
            config,
            wake_rx,
            job_threads: Vec::new(),
            last_cleanup: Instant::now(),
        };
        (worker, QueueWorkerHandle { wake_tx })
    }

    /// Spawn the worker loop in a dedicated thread.
    pub fn spawn(self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("warden-queue".to_string())
            .spawn(move || {
                self.run_loop();
            })
            .expect("Failed to spawn queue worker thread")
    }

    /// Run the worker loop. Blocks until shutdown.
    pub fn run_loop(mut self) {
        info!("queue worker started");

        loop {
            match self.wake_rx.recv_timeout(self.config.tick) {
                Ok(WorkSignal::Shutdown) => break,
                Ok(WorkSignal::Wake) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.run_once();
        }

        // Let finished job threads drain; live children are the facade's
        // problem (it owns the shutdown timeout policy).
        for handle in self.job_threads.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        info!("queue worker stopped");
    }

    /// One scheduler pass. Every step logs and continues on failure; a bad
    /// job must not poison the loop.
    fn run_once(&mut self) {
        self.job_threads.retain(|handle| !handle.is_finished());

        match self.core.sweep_approval_timeouts() {
            Ok(Ok(expired)) if expired > 0 => info!(expired, "approval windows expired"),
            Ok(Err(e)) => warn!(error = %e, "approval timeout sweep failed"),
            Err(e) => warn!(error = %e, "approval timeout sweep failed"),
            _ => {}
        }

        match self.core.bridge_scan() {
            Ok(Ok(created)) if !created.is_empty() => {
                info!(count = created.len(), "bridged new approval requests")
            }
            Ok(Err(e)) => warn!(error = %e, "bridge scan failed"),
            Err(e) => warn!(error = %e, "bridge scan failed"),
            _ => {}
        }

        let slots = self.supervisor.available_slots();
        if slots > 0 {
            match self.core.claim_approved(slots) {
                Ok(Ok(claimed)) => {
                    for record in claimed {
                        self.dispatch(record);
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "claiming approved jobs failed"),
                Err(e) => warn!(error = %e, "claiming approved jobs failed"),
            }
        }

        if self.last_cleanup.elapsed() >= self.config.cleanup_interval {
            self.last_cleanup = Instant::now();
            match self.core.retention_sweep() {
                Ok(Ok(report)) => {
                    if report.removed > 0 || report.expired > 0 || report.orphan_results_removed > 0
                    {
                        info!(
                            removed = report.removed,
                            expired = report.expired,
                            orphans = report.orphan_results_removed,
                            "retention sweep"
                        );
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "retention sweep failed"),
                Err(e) => warn!(error = %e, "retention sweep failed"),
            }
        }
    }

    fn dispatch(&mut self, record: JobRecord) {
        info!(job_id = %record.id, command = %record.command, "dispatching job");
        let core = self.core.clone();
        let supervisor = self.supervisor.clone();
        let results = self.results.clone();
        let env_policy = self.config.env_policy.clone();

        let handle = thread::Builder::new()
            .name(format!("warden-job-{}", record.id))
            .spawn(move || {
                execute_job(&core, &supervisor, &results, &env_policy, record);
            });
        match handle {
            Ok(handle) => self.job_threads.push(handle),
            Err(e) => error!(error = %e, "failed to spawn job thread"),
        }
    }
}

/// Drive one claimed job through the supervisor.
fn execute_job(
    core: &CoreHandle,
    supervisor: &ProcessSupervisor,
    results: &ResultsLayout,
    env_policy: &EnvPolicy,
    record: JobRecord,
) {
    let id = record.id.clone();

    let env = match build_child_env(env_policy, &Default::default()) {
        Ok(env) => env,
        Err(e) => {
            report_spawn_failure(core, &record, e.code(), e.to_string(), None);
            return;
        }
    };

    // Result files are opened before the child is spawned; every chunk the
    // child ever writes has somewhere to land.
    let mut sink = match ResultSink::open(results, &record) {
        Ok(sink) => sink,
        Err(e) => {
            report_spawn_failure(
                core,
                &record,
                "QUEUE_IO_ERROR",
                format!("failed to open result files: {}", e),
                None,
            );
            return;
        }
    };

    let mut progress = ProgressTracker::new(core.clone(), id.clone());
    let mut on_chunk = |kind: StreamKind, data: &[u8]| {
        sink.append(kind, data);
        progress.observe(data);
    };

    let mut request = SpawnRequest::new(
        record.command.clone(),
        record.args.clone(),
        record.working_directory.clone(),
    );
    request.env = env;
    request.timeout_ms = record.requested_timeout_ms;
    request.job_id = Some(id.0.clone());
    request.buffer_cap = 0; // files are authoritative for async jobs

    let started_at = Utc::now();
    match supervisor.spawn(request, Some(&mut on_chunk)) {
        Ok(result) => {
            let outcome = ExecOutcome {
                exit_code: result.exit_code,
                execution_time_ms: result.execution_time_ms,
                timed_out: result.timed_out,
                killed: result.killed,
                pid: result.pid,
                stdout_bytes: result.stdout_bytes,
                stderr_bytes: result.stderr_bytes,
            };

            // Flush results, then metadata, then let Core mint the token.
            sink.finish(&record, started_at, &outcome);
            match core.finish_execution(id.clone(), outcome, None) {
                Ok(Ok(finished)) => {
                    debug!(job_id = %id, status = %finished.status, "job finished")
                }
                Ok(Err(e)) => error!(job_id = %id, error = %e, "failed to record job result"),
                Err(e) => error!(job_id = %id, error = %e, "failed to record job result"),
            }
        }
        Err(e) if e.code() == "CAPACITY_EXCEEDED" => {
            // A synchronous execution won the slot race; hand the job back
            // for the next pass instead of failing it.
            debug!(job_id = %id, "requeueing job, no execution slot");
            match core.requeue_job(id.clone()) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(job_id = %id, error = %e, "failed to requeue job"),
                Err(e) => error!(job_id = %id, error = %e, "failed to requeue job"),
            }
        }
        Err(e) => {
            let suggested = e.suggested_action().to_string();
            report_spawn_failure(core, &record, e.code(), e.to_string(), Some(suggested));
        }
    }
}

fn report_spawn_failure(
    core: &CoreHandle,
    record: &JobRecord,
    code: &str,
    message: String,
    suggested_action: Option<String>,
) {
    warn!(job_id = %record.id, code, %message, "job could not be executed");
    let error = JobError {
        code: code.to_string(),
        message,
        suggested_action,
    };
    match core.fail_spawn(record.id.clone(), error) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(job_id = %record.id, error = %e, "failed to record spawn failure"),
        Err(e) => error!(job_id = %record.id, error = %e, "failed to record spawn failure"),
    }
}

// ============================================================================
// Result capture
// ============================================================================

/// Append-only capture of both output streams, capped per stream.
struct ResultSink {
    stdout: File,
    stderr: File,
    stdout_written: u64,
    stderr_written: u64,
    stdout_truncated: bool,
    stderr_truncated: bool,
    metadata_path: std::path::PathBuf,
}

/// Written beside the logs when the child exits.
#[derive(Debug, Serialize, Deserialize)]
struct ResultMetadata {
    job_id: String,
    command: String,
    args: Vec<String>,
    working_directory: std::path::PathBuf,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    finished_at: DateTime<Utc>,
    execution_time_ms: u64,
    exit_code: Option<i32>,
    timed_out: bool,
    killed: bool,
    pid: u32,
    stdout_bytes: u64,
    stderr_bytes: u64,
}

impl ResultSink {
    fn open(results: &ResultsLayout, record: &JobRecord) -> std::io::Result<Self> {
        let dir = results.dir(&record.id);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            stdout: File::create(results.stdout_path(&record.id))?,
            stderr: File::create(results.stderr_path(&record.id))?,
            stdout_written: 0,
            stderr_written: 0,
            stdout_truncated: false,
            stderr_truncated: false,
            metadata_path: results.metadata_path(&record.id),
        })
    }

    fn append(&mut self, kind: StreamKind, data: &[u8]) {
        let (file, written, truncated) = match kind {
            StreamKind::Stdout => (
                &mut self.stdout,
                &mut self.stdout_written,
                &mut self.stdout_truncated,
            ),
            StreamKind::Stderr => (
                &mut self.stderr,
                &mut self.stderr_written,
                &mut self.stderr_truncated,
            ),
        };

        if *truncated {
            return;
        }
        let room = defaults::STREAM_CAP_BYTES.saturating_sub(*written);
        let take = (data.len() as u64).min(room) as usize;
        if take > 0 {
            if let Err(e) = file.write_all(&data[..take]) {
                warn!(error = %e, "result stream write failed");
            }
            *written += take as u64;
        }
        if take < data.len() {
            *truncated = true;
            let _ = file.write_all(b"\n[output truncated: stream cap reached]\n");
        }
    }

    /// Flush logs and write metadata. Must complete before the token is
    /// minted.
    fn finish(&mut self, record: &JobRecord, started_at: DateTime<Utc>, outcome: &ExecOutcome) {
        let _ = self.stdout.sync_all();
        let _ = self.stderr.sync_all();

        let metadata = ResultMetadata {
            job_id: record.id.0.clone(),
            command: record.command.clone(),
            args: record.args.clone(),
            working_directory: record.working_directory.clone(),
            started_at,
            finished_at: Utc::now(),
            execution_time_ms: outcome.execution_time_ms,
            exit_code: outcome.exit_code,
            timed_out: outcome.timed_out,
            killed: outcome.killed,
            pid: outcome.pid,
            stdout_bytes: outcome.stdout_bytes,
            stderr_bytes: outcome.stderr_bytes,
        };
        match serde_json::to_string_pretty(&metadata) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.metadata_path, json) {
                    warn!(error = %e, "failed to write result metadata");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize result metadata"),
        }
    }
}

// ============================================================================
// Progress heuristics
// ============================================================================

/// Scans output for progress hints and forwards changes to Core.
struct ProgressTracker {
    core: CoreHandle,
    job_id: crate::queue::JobId,
    last_message: String,
    last_percentage: Option<u8>,
}

impl ProgressTracker {
    fn new(core: CoreHandle, job_id: crate::queue::JobId) -> Self {
        Self {
            core,
            job_id,
            last_message: String::new(),
            last_percentage: None,
        }
    }

    fn observe(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        // An explicit percentage always wins; keyword hints only supply a
        // default when nothing was detected yet.
        let (message, percentage) = match (find_percentage(&text), keyword_hint(&text)) {
            (Some(pct), Some((message, _))) => (message.to_string(), Some(pct)),
            (Some(pct), None) => (format!("Progress: {}%", pct), Some(pct)),
            (None, Some((message, default))) => (
                message.to_string(),
                Some(self.last_percentage.unwrap_or(default)),
            ),
            (None, None) => return,
        };

        if message == self.last_message && percentage == self.last_percentage {
            return;
        }
        self.last_message = message.clone();
        self.last_percentage = percentage;
        let _ = self
            .core
            .set_progress(self.job_id.clone(), message, percentage);
    }
}

/// Phase keyword in one output chunk, with its default percentage.
fn keyword_hint(text: &str) -> Option<(&'static str, u8)> {
    if text.contains("Installing") || text.contains("Downloading") {
        return Some(("Installing dependencies...", 25));
    }
    if text.contains("Building") || text.contains("Compiling") {
        return Some(("Building project...", 50));
    }
    if text.contains("Testing") || text.contains("Running tests") {
        return Some(("Running tests...", 75));
    }
    None
}

/// First `NN%` (0-100) substring, if any.
fn find_percentage(text: &str) -> Option<u8> {
    let bytes = text.as_bytes();
    for (idx, &b) in bytes.iter().enumerate() {
        if b != b'%' {
            continue;
        }
        let mut start = idx;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        if start == idx {
            continue;
        }
        if let Ok(pct) = text[start..idx].parse::<u16>() {
            if pct <= 100 {
                return Some(pct as u8);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_detection() {
        assert_eq!(find_percentage("progress 42% done"), Some(42));
        assert_eq!(find_percentage("100%"), Some(100));
        assert_eq!(find_percentage("no numbers here %"), None);
        assert_eq!(find_percentage("overflow 250%"), None);
    }

    #[test]
    fn keyword_hints_with_default_percentages() {
        let (msg, pct) = keyword_hint("Installing 42 packages").unwrap();
        assert_eq!(msg, "Installing dependencies...");
        assert_eq!(pct, 25);

        let (msg, _) = keyword_hint("Compiling warden v0.1.0").unwrap();
        assert_eq!(msg, "Building project...");

        let (msg, pct) = keyword_hint("Running tests (3 of 9)").unwrap();
        assert_eq!(msg, "Running tests...");
        assert_eq!(pct, 75);

        assert!(keyword_hint("plain output").is_none());
    }

    #[test]
    fn explicit_percentage_coexists_with_keywords() {
        assert_eq!(find_percentage("Building 63% complete"), Some(63));
        assert!(keyword_hint("Building 63% complete").is_some());
    }
}
