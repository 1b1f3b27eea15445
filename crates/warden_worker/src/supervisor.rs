//! Process supervision: spawn, stream, timeout, kill.
//!
//! The supervising loop runs on the calling thread. Reader threads are
//! attached to the child's pipes immediately after spawn, before the first
//! wait, so no output window exists in which the child can fill a pipe
//! unobserved. Output chunks flow back over an mpsc channel and are handed
//! to the caller's `on_chunk` on the calling thread.
//!
//! Timeout discipline: at the deadline the child receives the polite
//! termination signal; if it is still alive after the grace window it is
//! killed outright.

use crate::resolve::resolve_executable;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Grace window between the termination signal and the hard kill.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Poll granularity of the supervising loop; bounds how late a kill
/// request or the deadline can be observed.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 8 * 1024;

/// Internal execution identifier, distinct from the OS pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecId(pub u64);

impl std::fmt::Display for ExecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exec-{}", self.0)
    }
}

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Signals accepted by [`ProcessSupervisor::kill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Int,
}

impl Signal {
    /// Parse "SIGTERM"/"TERM"-style names, case-insensitively.
    pub fn from_name(name: &str) -> Option<Signal> {
        let upper = name.to_ascii_uppercase();
        match upper.trim_start_matches("SIG") {
            "TERM" => Some(Signal::Term),
            "KILL" => Some(Signal::Kill),
            "INT" => Some(Signal::Int),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Term => "SIGTERM",
            Signal::Kill => "SIGKILL",
            Signal::Int => "SIGINT",
        }
    }

    #[cfg(unix)]
    fn raw(self) -> i32 {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Int => libc::SIGINT,
        }
    }
}

/// Lookup key for kill/status queries: internal id or OS pid.
#[derive(Debug, Clone, Copy)]
pub enum KillTarget {
    Exec(ExecId),
    Pid(u32),
}

/// Snapshot of one live child.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub exec_id: ExecId,
    pub pid: u32,
    pub command: String,
    pub job_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Spawn request. `buffer_cap` bounds in-memory retention per stream;
/// bytes past the cap still reach `on_chunk` but are not buffered.
#[derive(Debug)]
pub struct SpawnRequest {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
    pub job_id: Option<String>,
    pub buffer_cap: usize,
}

impl SpawnRequest {
    pub fn new(command: impl Into<String>, args: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            cwd,
            env: HashMap::new(),
            timeout_ms: 30_000,
            job_id: None,
            buffer_cap: usize::MAX,
        }
    }
}

/// Completed execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Total bytes observed per stream, before the buffer cap applied.
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub killed: bool,
    pub pid: u32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.killed
    }
}

/// Spawn-time failures, classified for the operator.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("executable '{command}' not found")]
    NotFound { command: String },

    #[error("permission denied executing '{command}'")]
    PermissionDenied { command: String },

    #[error("too many concurrent executions ({active}/{max})")]
    CapacityExceeded { active: usize, max: usize },

    #[error("failed to spawn '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    /// Stable error code surfaced to the RPC layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "SPAWN_ENOENT",
            Self::PermissionDenied { .. } => "SPAWN_EACCES",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::Io { .. } => "SPAWN_OTHER",
        }
    }

    /// One-line hint for the operator.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "Install the command or fix PATH for the service",
            Self::PermissionDenied { .. } => "Check execute permissions on the binary",
            Self::CapacityExceeded { .. } => "Wait for running commands to finish and retry",
            Self::Io { source, .. } => match source.raw_os_error() {
                Some(code) if code == 23 || code == 24 => {
                    "Raise the file descriptor limit for the service"
                }
                Some(12) => "Free memory on the host and retry",
                _ => "Inspect the service log for the underlying spawn failure",
            },
        }
    }
}

/// Raised by the kill paths; the supervising loop watches it so a
/// signalled child moves to the grace/kill escalation instead of being
/// awaited for its full timeout. One flag per table entry.
#[derive(Debug, Clone, Default)]
struct KillFlag {
    raised: Arc<AtomicBool>,
}

impl KillFlag {
    fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

struct TableEntry {
    info: ProcessEntry,
    kill: KillFlag,
}

/// Supervises child processes and owns the service-wide concurrency gate.
///
/// Clone shares the table; both the synchronous execution path and the
/// async processor spawn through the same instance, so `max_concurrent`
/// bounds the host-wide child count.
#[derive(Clone)]
pub struct ProcessSupervisor {
    max_concurrent: usize,
    next_id: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
    table: Arc<Mutex<HashMap<u64, TableEntry>>>,
}

impl ProcessSupervisor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            next_id: Arc::new(AtomicU64::new(1)),
            active: Arc::new(AtomicUsize::new(0)),
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Slots currently free under the gate.
    pub fn available_slots(&self) -> usize {
        self.max_concurrent.saturating_sub(self.active_count())
    }

    /// Snapshot of all live children.
    pub fn list(&self) -> Vec<ProcessEntry> {
        let table = self.table.lock().expect("process table lock poisoned");
        table.values().map(|e| e.info.clone()).collect()
    }

    /// Find a live child by internal id or OS pid.
    pub fn find(&self, target: KillTarget) -> Option<ProcessEntry> {
        let table = self.table.lock().expect("process table lock poisoned");
        table
            .values()
            .find(|e| matches_target(&e.info, target))
            .map(|e| e.info.clone())
    }

    /// Signal a live child. Returns false when no such child exists.
    pub fn kill(&self, target: KillTarget, signal: Signal) -> bool {
        let entry = {
            let table = self.table.lock().expect("process table lock poisoned");
            table
                .values()
                .find(|e| matches_target(&e.info, target))
                .map(|e| (e.info.clone(), e.kill.clone()))
        };
        match entry {
            Some((info, kill)) => {
                info!(pid = info.pid, signal = signal.name(), "signalling child");
                // The flag tells the supervising loop to stop waiting for
                // the full timeout; the signal does the actual work.
                kill.raise();
                send_signal(info.pid, signal);
                true
            }
            None => false,
        }
    }

    /// Signal the child executing a given job. Returns false when no such
    /// child is live.
    pub fn kill_job(&self, job_id: &str, signal: Signal) -> bool {
        let entry = {
            let table = self.table.lock().expect("process table lock poisoned");
            table
                .values()
                .find(|e| e.info.job_id.as_deref() == Some(job_id))
                .map(|e| (e.info.pid, e.kill.clone()))
        };
        match entry {
            Some((pid, kill)) => {
                info!(pid, job_id, signal = signal.name(), "signalling job child");
                kill.raise();
                send_signal(pid, signal);
                true
            }
            None => false,
        }
    }

    /// Signal every live child; returns how many were signalled.
    pub fn kill_all(&self, signal: Signal) -> usize {
        let entries: Vec<(u32, KillFlag)> = {
            let table = self.table.lock().expect("process table lock poisoned");
            table
                .values()
                .map(|e| (e.info.pid, e.kill.clone()))
                .collect()
        };
        for (pid, kill) in &entries {
            kill.raise();
            send_signal(*pid, signal);
        }
        entries.len()
    }

    /// Spawn a child and supervise it to completion.
    ///
    /// Blocks the calling thread; `on_chunk` is invoked on this thread as
    /// output arrives.
    pub fn spawn(
        &self,
        request: SpawnRequest,
        on_chunk: Option<&mut dyn FnMut(StreamKind, &[u8])>,
    ) -> Result<ExecResult, SpawnError> {
        let resolved = resolve_executable(
            &request.command,
            &request.cwd,
            request.env.get("PATH").map(|s| s.as_str()),
        )
        .ok_or_else(|| SpawnError::NotFound {
            command: request.command.clone(),
        })?;

        // Reserve a slot before spawning so concurrent callers cannot
        // both pass the check.
        let reserved = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_concurrent).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            return Err(SpawnError::CapacityExceeded {
                active: self.active_count(),
                max: self.max_concurrent,
            });
        }
        let _slot = SlotGuard {
            active: Arc::clone(&self.active),
        };

        let start = Instant::now();
        let mut child = Command::new(&resolved)
            .args(&request.args)
            .current_dir(&request.cwd)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| classify_spawn_error(&request.command, e))?;

        let pid = child.id();
        // The child gets no input; closing stdin immediately gives it EOF.
        drop(child.stdin.take());

        let exec_id = ExecId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let kill = KillFlag::default();
        let entry = TableEntry {
            info: ProcessEntry {
                exec_id,
                pid,
                command: request.command.clone(),
                job_id: request.job_id.clone(),
                started_at: Utc::now(),
            },
            kill: kill.clone(),
        };
        {
            let mut table = self.table.lock().expect("process table lock poisoned");
            table.insert(exec_id.0, entry);
        }
        let _table_entry = EntryGuard {
            table: Arc::clone(&self.table),
            exec_id,
        };

        debug!(command = %request.command, pid, %exec_id, "child spawned");

        // Readers are attached before any wait so the child can never block
        // on a full pipe while we are not looking.
        let (tx, rx) = mpsc::channel();
        let stdout = child.stdout.take().expect("stdout requested as pipe");
        let stderr = child.stderr.take().expect("stderr requested as pipe");
        let stdout_reader = spawn_reader(StreamKind::Stdout, stdout, tx.clone());
        let stderr_reader = spawn_reader(StreamKind::Stderr, stderr, tx);

        let outcome = self.supervise(
            &mut child,
            &request,
            &kill,
            pid,
            start,
            &rx,
            on_chunk,
        );

        let status = child.wait().map_err(|e| SpawnError::Io {
            command: request.command.clone(),
            source: e,
        })?;
        // Readers are not joined: a pipe inherited by a grandchild can stay
        // open long after the child died, and the loop above has already
        // drained everything it is going to report.
        drop(stdout_reader);
        drop(stderr_reader);

        let exit_code = status.code();
        let signalled = exit_signal(&status);
        let execution_time_ms = start.elapsed().as_millis() as u64;

        if outcome.timed_out {
            warn!(command = %request.command, pid, execution_time_ms, "child timed out");
        }

        Ok(ExecResult {
            exit_code,
            stdout: String::from_utf8_lossy(&outcome.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&outcome.stderr).into_owned(),
            stdout_bytes: outcome.stdout_bytes,
            stderr_bytes: outcome.stderr_bytes,
            execution_time_ms,
            timed_out: outcome.timed_out,
            killed: outcome.force_killed || signalled,
            pid,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn supervise(
        &self,
        child: &mut Child,
        request: &SpawnRequest,
        kill: &KillFlag,
        pid: u32,
        start: Instant,
        rx: &Receiver<ReaderMsg>,
        mut on_chunk: Option<&mut dyn FnMut(StreamKind, &[u8])>,
    ) -> SuperviseOutcome {
        let deadline = start + Duration::from_millis(request.timeout_ms);
        let mut out = SuperviseOutcome::default();
        let mut grace_deadline: Option<Instant> = None;
        let mut eof_seen = 0u8;
        let mut disconnected = false;
        let mut exited_at: Option<Instant> = None;

        loop {
            let now = Instant::now();

            if grace_deadline.is_none() {
                let deadline_hit = now >= deadline;
                if deadline_hit || kill.is_raised() {
                    out.timed_out |= deadline_hit;
                    send_signal(pid, Signal::Term);
                    grace_deadline = Some(now + KILL_GRACE);
                }
            } else if let Some(grace) = grace_deadline {
                if now >= grace && !out.force_killed {
                    let _ = child.kill();
                    out.force_killed = true;
                }
            }

            if exited_at.is_none() {
                if let Ok(Some(_)) = child.try_wait() {
                    exited_at = Some(now);
                }
            }

            // Done once the child exited and both pipes drained. A pipe
            // inherited by a grandchild may never close; a short window
            // after exit bounds that case.
            if let Some(exited) = exited_at {
                let drained = eof_seen >= 2 || disconnected;
                if drained || now >= exited + Duration::from_millis(500) {
                    for msg in rx.try_iter() {
                        handle_msg(msg, request, &mut out, &mut eof_seen, &mut on_chunk);
                    }
                    break;
                }
            }
            let wait = next_wait(now, deadline, grace_deadline);
            if disconnected {
                // Pipes are gone but the child lives on; keep polling the
                // exit and timeout checks above.
                thread::sleep(wait);
            } else {
                match rx.recv_timeout(wait) {
                    Ok(msg) => handle_msg(msg, request, &mut out, &mut eof_seen, &mut on_chunk),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => disconnected = true,
                }
            }
        }

        out
    }
}

#[derive(Default)]
struct SuperviseOutcome {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_bytes: u64,
    stderr_bytes: u64,
    timed_out: bool,
    force_killed: bool,
}

fn handle_msg(
    msg: ReaderMsg,
    request: &SpawnRequest,
    out: &mut SuperviseOutcome,
    eof_seen: &mut u8,
    on_chunk: &mut Option<&mut dyn FnMut(StreamKind, &[u8])>,
) {
    match msg {
        ReaderMsg::Data(kind, data) => {
            let (buffer, total) = match kind {
                StreamKind::Stdout => (&mut out.stdout, &mut out.stdout_bytes),
                StreamKind::Stderr => (&mut out.stderr, &mut out.stderr_bytes),
            };
            *total += data.len() as u64;
            let room = request.buffer_cap.saturating_sub(buffer.len());
            if room > 0 {
                buffer.extend_from_slice(&data[..data.len().min(room)]);
            }
            if let Some(cb) = on_chunk.as_deref_mut() {
                cb(kind, &data);
            }
        }
        ReaderMsg::Eof(_) => *eof_seen += 1,
    }
}

fn next_wait(now: Instant, deadline: Instant, grace_deadline: Option<Instant>) -> Duration {
    let target = grace_deadline.unwrap_or(deadline);
    let until = target.saturating_duration_since(now);
    until.min(POLL_INTERVAL).max(Duration::from_millis(1))
}

enum ReaderMsg {
    Data(StreamKind, Vec<u8>),
    Eof(StreamKind),
}

fn spawn_reader(
    kind: StreamKind,
    mut pipe: impl Read + Send + 'static,
    tx: Sender<ReaderMsg>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(ReaderMsg::Data(kind, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(ReaderMsg::Eof(kind));
    })
}

fn matches_target(info: &ProcessEntry, target: KillTarget) -> bool {
    match target {
        KillTarget::Exec(id) => info.exec_id == id,
        KillTarget::Pid(pid) => info.pid == pid,
    }
}

fn classify_spawn_error(command: &str, error: std::io::Error) -> SpawnError {
    match error.kind() {
        std::io::ErrorKind::NotFound => SpawnError::NotFound {
            command: command.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied {
            command: command.to_string(),
        },
        _ => SpawnError::Io {
            command: command.to_string(),
            source: error,
        },
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> bool {
    unsafe { libc::kill(pid as i32, signal.raw()) == 0 }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) -> bool {
    false
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> bool {
    false
}

struct SlotGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct EntryGuard {
    table: Arc<Mutex<HashMap<u64, TableEntry>>>,
    exec_id: ExecId,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        if let Ok(mut table) = self.table.lock() {
            table.remove(&self.exec_id.0);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> SpawnRequest {
        let mut request = SpawnRequest::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            std::env::temp_dir(),
        );
        request.env = std::env::vars().collect();
        request
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let supervisor = ProcessSupervisor::new(2);
        let result = supervisor
            .spawn(sh("echo out; echo err 1>&2; exit 3"), None)
            .unwrap();

        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(!result.timed_out);
        assert!(!result.killed);
        assert!(result.pid > 0);
    }

    #[test]
    fn chunks_reach_callback_in_order() {
        let supervisor = ProcessSupervisor::new(2);
        let mut seen = Vec::new();
        let mut cb = |kind: StreamKind, data: &[u8]| {
            if kind == StreamKind::Stdout {
                seen.extend_from_slice(data);
            }
        };
        let result = supervisor
            .spawn(sh("printf 'a\\nb\\nc\\n'"), Some(&mut cb))
            .unwrap();

        assert!(result.success());
        assert_eq!(String::from_utf8(seen).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn buffer_cap_truncates_retention_not_counting() {
        let supervisor = ProcessSupervisor::new(2);
        let mut request = sh("head -c 50000 /dev/zero | tr '\\0' 'x'");
        request.buffer_cap = 1000;
        let result = supervisor.spawn(request, None).unwrap();

        assert_eq!(result.stdout.len(), 1000);
        assert_eq!(result.stdout_bytes, 50000);
    }

    #[test]
    fn timeout_terminates_cooperative_child_quickly() {
        let supervisor = ProcessSupervisor::new(2);
        let mut request = sh("sleep 30");
        request.timeout_ms = 200;
        let start = Instant::now();
        let result = supervisor.spawn(request, None).unwrap();

        assert!(result.timed_out);
        assert!(result.killed);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(supervisor.active_count(), 0);
    }

    #[test]
    fn timeout_escalates_to_kill_for_stubborn_child() {
        let supervisor = ProcessSupervisor::new(2);
        let mut request = sh("trap '' TERM; sleep 30");
        request.timeout_ms = 100;
        let start = Instant::now();
        let result = supervisor.spawn(request, None).unwrap();

        assert!(result.timed_out);
        assert!(result.killed);
        // deadline + grace + scheduling slack
        assert!(start.elapsed() < KILL_GRACE + Duration::from_secs(2));
        assert_eq!(supervisor.active_count(), 0);
    }

    #[test]
    fn capacity_gate_rejects_overflow() {
        let supervisor = ProcessSupervisor::new(1);
        let background = supervisor.clone();
        let handle = thread::spawn(move || background.spawn(sh("sleep 2"), None));

        // Give the background spawn time to claim the slot.
        thread::sleep(Duration::from_millis(300));
        let err = supervisor.spawn(sh("echo hi"), None).unwrap_err();
        assert_eq!(err.code(), "CAPACITY_EXCEEDED");

        supervisor.kill_all(Signal::Kill);
        let _ = handle.join().unwrap();
        assert_eq!(supervisor.active_count(), 0);
    }

    #[test]
    fn kill_by_table_lookup() {
        let supervisor = ProcessSupervisor::new(2);
        let background = supervisor.clone();
        let handle = thread::spawn(move || {
            let mut request = sh("sleep 30");
            request.job_id = Some("job-under-test".to_string());
            background.spawn(request, None)
        });

        // Wait for the entry to appear.
        let mut entry = None;
        for _ in 0..50 {
            if let Some(e) = supervisor
                .list()
                .into_iter()
                .find(|e| e.job_id.as_deref() == Some("job-under-test"))
            {
                entry = Some(e);
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        let entry = entry.expect("child never appeared in the table");

        assert!(supervisor.kill(KillTarget::Exec(entry.exec_id), Signal::Term));
        let result = handle.join().unwrap().unwrap();
        assert!(result.killed);
        assert!(supervisor.find(KillTarget::Pid(entry.pid)).is_none());
    }

    #[test]
    fn unknown_command_is_enoent() {
        let supervisor = ProcessSupervisor::new(2);
        let request = SpawnRequest::new(
            "definitely-not-a-real-binary-name",
            vec![],
            std::env::temp_dir(),
        );
        let err = supervisor.spawn(request, None).unwrap_err();
        assert_eq!(err.code(), "SPAWN_ENOENT");
    }

    #[test]
    fn signal_names_parse() {
        assert_eq!(Signal::from_name("SIGTERM"), Some(Signal::Term));
        assert_eq!(Signal::from_name("kill"), Some(Signal::Kill));
        assert_eq!(Signal::from_name("INT"), Some(Signal::Int));
        assert_eq!(Signal::from_name("HUP"), None);
    }
}
