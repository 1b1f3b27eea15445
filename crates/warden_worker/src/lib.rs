//! Child process supervision for Warden.
//!
//! [`ProcessSupervisor`] spawns whitelisted commands with piped stdio,
//! attaches output readers before anything can block, enforces the
//! graceful-then-forceful timeout discipline, and tracks every live child
//! in a process table that doubles as the service-wide concurrency gate.
//! Killing goes through that table too: the kill paths raise a per-child
//! flag the supervising loop watches, then deliver the OS signal.

pub mod resolve;
pub mod supervisor;

pub use resolve::resolve_executable;
pub use supervisor::{
    ExecId, ExecResult, KillTarget, ProcessEntry, ProcessSupervisor, Signal, SpawnError,
    SpawnRequest, StreamKind,
};
