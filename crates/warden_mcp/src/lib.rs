//! MCP (Model Context Protocol) Server for Warden
//!
//! This crate implements the policy-gated command execution service: an
//! MCP server that validates shell commands against a whitelist, gates
//! them through human approval where configured, executes them under
//! timeout and concurrency discipline, and persists results in a durable
//! job queue.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Controller (agent)                           │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               │ MCP Protocol (JSON-RPC over stdio)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       crates/warden_mcp                         │
//! │                                                                 │
//! │  Server        │ JSON-RPC stdio, tool dispatch, audit trail     │
//! │  Session       │ facade: validate → queue/supervisor → results  │
//! │  Core          │ single-owner thread for queue + bridge state   │
//! │  Queue         │ status-sharded store, worker, retention        │
//! │  Approvals     │ bridge, loopback HTTP + SSE approval center    │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                      │
//!          ▼                    ▼                      ▼
//!   warden_security      warden_worker           Approval UI
//!   (whitelist, env)     (spawn, timeout)        (browser)
//! ```
//!
//! # Design Principles
//!
//! 1. **Job-first:** long-running commands return immediately with a
//!    `job_id`; progress is polled, results are fetched with a token
//!    minted at completion.
//!
//! 2. **Single-owner state:** one Core thread owns the store and the
//!    bridged-jobs map; everything else sends typed commands.
//!
//! 3. **Validate before anything:** no request touches the queue or a
//!    process without passing the whitelist validator.
//!
//! 4. **No async runtime:** threads and channels end to end.

pub mod audit;
pub mod protocol;
pub mod server;
pub mod session;

pub mod approvals;
pub mod core;
pub mod queue;
pub mod tools;

// Re-exports for convenience
pub use approvals::{ApprovalRequestId, ApprovalServer, ApprovalView, BridgeState, Decision};
pub use core::{spawn_core, Command, Core, CoreConfig, CoreHandle, Event, EventBus, SystemStats};
pub use protocol::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use queue::store::{JobStore, QueueError, QueueStats};
pub use queue::{JobId, JobRecord, JobSummary, ListFilter, QueueWorker, QueueWorkerHandle};
pub use server::{McpServer, McpServerConfig};
pub use session::{ExecuteRequest, ExecuteResponse, FacadeError, SessionFacade, SubmitResponse};
