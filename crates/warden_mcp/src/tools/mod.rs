//! MCP Tool Implementations
//!
//! Each tool exposes one Warden operation via the MCP protocol. Tools are
//! registered in the ToolRegistry and dispatched by name.
//!
//! # Tool Categories
//!
//! - **Execution**: execute_command, execute_command_streaming
//! - **Queue**: execute_command_async, check_job_status, get_job_result,
//!   list_jobs, check_conversation_jobs, kill_command
//! - **Approvals**: get_approval_status, launch_approval_center
//! - **Introspection**: list_allowed_commands, get_command_status, get_logs
//!
//! # Human Gates
//!
//! Commands whose whitelist pattern sets `requires_confirmation` never
//! execute directly: the synchronous path blocks on the approval plane,
//! the async path parks the job in `pending_approval`.

mod registry;

// Tool implementations
mod approval;
mod execute;
mod introspect;
mod job;

pub use registry::ToolRegistry;

use crate::protocol::ToolDefinition;
use crate::session::SessionFacade;
use anyhow::Result;
use serde_json::Value;

/// Trait for MCP tools
///
/// All tool execution is synchronous. Tools receive the [`SessionFacade`],
/// which validates and routes every operation.
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "execute_command")
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool (synchronous)
    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value>;

    /// Get the tool definition for tools/list
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
