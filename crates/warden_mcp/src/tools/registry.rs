//! Tool Registry - Tool Discovery and Dispatch
//!
//! Maintains the list of available tools and dispatches calls by name.

use super::*;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Registry of available MCP tools
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn McpTool>>,
}

impl ToolRegistry {
    /// Create a new tool registry with all tools registered
    pub fn new() -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };

        // Register all tools
        registry.register(Box::new(execute::ExecuteCommandTool));
        registry.register(Box::new(execute::ExecuteCommandStreamingTool));
        registry.register(Box::new(job::ExecuteCommandAsyncTool));
        registry.register(Box::new(job::CheckJobStatusTool));
        registry.register(Box::new(job::GetJobResultTool));
        registry.register(Box::new(job::ListJobsTool));
        registry.register(Box::new(job::CheckConversationJobsTool));
        registry.register(Box::new(job::KillCommandTool));
        registry.register(Box::new(approval::GetApprovalStatusTool));
        registry.register(Box::new(approval::LaunchApprovalCenterTool));
        registry.register(Box::new(introspect::ListAllowedCommandsTool));
        registry.register(Box::new(introspect::GetCommandStatusTool));
        registry.register(Box::new(introspect::GetLogsTool));

        debug!("Registered {} tools", registry.tools.len());

        registry
    }

    /// Register a tool
    fn register(&mut self, tool: Box<dyn McpTool>) {
        let name = tool.name().to_string();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, tool);
    }

    /// List all available tools
    pub fn list_tools(&self) -> Vec<crate::protocol::ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Call a tool by name
    pub fn call_tool(
        &self,
        name: &str,
        args: Value,
        session: &crate::session::SessionFacade,
    ) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", name))?;

        tool.execute(args, session)
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_all_operations() {
        let registry = ToolRegistry::new();

        for name in [
            "execute_command",
            "execute_command_streaming",
            "execute_command_async",
            "check_job_status",
            "get_job_result",
            "list_jobs",
            "check_conversation_jobs",
            "kill_command",
            "get_approval_status",
            "launch_approval_center",
            "list_allowed_commands",
            "get_command_status",
            "get_logs",
        ] {
            assert!(registry.has_tool(name), "missing tool: {}", name);
        }
    }

    #[test]
    fn test_list_tools() {
        let registry = ToolRegistry::new();
        let tools = registry.list_tools();

        assert_eq!(tools.len(), 13);
        assert!(tools.iter().any(|t| t.name == "execute_command"));
        assert!(tools.iter().all(|t| !t.description.is_empty()));
    }
}
