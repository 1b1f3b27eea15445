//! Introspection tools: list_allowed_commands, get_command_status, get_logs

use super::McpTool;
use crate::session::SessionFacade;
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use warden_logging::LogQuery;

// ============================================================================
// list_allowed_commands
// ============================================================================

pub struct ListAllowedCommandsTool;

impl McpTool for ListAllowedCommandsTool {
    fn name(&self) -> &'static str {
        "list_allowed_commands"
    }

    fn description(&self) -> &'static str {
        "The whitelist: every command this service will consider running"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, session: &SessionFacade) -> Result<Value> {
        let config = session.config();
        let commands: Vec<Value> = config
            .patterns
            .iter()
            .map(|compiled| {
                let p = &compiled.pattern;
                json!({
                    "command": p.command,
                    "description": p.description,
                    "allowed_args": p.allowed_args,
                    "arg_patterns": p.arg_patterns,
                    "timeout_ms": compiled.timeout_ms(config.default_timeout_ms),
                    "working_dir_restriction": p.working_dir_restriction,
                    "allowed_working_dirs": p.allowed_working_dirs,
                    "requires_confirmation": p.requires_confirmation,
                })
            })
            .collect();

        Ok(json!({
            "commands": commands,
            "default_timeout_ms": config.default_timeout_ms,
            "max_concurrent": config.max_concurrent,
            "project_roots": config.project_roots,
        }))
    }
}

// ============================================================================
// get_command_status
// ============================================================================

pub struct GetCommandStatusTool;

impl McpTool for GetCommandStatusTool {
    fn name(&self) -> &'static str {
        "get_command_status"
    }

    fn description(&self) -> &'static str {
        "Live children and concurrency headroom"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, session: &SessionFacade) -> Result<Value> {
        let supervisor = session.supervisor();
        let processes: Vec<Value> = supervisor
            .list()
            .into_iter()
            .map(|entry| {
                json!({
                    "exec_id": entry.exec_id.to_string(),
                    "pid": entry.pid,
                    "command": entry.command,
                    "job_id": entry.job_id,
                    "started_at": entry.started_at.timestamp_millis(),
                })
            })
            .collect();

        Ok(json!({
            "processes": processes,
            "active": supervisor.active_count(),
            "max_concurrent": supervisor.max_concurrent(),
            "available_slots": supervisor.available_slots(),
        }))
    }
}

// ============================================================================
// get_logs
// ============================================================================

pub struct GetLogsTool;

#[derive(Debug, Deserialize)]
struct GetLogsArgs {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    component: Option<String>,
    #[serde(default)]
    operation: Option<String>,
    #[serde(default)]
    count: Option<usize>,
}

impl McpTool for GetLogsTool {
    fn name(&self) -> &'static str {
        "get_logs"
    }

    fn description(&self) -> &'static str {
        "Recent service log records, filtered by level/component/operation"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "level": {
                    "type": "string",
                    "enum": ["error", "warn", "info", "debug"]
                },
                "component": { "type": "string" },
                "operation": { "type": "string" },
                "count": { "type": "integer", "default": 50 }
            }
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: GetLogsArgs = serde_json::from_value(args)?;
        let records = session.query_logs(&LogQuery {
            level: args.level,
            component: args.component,
            operation: args.operation,
            count: args.count,
        });
        let count = records.len();
        Ok(json!({ "logs": records, "count": count }))
    }
}
