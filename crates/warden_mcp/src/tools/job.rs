//! Queue tools: async submission, status, results, listing, kill.

use super::McpTool;
use crate::queue::ListFilter;
use crate::session::{ExecuteRequest, SessionFacade};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use warden_protocol::JobStatus;

// ============================================================================
// execute_command_async
// ============================================================================

pub struct ExecuteCommandAsyncTool;

#[derive(Debug, Deserialize)]
struct ExecuteAsyncArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    user_description: Option<String>,
}

impl McpTool for ExecuteCommandAsyncTool {
    fn name(&self) -> &'static str {
        "execute_command_async"
    }

    fn description(&self) -> &'static str {
        "Submit a whitelisted command to the durable job queue; poll with check_job_status"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "args": { "type": "array", "items": { "type": "string" } },
                "working_directory": { "type": "string" },
                "timeout": { "type": "integer" },
                "conversation_id": { "type": "string" },
                "user_description": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: ExecuteAsyncArgs = serde_json::from_value(args)?;
        let response = session.submit_async(ExecuteRequest {
            command: args.command,
            args: args.args,
            working_directory: args.working_directory,
            timeout_ms: args.timeout,
            env: HashMap::new(),
            conversation_id: args.conversation_id,
            user_description: args.user_description,
        })?;
        Ok(serde_json::to_value(response)?)
    }
}

// ============================================================================
// check_job_status
// ============================================================================

pub struct CheckJobStatusTool;

#[derive(Debug, Deserialize)]
struct JobIdArgs {
    job_id: String,
}

impl McpTool for CheckJobStatusTool {
    fn name(&self) -> &'static str {
        "check_job_status"
    }

    fn description(&self) -> &'static str {
        "Get a queued job's lifecycle status, progress, and poll recommendation"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": { "type": "string" }
            },
            "required": ["job_id"]
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: JobIdArgs = serde_json::from_value(args)?;
        let record = session.check_status(&args.job_id)?;

        let next_poll = record.next_poll_recommendation_ms();
        let mut value = serde_json::to_value(&record)?;
        value["next_poll_recommendation_ms"] = json!(next_poll);
        Ok(value)
    }
}

// ============================================================================
// get_job_result
// ============================================================================

pub struct GetJobResultTool;

#[derive(Debug, Deserialize)]
struct JobResultArgs {
    job_id: String,
    execution_token: String,
}

impl McpTool for GetJobResultTool {
    fn name(&self) -> &'static str {
        "get_job_result"
    }

    fn description(&self) -> &'static str {
        "Fetch a completed job's output; requires the execution token"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "job_id": { "type": "string" },
                "execution_token": { "type": "string" }
            },
            "required": ["job_id", "execution_token"]
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: JobResultArgs = serde_json::from_value(args)?;
        let response = session.get_result(&args.job_id, &args.execution_token)?;
        Ok(serde_json::to_value(response)?)
    }
}

// ============================================================================
// list_jobs
// ============================================================================

pub struct ListJobsTool;

#[derive(Debug, Deserialize)]
struct ListJobsArgs {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    status: Option<JobStatus>,
}

impl McpTool for ListJobsTool {
    fn name(&self) -> &'static str {
        "list_jobs"
    }

    fn description(&self) -> &'static str {
        "List queued jobs, newest first"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": 20 },
                "offset": { "type": "integer", "default": 0 },
                "conversation_id": { "type": "string" },
                "status": {
                    "type": "string",
                    "enum": [
                        "pending_approval", "approved", "executing", "completed",
                        "rejected", "approval_timeout", "execution_timeout",
                        "execution_failed", "cancelled", "expired"
                    ]
                }
            }
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: ListJobsArgs = serde_json::from_value(args)?;
        let jobs = session.list_jobs(ListFilter {
            status: args.status,
            operation_type: None,
            conversation_id: args.conversation_id,
            limit: args.limit.unwrap_or(20),
            offset: args.offset.unwrap_or(0),
        })?;
        let count = jobs.len();
        Ok(json!({ "jobs": jobs, "count": count }))
    }
}

// ============================================================================
// check_conversation_jobs
// ============================================================================

pub struct CheckConversationJobsTool;

#[derive(Debug, Deserialize)]
struct ConversationArgs {
    #[serde(default)]
    conversation_id: Option<String>,
}

impl McpTool for CheckConversationJobsTool {
    fn name(&self) -> &'static str {
        "check_conversation_jobs"
    }

    fn description(&self) -> &'static str {
        "Digest of a conversation's jobs: entries plus active/completed counts"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "conversation_id": { "type": "string" }
            }
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: ConversationArgs = serde_json::from_value(args)?;
        let digest = session.check_conversation_jobs(args.conversation_id)?;
        Ok(serde_json::to_value(digest)?)
    }
}

// ============================================================================
// kill_command
// ============================================================================

pub struct KillCommandTool;

#[derive(Debug, Deserialize)]
struct KillArgs {
    process_id: String,
    #[serde(default)]
    signal: Option<String>,
}

impl McpTool for KillCommandTool {
    fn name(&self) -> &'static str {
        "kill_command"
    }

    fn description(&self) -> &'static str {
        "Cancel a queued job or signal a running child (by job id or pid)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "process_id": {
                    "type": "string",
                    "description": "Job id or OS pid"
                },
                "signal": {
                    "type": "string",
                    "enum": ["SIGTERM", "SIGKILL", "SIGINT"]
                }
            },
            "required": ["process_id"]
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: KillArgs = serde_json::from_value(args)?;
        let message = session.kill(&args.process_id, args.signal.as_deref())?;
        Ok(json!({ "process_id": args.process_id, "result": message }))
    }
}
