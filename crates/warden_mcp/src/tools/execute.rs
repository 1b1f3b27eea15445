//! Execution tools: execute_command, execute_command_streaming
//!
//! The synchronous path: validate, (optionally) gate on approval, spawn,
//! and return the collected output in the response. The streaming flavour
//! additionally returns the chunk sequence so the dispatcher can forward
//! it out-of-band.

use super::McpTool;
use crate::session::{ExecuteRequest, SessionFacade};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use warden_worker::StreamKind;

/// Cap on chunk entries echoed back by the streaming tool.
const MAX_CHUNKS: usize = 256;

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    working_directory: Option<PathBuf>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    env: HashMap<String, String>,
}

impl ExecuteArgs {
    fn into_request(self) -> ExecuteRequest {
        ExecuteRequest {
            command: self.command,
            args: self.args,
            working_directory: self.working_directory,
            timeout_ms: self.timeout,
            env: self.env,
            conversation_id: None,
            user_description: None,
        }
    }
}

fn execute_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "command": {
                "type": "string",
                "description": "Whitelisted executable name"
            },
            "args": {
                "type": "array",
                "items": { "type": "string" }
            },
            "working_directory": {
                "type": "string",
                "description": "Relative to the service start directory"
            },
            "timeout": {
                "type": "integer",
                "description": "Timeout in milliseconds"
            },
            "env": {
                "type": "object",
                "additionalProperties": { "type": "string" }
            }
        },
        "required": ["command"]
    })
}

// ============================================================================
// execute_command
// ============================================================================

pub struct ExecuteCommandTool;

impl McpTool for ExecuteCommandTool {
    fn name(&self) -> &'static str {
        "execute_command"
    }

    fn description(&self) -> &'static str {
        "Execute a whitelisted command and wait for its output"
    }

    fn input_schema(&self) -> Value {
        execute_schema()
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: ExecuteArgs = serde_json::from_value(args)?;
        let response = session.execute(args.into_request())?;
        Ok(serde_json::to_value(response)?)
    }
}

// ============================================================================
// execute_command_streaming
// ============================================================================

pub struct ExecuteCommandStreamingTool;

impl McpTool for ExecuteCommandStreamingTool {
    fn name(&self) -> &'static str {
        "execute_command_streaming"
    }

    fn description(&self) -> &'static str {
        "Execute a whitelisted command, capturing output chunks incrementally"
    }

    fn input_schema(&self) -> Value {
        execute_schema()
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: ExecuteArgs = serde_json::from_value(args)?;

        let mut chunks = Vec::new();
        let mut dropped = 0usize;
        let response = session.execute_with_sink(args.into_request(), |kind, data| {
            if chunks.len() >= MAX_CHUNKS {
                dropped += 1;
                return;
            }
            chunks.push(json!({
                "stream": match kind {
                    StreamKind::Stdout => "stdout",
                    StreamKind::Stderr => "stderr",
                },
                "data": String::from_utf8_lossy(data),
            }));
        })?;

        let mut value = serde_json::to_value(response)?;
        value["chunks"] = Value::Array(chunks);
        if dropped > 0 {
            value["chunks_dropped"] = json!(dropped);
        }
        Ok(value)
    }
}
