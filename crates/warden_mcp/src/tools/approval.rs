//! Approval tools: get_approval_status, launch_approval_center

use super::McpTool;
use crate::session::SessionFacade;
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};

// ============================================================================
// get_approval_status
// ============================================================================

pub struct GetApprovalStatusTool;

impl McpTool for GetApprovalStatusTool {
    fn name(&self) -> &'static str {
        "get_approval_status"
    }

    fn description(&self) -> &'static str {
        "Pending approval requests and approval-center state"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _args: Value, session: &SessionFacade) -> Result<Value> {
        let (pending, url) = session.approval_status()?;
        let count = pending.len();
        Ok(json!({
            "pending": pending,
            "pending_count": count,
            "server_running": url.is_some(),
            "approval_url": url,
        }))
    }
}

// ============================================================================
// launch_approval_center
// ============================================================================

pub struct LaunchApprovalCenterTool;

#[derive(Debug, Deserialize)]
struct LaunchArgs {
    #[serde(default)]
    force_restart: bool,
}

impl McpTool for LaunchApprovalCenterTool {
    fn name(&self) -> &'static str {
        "launch_approval_center"
    }

    fn description(&self) -> &'static str {
        "Start the loopback approval UI (idempotent unless force_restart)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "force_restart": { "type": "boolean", "default": false }
            }
        })
    }

    fn execute(&self, args: Value, session: &SessionFacade) -> Result<Value> {
        let args: LaunchArgs = serde_json::from_value(args).unwrap_or(LaunchArgs {
            force_restart: false,
        });
        let url = session.launch_approval_center(args.force_restart)?;
        Ok(json!({ "approval_url": url }))
    }
}
