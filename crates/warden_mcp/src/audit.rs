//! Audit Logging - RPC Traffic Recording
//!
//! Appends one JSON object per line for every request and response that
//! crosses the stdio boundary. Only parameter *keys* are recorded, never
//! argument values, so command lines and tokens stay out of the trail.

use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// Append-only NDJSON audit trail.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

/// Audit failures never abort request handling; callers log and continue.
#[derive(Debug, thiserror::Error)]
#[error("audit log failure: {0}")]
pub struct AuditError(String);

impl AuditLog {
    /// Open (creating if needed) the audit log at `path`.
    pub fn new(path: PathBuf) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AuditError(format!("create audit directory: {}", e)))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuditError(format!("open audit log: {}", e)))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Record an incoming request.
    pub fn log_request(&self, request: &JsonRpcRequest) -> Result<(), AuditError> {
        self.write_entry(&AuditEntry::Request {
            ts: Utc::now(),
            method: request.method.clone(),
            id: request.id.as_ref().map(|id| format!("{:?}", id)),
            params_summary: request.params.as_ref().map(summarize_params),
        })
    }

    /// Record an outgoing response.
    pub fn log_response(&self, response: &JsonRpcResponse) -> Result<(), AuditError> {
        self.write_entry(&AuditEntry::Response {
            ts: Utc::now(),
            id: response.id.as_ref().map(|id| format!("{:?}", id)),
            success: response.error.is_none(),
            error_code: response.error.as_ref().map(|e| e.code),
        })
    }

    fn write_entry(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let json = serde_json::to_string(entry)
            .map_err(|e| AuditError(format!("serialize audit entry: {}", e)))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AuditError("audit writer lock poisoned".to_string()))?;
        writeln!(writer, "{}", json).map_err(|e| AuditError(format!("write entry: {}", e)))?;
        writer
            .flush()
            .map_err(|e| AuditError(format!("flush audit log: {}", e)))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuditEntry {
    Request {
        ts: DateTime<Utc>,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        params_summary: Option<String>,
    },
    Response {
        ts: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<i32>,
    },
}

/// Keys only; values may hold command lines or secrets.
fn summarize_params(params: &serde_json::Value) -> String {
    match params {
        serde_json::Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
            format!("{{keys: [{}]}}", keys.join(", "))
        }
        serde_json::Value::Array(arr) => format!("[{} items]", arr.len()),
        _ => "[value]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use tempfile::TempDir;

    #[test]
    fn creates_file_and_appends_requests() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.ndjson");
        let log = AuditLog::new(path.clone()).unwrap();

        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(1)),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({"name": "execute_command"})),
        };
        log.log_request(&request).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("tools/call"));
        assert!(content.contains("request"));
    }

    #[test]
    fn params_are_summarized_to_keys() {
        let obj = serde_json::json!({"command": "rm -rf /", "args": ["secret"]});
        let summary = summarize_params(&obj);
        assert!(summary.contains("command"));
        assert!(summary.contains("args"));
        assert!(!summary.contains("secret"));
        assert!(!summary.contains("rm -rf"));
    }
}
