//! MCP Server Implementation
//!
//! JSON-RPC 2.0 server over stdio for the Model Context Protocol.
//!
//! # Architecture
//!
//! The server runs in a single process, reading JSON-RPC requests from
//! stdin and writing responses to stdout. Long-running commands are
//! submitted to the job queue and return immediately with a job_id;
//! progress is polled via separate tool calls.
//!
//! # Example
//!
//! ```ignore
//! let session = SessionFacade::start(config, queue_dir, None)?;
//! let mut server = McpServer::new(McpServerConfig::default(), session)?;
//! server.run()?; // Blocking, no async runtime required
//! ```

use crate::audit::AuditLog;
use crate::protocol::{
    methods, ContentBlock, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult,
    ToolsCapability, ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use crate::session::SessionFacade;
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use serde_json::Value;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// MCP Server configuration
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Server name (reported in initialize)
    pub server_name: String,

    /// Server version (reported in initialize)
    pub server_version: String,

    /// Maximum response size in bytes
    pub max_response_bytes: usize,

    /// Path to the audit log (None disables auditing)
    pub audit_log_path: Option<PathBuf>,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            server_name: "warden".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            max_response_bytes: 1024 * 1024, // 1MB
            audit_log_path: Some(warden_protocol::paths::audit_log_path()),
        }
    }
}

/// MCP Server
///
/// Holds no job or approval state of its own; everything flows through the
/// session facade into the Core thread.
pub struct McpServer {
    config: McpServerConfig,
    session: SessionFacade,
    tools: ToolRegistry,
    audit: Option<AuditLog>,
    initialized: bool,
}

impl McpServer {
    /// Create a new MCP server around a running session.
    pub fn new(config: McpServerConfig, session: SessionFacade) -> Result<Self> {
        let audit = config
            .audit_log_path
            .as_ref()
            .map(|path| AuditLog::new(path.clone()))
            .transpose()
            .context("Failed to open audit log")?;

        Ok(Self {
            config,
            session,
            tools: ToolRegistry::new(),
            audit,
            initialized: false,
        })
    }

    /// The facade, for embedders and shutdown orchestration.
    pub fn session(&self) -> &SessionFacade {
        &self.session
    }

    /// Run the server (blocking, reads from stdin, writes to stdout).
    ///
    /// Returns when stdin closes; the caller then shuts the session down.
    pub fn run(&mut self) -> Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();

        info!("MCP server starting");

        for line in stdin.lock().lines() {
            let line = line.context("Failed to read from stdin")?;

            if line.trim().is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    let response = JsonRpcResponse::error(
                        None,
                        JsonRpcError::new(
                            crate::protocol::ErrorCode::ParseError,
                            format!("Invalid JSON: {}", e),
                        ),
                    );
                    self.write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            if let Some(ref audit) = self.audit {
                if let Err(e) = audit.log_request(&request) {
                    warn!(error = %e, "audit request write failed");
                }
            }

            let response = self.handle_request(request);

            // Skip response for notifications (no id, no result, no error)
            if response.id.is_none() && response.result.is_none() && response.error.is_none() {
                continue;
            }

            if let Some(ref audit) = self.audit {
                if let Err(e) = audit.log_response(&response) {
                    warn!(error = %e, "audit response write failed");
                }
            }

            self.write_response(&mut stdout, &response)?;
        }

        info!("MCP server shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request (synchronous)
    fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::InvalidRequest,
                    format!("Invalid JSON-RPC version: {}", request.jsonrpc),
                ),
            );
        }

        match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request),
            methods::INITIALIZED => {
                // Notifications (no id) receive no response.
                if request.id.is_none() {
                    return JsonRpcResponse {
                        jsonrpc: JSONRPC_VERSION.to_string(),
                        id: None,
                        result: None,
                        error: None,
                    };
                }
                JsonRpcResponse::success(request.id, Value::Null)
            }
            methods::TOOLS_LIST => self.handle_tools_list(request),
            methods::TOOLS_CALL => self.handle_tools_call(request),
            methods::PING => {
                JsonRpcResponse::success(request.id, Value::Object(Default::default()))
            }
            _ => JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::MethodNotFound,
                    format!("Unknown method: {}", request.method),
                ),
            ),
        }
    }

    /// Handle initialize request
    fn handle_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        let params: InitializeParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            crate::protocol::ErrorCode::InvalidParams,
                            format!("Invalid initialize params: {}", e),
                        ),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        crate::protocol::ErrorCode::InvalidParams,
                        "Missing initialize params",
                    ),
                );
            }
        };

        info!(
            "Initialize from {} v{} (protocol {})",
            params.client_info.name, params.client_info.version, params.protocol_version
        );

        self.initialized = true;

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                resources: None,
                prompts: None,
                logging: None,
            },
            server_info: ServerInfo {
                name: self.config.server_name.clone(),
                version: self.config.server_version.clone(),
            },
        };

        JsonRpcResponse::success(request.id, serde_json::to_value(result).unwrap_or(Value::Null))
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let tools = self.tools.list_tools();
        let result = ToolsListResult { tools };
        JsonRpcResponse::success(request.id, serde_json::to_value(result).unwrap_or(Value::Null))
    }

    /// Handle tools/call request
    fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.initialized {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::ServerError(-32002),
                    "Server not initialized",
                ),
            );
        }

        let params: ToolCallParams = match request.params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(
                            crate::protocol::ErrorCode::InvalidParams,
                            format!("Invalid tool call params: {}", e),
                        ),
                    );
                }
            },
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    JsonRpcError::new(
                        crate::protocol::ErrorCode::InvalidParams,
                        "Missing tool call params",
                    ),
                );
            }
        };

        info!("Tool call: {}", params.name);

        let result = self
            .tools
            .call_tool(&params.name, params.arguments, &self.session);

        match result {
            Ok(value) => {
                let json = match serde_json::to_string(&value) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize tool result: {}", e);
                        return self.tool_error_response(
                            request.id,
                            format!("Serialization failed: {}", e),
                        );
                    }
                };

                let (content, was_truncated) = if json.len() > self.config.max_response_bytes {
                    warn!(
                        "Response truncated from {} to {} bytes",
                        json.len(),
                        self.config.max_response_bytes
                    );
                    // A structurally valid JSON stand-in rather than a
                    // mid-string cut.
                    let truncated = serde_json::json!({
                        "truncated": true,
                        "max_bytes": self.config.max_response_bytes,
                        "original_bytes": json.len(),
                        "message": "Response exceeded size limit. Use pagination or file paths to reduce output.",
                    });
                    (truncated.to_string(), true)
                } else {
                    (json, false)
                };

                let tool_result = ToolCallResult {
                    content: vec![ContentBlock::text(content)],
                    is_error: was_truncated,
                };

                match serde_json::to_value(tool_result) {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(e) => {
                        error!("Failed to serialize tool response: {}", e);
                        JsonRpcResponse::error(
                            request.id,
                            JsonRpcError::new(
                                crate::protocol::ErrorCode::InternalError,
                                "Failed to serialize tool response",
                            ),
                        )
                    }
                }
            }
            Err(e) => {
                // The facade's Display leads with the stable error code.
                warn!("Tool error: {:#}", e);
                self.tool_error_response(request.id, format!("{:#}", e))
            }
        }
    }

    fn tool_error_response(
        &self,
        id: Option<crate::protocol::RequestId>,
        message: String,
    ) -> JsonRpcResponse {
        let tool_result = ToolCallResult {
            content: vec![ContentBlock::text(format!("Error: {}", message))],
            is_error: true,
        };
        match serde_json::to_value(tool_result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(_) => JsonRpcResponse::error(
                id,
                JsonRpcError::new(
                    crate::protocol::ErrorCode::InternalError,
                    "Failed to serialize tool error response",
                ),
            ),
        }
    }

    /// Write a response to stdout
    fn write_response<W: Write>(&self, writer: &mut W, response: &JsonRpcResponse) -> Result<()> {
        let json = serde_json::to_string(response)?;
        debug!("Sending: {}", json);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = McpServerConfig::default();
        assert_eq!(config.server_name, "warden");
        assert_eq!(config.max_response_bytes, 1024 * 1024);
        assert!(config.audit_log_path.is_some());
    }
}
