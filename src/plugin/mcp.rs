//! Remote tool backends over MCP (Streamable HTTP).
//!
//! A minimal JSON-RPC 2.0 client for the Model Context Protocol: it performs
//! the `initialize` handshake, lists the server's tools and calls them. Each
//! remote tool becomes a [`Capability`] in the server's namespace.
//!
//! Responses may come back as a plain JSON body or as a `text/event-stream`
//! carrying one or more JSON-RPC messages; the session id returned by the
//! server is echoed on every later request and the session is closed with a
//! `DELETE` on disconnect.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use super::capabilities::{Capability, CapabilityRef, PluginError, ToolContext, ToolError, ToolPlugin};

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const HEADER_SESSION_ID: &str = "Mcp-Session-Id";
const HEADER_PROTOCOL_VERSION: &str = "MCP-Protocol-Version";
const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
const JSON_MIME_TYPE: &str = "application/json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Configuration
// =============================================================================

fn default_mandatory() -> bool {
    true
}

/// One remote MCP server offered to every session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpServerConfig {
    /// Plugin namespace for the server's tools
    pub name: String,
    pub url: String,
    /// Session setup fails when a mandatory server cannot be reached.
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
    /// Extra headers sent with every request, e.g. `Authorization`
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            mandatory: default_mandatory(),
            headers: HashMap::new(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum McpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Unexpected content type: {0:?}")]
    UnexpectedContentType(Option<String>),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Session
// =============================================================================

enum PostResponse {
    Accepted,
    Messages(Vec<Value>),
}

/// An MCP client session against one server.
pub struct McpSession {
    http: Client,
    url: String,
    headers: HeaderMap,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
    next_id: AtomicU64,
}

impl McpSession {
    pub fn new(http: Client, url: impl Into<String>, headers: &HashMap<String, String>) -> Self {
        Self {
            http,
            url: url.into(),
            headers: build_headers(headers),
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    async fn post(&self, message: &Value) -> Result<PostResponse, McpError> {
        let mut request = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, format!("{JSON_MIME_TYPE}, {EVENT_STREAM_MIME_TYPE}"))
            .timeout(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
        if let Some(session_id) = self.session_id() {
            request = request.header(HEADER_SESSION_ID, session_id);
        }
        if let Some(version) = self.protocol_version.read().clone() {
            request = request.header(HEADER_PROTOCOL_VERSION, version);
        }

        let response = request.json(message).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if matches!(status, StatusCode::ACCEPTED | StatusCode::NO_CONTENT) {
            return Ok(PostResponse::Accepted);
        }

        if let Some(session_id) = response
            .headers()
            .get(HEADER_SESSION_ID)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session_id.to_string());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        match content_type.as_deref() {
            Some(ct) if ct.starts_with(EVENT_STREAM_MIME_TYPE) => {
                let messages = parse_sse_data(&body)
                    .into_iter()
                    .filter_map(|data| serde_json::from_str(&data).ok())
                    .collect();
                Ok(PostResponse::Messages(messages))
            }
            _ if body.trim().is_empty() => Ok(PostResponse::Accepted),
            Some(ct) if ct.starts_with(JSON_MIME_TYPE) => {
                let message = serde_json::from_str(&body)
                    .map_err(|e| McpError::InvalidResponse(e.to_string()))?;
                Ok(PostResponse::Messages(vec![message]))
            }
            // Some servers omit Content-Type on JSON bodies.
            _ => serde_json::from_str(&body)
                .map(|message| PostResponse::Messages(vec![message]))
                .map_err(|_| McpError::UnexpectedContentType(content_type)),
        }
    }

    /// Send a request and return its `result`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        tracing::debug!("MCP request {} ({}) to {}", method, id, self.url);

        let messages = match self.post(&message).await? {
            PostResponse::Messages(messages) => messages,
            PostResponse::Accepted => {
                return Err(McpError::InvalidResponse(format!(
                    "no response to {method}"
                )));
            }
        };
        let response = messages
            .into_iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
            .ok_or_else(|| McpError::InvalidResponse(format!("no response with id {id}")))?;

        if let Some(error) = response.get("error") {
            return Err(McpError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn notify(&self, method: &str) -> Result<(), McpError> {
        let message = json!({"jsonrpc": "2.0", "method": method});
        self.post(&message).await.map(|_| ())
    }

    /// Run the `initialize` handshake.
    pub async fn initialize(&self) -> Result<Value, McpError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            )
            .await?;
        if let Some(version) = result.get("protocolVersion").and_then(Value::as_str) {
            *self.protocol_version.write() = Some(version.to_string());
        }
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    /// List every tool, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            let page: ToolsPage = serde_json::from_value(result)
                .map_err(|e| McpError::InvalidResponse(e.to_string()))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value, McpError> {
        self.request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    /// End the server-side session. Servers that do not support explicit
    /// termination answer 405, which counts as success.
    pub async fn close(&self) -> Result<(), McpError> {
        let Some(session_id) = self.session_id.write().take() else {
            return Ok(());
        };
        let response = self
            .http
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(HEADER_SESSION_ID, session_id)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::METHOD_NOT_ALLOWED || status.is_success() {
            return Ok(());
        }
        Err(McpError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

fn build_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let Ok(name) = HeaderName::from_str(name) else {
            tracing::warn!("Invalid MCP header name (skipping): {}", name);
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value.trim()) else {
            tracing::warn!("Invalid MCP header value (skipping): {}", name);
            continue;
        };
        map.insert(name, value);
    }
    map
}

/// Extract the `data` payload of each event in an SSE body.
pub fn parse_sse_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !data.is_empty() {
                events.push(data.join("\n"));
                data.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if !data.is_empty() {
        events.push(data.join("\n"));
    }
    events
}

// =============================================================================
// Remote tools
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<RemoteTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// A capability backed by a remote MCP tool.
pub struct McpTool {
    namespace: String,
    tool: RemoteTool,
    session: Arc<McpSession>,
}

#[async_trait]
impl Capability for McpTool {
    fn plugin(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.tool.name
    }

    fn description(&self) -> &str {
        self.tool.description.as_deref().unwrap_or_default()
    }

    fn parameters(&self) -> Value {
        self.tool
            .input_schema
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<Value, ToolError> {
        let result = self
            .session
            .call_tool(&self.tool.name, arguments)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        tool_result_value(&result)
    }
}

/// Turn a `tools/call` result into the value returned to the model.
///
/// Structured content wins when present; otherwise text blocks are joined.
/// A result flagged `isError` becomes an execution failure.
pub fn tool_result_value(result: &Value) -> Result<Value, ToolError> {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(ToolError::Execution(if text.is_empty() {
            "remote tool reported an error".to_string()
        } else {
            text
        }));
    }
    if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        return Ok(structured.clone());
    }
    if !text.is_empty() {
        return Ok(Value::String(text));
    }
    Ok(result.get("content").cloned().unwrap_or(Value::Null))
}

// =============================================================================
// Plugin
// =============================================================================

/// Tool plugin exposing one MCP server. Created per session.
pub struct McpPlugin {
    config: McpServerConfig,
    session: Arc<McpSession>,
}

impl McpPlugin {
    pub fn new(config: McpServerConfig, http: Client) -> Self {
        let session = Arc::new(McpSession::new(http, config.url.clone(), &config.headers));
        Self { config, session }
    }

    async fn handshake(&self) -> Result<Vec<CapabilityRef>, McpError> {
        let info = self.session.initialize().await?;
        let server_info = info.get("serverInfo").cloned().unwrap_or_default();
        tracing::debug!(
            plugin = %self.config.name,
            "MCP server initialized: {}",
            server_info
        );
        let tools = self.session.list_tools().await?;
        Ok(tools
            .into_iter()
            .map(|tool| {
                Arc::new(McpTool {
                    namespace: self.config.name.clone(),
                    tool,
                    session: Arc::clone(&self.session),
                }) as CapabilityRef
            })
            .collect())
    }
}

#[async_trait]
impl ToolPlugin for McpPlugin {
    fn namespace(&self) -> &str {
        &self.config.name
    }

    fn is_mandatory(&self) -> bool {
        self.config.mandatory
    }

    async fn connect(&self) -> Result<Vec<CapabilityRef>, PluginError> {
        match self.handshake().await {
            Ok(capabilities) => Ok(capabilities),
            Err(e) => {
                if let Err(close_err) = self.session.close().await {
                    tracing::debug!("Closing half-open MCP session failed: {}", close_err);
                }
                Err(PluginError::ConnectionFailed {
                    plugin: self.config.name.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<(), PluginError> {
        self.session
            .close()
            .await
            .map_err(|e| PluginError::Protocol(format!("{}: {}", self.config.name, e)))
    }
}
