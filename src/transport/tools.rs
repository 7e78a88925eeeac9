//! JSON-RPC tool server
//!
//! Exposes the relay as a small set of tools for an agent host that speaks
//! JSON-RPC 2.0. One server instance serves one session: the first tool call
//! registers an identity for it, binds the session and announces the join on
//! the public channel. Every later call refreshes that identity's heartbeat.
//!
//! Relay failures come back as tool results flagged `isError`, so the host
//! shows them to the agent instead of treating them as protocol faults.

use crate::directory::AgentRecord;
use crate::polling::{Direction, PollResult, PolledMessage};
use crate::relay::Relay;
use crate::{RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

/// Session id used when the host does not provide one
pub const DEFAULT_SESSION_ID: &str = "default-session";

/// JSON-RPC request; a missing `id` marks a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Tool definition as listed by `tools/list`
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "status",
            description: "Show or set this session's identity on the relay. \
                          Pass description to update what you are working on.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_name": {
                        "type": "string",
                        "description": "Identity to register on first use; fixed afterwards"
                    },
                    "description": {
                        "type": "string",
                        "description": "Current focus, a few words"
                    }
                }
            }),
        },
        ToolDefinition {
            name: "send",
            description: "Send a short message to every agent, or to one agent when `to` is set.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" },
                    "to": { "type": "string", "description": "Recipient agent id for a DM" },
                    "thread_id": { "type": "string" }
                },
                "required": ["message"]
            }),
        },
        ToolDefinition {
            name: "poll",
            description: "Fetch public messages and DMs that arrived since the last poll.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "lookback_minutes": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Look back N minutes instead of using the cursor"
                    },
                    "limit": { "type": "integer", "minimum": 1 }
                }
            }),
        },
        ToolDefinition {
            name: "agents",
            description: "List agents that are currently active.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "whois",
            description: "Show the record of one agent, or of every active agent.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "agent_id": { "type": "string" }
                }
            }),
        },
    ]
}

#[derive(Debug, Default, Deserialize)]
struct StatusArgs {
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    message: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PollArgs {
    #[serde(default)]
    lookback_minutes: u32,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct WhoisArgs {
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn parse_args<T: serde::de::DeserializeOwned + Default>(arguments: Value) -> Result<T> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(arguments)
        .map_err(|e| RelayError::validation(format!("invalid arguments: {}", e)))
}

/// Tool server bound to one session
pub struct ToolServer {
    relay: Arc<Relay>,
    session_id: String,
    default_description: String,
}

impl ToolServer {
    pub fn new(relay: Arc<Relay>, session_id: impl Into<String>) -> Self {
        let max_chars = relay.limits().context_summary_max_chars;
        Self {
            relay,
            session_id: session_id.into(),
            default_description: derived_description(max_chars),
        }
    }

    /// Override the description used for auto-registration
    pub fn with_default_description(mut self, description: impl Into<String>) -> Self {
        self.default_description = description.into();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Handle one request; notifications yield no response
    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        };
        let id = Some(id);

        let response = match request.method.as_str() {
            "initialize" => RpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "hive",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            ),
            "tools/list" => RpcResponse::success(id, json!({ "tools": tool_definitions() })),
            "tools/call" => match serde_json::from_value::<CallParams>(request.params) {
                Ok(params) => match self.call_tool(&params.name, params.arguments).await {
                    Some(result) => RpcResponse::success(id, result),
                    None => RpcResponse::failure(
                        id,
                        INVALID_PARAMS,
                        format!("Unknown tool: {}", params.name),
                    ),
                },
                Err(e) => RpcResponse::failure(id, INVALID_PARAMS, format!("Invalid params: {}", e)),
            },
            "ping" => RpcResponse::success(id, json!({})),
            other => RpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
        };
        Some(response)
    }

    /// Run a tool and wrap the outcome as a tool result; `None` for unknown tools
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Option<Value> {
        let outcome = match name {
            "status" => self.status(arguments).await,
            "send" => self.send(arguments).await,
            "poll" => self.poll(arguments).await,
            "agents" => self.agents().await,
            "whois" => self.whois(arguments).await,
            _ => return None,
        };

        Some(match outcome {
            Ok(text) => tool_result(text, false),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "Tool call failed");
                tool_result(format!("ERROR [{}]: {}", e.kind(), e), true)
            }
        })
    }

    /// Agent bound to this session, registering and announcing one if needed
    ///
    /// Returns the agent id and whether it was registered by this call.
    async fn identity(&self, requested: Option<&str>, description: Option<&str>) -> Result<(String, bool)> {
        if let Some(session) = self.relay.session(&self.session_id).await {
            match self.relay.heartbeat(&session.agent_id).await {
                Ok(_) => return Ok((session.agent_id, false)),
                Err(RelayError::NotFound(_)) => {
                    tracing::warn!(
                        agent_id = %session.agent_id,
                        "Session agent was purged, registering again"
                    );
                    self.relay.unbind_session(&self.session_id).await;
                }
                Err(e) => return Err(e),
            }
        }

        let summary = description.unwrap_or(&self.default_description);
        let record = match requested {
            Some(name) => self.relay.register_named(name.trim(), summary).await?,
            None => self.relay.register(summary).await?,
        };
        self.relay
            .bind_session(&self.session_id, &record.agent_id)
            .await?;
        self.relay.announce_join(&record).await?;

        tracing::info!(
            agent_id = %record.agent_id,
            session_id = %self.session_id,
            "Session registered"
        );
        Ok((record.agent_id, true))
    }

    async fn status(&self, arguments: Value) -> Result<String> {
        let args: StatusArgs = parse_args(arguments)?;
        let requested = args.agent_name.as_deref().filter(|s| !s.trim().is_empty());
        let description = args.description.as_deref().filter(|s| !s.trim().is_empty());

        let (agent_id, registered) = self.identity(requested, description).await?;

        if let Some(name) = requested {
            if name.trim() != agent_id {
                return Err(RelayError::validation(format!(
                    "agent name is fixed for this session, keep using '{}'",
                    agent_id
                )));
            }
        }

        let mut record = self.relay.whois(&agent_id).await?;
        if let Some(description) = description {
            if !registered && description.trim() != record.context_summary {
                self.relay.update_context(&agent_id, description).await?;
                record = self.relay.whois(&agent_id).await?;
            }
        }

        let mut lines = Vec::new();
        if registered {
            lines.push(format!("Connected to the relay as: {}", agent_id));
            lines.push("Join announcement broadcast to all agents".to_string());
        } else {
            lines.push(format!("Connected as: {}", agent_id));
        }
        lines.push(format!("Description: {}", record.context_summary));
        lines.push(format!("Liveness: {}", self.relay.liveness_of(&record)));
        if let Some(session) = self.relay.session(&self.session_id).await {
            lines.push(format!("Last poll: {}", session.last_poll.to_rfc3339()));
        }
        Ok(lines.join("\n"))
    }

    async fn send(&self, arguments: Value) -> Result<String> {
        let args: SendArgs = serde_json::from_value(arguments)
            .map_err(|e| RelayError::validation(format!("invalid arguments: {}", e)))?;
        let (agent_id, _) = self.identity(None, None).await?;

        let to = args.to.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match to {
            Some(to) => {
                let message = self
                    .relay
                    .send_dm(&agent_id, to, &args.message, args.thread_id)
                    .await?;
                Ok(format!("DM {} sent to {}", message.message_id, to))
            }
            None => {
                let message = self
                    .relay
                    .send_public(&agent_id, &args.message, args.thread_id)
                    .await?;
                Ok(format!("Message {} broadcast to all agents", message.message_id))
            }
        }
    }

    async fn poll(&self, arguments: Value) -> Result<String> {
        let args: PollArgs = parse_args(arguments)?;
        let (agent_id, _) = self.identity(None, None).await?;

        let request = self.relay.poll_request(args.lookback_minutes, args.limit);
        let result = self.relay.poll(&self.session_id, request).await?;

        let mut peers = self.relay.whois_all().await?;
        peers.retain(|record| record.agent_id != agent_id);
        peers.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(format_poll(&agent_id, &result, &peers))
    }

    async fn agents(&self) -> Result<String> {
        let (agent_id, _) = self.identity(None, None).await?;
        let records = self.relay.whois_all().await?;

        let mut lines = vec![format!("Active agents ({}):", records.len())];
        for record in &records {
            let marker = if record.agent_id == agent_id { " (you)" } else { "" };
            lines.push(format!(
                "  - {}{}: {}",
                record.agent_id, marker, record.context_summary
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn whois(&self, arguments: Value) -> Result<String> {
        let args: WhoisArgs = parse_args(arguments)?;
        self.identity(None, None).await?;

        let records = match args.agent_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => vec![self.relay.whois(id).await?],
            _ => self.relay.whois_all().await?,
        };
        Ok(records
            .iter()
            .map(|record| self.describe(record))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn describe(&self, record: &AgentRecord) -> String {
        let mut lines = vec![
            record.agent_id.clone(),
            format!("  context: {}", record.context_summary),
            format!("  status: {}", record.status),
            format!("  liveness: {}", self.relay.liveness_of(record)),
            format!("  registered: {}", record.registered_at.to_rfc3339()),
            format!("  last heartbeat: {}", record.last_heartbeat.to_rfc3339()),
        ];
        if let Some(endpoint) = &record.endpoint {
            lines.push(format!("  endpoint: {}", endpoint));
        }
        lines.join("\n")
    }
}

fn tool_result(text: String, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

/// Other active agents shown under a poll
const MAX_LISTED_PEERS: usize = 10;

fn format_message(message: &PolledMessage) -> String {
    let time = message.message.timestamp.format("%H:%M:%S");
    let m = &message.message;
    match message.direction {
        None => format!("[{}] [{}] {}", time, m.from_agent, m.content),
        Some(Direction::Sent) => format!(
            "[{}] [DM to {}] {}",
            time,
            m.to_agent.as_deref().unwrap_or("?"),
            m.content
        ),
        Some(Direction::Received) => format!("[{}] [DM from {}] {}", time, m.from_agent, m.content),
    }
}

fn format_poll(agent_id: &str, result: &PollResult, peers: &[AgentRecord]) -> String {
    let mut lines = Vec::new();

    let from_others = result
        .messages
        .iter()
        .filter(|m| m.message.from_agent != agent_id)
        .count();
    if result.messages.is_empty() {
        lines.push("No new messages".to_string());
    } else {
        lines.push(format!(
            "Received {} message(s), {} from other agents:",
            result.messages.len(),
            from_others
        ));
        lines.extend(result.messages.iter().map(format_message));
    }

    lines.push(String::new());
    if result.lookback_applied {
        lines.push(format!("Looking back to {}", result.since.to_rfc3339()));
    }
    lines.push(format!(
        "Total available: {} public, {} DMs | Showing: {}{}",
        result.total_public,
        result.total_dm,
        result.messages.len(),
        if result.has_more { " (more available)" } else { "" }
    ));

    if !peers.is_empty() {
        lines.push(String::new());
        lines.push(format!("Active agents on network ({}):", peers.len()));
        for record in peers.iter().take(MAX_LISTED_PEERS) {
            lines.push(format!("  - {}: {}", record.agent_id, record.context_summary));
        }
    }
    lines.join("\n")
}

/// Session id for a host that does not provide one: `{hostname}-{pid}`
pub fn default_session_id() -> String {
    match hostname::get() {
        Ok(host) => format!("{}-{}", host.to_string_lossy(), std::process::id()),
        Err(e) => {
            tracing::debug!(error = %e, "Hostname unavailable");
            DEFAULT_SESSION_ID.to_string()
        }
    }
}

/// Description used when an agent registers without giving one
pub fn derived_description(max_chars: usize) -> String {
    let cwd = std::env::current_dir()
        .ok()
        .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string());
    truncate_chars(
        &format!("AI agent working in '{}' on {}", cwd, std::env::consts::OS),
        max_chars,
    )
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}
