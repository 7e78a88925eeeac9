//! HTTP server for the relay
//!
//! Provides a REST API over the relay facade. Every route maps onto one
//! facade operation; relay errors become JSON bodies with a status code
//! picked from the error kind.
//!
//! # Routes
//!
//! - `POST /api/v1/agents/register` - Register with a generated name
//! - `POST /api/v1/agents/{agent_id}/heartbeat` - Refresh liveness
//! - `PUT /api/v1/agents/{agent_id}/context` - Replace the context summary
//! - `GET /api/v1/agents` - Ids of active agents
//! - `GET /api/v1/agents/whois` - Records of active agents
//! - `GET /api/v1/agents/{agent_id}` - One record
//! - `POST /api/v1/messages/public?from_agent=` - Broadcast
//! - `POST /api/v1/messages/dm?from_agent=&to_agent=` - Direct message
//! - `GET /api/v1/messages/public?since_timestamp=&limit=` - Read public
//! - `GET /api/v1/messages/dm/{agent_id}?other_agent_id=&since_timestamp=&limit=` - Read DMs
//! - `GET /api/v1/health`, `GET /health` - Health report
//! - `GET /` - Service info

use crate::channels::Message;
use crate::directory::{AgentRecord, Liveness};
use crate::relay::Relay;
use crate::RelayError;
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

/// Request bodies above this size are rejected before parsing
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind error: {0}")]
    Bind(String),
}

/// Shared server state
struct AppState {
    relay: Arc<Relay>,
}

/// HTTP server for the relay
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self {
            state: Arc::new(AppState { relay }),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Self::build_router(self.state.clone())
    }

    fn build_router(state: Arc<AppState>) -> Router {
        let api = Router::new()
            .route("/agents/register", post(register_agent))
            .route("/agents", get(list_agents))
            .route("/agents/whois", get(whois_all))
            .route("/agents/{agent_id}", get(get_agent))
            .route("/agents/{agent_id}/heartbeat", post(heartbeat))
            .route("/agents/{agent_id}/context", put(update_context))
            .route(
                "/messages/public",
                post(send_public_message).get(get_public_messages),
            )
            .route("/messages/dm", post(send_direct_message))
            .route("/messages/dm/{agent_id}", get(get_direct_messages))
            .route("/health", get(health));

        Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .nest("/api/v1", api)
            .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE))
            .with_state(state)
    }

    /// Run the server on the given address until the process ends
    pub async fn run(self, addr: &str) -> Result<(), ServerError> {
        self.run_until(addr, std::future::pending()).await
    }

    /// Run until `shutdown` resolves, then drain in-flight requests
    pub async fn run_until<F>(self, addr: &str, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{}: {}", addr, e)))?;

        tracing::info!(addr = addr, "Relay HTTP server listening");

        axum::serve(listener, Self::build_router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ServerError::Io)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub context_summary: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub agent_id: String,
    pub status: &'static str,
    pub context_submitted: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContextRequest {
    pub context_summary: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateContextResponse {
    pub agent_id: String,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for SendMessageResponse {
    fn from(message: Message) -> Self {
        Self {
            message_id: message.message_id.to_string(),
            status: "sent",
            timestamp: message.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PollMessagesResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<String>,
    pub count: usize,
}

/// Agent record plus its derived liveness
#[derive(Debug, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub record: AgentRecord,
    pub liveness: Liveness,
}

#[derive(Debug, Serialize)]
pub struct WhoisResponse {
    pub agents: Vec<AgentView>,
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    #[serde(default)]
    pub include_stale: bool,
}

#[derive(Debug, Deserialize)]
pub struct PublicSendQuery {
    pub from_agent: String,
}

#[derive(Debug, Deserialize)]
pub struct DirectSendQuery {
    pub from_agent: String,
    pub to_agent: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub since_timestamp: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub other_agent_id: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: RelayError) -> ApiError {
    let status = match &e {
        RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RelayError::AlreadyExists(_) => StatusCode::CONFLICT,
        RelayError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
        RelayError::StorageUnavailable(_) | RelayError::ExhaustedAttempts { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %e, kind = e.kind(), "Request failed");
    } else {
        tracing::debug!(error = %e, kind = e.kind(), "Request rejected");
    }

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            kind: e.kind(),
        }),
    )
}

/// Parse an ISO-8601 timestamp; offset-less values are taken as UTC
pub fn parse_timestamp(raw: &str) -> crate::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| RelayError::validation(format!("Invalid timestamp format: {}", raw)))
}

fn parse_since(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.filter(|s| !s.trim().is_empty())
        .map(parse_timestamp)
        .transpose()
        .map_err(api_error)
}

/// `Query` whose rejections use the `{error, kind}` body
#[derive(Debug)]
struct ApiQuery<T>(T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ApiQuery(value))
            .map_err(|rejection| api_error(RelayError::validation(rejection.body_text())))
    }
}

/// `Json` body whose rejections use the `{error, kind}` body
#[derive(Debug)]
struct ApiJson<T>(T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| ApiJson(value))
            .map_err(|rejection| api_error(RelayError::validation(rejection.body_text())))
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "hive-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "api": "/api/v1",
        "status": "running",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.relay.health().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .relay
        .register_with_endpoint(&req.context_summary, req.endpoint)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            agent_id: record.agent_id,
            status: "registered",
            context_submitted: record.context_summary,
        }),
    ))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.relay.heartbeat(&agent_id).await.map_err(api_error)?;
    Ok(Json(serde_json::json!({ "status": "ok", "agent_id": agent_id })))
}

async fn update_context(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    ApiJson(req): ApiJson<UpdateContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let timestamp = state
        .relay
        .update_context(&agent_id, &req.context_summary)
        .await
        .map_err(api_error)?;

    Ok(Json(UpdateContextResponse {
        agent_id,
        status: "updated",
        timestamp,
    }))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ListAgentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let agents = state
        .relay
        .list_agents(query.include_stale)
        .await
        .map_err(api_error)?;
    let count = agents.len();
    Ok(Json(ListAgentsResponse { agents, count }))
}

async fn whois_all(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let records = state.relay.whois_all().await.map_err(api_error)?;
    let agents = records
        .into_iter()
        .map(|record| AgentView {
            liveness: state.relay.liveness_of(&record),
            record,
        })
        .collect();
    Ok(Json(WhoisResponse { agents }))
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.relay.whois(&agent_id).await.map_err(api_error)?;
    Ok(Json(AgentView {
        liveness: state.relay.liveness_of(&record),
        record,
    }))
}

async fn send_public_message(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<PublicSendQuery>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .relay
        .send_public(&query.from_agent, &req.content, req.thread_id)
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(SendMessageResponse::from(message))))
}

async fn send_direct_message(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<DirectSendQuery>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .relay
        .send_dm(&query.from_agent, &query.to_agent, &req.content, req.thread_id)
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(SendMessageResponse::from(message))))
}

async fn get_public_messages(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<ReadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let since = parse_since(query.since_timestamp.as_deref())?;
    let page = state
        .relay
        .read_public(since, query.limit)
        .await
        .map_err(api_error)?;

    Ok(Json(PollMessagesResponse {
        messages: page.messages,
        has_more: page.has_more,
    }))
}

async fn get_direct_messages(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    ApiQuery(query): ApiQuery<ReadQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let since = parse_since(query.since_timestamp.as_deref())?;
    let page = state
        .relay
        .read_dm(&agent_id, query.other_agent_id.as_deref(), since, query.limit)
        .await
        .map_err(api_error)?;

    Ok(Json(PollMessagesResponse {
        messages: page.messages,
        has_more: page.has_more,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn create_test_server() -> (RelayServer, Arc<Relay>) {
        let relay = Arc::new(Relay::in_memory().unwrap());
        (RelayServer::new(relay.clone()), relay)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (server, _) = create_test_server();

        let (status, json) = send(server.router(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");

        let (status, _) = send(server.router(), get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_and_get_agent() {
        let (server, _) = create_test_server();

        let (status, json) = send(
            server.router(),
            json_request(
                "POST",
                "/api/v1/agents/register",
                serde_json::json!({ "context_summary": "writing docs" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "registered");
        assert_eq!(json["context_submitted"], "writing docs");
        let agent_id = json["agent_id"].as_str().unwrap().to_string();

        let (status, json) = send(server.router(), get(&format!("/api/v1/agents/{agent_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["agent_id"], agent_id.as_str());
        assert_eq!(json["liveness"], "active");
    }

    #[tokio::test]
    async fn test_unknown_agent_is_404() {
        let (server, _) = create_test_server();

        let (status, json) = send(
            server.router(),
            json_request("POST", "/api/v1/agents/ghost/heartbeat", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["kind"], "not_found");

        let (status, _) = send(server.router(), get("/api/v1/agents/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_send_and_read_public() {
        let (server, relay) = create_test_server();
        relay.register_named("fox", "x").await.unwrap();

        let (status, json) = send(
            server.router(),
            json_request(
                "POST",
                "/api/v1/messages/public?from_agent=fox",
                serde_json::json!({ "content": "hello" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "sent");
        assert!(json["message_id"].as_str().unwrap().starts_with("msg_"));

        let (status, json) = send(server.router(), get("/api/v1/messages/public?limit=10")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["messages"][0]["from_agent"], "fox");
        assert_eq!(json["has_more"], false);
    }

    #[tokio::test]
    async fn test_dm_to_unknown_recipient_is_404() {
        let (server, relay) = create_test_server();
        relay.register_named("fox", "x").await.unwrap();

        let (status, _) = send(
            server.router(),
            json_request(
                "POST",
                "/api/v1/messages/dm?from_agent=fox&to_agent=ghost",
                serde_json::json!({ "content": "hi" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_read_dm_with_peer() {
        let (server, relay) = create_test_server();
        relay.register_named("fox", "x").await.unwrap();
        relay.register_named("owl", "x").await.unwrap();
        relay.send_dm("fox", "owl", "hi owl", None).await.unwrap();

        let (status, json) = send(
            server.router(),
            get("/api/v1/messages/dm/owl?other_agent_id=fox"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["messages"][0]["content"], "hi owl");
        assert_eq!(json["messages"][0]["channel"], "dm");
    }

    #[tokio::test]
    async fn test_bad_timestamp_and_limit_are_400() {
        let (server, _) = create_test_server();

        let (status, json) = send(
            server.router(),
            get("/api/v1/messages/public?since_timestamp=yesterday"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_failed");

        let (status, _) = send(server.router(), get("/api/v1/messages/public?limit=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_query_and_body_are_json_400() {
        let (server, relay) = create_test_server();
        relay.register_named("fox", "x").await.unwrap();

        let (status, json) = send(server.router(), get("/api/v1/messages/public?limit=-1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_failed");
        assert!(json["error"].as_str().unwrap().contains("limit"));

        let (status, json) = send(
            server.router(),
            json_request(
                "POST",
                "/api/v1/messages/public?from_agent=fox",
                serde_json::json!({ "thread_id": "t1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_failed");

        let (status, json) = send(
            server.router(),
            json_request(
                "POST",
                "/api/v1/messages/public",
                serde_json::json!({ "content": "hi" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_failed");
    }

    #[tokio::test]
    async fn test_context_update_too_long_is_400() {
        let (server, relay) = create_test_server();
        relay.register_named("fox", "x").await.unwrap();

        let (status, _) = send(
            server.router(),
            json_request(
                "PUT",
                "/api/v1/agents/fox/context",
                serde_json::json!({ "context_summary": "x".repeat(300) }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_whois() {
        let (server, relay) = create_test_server();
        relay.register_named("fox", "x").await.unwrap();

        let (_, json) = send(server.router(), get("/api/v1/agents")).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["agents"][0], "fox");

        let (_, json) = send(server.router(), get("/api/v1/agents/whois")).await;
        assert_eq!(json["agents"][0]["agent_id"], "fox");
        assert_eq!(json["agents"][0]["status"], "active");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let utc = parse_timestamp("2024-05-01T12:00:00Z").unwrap();
        let offset = parse_timestamp("2024-05-01T14:00:00+02:00").unwrap();
        let naive = parse_timestamp("2024-05-01T12:00:00").unwrap();
        let fractional = parse_timestamp("2024-05-01T12:00:00.250").unwrap();
        assert_eq!(utc, offset);
        assert_eq!(utc, naive);
        assert!(fractional > utc);
        assert!(parse_timestamp("May 1st").is_err());
    }
}
