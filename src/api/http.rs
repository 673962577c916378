//! HTTP API Server
//!
//! REST API for entity reads and writes plus a health check.

use std::sync::Arc;
use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::entity::{ETag, Entity, Properties};
use crate::error::{Error, Result};
use crate::quorum::WriteKind;
use crate::table::QuorumTable;

/// Seconds a client should wait before retrying after a quorum error
const RETRY_AFTER_SECS: u64 = 1;

/// Shared application state
pub struct AppState {
    /// Table served by this node
    pub table: QuorumTable,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, table: QuorumTable) -> Self {
        Self {
            config,
            state: Arc::new(AppState { table }),
        }
    }

    /// Create the router
    pub fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route(
                "/entities/:partition_key/:row_key",
                get(handle_get)
                    .post(handle_post)
                    .put(handle_put)
                    .patch(handle_patch)
                    .delete(handle_delete),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server and run until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Entity write request
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EntityRequest {
    #[serde(default)]
    pub properties: Properties,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub replicas: Vec<String>,
    pub quorum: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        replicas: state.table.replica_names(),
        quorum: state.table.quorum(),
    })
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path((partition_key, row_key)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.table.retrieve(&partition_key, &row_key).await {
        Ok(Some(entity)) => entity_response(StatusCode::OK, entity),
        Ok(None) => error_response(&Error::NotFound),
        Err(e) => error_response(&e),
    }
}

async fn handle_post(
    State(state): State<Arc<AppState>>,
    Path((partition_key, row_key)): Path<(String, String)>,
    Json(req): Json<EntityRequest>,
) -> impl IntoResponse {
    let entity = build_entity(partition_key, row_key, None, req.properties);
    write_entity(&state, WriteKind::Insert, entity, StatusCode::CREATED).await
}

async fn handle_put(
    State(state): State<Arc<AppState>>,
    Path((partition_key, row_key)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<EntityRequest>,
) -> impl IntoResponse {
    let etag = match if_match(&headers) {
        Ok(etag) => etag,
        Err(e) => return error_response(&e),
    };
    let kind = match etag {
        Some(_) => WriteKind::Replace,
        None => WriteKind::InsertOrReplace,
    };

    let entity = build_entity(partition_key, row_key, etag, req.properties);
    write_entity(&state, kind, entity, StatusCode::OK).await
}

async fn handle_patch(
    State(state): State<Arc<AppState>>,
    Path((partition_key, row_key)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<EntityRequest>,
) -> impl IntoResponse {
    let etag = match if_match(&headers) {
        Ok(etag) => etag,
        Err(e) => return error_response(&e),
    };
    let kind = match etag {
        Some(_) => WriteKind::Merge,
        None => WriteKind::InsertOrMerge,
    };

    let entity = build_entity(partition_key, row_key, etag, req.properties);
    write_entity(&state, kind, entity, StatusCode::OK).await
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Path((partition_key, row_key)): Path<(String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let etag = match if_match(&headers) {
        Ok(etag) => etag,
        Err(e) => return error_response(&e),
    };

    // Without If-Match the table answers ETagMismatch or NotFound
    let entity = build_entity(partition_key, row_key, etag, Properties::new());
    write_entity(&state, WriteKind::Delete, entity, StatusCode::OK).await
}

// ============ Helpers ============

fn build_entity(
    partition_key: String,
    row_key: String,
    etag: Option<ETag>,
    properties: Properties,
) -> Entity {
    Entity {
        partition_key,
        row_key,
        etag,
        properties,
    }
}

async fn write_entity(
    state: &AppState,
    kind: WriteKind,
    entity: Entity,
    status: StatusCode,
) -> Response {
    match state.table.write(kind, entity).await {
        Ok(written) => entity_response(status, written),
        Err(e) => {
            tracing::debug!("{} failed: {}", kind, e);
            error_response(&e)
        }
    }
}

/// Parse the `If-Match` header, accepting quoted and bare tokens
fn if_match(headers: &HeaderMap) -> Result<Option<ETag>> {
    let Some(value) = headers.get(header::IF_MATCH) else {
        return Ok(None);
    };

    let raw = value
        .to_str()
        .map_err(|_| Error::InvalidETag(String::from_utf8_lossy(value.as_bytes()).into_owned()))?;
    raw.trim().trim_matches('"').parse::<ETag>().map(Some)
}

fn entity_response(status: StatusCode, entity: Entity) -> Response {
    let etag = entity
        .etag
        .and_then(|tag| HeaderValue::from_str(&format!("\"{}\"", tag)).ok());

    let mut response = (status, Json(entity)).into_response();
    if let Some(etag) = etag {
        response.headers_mut().insert(header::ETAG, etag);
    }
    response
}

fn error_response(error: &Error) -> Response {
    let (status, code) = match error {
        Error::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::AlreadyExists => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
        Error::ETagMismatch => (StatusCode::PRECONDITION_FAILED, "ETAG_MISMATCH"),
        Error::InvalidETag(_) => (StatusCode::BAD_REQUEST, "INVALID_ETAG"),
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        Error::QuorumFailure(_) => (StatusCode::SERVICE_UNAVAILABLE, "QUORUM_FAILURE"),
        Error::NoQuorumConsensus => (StatusCode::SERVICE_UNAVAILABLE, "NO_QUORUM_CONSENSUS"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };

    let body = Json(ErrorResponse {
        error: error.to_string(),
        code: code.to_string(),
    });

    if error.is_retryable() {
        tracing::warn!("Request failed on quorum: {}", error);
        (
            status,
            [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())],
            body,
        )
            .into_response()
    } else {
        (status, body).into_response()
    }
}
