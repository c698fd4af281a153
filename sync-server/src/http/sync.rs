//! Peer sync API handlers.

use crate::error::ApiError;
use crate::server::SyncServer;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use sync_types::{
    ChangeId, ChangedEntry, CheckResponse, EntityKind, LoginRequest, LoginResponse, PushRequest,
    SESSION_HEADER,
};

/// Query of `GET /sync/changed`.
#[derive(Debug, Deserialize)]
pub struct ChangedQuery {
    /// Return entries after this id.
    #[serde(default)]
    since: u64,
    /// Page size.
    limit: Option<u32>,
}

fn session(server: &SyncServer, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());
    server.authorize(token)
}

fn parse_kind(raw: &str) -> Result<EntityKind, ApiError> {
    Ok(raw.parse::<EntityKind>()?)
}

/// `POST /sync/login`
pub async fn login_handler(
    Extension(server): Extension<Arc<SyncServer>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    Ok(Json(server.login(&request).await?))
}

/// `GET /sync/changed?since=&limit=`
pub async fn changed_handler(
    Extension(server): Extension<Arc<SyncServer>>,
    headers: HeaderMap,
    Query(query): Query<ChangedQuery>,
) -> Result<Json<Vec<ChangedEntry>>, ApiError> {
    session(&server, &headers)?;
    let entries = server
        .changed(ChangeId::new(query.since), query.limit)
        .await?;
    Ok(Json(entries))
}

/// `GET /sync/:kind/:id`
pub async fn entity_handler(
    Extension(server): Extension<Arc<SyncServer>>,
    headers: HeaderMap,
    Path((kind, entity_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    session(&server, &headers)?;
    let kind = parse_kind(&kind)?;
    Ok(Json(server.entity(kind, &entity_id).await?))
}

/// `PUT /sync/:kind`
pub async fn push_handler(
    Extension(server): Extension<Arc<SyncServer>>,
    headers: HeaderMap,
    Path(kind): Path<String>,
    Json(request): Json<PushRequest>,
) -> Result<StatusCode, ApiError> {
    session(&server, &headers)?;
    let kind = parse_kind(&kind)?;
    server.apply_push(kind, request).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /sync/check`
pub async fn check_handler(
    Extension(server): Extension<Arc<SyncServer>>,
    headers: HeaderMap,
) -> Result<Json<CheckResponse>, ApiError> {
    session(&server, &headers)?;
    Ok(Json(server.check().await?))
}
