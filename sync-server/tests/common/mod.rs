//! Shared harness: replicas talking to an in-process peer through its router.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request};
use axum::Router;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use sync_client::{FailureReason, SyncConfig, SyncEngine, Transport, TransportError};
use sync_store::{EntityStore, SourceRegistry, SqliteStore};
use sync_types::{
    ChangeId, ChangedEntry, CheckResponse, EntityKind, EntityRow, ErrorBody, LoginRequest,
    LoginResponse, Note, PushRequest, Timestamp, SESSION_HEADER,
};
use tower::util::ServiceExt;
use treesync_server::{build_router, Config, SyncServer};

pub const SECRET: &str = "document-secret";

/// Transport that calls the peer's router directly.
pub struct RouterTransport {
    router: Mutex<Router>,
    session: Mutex<Option<String>>,
}

impl RouterTransport {
    pub fn new(router: Router) -> Self {
        Self {
            router: Mutex::new(router),
            session: Mutex::new(None),
        }
    }

    async fn call(
        &self,
        label: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Result<Vec<u8>, TransportError> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = self.session.lock().unwrap().clone() {
            builder = builder.header(SESSION_HEADER, token);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let router = self.router.lock().unwrap().clone();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        if status.is_success() {
            return Ok(bytes);
        }
        let (code, message) = match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => (Some(body.code), body.message),
            Err(_) => (None, String::from_utf8_lossy(&bytes).into_owned()),
        };
        Err(TransportError::new(
            label,
            FailureReason::Status {
                status: status.as_u16(),
                code,
                message,
            },
        ))
    }
}

fn decode<T: DeserializeOwned>(label: &str, bytes: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(bytes)
        .map_err(|e| TransportError::new(label, FailureReason::Decode(e.to_string())))
}

#[async_trait]
impl Transport for RouterTransport {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, TransportError> {
        let body = serde_json::to_value(request).unwrap();
        let bytes = self
            .call("POST /sync/login", Method::POST, "/sync/login", Some(body))
            .await?;
        let login: LoginResponse = decode("POST /sync/login", &bytes)?;
        *self.session.lock().unwrap() = Some(login.session_token.clone());
        Ok(login)
    }

    async fn pull_changes(
        &self,
        since: ChangeId,
        limit: u32,
    ) -> Result<Vec<ChangedEntry>, TransportError> {
        let uri = format!("/sync/changed?since={}&limit={}", since.value(), limit);
        let bytes = self
            .call("GET /sync/changed", Method::GET, &uri, None)
            .await?;
        decode("GET /sync/changed", &bytes)
    }

    async fn fetch_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<Value>, TransportError> {
        let uri = format!("/sync/{kind}/{entity_id}");
        match self.call(&uri, Method::GET, &uri, None).await {
            Ok(bytes) => decode(&uri, &bytes),
            Err(TransportError {
                reason: FailureReason::Status { status: 404, .. },
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn push_entity(
        &self,
        kind: EntityKind,
        request: &PushRequest,
    ) -> Result<(), TransportError> {
        let uri = format!("/sync/{kind}");
        let body = serde_json::to_value(request).unwrap();
        self.call(&uri, Method::PUT, &uri, Some(body)).await?;
        Ok(())
    }

    async fn check(&self) -> Result<CheckResponse, TransportError> {
        let bytes = self
            .call("GET /sync/check", Method::GET, "/sync/check", None)
            .await?;
        decode("GET /sync/check", &bytes)
    }
}

/// The shared peer.
pub struct Peer {
    pub store: Arc<SqliteStore>,
    pub sources: SourceRegistry,
    pub server: Arc<SyncServer>,
    pub router: Router,
}

impl Peer {
    pub async fn start() -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let dyn_store: Arc<dyn EntityStore> = store.clone();
        let sources = SourceRegistry::open(store.as_ref()).await.unwrap();
        let server = Arc::new(SyncServer::new(
            Config::with_secret(SECRET),
            dyn_store,
            sources.clone(),
        ));
        let router = build_router(Arc::clone(&server));
        Self {
            store,
            sources,
            server,
            router,
        }
    }
}

/// One replica syncing with the peer.
pub struct Replica {
    pub store: Arc<SqliteStore>,
    pub sources: SourceRegistry,
    pub engine: SyncEngine<RouterTransport>,
}

impl Replica {
    pub async fn new(peer: &Peer) -> Self {
        Self::with_secret(peer, SECRET).await
    }

    pub async fn with_secret(peer: &Peer, secret: &str) -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let sources = SourceRegistry::open(store.as_ref()).await.unwrap();
        let dyn_store: Arc<dyn EntityStore> = store.clone();
        let engine = SyncEngine::new(
            dyn_store,
            sources.clone(),
            RouterTransport::new(peer.router.clone()),
            SyncConfig::new("http://peer.invalid", secret),
        );
        Self {
            store,
            sources,
            engine,
        }
    }

    /// Engine over the same store with different settings.
    pub fn engine_with(&self, peer: &Peer, config: SyncConfig) -> SyncEngine<RouterTransport> {
        let dyn_store: Arc<dyn EntityStore> = self.store.clone();
        SyncEngine::new(
            dyn_store,
            self.sources.clone(),
            RouterTransport::new(peer.router.clone()),
            config,
        )
    }

    pub async fn edit_note(&self, id: &str, title: &str, modified: i64) {
        self.store
            .save(&note(id, title, modified), self.sources.current_origin_id())
            .await
            .unwrap();
    }

    pub async fn title(&self, id: &str) -> Option<String> {
        title_in(self.store.as_ref(), id).await
    }
}

pub fn note(id: &str, title: &str, modified: i64) -> EntityRow {
    EntityRow::Note(Note {
        note_id: id.into(),
        title: title.into(),
        note_type: "text".into(),
        mime: "text/html".into(),
        blob_id: None,
        is_protected: false,
        is_deleted: false,
        utc_date_modified: Timestamp::from_millis(modified),
    })
}

pub async fn title_in(store: &SqliteStore, id: &str) -> Option<String> {
    match store.get(EntityKind::Note, id).await.unwrap() {
        Some(EntityRow::Note(note)) => Some(note.title),
        _ => None,
    }
}
