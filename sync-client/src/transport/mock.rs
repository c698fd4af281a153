//! Mock transport for testing.
//!
//! Plays a scripted peer: a changed feed, entity values and hashes are set
//! up front, pushes and logins are captured for verification, and any
//! operation can be made to fail once.

use super::{FailureReason, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use sync_types::{
    ChangeId, ChangedEntry, CheckResponse, EntityKind, LoginRequest, LoginResponse, OriginId,
    PushRequest,
};

/// Mock transport for testing.
#[derive(Debug)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug)]
struct MockTransportInner {
    login_response: LoginResponse,
    changes: Vec<ChangedEntry>,
    entities: HashMap<(EntityKind, String), Value>,
    hashes: BTreeMap<EntityKind, String>,
    logins: Vec<LoginRequest>,
    pushed: Vec<(EntityKind, PushRequest)>,
    pull_requests: Vec<ChangeId>,
    proxy_toggles: u32,
    fail_next_login: Option<FailureReason>,
    fail_next_pull: Option<FailureReason>,
    fail_next_fetch: Option<FailureReason>,
    fail_next_push: Option<FailureReason>,
    fail_next_check: Option<FailureReason>,
}

impl MockTransport {
    /// A peer whose origin is `peer_origin`, with an empty changelog.
    pub fn new(peer_origin: OriginId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner {
                login_response: LoginResponse {
                    origin_id: peer_origin,
                    max_change_id: ChangeId::zero(),
                    session_token: "mock-session".into(),
                },
                changes: Vec::new(),
                entities: HashMap::new(),
                hashes: BTreeMap::new(),
                logins: Vec::new(),
                pushed: Vec::new(),
                pull_requests: Vec::new(),
                proxy_toggles: 0,
                fail_next_login: None,
                fail_next_pull: None,
                fail_next_fetch: None,
                fail_next_push: None,
                fail_next_check: None,
            })),
        }
    }

    /// Append an entry to the peer's changed feed, with its current value.
    ///
    /// `value` of `None` makes the entity unfetchable.
    pub fn add_change(&self, entry: ChangedEntry, value: Option<Value>) {
        let mut inner = self.inner.lock().unwrap();
        let key = (entry.entity_kind, entry.entity_id.clone());
        match value {
            Some(value) => {
                inner.entities.insert(key, value);
            }
            None => {
                inner.entities.remove(&key);
            }
        }
        inner.login_response.max_change_id = inner.login_response.max_change_id.max(entry.id);
        inner.changes.push(entry);
    }

    /// Set the hashes returned by `check()`.
    pub fn set_hashes(&self, hashes: BTreeMap<EntityKind, String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.hashes = hashes;
    }

    /// Override the `maxChangeId` reported at login and by `check()`.
    pub fn set_max_change_id(&self, id: ChangeId) {
        let mut inner = self.inner.lock().unwrap();
        inner.login_response.max_change_id = id;
    }

    /// Every login request received.
    pub fn logins(&self) -> Vec<LoginRequest> {
        let inner = self.inner.lock().unwrap();
        inner.logins.clone()
    }

    /// Every entity pushed, in order.
    pub fn pushed(&self) -> Vec<(EntityKind, PushRequest)> {
        let inner = self.inner.lock().unwrap();
        inner.pushed.clone()
    }

    /// The `since` cursor of every changed-feed request.
    pub fn pull_requests(&self) -> Vec<ChangeId> {
        let inner = self.inner.lock().unwrap();
        inner.pull_requests.clone()
    }

    /// How often the proxy was toggled.
    pub fn proxy_toggles(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.proxy_toggles
    }

    /// Cause the next login() to fail.
    pub fn fail_next_login(&self, reason: FailureReason) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_login = Some(reason);
    }

    /// Cause the next pull_changes() to fail.
    pub fn fail_next_pull(&self, reason: FailureReason) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_pull = Some(reason);
    }

    /// Cause the next fetch_entity() to fail.
    pub fn fail_next_fetch(&self, reason: FailureReason) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_fetch = Some(reason);
    }

    /// Cause the next push_entity() to fail.
    pub fn fail_next_push(&self, reason: FailureReason) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_push = Some(reason);
    }

    /// Cause the next check() to fail.
    pub fn fail_next_check(&self, reason: FailureReason) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_check = Some(reason);
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.logins.push(request.clone());

        if let Some(reason) = inner.fail_next_login.take() {
            return Err(TransportError::new("POST /sync/login", reason));
        }
        Ok(inner.login_response.clone())
    }

    async fn pull_changes(
        &self,
        since: ChangeId,
        limit: u32,
    ) -> Result<Vec<ChangedEntry>, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.pull_requests.push(since);

        if let Some(reason) = inner.fail_next_pull.take() {
            return Err(TransportError::new("GET /sync/changed", reason));
        }

        let mut changes: Vec<ChangedEntry> = inner
            .changes
            .iter()
            .filter(|c| c.id > since)
            .cloned()
            .collect();
        changes.sort_by_key(|c| c.id);
        changes.truncate(limit as usize);
        Ok(changes)
    }

    async fn fetch_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<Value>, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(reason) = inner.fail_next_fetch.take() {
            return Err(TransportError::new(
                format!("GET /sync/{kind}/{entity_id}"),
                reason,
            ));
        }
        Ok(inner.entities.get(&(kind, entity_id.to_string())).cloned())
    }

    async fn push_entity(
        &self,
        kind: EntityKind,
        request: &PushRequest,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(reason) = inner.fail_next_push.take() {
            return Err(TransportError::new(format!("PUT /sync/{kind}"), reason));
        }
        inner.pushed.push((kind, request.clone()));
        Ok(())
    }

    async fn check(&self) -> Result<CheckResponse, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(reason) = inner.fail_next_check.take() {
            return Err(TransportError::new("GET /sync/check", reason));
        }
        Ok(CheckResponse {
            max_change_id: inner.login_response.max_change_id,
            hashes: inner.hashes.clone(),
        })
    }

    fn toggle_proxy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.proxy_toggles += 1;
    }
}
