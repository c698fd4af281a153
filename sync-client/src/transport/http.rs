//! HTTP transport over the peer's JSON sync API.

use super::{FailureReason, Transport, TransportError};
use crate::config::SyncConfig;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use sync_types::{
    ChangeId, ChangedEntry, CheckResponse, EntityKind, ErrorBody, LoginRequest, LoginResponse,
    PushRequest, SESSION_HEADER,
};
use tokio::sync::Mutex;

/// HTTP transport.
///
/// Holds a direct client and, when a proxy is configured, a proxied one.
/// [`Transport::toggle_proxy`] flips between them after a failed run.
pub struct HttpTransport {
    base_url: String,
    direct: Client,
    proxied: Option<Client>,
    use_proxy: AtomicBool,
    session: Mutex<Option<String>>,
}

impl HttpTransport {
    /// Build the clients described by `config`.
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        let identity = match &config.tls_client_cert {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    TransportError::new(
                        "load client certificate",
                        FailureReason::Tls(format!("{}: {e}", path.display())),
                    )
                })?;
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                    TransportError::new("load client certificate", FailureReason::Tls(e.to_string()))
                })?;
                Some(identity)
            }
            None => None,
        };

        let builder = || {
            let mut builder = Client::builder().timeout(config.timeout);
            if let Some(identity) = identity.clone() {
                builder = builder.identity(identity);
            }
            builder
        };

        let direct = builder()
            .no_proxy()
            .build()
            .map_err(|e| TransportError::new("build client", classify(e)))?;

        let proxied = match &config.proxy {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url)
                    .map_err(|e| TransportError::new("configure proxy", classify(e)))?;
                Some(
                    builder()
                        .proxy(proxy)
                        .build()
                        .map_err(|e| TransportError::new("build client", classify(e)))?,
                )
            }
            None => None,
        };

        Ok(Self {
            base_url: config.peer_url.trim_end_matches('/').to_string(),
            use_proxy: AtomicBool::new(proxied.is_some()),
            direct,
            proxied,
            session: Mutex::new(None),
        })
    }

    /// Whether requests currently go through the proxy.
    pub fn is_using_proxy(&self) -> bool {
        self.proxied.is_some() && self.use_proxy.load(Ordering::Relaxed)
    }

    fn client(&self) -> &Client {
        match &self.proxied {
            Some(proxied) if self.use_proxy.load(Ordering::Relaxed) => proxied,
            _ => &self.direct,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/sync/{kind}/{id}` with the id percent-encoded as one path segment.
    fn entity_url(
        &self,
        label: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Url, TransportError> {
        let invalid = || {
            TransportError::new(
                label,
                FailureReason::Other(format!("invalid peer url {}", self.base_url)),
            )
        };
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["sync", kind.as_str(), entity_id]);
        Ok(url)
    }

    async fn with_session(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.lock().await.as_deref() {
            Some(token) => request.header(SESSION_HEADER, token),
            None => request,
        }
    }

    async fn send(&self, label: &str, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = self
            .with_session(request)
            .await
            .send()
            .await
            .map_err(|e| TransportError::new(label, classify(e)))?;
        check_status(label, response).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, TransportError> {
        let label = "POST /sync/login";
        let response = self
            .client()
            .post(self.url("/sync/login"))
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::new(label, classify(e)))?;
        let login: LoginResponse = decode(label, check_status(label, response).await?).await?;

        *self.session.lock().await = Some(login.session_token.clone());
        Ok(login)
    }

    async fn pull_changes(
        &self,
        since: ChangeId,
        limit: u32,
    ) -> Result<Vec<ChangedEntry>, TransportError> {
        let label = "GET /sync/changed";
        let request = self
            .client()
            .get(self.url("/sync/changed"))
            .query(&[("since", since.value()), ("limit", u64::from(limit))]);
        decode(label, self.send(label, request).await?).await
    }

    async fn fetch_entity(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<Value>, TransportError> {
        let label = format!("GET /sync/{kind}/{entity_id}");
        let request = self.client().get(self.entity_url(&label, kind, entity_id)?);
        match self.send(&label, request).await {
            Ok(response) => decode(&label, response).await,
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
        let label = format!("PUT /sync/{kind}");
        let builder = self
            .client()
            .put(self.url(&format!("/sync/{kind}")))
            .json(request);
        self.send(&label, builder).await?;
        Ok(())
    }

    async fn check(&self) -> Result<CheckResponse, TransportError> {
        let label = "GET /sync/check";
        let request = self.client().get(self.url("/sync/check"));
        decode(label, self.send(label, request).await?).await
    }

    fn toggle_proxy(&self) {
        if self.proxied.is_some() {
            let was = self.use_proxy.fetch_xor(true, Ordering::Relaxed);
            tracing::info!(
                "Switching sync requests {} proxy",
                if was { "off" } else { "onto" }
            );
        }
    }
}

async fn check_status(label: &str, response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (Some(body.code), body.message),
        Err(_) if text.is_empty() => (
            None,
            status.canonical_reason().unwrap_or("no reason").to_string(),
        ),
        Err(_) => (None, text),
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

async fn decode<T: DeserializeOwned>(label: &str, response: Response) -> Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|e| TransportError::new(label, FailureReason::Decode(e.to_string())))
}

fn classify(err: reqwest::Error) -> FailureReason {
    let detail = error_chain(&err);
    if err.is_timeout() {
        FailureReason::Timeout
    } else if err.is_connect() {
        let lower = detail.to_ascii_lowercase();
        if lower.contains("certificate") || lower.contains("tls") {
            FailureReason::Tls(detail)
        } else {
            FailureReason::ConnectionRefused(detail)
        }
    } else if err.is_decode() {
        FailureReason::Decode(detail)
    } else {
        FailureReason::Other(detail)
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use sync_types::{ErrorCode, OriginId, Timestamp};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn login_request() -> LoginRequest {
        LoginRequest {
            timestamp: Timestamp::from_millis(1_000),
            protocol_version: 1,
            hash: "sig".into(),
        }
    }

    async fn logged_in(server: &MockServer) -> HttpTransport {
        Mock::given(method("POST"))
            .and(path("/sync/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "originId": "peer-origin",
                "maxChangeId": 7,
                "sessionToken": "tok-1"
            })))
            .mount(server)
            .await;

        let transport = HttpTransport::new(&SyncConfig::new(&server.uri(), "secret")).unwrap();
        transport.login(&login_request()).await.unwrap();
        transport
    }

    #[tokio::test]
    async fn login_returns_peer_origin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/login"))
            .and(body_json(json!({
                "timestamp": 1000,
                "protocolVersion": 1,
                "hash": "sig"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "originId": "peer-origin",
                "maxChangeId": 7,
                "sessionToken": "tok-1"
            })))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&SyncConfig::new(&server.uri(), "secret")).unwrap();
        let login = transport.login(&login_request()).await.unwrap();

        assert_eq!(login.origin_id, OriginId::from_string("peer-origin").unwrap());
        assert_eq!(login.max_change_id, ChangeId::new(7));
    }

    #[tokio::test]
    async fn later_requests_carry_the_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/changed"))
            .and(query_param("since", "3"))
            .and(query_param("limit", "50"))
            .and(header("x-sync-session", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 4, "entityKind": "note", "entityId": "N1", "sourceId": "X"}
            ])))
            .mount(&server)
            .await;
        let transport = logged_in(&server).await;

        let changes = transport.pull_changes(ChangeId::new(3), 50).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].entity_id, "N1");
    }

    #[tokio::test]
    async fn missing_entity_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/note/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "not_found",
                "message": "note gone not found"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sync/note/null"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
            .mount(&server)
            .await;
        let transport = logged_in(&server).await;

        assert_eq!(
            transport.fetch_entity(EntityKind::Note, "gone").await.unwrap(),
            None
        );
        assert_eq!(
            transport.fetch_entity(EntityKind::Note, "null").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn entity_ids_are_escaped_in_the_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/note/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"noteId": "a/b?c#d"})))
            .expect(1)
            .mount(&server)
            .await;
        let transport = logged_in(&server).await;

        let fetched = transport
            .fetch_entity(EntityKind::Note, "a/b?c#d")
            .await
            .unwrap();
        assert_eq!(fetched, Some(json!({"noteId": "a/b?c#d"})));
    }

    #[tokio::test]
    async fn push_sends_the_entity() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/sync/branch"))
            .and(body_json(json!({
                "sourceId": "X",
                "entityId": "B1",
                "entity": null
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let transport = logged_in(&server).await;

        let request = PushRequest {
            source_id: OriginId::from_string("X").unwrap(),
            entity_id: "B1".into(),
            entity: None,
        };
        transport
            .push_entity(EntityKind::Branch, &request)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejection_keeps_the_peer_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sync/login"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": "clock_skew",
                "message": "clock skew of 9000ms"
            })))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&SyncConfig::new(&server.uri(), "secret")).unwrap();
        let err = transport.login(&login_request()).await.unwrap_err();

        assert_eq!(err.code(), Some(ErrorCode::ClockSkew));
        assert!(matches!(
            err.reason,
            FailureReason::Status { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn slow_peer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/check"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let config =
            SyncConfig::new(&server.uri(), "secret").with_timeout(Duration::from_millis(100));
        let transport = HttpTransport::new(&config).unwrap();

        let err = transport.check().await.unwrap_err();
        assert_eq!(err.reason, FailureReason::Timeout);
    }

    #[tokio::test]
    async fn unreachable_peer_is_connection_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport =
            HttpTransport::new(&SyncConfig::new(&format!("http://127.0.0.1:{port}"), "s"))
                .unwrap();

        let err = transport.check().await.unwrap_err();
        assert!(matches!(err.reason, FailureReason::ConnectionRefused(_)));
    }

    #[tokio::test]
    async fn toggling_proxy_falls_back_to_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sync/check"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "maxSyncId": 0,
                "hashes": {}
            })))
            .mount(&server)
            .await;

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = SyncConfig::new(&server.uri(), "secret")
            .with_proxy(&format!("http://127.0.0.1:{port}"));
        let transport = HttpTransport::new(&config).unwrap();
        assert!(transport.is_using_proxy());
        assert!(transport.check().await.is_err());

        transport.toggle_proxy();
        assert!(!transport.is_using_proxy());
        assert!(transport.check().await.is_ok());
    }
}
