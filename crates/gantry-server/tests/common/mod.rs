//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, Response};
use serde_json::Value;
use tower::ServiceExt;

use gantry_auth::{
    AccountDirectory, AuthConfig, InMemoryAccounts, MemoryAuditSink, Principal, SessionSigner,
};
use gantry_rpc::testing::StubGateway;
use gantry_rpc::{ConnectionState, GatewayClient, GatewayClientConfig};
use gantry_server::{App, ServerConfig};

pub const ADMIN: &str = "admin";
pub const PASSWORD: &str = "correct horse";
pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

/// Account directory that counts how often credentials are checked.
pub struct CountingAccounts {
    inner: InMemoryAccounts,
    verifies: AtomicUsize,
}

impl CountingAccounts {
    pub fn new(inner: InMemoryAccounts) -> Self {
        Self {
            inner,
            verifies: AtomicUsize::new(0),
        }
    }

    pub fn verify_calls(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountDirectory for CountingAccounts {
    async fn verify(&self, username: &str, password: &str) -> gantry_auth::Result<Principal> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        self.inner.verify(username, password).await
    }

    async fn needs_setup(&self) -> gantry_auth::Result<bool> {
        self.inner.needs_setup().await
    }

    async fn create_initial_admin(
        &self,
        username: &str,
        password: &str,
    ) -> gantry_auth::Result<Principal> {
        self.inner.create_initial_admin(username, password).await
    }
}

pub struct Harness {
    pub app: App,
    pub stub: StubGateway,
    pub accounts: Arc<CountingAccounts>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    /// Started app with a seeded administrator.
    pub fn new(config: ServerConfig) -> Self {
        Self::build(config, InMemoryAccounts::with_admin(ADMIN, PASSWORD))
    }

    /// Started app with no administrator yet.
    pub fn unconfigured(config: ServerConfig) -> Self {
        Self::build(config, InMemoryAccounts::new())
    }

    fn build(config: ServerConfig, accounts: InMemoryAccounts) -> Self {
        let stub = StubGateway::healthy();
        let gateway = GatewayClient::with_connector(
            GatewayClientConfig::new("127.0.0.1", 18789),
            Arc::new(stub.clone()),
        );
        let signer = SessionSigner::new(AuthConfig {
            session_secret: SECRET.to_string(),
            ..AuthConfig::default()
        });
        let accounts = Arc::new(CountingAccounts::new(accounts));
        let audit = Arc::new(MemoryAuditSink::default());

        let mut app = App::new(config, gateway, signer, accounts.clone(), audit.clone());
        app.start();

        Self {
            app,
            stub,
            accounts,
            audit,
        }
    }

    /// Session token for the seeded administrator.
    pub fn token(&self) -> String {
        self.app.state().signer.issue(ADMIN).unwrap().token
    }

    pub async fn wait_connected(&self) {
        let mut states = self.app.state().gateway.watch_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .expect("gateway never connected")
        .unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.router().oneshot(request).await.unwrap()
    }
}

/// Request builder pre-populated with a peer address.
pub fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 50000))))
}

pub fn authed(method: &str, uri: &str, token: &str) -> axum::http::request::Builder {
    request(method, uri).header(header::AUTHORIZATION, format!("Bearer {token}"))
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    request(method, uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
