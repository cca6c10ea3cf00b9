//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use account_server::server::{router, AccountService, AppState, ServerConfig};
use account_server::store::MemoryStore;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

pub const SECRET: &str = "integration-test-secret";

/// Initialize test tracing (call once at the beginning of tests).
///
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("account_server=info");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// Configuration with a test secret and the given admin ids.
pub fn config(admins: &[u64]) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.token.secret = SECRET.to_string();
    config.admin.ids = admins.iter().copied().collect();
    config
}

/// A bootstrapped router over a fresh in-memory store.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: MemoryStore,
}

impl TestApp {
    pub async fn new(config: ServerConfig) -> Self {
        init_tracing();

        let store = MemoryStore::new();
        let service = AccountService::new(Arc::new(store.clone()), &config).unwrap();
        service.bootstrap().await.unwrap();
        let state = AppState::new(service);

        Self {
            router: router(state.clone()),
            state,
            store,
        }
    }

    /// Sends a request from `127.0.0.1` and decodes the JSON reply.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, body)
    }

    pub async fn register(&self, user_name: &str, password: &str) -> (StatusCode, Value) {
        self.send(post_json(
            "/api/account/register",
            serde_json::json!({ "user_name": user_name, "user_password": password }),
        ))
        .await
    }

    pub async fn login(&self, user_name: &str, password: &str) -> (StatusCode, Value) {
        self.send(post_json(
            "/api/account/login",
            serde_json::json!({ "user_name": user_name, "user_password": password }),
        ))
        .await
    }

    /// Registers and logs in, returning the user id and token.
    pub async fn sign_up(&self, user_name: &str, password: &str) -> (u64, String) {
        let (status, body) = self.register(user_name, password).await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        let (status, body) = self.login(user_name, password).await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");

        let user_id = body["user"]["user_id"].as_u64().unwrap();
        let token = body["token"].as_str().unwrap().to_string();
        (user_id, token)
    }
}

pub fn peer(ip: [u8; 4]) -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from((ip, 40000)))
}

/// Builds a request from `127.0.0.1` with an optional JSON body.
pub fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    request_from([127, 0, 0, 1], method, uri, body)
}

pub fn request_from(ip: [u8; 4], method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(peer(ip));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    request(Method::POST, uri, Some(body))
}

/// Adds `Authorization: Bearer <token>`.
pub fn with_token(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

/// Adds a raw `Authorization` header.
pub fn with_authorization(mut request: Request<Body>, value: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, value.parse().unwrap());
    request
}
