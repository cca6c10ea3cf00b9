mod common;

use account_server::server::redirect_router;
use account_server::Identity;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use chrono::{Duration, Utc};
use common::{config, post_json, request, request_from, with_token, TestApp};
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn register_allocates_sequential_ids() {
    let app = TestApp::new(config(&[])).await;

    let (status, body) = app.register("alice", "secret1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "user_name": "alice", "user_id": 10000 }));

    let (status, body) = app.register("bob", "secret2").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user_id"], 10001);
}

#[tokio::test]
async fn routes_are_served_at_root_too() {
    let app = TestApp::new(config(&[])).await;

    let (status, body) = app
        .send(post_json(
            "/register",
            json!({ "user_name": "alice", "user_password": "secret1" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user_id"], 10000);

    let (status, body) = app.register("alice", "secret1").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "USERNAME_EXISTS");
}

#[tokio::test]
async fn register_rejects_bad_input() {
    let app = TestApp::new(config(&[])).await;

    let (status, body) = app
        .send(post_json("/api/account/register", json!({ "user_name": "alice" })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MISSING_FIELDS");

    let (status, body) = app.register("a!", "secret1").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "INVALID_USERNAME");

    let (status, body) = app.register("alice", "123").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "INVALID_PASSWORD");

    let (status, body) = app
        .send(post_json("/api/account/register", json!("just a string")))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn login_returns_token_for_valid_credentials() {
    let app = TestApp::new(config(&[])).await;
    app.register("alice", "secret1").await;

    let (status, body) = app.login("alice", "secret1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], json!({ "user_id": 10000, "user_name": "alice" }));

    let token = body["token"].as_str().unwrap();
    let identity = app.state.service.tokens().verify(token).unwrap();
    assert_eq!(identity.user_id, 10000);
}

#[tokio::test]
async fn login_failures_are_classified() {
    let app = TestApp::new(config(&[])).await;
    app.register("alice", "secret1").await;

    let (status, body) = app.login("alice", "wrongpass").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_CREDENTIALS");

    let (status, body) = app.login("ghost", "anything").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn unified_login_errors_hide_unknown_users() {
    let mut config = config(&[]);
    config.login.unify_errors = true;
    let app = TestApp::new(config).await;

    let (status, body) = app.login("ghost", "anything").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn eleventh_login_attempt_is_throttled() {
    let app = TestApp::new(config(&[])).await;

    for _ in 0..10 {
        let (status, _) = app.login("ghost", "anything").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    let (status, body) = app.login("ghost", "anything").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "TOO_MANY_REQUESTS");

    // Other clients keep their own budget.
    let (status, _) = app
        .send(request_from(
            [10, 0, 0, 2],
            Method::POST,
            "/api/account/login",
            Some(json!({ "user_name": "ghost", "user_password": "anything" })),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_budget_is_shared_across_mount_points() {
    let mut config = config(&[]);
    config.rate_limit.max_attempts = 2;
    let app = TestApp::new(config).await;
    let creds = json!({ "user_name": "ghost", "user_password": "anything" });

    app.send(post_json("/login", creds.clone())).await;
    app.send(post_json("/api/account/login", creds.clone())).await;

    let (status, _) = app.send(post_json("/login", creds)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn auth_returns_current_user() {
    let app = TestApp::new(config(&[])).await;
    let (user_id, token) = app.sign_up("alice", "secret1").await;

    let (status, body) = app
        .send(with_token(request(Method::GET, "/api/account/auth", None), &token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["user_id"], user_id);
    assert_eq!(body["user"]["user_name"], "alice");
}

#[tokio::test]
async fn expired_token_is_distinguishable_from_garbage() {
    let app = TestApp::new(config(&[])).await;
    let (user_id, _) = app.sign_up("alice", "secret1").await;

    let identity = Identity {
        user_id,
        user_name: "alice".to_string(),
    };
    let expired = app
        .state
        .service
        .tokens()
        .issue_at(&identity, Utc::now() - Duration::days(8))
        .unwrap();

    let (status, body) = app
        .send(with_token(request(Method::GET, "/api/account/auth", None), &expired))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TOKEN_EXPIRED");

    let (status, body) = app
        .send(with_token(request(Method::GET, "/api/account/auth", None), "garbage"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_TOKEN");
}

#[tokio::test]
async fn auth_without_header_is_unauthenticated() {
    let app = TestApp::new(config(&[])).await;

    let (status, body) = app
        .send(request(Method::GET, "/api/account/auth", None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "USER_NOT_AUTHENTICATED");
}

#[tokio::test]
async fn ban_and_unban_flow() {
    let app = TestApp::new(config(&[10000])).await;
    let (_, admin_token) = app.sign_up("admin", "secret1").await;
    let (bob_id, bob_token) = app.sign_up("bob", "secret2").await;

    let ban = json!({
        "user_id": bob_id,
        "ban_reason": "spam",
        "ban_time": "2024-01-01T00:00:00Z",
        "unban_time": "2024-02-01T00:00:00Z",
    });
    let (status, body) = app
        .send(with_token(post_json("/api/account/ban", ban), &admin_token))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ban"]["user_id"], bob_id);
    assert_eq!(body["ban"]["reason"], "spam");

    // Bob's existing token no longer passes the ban gate.
    let (status, body) = app
        .send(with_token(request(Method::GET, "/api/account/auth", None), &bob_token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "USER_BANNED");

    let (status, body) = app.login("bob", "secret2").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "USER_BANNED");

    let uri = format!("/api/account/ban/{bob_id}");
    let (status, body) = app
        .send(with_token(request(Method::DELETE, &uri, None), &admin_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);

    let (status, _) = app
        .send(with_token(request(Method::GET, "/api/account/auth", None), &bob_token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(with_token(request(Method::DELETE, &uri, None), &admin_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "BAN_NOT_FOUND");
}

#[tokio::test]
async fn ban_requires_admin() {
    let app = TestApp::new(config(&[10000])).await;
    app.sign_up("admin", "secret1").await;
    let (bob_id, bob_token) = app.sign_up("bob", "secret2").await;

    let ban = json!({
        "user_id": bob_id,
        "ban_reason": "self",
        "ban_time": "2024-01-01T00:00:00Z",
        "unban_time": "2024-02-01T00:00:00Z",
    });
    let (status, body) = app
        .send(with_token(post_json("/api/account/ban", ban), &bob_token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "NO_PERMISSION");
}

#[tokio::test]
async fn ban_validates_target_and_fields() {
    let app = TestApp::new(config(&[10000])).await;
    let (_, admin_token) = app.sign_up("admin", "secret1").await;

    let ban = json!({
        "user_id": 99999,
        "ban_reason": "spam",
        "ban_time": "2024-01-01T00:00:00Z",
        "unban_time": "2024-02-01T00:00:00Z",
    });
    let (status, body) = app
        .send(with_token(post_json("/api/account/ban", ban), &admin_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "USER_NOT_FOUND");

    let (status, body) = app
        .send(with_token(
            post_json("/api/account/ban", json!({ "user_id": 10000 })),
            &admin_token,
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "MISSING_FIELDS");
}

#[tokio::test]
async fn ban_requires_unban_time() {
    let app = TestApp::new(config(&[10000])).await;
    let (_, admin_token) = app.sign_up("admin", "secret1").await;
    let (bob_id, bob_token) = app.sign_up("bob", "secret2").await;

    for unban_time in [None, Some(json!("")), Some(json!(null))] {
        let mut ban = json!({
            "user_id": bob_id,
            "ban_reason": "spam",
            "ban_time": "2024-01-01T00:00:00Z",
        });
        if let Some(unban_time) = unban_time {
            ban["unban_time"] = unban_time;
        }
        let (status, body) = app
            .send(with_token(post_json("/api/account/ban", ban), &admin_token))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "MISSING_FIELDS");
    }

    // Nothing was recorded.
    let (status, _) = app
        .send(with_token(request(Method::GET, "/api/account/auth", None), &bob_token))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn ban_accepts_date_only_and_epoch_millis() {
    let app = TestApp::new(config(&[10000])).await;
    let (_, admin_token) = app.sign_up("admin", "secret1").await;
    let (bob_id, _) = app.sign_up("bob", "secret2").await;
    let (carol_id, _) = app.sign_up("carol", "secret3").await;

    let ban = json!({
        "user_id": bob_id,
        "ban_reason": "spam",
        "ban_time": "2024-01-01",
        "unban_time": "2024-02-01",
    });
    let (status, body) = app
        .send(with_token(post_json("/api/account/ban", ban), &admin_token))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["ban"]["issued_at"], "2024-01-01T00:00:00Z");
    assert_eq!(body["ban"]["expires_at"], "2024-02-01T00:00:00Z");

    let ban = json!({
        "user_id": carol_id,
        "ban_reason": "spam",
        "ban_time": 1_704_067_200_000_i64,
        "unban_time": 1_706_745_600_000_i64,
    });
    let (status, body) = app
        .send(with_token(post_json("/api/account/ban", ban), &admin_token))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["ban"]["issued_at"], "2024-01-01T00:00:00Z");
    assert_eq!(body["ban"]["expires_at"], "2024-02-01T00:00:00Z");
}

#[tokio::test]
async fn ban_rejects_malformed_time() {
    let app = TestApp::new(config(&[10000])).await;
    let (_, admin_token) = app.sign_up("admin", "secret1").await;
    let (bob_id, _) = app.sign_up("bob", "secret2").await;

    let ban = json!({
        "user_id": bob_id,
        "ban_reason": "spam",
        "ban_time": "01/01/2024",
        "unban_time": "2024-02-01",
    });
    let (status, body) = app
        .send(with_token(post_json("/api/account/ban", ban), &admin_token))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn plain_http_redirects_to_https() {
    let redirect = redirect_router(3443);

    let request = Request::builder()
        .uri("/api/account/auth?x=1")
        .header(header::HOST, "example.com:3000")
        .body(Body::empty())
        .unwrap();
    let response = redirect.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://example.com:3443/api/account/auth?x=1"
    );

    let request = Request::builder()
        .method(Method::POST)
        .uri("/login")
        .body(Body::empty())
        .unwrap();
    let response = redirect.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://localhost:3443/login"
    );
}

#[tokio::test]
async fn unban_rejects_non_numeric_id() {
    let app = TestApp::new(config(&[])).await;
    let (_, token) = app.sign_up("alice", "secret1").await;

    let (status, body) = app
        .send(with_token(request(Method::DELETE, "/api/account/ban/bob", None), &token))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn guarded_unban_requires_admin() {
    let mut config = config(&[10000]);
    config.admin.guard_unban = true;
    let app = TestApp::new(config).await;
    app.sign_up("admin", "secret1").await;
    let (bob_id, bob_token) = app.sign_up("bob", "secret2").await;

    let (status, body) = app
        .send(with_token(
            request(Method::DELETE, &format!("/api/account/ban/{bob_id}"), None),
            &bob_token,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "NO_PERMISSION");
}

#[tokio::test]
async fn welcome_and_health() {
    let app = TestApp::new(config(&[])).await;
    app.register("alice", "secret1").await;

    let (status, body) = app.send(request(Method::GET, "/", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("Welcome"));

    let (status, body) = app.send(request(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["users"], 1);
    assert_eq!(body["banned_users"], 0);
}

#[tokio::test]
async fn storage_outage_is_reported_as_internal_error() {
    let app = TestApp::new(config(&[])).await;

    app.store.set_offline(true);
    let (status, body) = app.register("alice", "secret1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "INTERNAL_ERROR");
    assert_eq!(body["message"], "Internal server error, please retry later");

    app.store.set_offline(false);
    let (status, body) = app.register("alice", "secret1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user_id"], 10000);
}
