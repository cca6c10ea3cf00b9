//! HTTP routes.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::header::{HOST, LOCATION};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::extract::{Admin, Authenticated, Bearer, ClientIp};
use super::state::AppState;
use crate::admission::{Gates, RequestContext};
use crate::store::Ban;
use crate::token::Identity;
use crate::{Error, Result};

/// Builds the application router.
///
/// The account routes are served both under `/api/account` and at the root.
pub fn router(state: AppState) -> Router {
    let account = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/auth", get(current_user))
        .route("/ban", post(ban_user))
        .route("/ban/:user_id", delete(unban_user));

    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health))
        .nest("/api/account", account.clone())
        .merge(account)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the plain HTTP router that sends every request to the HTTPS
/// listener on `https_port`.
pub fn redirect_router(https_port: u16) -> Router {
    Router::new()
        .fallback(redirect_to_https)
        .layer(TraceLayer::new_for_http())
        .with_state(https_port)
}

async fn redirect_to_https(
    State(https_port): State<u16>,
    headers: HeaderMap,
    uri: Uri,
) -> impl IntoResponse {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(':').next())
        .filter(|host| !host.is_empty())
        .unwrap_or("localhost");
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());

    let location = format!("https://{host}:{https_port}{path}");
    tracing::debug!(%location, "redirecting to HTTPS");
    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CredentialsBody {
    user_name: Option<String>,
    user_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BanBody {
    user_id: Option<u64>,
    ban_reason: Option<String>,
    #[serde(deserialize_with = "timestamp")]
    ban_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "timestamp")]
    unban_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC), `YYYY-MM-DD` (UTC midnight)
/// or integer milliseconds since the epoch. Empty strings and zero read as
/// absent.
fn timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    raw.and_then(|raw| parse_timestamp(raw).transpose())
        .transpose()
        .map_err(serde::de::Error::custom)
}

fn parse_timestamp(raw: RawTimestamp) -> std::result::Result<Option<DateTime<Utc>>, String> {
    match raw {
        RawTimestamp::Millis(0) => Ok(None),
        RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| format!("timestamp {ms} is out of range")),
        RawTimestamp::Text(text) if text.trim().is_empty() => Ok(None),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(at) = DateTime::parse_from_rfc3339(text) {
                return Ok(Some(at.with_timezone(&Utc)));
            }
            if let Ok(at) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Ok(Some(at.and_utc()));
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|at| Some(at.and_utc()))
                .ok_or_else(|| format!("invalid timestamp '{text}'"))
        }
    }
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    user_name: String,
    user_id: u64,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    user: Identity,
}

#[derive(Debug, Serialize)]
struct BanResponse {
    message: &'static str,
    ban: Ban,
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| Error::Validation(rejection.body_text()))
}

fn required(field: Option<String>) -> Result<String> {
    match field {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::MissingFields),
    }
}

async fn throttle(state: &AppState, route: &str, ClientIp(client_ip): ClientIp) -> Result<()> {
    let ctx = RequestContext {
        route,
        client_ip,
        authorization: None,
    };
    state.service.pipeline().admit(&ctx, Gates::THROTTLED).await?;
    Ok(())
}

async fn welcome() -> &'static str {
    "Welcome to the account server!"
}

async fn health(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.service.stats().await?;
    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "users": stats.users,
        "banned_users": stats.banned_users,
    })))
}

async fn register(
    State(state): State<AppState>,
    client_ip: ClientIp,
    payload: std::result::Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    throttle(&state, "register", client_ip).await?;

    let body = body(payload)?;
    let user_name = required(body.user_name)?;
    let password = required(body.user_password)?;

    let user = state.service.register(&user_name, &password).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_name: user.user_name,
            user_id: user.user_id,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    client_ip: ClientIp,
    payload: std::result::Result<Json<CredentialsBody>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    throttle(&state, "login", client_ip).await?;

    let body = body(payload)?;
    let user_name = required(body.user_name)?;
    let password = required(body.user_password)?;

    let outcome = state.service.login(&user_name, &password).await?;
    Ok(Json(LoginResponse {
        token: outcome.token,
        user: outcome.identity,
    }))
}

async fn current_user(Authenticated(identity): Authenticated) -> impl IntoResponse {
    Json(json!({ "user": identity }))
}

async fn ban_user(
    State(state): State<AppState>,
    Admin(operator): Admin,
    payload: std::result::Result<Json<BanBody>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let body = body(payload)?;
    let (Some(user_id), Some(ban_time), Some(unban_time)) =
        (body.user_id, body.ban_time, body.unban_time)
    else {
        return Err(Error::MissingFields);
    };
    let reason = required(body.ban_reason)?;

    let ban = state
        .service
        .ban(&operator, user_id, &reason, ban_time, Some(unban_time))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BanResponse {
            message: "User banned",
            ban,
        }),
    ))
}

async fn unban_user(
    State(state): State<AppState>,
    Bearer(operator): Bearer,
    user_id: std::result::Result<Path<u64>, PathRejection>,
) -> Result<impl IntoResponse> {
    let operator = if state.service.guards_unban() {
        let pipeline = state.service.pipeline();
        pipeline.admin_gate(pipeline.ban_gate(operator).await?)?
    } else {
        operator
    };

    let Path(user_id) = user_id.map_err(|rejection| Error::Validation(rejection.body_text()))?;
    let removed = state.service.unban(&operator, user_id).await?;
    Ok(Json(json!({
        "message": "User unbanned",
        "removed": removed,
    })))
}
