//! Request extractors that run the admission gates.
//!
//! Handlers receive the caller's identity only through these extractors, and
//! the identity is always the one decoded from the verified bearer token.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use super::state::AppState;
use crate::admission::{Gates, RequestContext};
use crate::token::Identity;
use crate::{Error, Result};

/// Peer IP address, when the server was started with connect info.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub Option<IpAddr>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(ip))
    }
}

/// Caller holding a valid token. Bans are not consulted.
#[derive(Clone, Debug)]
pub struct Bearer(pub Identity);

/// Caller holding a valid token who is not banned.
#[derive(Clone, Debug)]
pub struct Authenticated(pub Identity);

/// Authenticated caller on the admin allow-list.
#[derive(Clone, Debug)]
pub struct Admin(pub Identity);

async fn admit(parts: &Parts, state: &AppState, gates: Gates) -> Result<Identity> {
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ctx = RequestContext {
        route: parts.uri.path(),
        client_ip,
        authorization: parts.headers.get(AUTHORIZATION).map(|v| v.as_bytes()),
    };

    state
        .service
        .pipeline()
        .admit(&ctx, gates)
        .await?
        .identity
        .ok_or(Error::NotAuthenticated)
}

#[async_trait]
impl FromRequestParts<AppState> for Bearer {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        admit(parts, state, Gates::TOKEN).await.map(Bearer)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        admit(parts, state, Gates::AUTHENTICATED).await.map(Authenticated)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Admin {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        admit(parts, state, Gates::ADMIN).await.map(Admin)
    }
}
