//! Request admission.
//!
//! Every protected request runs through the same ordered gates:
//!
//! 1. rate limit (per route and client IP)
//! 2. `Authorization: Bearer <token>` presence and shape
//! 3. token verification
//! 4. ban check
//! 5. admin allow-list
//!
//! A route picks the subset it needs with [`Gates`]; the order never changes
//! and the first failing gate ends the request. Gates read an immutable
//! [`RequestContext`] and hand their result to the next gate, so nothing is
//! stashed in shared request state along the way.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::bans::BanRegistry;
use crate::server::config::RateLimiter;
use crate::token::{Identity, TokenService};
use crate::{Error, Result};

/// What a gate may look at.
#[derive(Clone, Copy, Debug)]
pub struct RequestContext<'a> {
    /// Route the request targets; part of the rate-limit key.
    pub route: &'a str,
    /// Peer address, if known.
    pub client_ip: Option<IpAddr>,
    /// Raw `Authorization` header value.
    pub authorization: Option<&'a [u8]>,
}

/// Gates a route requires. `ban` and `admin` imply `auth`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Gates {
    /// Sliding-window limit per client IP.
    pub rate_limit: bool,
    /// Valid bearer token.
    pub auth: bool,
    /// Caller must not be banned.
    pub ban: bool,
    /// Caller must be on the admin allow-list.
    pub admin: bool,
}

impl Gates {
    /// No gates.
    pub const OPEN: Gates = Gates {
        rate_limit: false,
        auth: false,
        ban: false,
        admin: false,
    };

    /// Rate limit only; for registration and login.
    pub const THROTTLED: Gates = Gates {
        rate_limit: true,
        ..Gates::OPEN
    };

    /// Valid token only.
    pub const TOKEN: Gates = Gates {
        auth: true,
        ..Gates::OPEN
    };

    /// Valid token held by a user who is not banned.
    pub const AUTHENTICATED: Gates = Gates {
        auth: true,
        ban: true,
        ..Gates::OPEN
    };

    /// Authenticated admin.
    pub const ADMIN: Gates = Gates {
        auth: true,
        ban: true,
        admin: true,
        ..Gates::OPEN
    };

    fn requires_identity(self) -> bool {
        self.auth || self.ban || self.admin
    }
}

/// Result of a successful admission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admitted {
    /// Verified caller identity, present whenever an identity gate ran.
    pub identity: Option<Identity>,
}

/// The gate chain and everything it consults.
#[derive(Clone)]
pub struct AdmissionPipeline {
    tokens: TokenService,
    bans: BanRegistry,
    limiter: RateLimiter,
    admins: Arc<BTreeSet<u64>>,
}

impl AdmissionPipeline {
    /// Creates a pipeline. The admin allow-list is fixed for its lifetime.
    pub fn new(
        tokens: TokenService,
        bans: BanRegistry,
        limiter: RateLimiter,
        admins: BTreeSet<u64>,
    ) -> Self {
        Self {
            tokens,
            bans,
            limiter,
            admins: Arc::new(admins),
        }
    }

    /// Runs the selected gates in order.
    pub async fn admit(&self, ctx: &RequestContext<'_>, gates: Gates) -> Result<Admitted> {
        let outcome = self.run(ctx, gates).await;
        if let Err(e) = &outcome {
            counter!("account_admission_rejections_total", "code" => e.code().as_str())
                .increment(1);
            debug!(route = ctx.route, code = e.code().as_str(), "request rejected");
        }
        outcome
    }

    async fn run(&self, ctx: &RequestContext<'_>, gates: Gates) -> Result<Admitted> {
        if gates.rate_limit {
            self.rate_limit_gate(ctx).await?;
        }

        if !gates.requires_identity() {
            return Ok(Admitted { identity: None });
        }

        let token = bearer_token(ctx.authorization)?;
        let mut identity = self.verify_gate(token)?;

        if gates.ban {
            identity = self.ban_gate(identity).await?;
        }
        if gates.admin {
            identity = self.admin_gate(identity)?;
        }

        Ok(Admitted {
            identity: Some(identity),
        })
    }

    /// Counts an attempt against the caller's window for this route.
    pub async fn rate_limit_gate(&self, ctx: &RequestContext<'_>) -> Result<()> {
        let ip = ctx
            .client_ip
            .map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        self.limiter.check(&format!("{}|{ip}", ctx.route)).await
    }

    /// Verifies a bearer token and returns the identity it asserts.
    pub fn verify_gate(&self, token: &str) -> Result<Identity> {
        self.tokens.verify(token).map_err(|e| {
            counter!("account_token_rejections_total", "kind" => e.as_str()).increment(1);
            warn!(kind = e.as_str(), "bearer token rejected");
            Error::Token(e)
        })
    }

    /// Rejects identities that have a ban record.
    pub async fn ban_gate(&self, identity: Identity) -> Result<Identity> {
        if self.bans.is_banned(identity.user_id).await? {
            return Err(Error::Banned(identity.user_id));
        }
        Ok(identity)
    }

    /// Rejects identities not on the admin allow-list.
    pub fn admin_gate(&self, identity: Identity) -> Result<Identity> {
        if !self.is_admin(identity.user_id) {
            return Err(Error::NoPermission(identity.user_id));
        }
        Ok(identity)
    }

    /// Whether `user_id` is on the admin allow-list.
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admins.contains(&user_id)
    }

    /// The limiter behind the rate-limit gate.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

/// Extracts the token from an `Authorization` header value.
///
/// The value must be exactly `Bearer <token>`: two parts separated by a single
/// space, the first being the literal `Bearer`. No cryptographic work happens
/// here.
pub fn bearer_token(header: Option<&[u8]>) -> Result<&str> {
    let raw = match header {
        None | Some(b"") => return Err(Error::NotAuthenticated),
        Some(raw) => raw,
    };
    let value = std::str::from_utf8(raw).map_err(|_| Error::InvalidAuthHeader)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(Error::InvalidAuthHeader),
    }
}
