//! Signed, time-bound identity tokens.
//!
//! Tokens are HS256 JWTs carrying the user's id and name. There is no session
//! table behind them: a token stays valid until its `exp` passes, and cannot be
//! revoked earlier.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default token lifetime: seven days.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Identity asserted by a verified token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Numeric user id.
    pub user_id: u64,
    /// User name at the time the token was issued.
    pub user_name: String,
}

/// Why a token was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Not a well-formed signed token.
    #[error("malformed token")]
    Malformed,
    /// Signature is valid but the expiry has passed.
    #[error("token expired")]
    Expired,
    /// Well-formed, but the signature does not match.
    #[error("token signature mismatch")]
    InvalidSignature,
}

impl TokenError {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::Expired => "expired",
            TokenError::InvalidSignature => "invalid_signature",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: u64,
    user_name: String,
    iat: i64,
    exp: i64,
}

/// Issues and verifies bearer tokens with a process-wide HMAC secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Creates a token service.
    ///
    /// # Errors
    /// [`Error::Config`] if `secret` is empty or `ttl_secs` is zero. A missing
    /// secret is never replaced by a default.
    pub fn new(secret: &str, ttl_secs: u64) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(Error::Config("token secret is not configured".to_string()));
        }
        if ttl_secs == 0 {
            return Err(Error::Config("token ttl must be positive".to_string()));
        }
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| Error::Config("token ttl is out of range".to_string()))?;

        // Expiry is checked by hand against an explicit clock, see `verify_at`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        })
    }

    /// Lifetime of issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a token for `identity`, valid from now for the configured ttl.
    pub fn issue(&self, identity: &Identity) -> Result<String> {
        self.issue_at(identity, Utc::now())
    }

    /// Issues a token as if the current time were `now`.
    pub fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<String> {
        let issued_at = now.timestamp();
        let claims = Claims {
            user_id: identity.user_id,
            user_name: identity.user_name.clone(),
            iat: issued_at,
            exp: issued_at.saturating_add(self.ttl.num_seconds()),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Config(format!("token signing failed: {e}")))
    }

    /// Verifies a token against the current time.
    pub fn verify(&self, token: &str) -> std::result::Result<Identity, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verifies signature and expiry as if the current time were `now`.
    ///
    /// The signature is checked first, so an expired token with a forged
    /// signature reports [`TokenError::InvalidSignature`].
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Identity, TokenError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                JwtErrorKind::InvalidSignature => TokenError::InvalidSignature,
                JwtErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?;

        if now.timestamp() >= data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(Identity {
            user_id: data.claims.user_id,
            user_name: data.claims.user_name,
        })
    }
}
