use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::allocator::COUNTER_SEED;
use crate::token::DEFAULT_TOKEN_TTL_SECS;
use crate::{Error, Result};

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// Token signing settings.
    pub token: TokenSettings,
    /// Login and registration rate limiting.
    pub rate_limit: RateLimitSettings,
    /// Admin allow-list.
    pub admin: AdminSettings,
    /// Login response policy.
    pub login: LoginSettings,
    /// Persistence settings.
    pub store: StoreSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
    /// HTTPS listener and plain HTTP redirect.
    pub tls: TlsSettings,
}

impl ServerConfig {
    /// Converts host and port into a socket address.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if host and port do not form an address.
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                Error::Config(format!(
                    "invalid server address (host: {}, port: {}): {e}",
                    self.host, self.port
                ))
            })
    }
}

/// Token signing settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// HMAC secret. Has no default; startup fails while it is empty.
    pub secret: String,
    /// Token lifetime in seconds.
    pub ttl_secs: u64,
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("secret", &if self.secret.is_empty() { "<unset>" } else { "<redacted>" })
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }
}

/// Rate limiting settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Sliding window length in seconds.
    pub window_secs: u64,
    /// Attempts allowed per client IP within one window.
    pub max_attempts: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_secs: 15 * 60,
            max_attempts: 10,
        }
    }
}

impl RateLimitSettings {
    /// Creates a rate limiter from these settings.
    pub fn build_limiter(&self) -> RateLimiter {
        RateLimiter::new(Duration::from_secs(self.window_secs), self.max_attempts)
    }
}

/// Admin allow-list settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// User ids allowed to use admin routes.
    pub ids: BTreeSet<u64>,
    /// Also require the admin gate on `DELETE /ban/:user_id`.
    pub guard_unban: bool,
}

impl AdminSettings {
    /// Parses a comma-separated id list such as `"10000, 10001,"`.
    ///
    /// Entries are trimmed and empty entries are skipped.
    ///
    /// # Errors
    /// [`Error::Config`] if an entry is not a user id.
    pub fn parse_ids(raw: &str) -> Result<BTreeSet<u64>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse()
                    .map_err(|e| Error::Config(format!("invalid admin id '{entry}': {e}")))
            })
            .collect()
    }
}

/// Login response policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSettings {
    /// Report unknown users as `INVALID_CREDENTIALS` instead of
    /// `USER_NOT_FOUND`, so responses do not reveal which names exist.
    pub unify_errors: bool,
}

/// Persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Counter partition used for user id allocation.
    pub partition: String,
    /// Counter value a fresh partition starts from.
    pub counter_seed: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            partition: "account_server".to_string(),
            counter_seed: COUNTER_SEED,
        }
    }
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

impl MetricsSettings {
    /// Converts host and port into a socket address for metrics server.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if host and port do not form an address.
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                Error::Config(format!(
                    "invalid metrics address (host: {}, port: {}): {e}",
                    self.host, self.port
                ))
            })
    }
}

/// TLS settings.
///
/// With TLS enabled the API is served over HTTPS on the main port. If
/// `redirect_port` is set, a plain HTTP listener on that port answers every
/// request with `301 Moved Permanently` to the HTTPS address.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Whether TLS is enabled.
    pub enabled: bool,
    /// Path to TLS certificate chain file (PEM format).
    pub cert_path: String,
    /// Path to TLS private key file (PEM format).
    pub key_path: String,
    /// Port for the HTTP to HTTPS redirect listener.
    pub redirect_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            token: TokenSettings::default(),
            rate_limit: RateLimitSettings::default(),
            admin: AdminSettings::default(),
            login: LoginSettings::default(),
            store: StoreSettings::default(),
            metrics: MetricsSettings::default(),
            tls: TlsSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `.env` file, TOML file, and environment variables.
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables with `ACCOUNT_` prefix, `__` between nested keys
    ///    (e.g., `ACCOUNT_RATE_LIMIT__MAX_ATTEMPTS=20`)
    /// 2. TOML configuration file (if exists)
    /// 3. Built-in defaults
    ///
    /// The `.env` file is loaded first so its entries act as environment
    /// variables. The TOML file path can be set via `ACCOUNT_CONFIG_PATH` and
    /// defaults to `./config/server.toml`; a missing file is skipped.
    ///
    /// # Environment Variable Examples
    /// ```bash
    /// ACCOUNT_HOST=0.0.0.0
    /// ACCOUNT_PORT=8080
    /// ACCOUNT_TOKEN__SECRET=change-me
    /// ACCOUNT_TOKEN__TTL_SECS=604800
    /// ACCOUNT_RATE_LIMIT__WINDOW_SECS=900
    /// ACCOUNT_RATE_LIMIT__MAX_ATTEMPTS=10
    /// ACCOUNT_ADMIN__IDS=[10000,10001]
    /// ACCOUNT_METRICS__ENABLED=true
    /// ACCOUNT_TLS__ENABLED=true
    /// ACCOUNT_TLS__CERT_PATH=certs/server.pem
    /// ACCOUNT_TLS__KEY_PATH=certs/server-key.pem
    /// ACCOUNT_TLS__REDIRECT_PORT=3000
    /// ```
    ///
    /// # Errors
    /// Returns an error if the configuration is malformed.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        let _ = dotenvy::dotenv();

        let config_path = std::env::var("ACCOUNT_CONFIG_PATH")
            .unwrap_or_else(|_| "config/server.toml".to_string());

        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ACCOUNT_").split("__").ignore(&["config_path"]))
            .extract()
    }

    /// Validates the configuration before the server starts.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.token.secret.trim().is_empty() {
            return Err(Error::Config(
                "token secret is not configured (set ACCOUNT_TOKEN__SECRET or JWT_SECRET)"
                    .to_string(),
            ));
        }

        if self.token.ttl_secs == 0 {
            return Err(Error::Config("token ttl_secs cannot be zero".to_string()));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(Error::Config("rate limit window_secs cannot be zero".to_string()));
        }

        if self.rate_limit.max_attempts == 0 {
            return Err(Error::Config("rate limit max_attempts cannot be zero".to_string()));
        }

        if self.store.partition.is_empty() {
            return Err(Error::Config("store partition cannot be empty".to_string()));
        }

        if self.tls.enabled {
            if self.tls.cert_path.is_empty() {
                return Err(Error::Config("TLS is enabled but cert_path is empty".to_string()));
            }
            if self.tls.key_path.is_empty() {
                return Err(Error::Config("TLS is enabled but key_path is empty".to_string()));
            }
            if !Path::new(&self.tls.cert_path).exists() {
                return Err(Error::Config(format!(
                    "TLS certificate file does not exist: {}",
                    self.tls.cert_path
                )));
            }
            if !Path::new(&self.tls.key_path).exists() {
                return Err(Error::Config(format!(
                    "TLS key file does not exist: {}",
                    self.tls.key_path
                )));
            }
            if self.tls.redirect_port == Some(self.port) {
                return Err(Error::Config(
                    "TLS redirect_port must differ from the HTTPS port".to_string(),
                ));
            }
        }

        self.addr()?;
        if self.metrics.enabled {
            self.metrics.addr()?;
        }

        Ok(())
    }
}

/// Sliding-window rate limiter keyed by client.
///
/// Keeps the instants of accepted attempts per key and admits a new attempt
/// only while fewer than `max_attempts` fall inside the trailing window.
/// Rejected attempts are not recorded.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
    window: Duration,
    max_attempts: usize,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    ///
    /// # Arguments
    /// * `window` - Length of the sliding window
    /// * `max_attempts` - Attempts allowed per key inside one window
    pub fn new(window: Duration, max_attempts: usize) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            window,
            max_attempts,
        }
    }

    /// Records an attempt for `key`.
    ///
    /// Returns `Err(Error::TooManyRequests)` if the window is already full.
    pub async fn check(&self, key: &str) -> Result<()> {
        self.check_at(key, Instant::now()).await
    }

    /// Records an attempt for `key` made at `now`.
    pub async fn check_at(&self, key: &str, now: Instant) -> Result<()> {
        let mut windows = self.windows.lock().await;
        let attempts = windows.entry(key.to_string()).or_default();

        while attempts
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            attempts.pop_front();
        }

        if attempts.len() >= self.max_attempts {
            return Err(Error::TooManyRequests);
        }

        attempts.push_back(now);
        Ok(())
    }

    /// Drops keys whose attempts have all left the window.
    pub async fn purge_idle(&self) {
        self.purge_idle_at(Instant::now()).await;
    }

    /// Drops keys whose attempts have all left the window as of `now`.
    pub async fn purge_idle_at(&self, now: Instant) {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, attempts| {
            attempts
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
        });
    }

    /// Number of keys currently tracked.
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}
