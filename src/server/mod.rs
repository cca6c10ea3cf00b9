/// Server configuration and rate limiting.
pub mod config;

/// Account operations behind the routes.
pub mod service;

/// Router state.
pub mod state;

/// Extractors that admit callers.
pub mod extract;

/// HTTP routes.
pub mod routes;

pub use config::{AdminSettings, RateLimiter, ServerConfig, TlsSettings};
pub use routes::{redirect_router, router};
pub use service::{AccountService, LoginOutcome, ServiceStats};
pub use state::AppState;
