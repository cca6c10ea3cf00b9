//! # Account Server
//!
//! User registration, password verification, signed bearer tokens and an
//! admin-managed ban list, served over HTTP.
//!
//! ## Components
//!
//! - [`store`]: persistence seam and the in-memory store
//! - [`allocator`]: store-side user id counter
//! - [`credentials`]: password hashing and lookup
//! - [`token`]: bearer token issue and verification
//! - [`bans`]: ban records
//! - [`admission`]: per-request gate chain
//! - [`server`]: configuration, service and routes
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use account_server::server::{router, AccountService, AppState, ServerConfig};
//! use account_server::store::MemoryStore;
//!
//! # async fn run() -> account_server::Result<()> {
//! let mut config = ServerConfig::default();
//! config.token.secret = "change-me".to_string();
//!
//! let service = AccountService::new(Arc::new(MemoryStore::new()), &config)?;
//! service.bootstrap().await?;
//! let app = router(AppState::new(service));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod allocator;
pub mod bans;
pub mod credentials;
pub mod error;
pub mod server;
pub mod store;
pub mod token;
pub mod validate;

pub use admission::{AdmissionPipeline, Gates, RequestContext};
pub use allocator::IdAllocator;
pub use bans::BanRegistry;
pub use credentials::{CredentialCheck, CredentialStore};
pub use error::{Error, ErrorCode, ErrorKind, Result};
pub use token::{Identity, TokenError, TokenService};
