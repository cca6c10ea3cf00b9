//! Persistence seam.
//!
//! The account core never touches storage directly. It goes through
//! [`AccountStore`], whose implementations must provide unique constraints on
//! `user_name` and `user_id`, an atomic upsert-and-increment on counter
//! records, and indexed ban lookups by `user_id`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-memory store.
pub mod memory;

pub use memory::MemoryStore;

/// A registered account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// Immutable numeric identity, assigned once by the id allocator.
    pub user_id: u64,
    /// Unique login name.
    pub user_name: String,
    /// PHC-formatted password hash. Never leaves the service.
    pub password_hash: String,
    /// Whether login is disabled for this account.
    pub disabled: bool,
    /// Reason shown when a disabled account tries to log in.
    pub disabled_reason: String,
}

/// Per-deployment counter record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCounter {
    /// Partition key.
    pub name: String,
    /// Last value handed out by the allocator.
    pub next_user_id: u64,
    /// Admin ids recorded for this deployment.
    pub admin_ids: BTreeSet<u64>,
}

/// A ban placed on a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    /// Banned user.
    pub user_id: u64,
    /// Free-form reason given by the admin.
    pub reason: String,
    /// When the ban was issued.
    pub issued_at: DateTime<Utc>,
    /// Advisory end of the ban. Not enforced.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Native failure signals of a store.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("duplicate {field}: '{value}'")]
    Duplicate {
        /// Constrained field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The record failed schema validation.
    #[error("invalid record: {0}")]
    Invalid(String),

    /// The store could not be reached or could not apply the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage for users, counters and bans.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Inserts a user, enforcing uniqueness of `user_name` and `user_id`.
    async fn insert_user(&self, user: User) -> StoreResult<()>;

    /// Looks a user up by name.
    async fn find_user_by_name(&self, user_name: &str) -> StoreResult<Option<User>>;

    /// Looks a user up by id.
    async fn find_user_by_id(&self, user_id: u64) -> StoreResult<Option<User>>;

    /// Sets or clears the disabled flag. Returns false if the user is unknown.
    async fn set_user_disabled(&self, user_id: u64, reason: Option<String>) -> StoreResult<bool>;

    /// Atomically increments the partition's counter and returns the new value.
    ///
    /// A missing partition is created holding `seed` and then incremented, all
    /// as one operation, so the first call returns `seed + 1`.
    async fn increment_counter(&self, partition: &str, seed: u64) -> StoreResult<u64>;

    /// Reads a counter record without modifying it.
    async fn get_counter(&self, partition: &str) -> StoreResult<Option<ServerCounter>>;

    /// Creates the partition if absent and records its admin ids.
    async fn upsert_counter_admins(
        &self,
        partition: &str,
        seed: u64,
        admin_ids: BTreeSet<u64>,
    ) -> StoreResult<ServerCounter>;

    /// Appends a ban record.
    async fn insert_ban(&self, ban: Ban) -> StoreResult<()>;

    /// Whether at least one ban record exists for `user_id`.
    async fn ban_exists(&self, user_id: u64) -> StoreResult<bool>;

    /// Deletes every ban record for `user_id` and returns how many were removed.
    async fn delete_bans(&self, user_id: u64) -> StoreResult<u64>;

    /// Lists the ban records of a user, oldest first.
    async fn list_bans(&self, user_id: u64) -> StoreResult<Vec<Ban>>;

    /// Number of registered users.
    async fn user_count(&self) -> StoreResult<usize>;

    /// Number of banned users.
    async fn banned_user_count(&self) -> StoreResult<usize>;
}
