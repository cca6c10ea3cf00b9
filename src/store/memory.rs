use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AccountStore, Ban, ServerCounter, StoreError, StoreResult, User};

#[derive(Default)]
struct UserTable {
    by_id: HashMap<u64, User>,
    by_name: HashMap<String, u64>,
}

/// Process-local [`AccountStore`].
///
/// Each table sits behind its own `RwLock`, and every operation holds the lock
/// for its own duration only, which gives the same per-record atomicity a
/// document store offers. Cloning shares the underlying tables.
pub struct MemoryStore {
    users: Arc<RwLock<UserTable>>,
    counters: Arc<RwLock<HashMap<String, ServerCounter>>>,
    bans: Arc<RwLock<HashMap<u64, Vec<Ban>>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(UserTable::default())),
            counters: Arc::new(RwLock::new(HashMap::new())),
            bans: Arc::new(RwLock::new(HashMap::new())),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every subsequent operation fail with [`StoreError::Unavailable`]
    /// until switched back. Used to exercise outage handling.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
            counters: Arc::clone(&self.counters),
            bans: Arc::clone(&self.bans),
            offline: Arc::clone(&self.offline),
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_user(&self, user: User) -> StoreResult<()> {
        self.ensure_online()?;
        if user.user_name.is_empty() {
            return Err(StoreError::Invalid("user_name is required".to_string()));
        }
        if user.password_hash.is_empty() {
            return Err(StoreError::Invalid("user_password is required".to_string()));
        }

        let mut users = self.users.write().await;

        if users.by_name.contains_key(&user.user_name) {
            return Err(StoreError::Duplicate {
                field: "user_name",
                value: user.user_name,
            });
        }
        if users.by_id.contains_key(&user.user_id) {
            return Err(StoreError::Duplicate {
                field: "user_id",
                value: user.user_id.to_string(),
            });
        }

        users.by_name.insert(user.user_name.clone(), user.user_id);
        users.by_id.insert(user.user_id, user);
        Ok(())
    }

    async fn find_user_by_name(&self, user_name: &str) -> StoreResult<Option<User>> {
        self.ensure_online()?;
        let users = self.users.read().await;
        Ok(users
            .by_name
            .get(user_name)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: u64) -> StoreResult<Option<User>> {
        self.ensure_online()?;
        let users = self.users.read().await;
        Ok(users.by_id.get(&user_id).cloned())
    }

    async fn set_user_disabled(&self, user_id: u64, reason: Option<String>) -> StoreResult<bool> {
        self.ensure_online()?;
        let mut users = self.users.write().await;
        let Some(user) = users.by_id.get_mut(&user_id) else {
            return Ok(false);
        };
        user.disabled = reason.is_some();
        user.disabled_reason = reason.unwrap_or_default();
        Ok(true)
    }

    async fn increment_counter(&self, partition: &str, seed: u64) -> StoreResult<u64> {
        self.ensure_online()?;
        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(partition.to_string())
            .or_insert_with(|| ServerCounter {
                name: partition.to_string(),
                next_user_id: seed,
                admin_ids: BTreeSet::new(),
            });

        let next = counter
            .next_user_id
            .checked_add(1)
            .ok_or_else(|| StoreError::Invalid(format!("counter '{partition}' overflowed")))?;
        counter.next_user_id = next;
        Ok(next)
    }

    async fn get_counter(&self, partition: &str) -> StoreResult<Option<ServerCounter>> {
        self.ensure_online()?;
        let counters = self.counters.read().await;
        Ok(counters.get(partition).cloned())
    }

    async fn upsert_counter_admins(
        &self,
        partition: &str,
        seed: u64,
        admin_ids: BTreeSet<u64>,
    ) -> StoreResult<ServerCounter> {
        self.ensure_online()?;
        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(partition.to_string())
            .or_insert_with(|| ServerCounter {
                name: partition.to_string(),
                next_user_id: seed,
                admin_ids: BTreeSet::new(),
            });
        counter.admin_ids = admin_ids;
        Ok(counter.clone())
    }

    async fn insert_ban(&self, ban: Ban) -> StoreResult<()> {
        self.ensure_online()?;
        if ban.reason.is_empty() {
            return Err(StoreError::Invalid("ban_reason is required".to_string()));
        }
        let mut bans = self.bans.write().await;
        bans.entry(ban.user_id).or_default().push(ban);
        Ok(())
    }

    async fn ban_exists(&self, user_id: u64) -> StoreResult<bool> {
        self.ensure_online()?;
        let bans = self.bans.read().await;
        Ok(bans.get(&user_id).is_some_and(|records| !records.is_empty()))
    }

    async fn delete_bans(&self, user_id: u64) -> StoreResult<u64> {
        self.ensure_online()?;
        let mut bans = self.bans.write().await;
        let removed = bans.remove(&user_id).map_or(0, |records| records.len());
        Ok(removed as u64)
    }

    async fn list_bans(&self, user_id: u64) -> StoreResult<Vec<Ban>> {
        self.ensure_online()?;
        let bans = self.bans.read().await;
        Ok(bans.get(&user_id).cloned().unwrap_or_default())
    }

    async fn user_count(&self) -> StoreResult<usize> {
        self.ensure_online()?;
        Ok(self.users.read().await.by_id.len())
    }

    async fn banned_user_count(&self) -> StoreResult<usize> {
        self.ensure_online()?;
        Ok(self.bans.read().await.len())
    }
}
