//! Ban records.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::store::{AccountStore, Ban};
use crate::{Error, Result};

/// Registry of banned users.
///
/// A user counts as banned while at least one ban record exists for them.
/// `expires_at` is stored but not enforced; bans end only through [`unban`].
///
/// [`unban`]: BanRegistry::unban
#[derive(Clone)]
pub struct BanRegistry {
    store: Arc<dyn AccountStore>,
}

impl BanRegistry {
    /// Creates a registry over `store`.
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Whether `user_id` has at least one ban record.
    pub async fn is_banned(&self, user_id: u64) -> Result<bool> {
        Ok(self.store.ban_exists(user_id).await?)
    }

    /// Records a ban on an existing user.
    ///
    /// # Errors
    /// [`Error::UserNotFound`] if `user_id` is not registered.
    pub async fn ban(
        &self,
        user_id: u64,
        reason: &str,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Ban> {
        if self.store.find_user_by_id(user_id).await?.is_none() {
            return Err(Error::UserNotFound);
        }

        let ban = Ban {
            user_id,
            reason: reason.to_string(),
            issued_at,
            expires_at,
        };
        self.store.insert_ban(ban.clone()).await?;
        Ok(ban)
    }

    /// Removes every ban record of `user_id` and returns how many there were.
    ///
    /// # Errors
    /// [`Error::BanNotFound`] if the user had no ban records.
    pub async fn unban(&self, user_id: u64) -> Result<u64> {
        match self.store.delete_bans(user_id).await? {
            0 => Err(Error::BanNotFound(user_id)),
            removed => Ok(removed),
        }
    }

    /// Ban records of `user_id`, oldest first.
    pub async fn bans_for(&self, user_id: u64) -> Result<Vec<Ban>> {
        Ok(self.store.list_bans(user_id).await?)
    }
}
