//! User records and password verification.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand_core::OsRng;

use crate::allocator::IdAllocator;
use crate::store::{AccountStore, User};
use crate::{Error, Result};

/// Outcome of a credential check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialCheck {
    /// Name and password match.
    Verified(User),
    /// The name exists but the password does not match.
    WrongPassword,
    /// No user has this name.
    UnknownUser,
}

/// Owns user records: creation with a freshly allocated id, password checks
/// and lookups.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn AccountStore>,
    allocator: IdAllocator,
}

impl CredentialStore {
    /// Creates a credential store drawing ids from `allocator`.
    pub fn new(store: Arc<dyn AccountStore>, allocator: IdAllocator) -> Self {
        Self { store, allocator }
    }

    /// Registers a user.
    ///
    /// The password is hashed with Argon2id and a random salt before anything
    /// is written. Name uniqueness is enforced by the store, so two concurrent
    /// registrations of the same name cannot both succeed; the loser's
    /// allocated id is simply never used.
    ///
    /// # Errors
    /// [`Error::UsernameTaken`] if the name exists, [`Error::AllocationFailed`]
    /// if no id could be allocated.
    pub async fn create_user(&self, user_name: &str, password: &str) -> Result<User> {
        let password_hash = hash_password(password.to_string()).await?;
        let user_id = self.allocator.allocate_next_id().await?;

        let user = User {
            user_id,
            user_name: user_name.to_string(),
            password_hash,
            disabled: false,
            disabled_reason: String::new(),
        };
        self.store.insert_user(user.clone()).await?;

        Ok(user)
    }

    /// Checks a name/password pair, telling unknown names apart from wrong
    /// passwords.
    pub async fn check_credentials(&self, user_name: &str, password: &str) -> Result<CredentialCheck> {
        let Some(user) = self.store.find_user_by_name(user_name).await? else {
            return Ok(CredentialCheck::UnknownUser);
        };

        if verify_password(password.to_string(), user.password_hash.clone()).await? {
            Ok(CredentialCheck::Verified(user))
        } else {
            Ok(CredentialCheck::WrongPassword)
        }
    }

    /// Returns the user if the name exists and the password matches.
    pub async fn verify_credentials(&self, user_name: &str, password: &str) -> Result<Option<User>> {
        match self.check_credentials(user_name, password).await? {
            CredentialCheck::Verified(user) => Ok(Some(user)),
            CredentialCheck::WrongPassword | CredentialCheck::UnknownUser => Ok(None),
        }
    }

    /// Looks a user up by id.
    pub async fn find_by_user_id(&self, user_id: u64) -> Result<Option<User>> {
        Ok(self.store.find_user_by_id(user_id).await?)
    }

    /// Disables login for a user, or re-enables it when `reason` is `None`.
    ///
    /// # Errors
    /// [`Error::UserNotFound`] if the user does not exist.
    pub async fn set_disabled(&self, user_id: u64, reason: Option<String>) -> Result<()> {
        if self.store.set_user_disabled(user_id, reason).await? {
            Ok(())
        } else {
            Err(Error::UserNotFound)
        }
    }
}

// Hashing and verification run on the blocking pool.
async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::PasswordHash(e.to_string()))
    })
    .await
    .map_err(|e| Error::PasswordHash(e.to_string()))?
}

async fn verify_password(password: String, password_hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash)
            .map_err(|e| Error::PasswordHash(format!("stored hash is unreadable: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| Error::PasswordHash(e.to_string()))?
}
