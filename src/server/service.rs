use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use super::config::ServerConfig;
use crate::admission::AdmissionPipeline;
use crate::allocator::IdAllocator;
use crate::bans::BanRegistry;
use crate::credentials::{CredentialCheck, CredentialStore};
use crate::store::{AccountStore, Ban, ServerCounter, User};
use crate::token::{Identity, TokenService};
use crate::validate::{validate_password, validate_user_name};
use crate::{Error, Result};

/// Token and identity returned by a successful login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Signed bearer token.
    pub token: String,
    /// Identity the token asserts.
    pub identity: Identity,
}

/// Counts reported by the health route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceStats {
    /// Registered users.
    pub users: usize,
    /// Users with at least one ban record.
    pub banned_users: usize,
}

/// Account operations behind the HTTP routes.
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    allocator: IdAllocator,
    credentials: CredentialStore,
    tokens: TokenService,
    bans: BanRegistry,
    pipeline: AdmissionPipeline,
    admin_ids: BTreeSet<u64>,
    unify_login_errors: bool,
    guard_unban: bool,
}

impl AccountService {
    /// Wires the core components over `store` according to `config`.
    ///
    /// # Errors
    /// [`Error::Config`] if no token secret is configured.
    pub fn new(store: Arc<dyn AccountStore>, config: &ServerConfig) -> Result<Self> {
        let tokens = TokenService::new(&config.token.secret, config.token.ttl_secs)?;
        let allocator = IdAllocator::with_seed(
            Arc::clone(&store),
            config.store.partition.clone(),
            config.store.counter_seed,
        );
        let credentials = CredentialStore::new(Arc::clone(&store), allocator.clone());
        let bans = BanRegistry::new(Arc::clone(&store));
        let pipeline = AdmissionPipeline::new(
            tokens.clone(),
            bans.clone(),
            config.rate_limit.build_limiter(),
            config.admin.ids.clone(),
        );

        Ok(Self {
            store,
            allocator,
            credentials,
            tokens,
            bans,
            pipeline,
            admin_ids: config.admin.ids.clone(),
            unify_login_errors: config.login.unify_errors,
            guard_unban: config.admin.guard_unban,
        })
    }

    /// Creates the counter partition if absent and records the admin ids on it.
    pub async fn bootstrap(&self) -> Result<ServerCounter> {
        let counter = self
            .store
            .upsert_counter_admins(
                self.allocator.partition(),
                self.allocator.seed(),
                self.admin_ids.clone(),
            )
            .await?;
        info!(
            partition = %counter.name,
            next_user_id = counter.next_user_id,
            admins = counter.admin_ids.len(),
            "counter partition ready"
        );
        Ok(counter)
    }

    /// The admission gates.
    pub fn pipeline(&self) -> &AdmissionPipeline {
        &self.pipeline
    }

    /// The token service.
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// The credential store.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Whether unbanning requires the admin gate.
    pub fn guards_unban(&self) -> bool {
        self.guard_unban
    }

    /// Registers a new user.
    pub async fn register(&self, user_name: &str, password: &str) -> Result<User> {
        validate_user_name(user_name)?;
        validate_password(password)?;

        let user = self.credentials.create_user(user_name, password).await?;

        counter!("account_registrations_total").increment(1);
        info!(user_id = user.user_id, user_name = %user.user_name, "user registered");
        Ok(user)
    }

    /// Checks credentials and issues a token.
    ///
    /// Checks run in order: format, existence, password, disabled flag, bans.
    pub async fn login(&self, user_name: &str, password: &str) -> Result<LoginOutcome> {
        validate_user_name(user_name)?;
        validate_password(password)?;

        let outcome = self.try_login(user_name, password).await;
        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.code().as_str(),
        };
        counter!("account_logins_total", "outcome" => label).increment(1);
        outcome
    }

    async fn try_login(&self, user_name: &str, password: &str) -> Result<LoginOutcome> {
        let user = match self.credentials.check_credentials(user_name, password).await? {
            CredentialCheck::Verified(user) => user,
            CredentialCheck::UnknownUser if self.unify_login_errors => {
                return Err(Error::InvalidCredentials)
            }
            CredentialCheck::UnknownUser => return Err(Error::UserNotFound),
            CredentialCheck::WrongPassword => {
                warn!(user_name, "login with wrong password");
                return Err(Error::InvalidCredentials);
            }
        };

        if user.disabled {
            return Err(Error::Disabled(user.user_id, user.disabled_reason));
        }
        if self.bans.is_banned(user.user_id).await? {
            return Err(Error::Banned(user.user_id));
        }

        let identity = Identity {
            user_id: user.user_id,
            user_name: user.user_name,
        };
        let token = self.tokens.issue(&identity)?;

        info!(user_id = identity.user_id, "user logged in");
        Ok(LoginOutcome { token, identity })
    }

    /// Bans `user_id` on behalf of an admitted admin.
    pub async fn ban(
        &self,
        operator: &Identity,
        user_id: u64,
        reason: &str,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Ban> {
        let ban = self.bans.ban(user_id, reason, issued_at, expires_at).await?;
        info!(operator = operator.user_id, user_id, reason, "user banned");
        Ok(ban)
    }

    /// Removes all bans of `user_id`.
    pub async fn unban(&self, operator: &Identity, user_id: u64) -> Result<u64> {
        let removed = self.bans.unban(user_id).await?;
        info!(operator = operator.user_id, user_id, removed, "user unbanned");
        Ok(removed)
    }

    /// Current user and ban counts.
    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            users: self.store.user_count().await?,
            banned_users: self.store.banned_user_count().await?,
        })
    }
}
