//! Caller-facing operations.
//!
//! Every raw string is shape-checked here before any collaborator is called.
//! User mutations, authentication and logout belong to this process only in
//! standalone mode; in delegated mode the provider owns them.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::directory::UserDirectory;
use super::mode::{DeploymentMode, StandaloneBackend};
use super::model::{Credentials, IdentityResolution, NewUser, SessionContext, SessionValidation, TenantContext, UserPatch, UserProfile};
use super::resolver::IdentityResolver;
use super::session::SessionResolver;
use crate::clock::{Clock, SystemClock};
use crate::config::IdentityConfig;
use crate::error::{IdentityError, IdentityResult};
use crate::ident::{normalize_email, Page, TenantId, UserId};
use crate::phone::PhoneNormalizer;

pub struct IdentityService {
    mode: DeploymentMode,
    config: IdentityConfig,
    clock: Arc<dyn Clock>,
    phones: PhoneNormalizer,
    resolver: IdentityResolver,
}

impl IdentityService {
    pub fn new(mode: DeploymentMode, config: IdentityConfig) -> Self {
        Self::with_clock(mode, config, Arc::new(SystemClock))
    }

    pub fn with_clock(mode: DeploymentMode, config: IdentityConfig, clock: Arc<dyn Clock>) -> Self {
        let phones = PhoneNormalizer::new(config.phone_region.clone());
        let sessions = SessionResolver::new(&mode, clock.clone(), config.session_duration(), config.max_identifier_len);
        let directory = UserDirectory::new(&mode, phones.clone());
        let resolver = IdentityResolver::new(sessions, directory, config.reject_unscoped_claims);
        info!(target: "tenant_identity::service", mode = mode.name(), session_ttl_ms = config.session_duration_ms, "identity service ready");
        Self { mode, config, clock, phones, resolver }
    }

    pub fn mode(&self) -> &DeploymentMode { &self.mode }

    pub fn config(&self) -> &IdentityConfig { &self.config }

    pub fn phones(&self) -> &PhoneNormalizer { &self.phones }

    fn standalone(&self, operation: &'static str) -> IdentityResult<&StandaloneBackend> {
        match &self.mode {
            DeploymentMode::Standalone(b) => Ok(b),
            DeploymentMode::Delegated(_) => Err(IdentityError::UnsupportedInMode { operation, mode: self.mode.name() }),
        }
    }

    fn tenant(&self, raw: &str) -> IdentityResult<TenantId> {
        TenantId::with_max_len(raw, self.config.max_identifier_len)
    }

    fn user(&self, raw: &str) -> IdentityResult<UserId> {
        UserId::with_max_len(raw, self.config.max_identifier_len)
    }

    fn bounded_text(&self, field: &'static str, raw: &str) -> IdentityResult<String> {
        if raw.chars().count() > self.config.max_identifier_len {
            return Err(IdentityError::invalid_input(field, format!("must be at most {} characters", self.config.max_identifier_len)));
        }
        Ok(raw.to_string())
    }

    fn email(&self, raw: Option<&str>) -> IdentityResult<Option<String>> {
        raw.map(|e| normalize_email(e, self.config.max_identifier_len)).transpose()
    }

    // ---- users ----

    pub async fn create_user(&self, input: NewUser) -> IdentityResult<UserProfile> {
        let tenant = self.tenant(&input.tenant_id)?;
        let user = match input.user_id.as_deref() {
            Some(id) => self.user(id)?,
            None => UserId::trusted(Uuid::new_v4().to_string()),
        };
        let canonical_phone = self.phones.normalize(&input.phone)?;
        let email = self.email(input.email.as_deref())?;
        let display_name = input.display_name.as_deref().map(|n| self.bounded_text("display_name", n)).transpose()?;
        if input.secret.as_deref().is_some_and(str::is_empty) {
            return Err(IdentityError::invalid_input("secret", "must not be empty"));
        }
        let backend = self.standalone("create_user")?;

        let now = self.clock.now();
        let profile = UserProfile {
            user_id: user,
            tenant_id: tenant,
            canonical_phone,
            email,
            display_name,
            metadata: input.metadata,
            created_at: now,
            updated_at: now,
        };
        let created = backend.users.create_user(profile).await?;
        if let Some(secret) = input.secret.as_deref() {
            if let Err(e) = backend.credentials.enroll(&created, secret).await {
                // Never leave a user behind without its secret.
                warn!(target: "tenant_identity::service", tenant = %created.tenant_id, user = %created.user_id, "secret enrollment failed; removing user: {e:#}");
                backend.users.delete_user(&created.tenant_id, &created.user_id).await?;
                return Err(e.into());
            }
        }
        info!(target: "tenant_identity::service", tenant = %created.tenant_id, user = %created.user_id, "user created");
        Ok(created)
    }

    pub async fn get_user(&self, tenant: &str, user: &str) -> IdentityResult<Option<UserProfile>> {
        let (tenant, user) = (self.tenant(tenant)?, self.user(user)?);
        self.resolver.directory().get_user(&tenant, &user).await
    }

    pub async fn get_user_by_phone(&self, tenant: &str, phone: &str) -> IdentityResult<Option<UserProfile>> {
        let tenant = self.tenant(tenant)?;
        let phone = self.phones.normalize(phone)?;
        self.resolver.directory().get_user_by_phone(&tenant, &phone).await
    }

    pub async fn get_user_by_email(&self, tenant: &str, email: &str) -> IdentityResult<Option<UserProfile>> {
        let tenant = self.tenant(tenant)?;
        let email = normalize_email(email, self.config.max_identifier_len)?;
        self.resolver.directory().get_user_by_email(&tenant, &email).await
    }

    pub async fn update_user(&self, tenant: &str, user: &str, patch: UserPatch) -> IdentityResult<UserProfile> {
        let (tenant, user) = (self.tenant(tenant)?, self.user(user)?);
        let patch = UserPatch {
            email: self.email(patch.email.as_deref())?,
            display_name: patch.display_name.as_deref().map(|n| self.bounded_text("display_name", n)).transpose()?,
            metadata: patch.metadata,
        };
        let backend = self.standalone("update_user")?;
        let updated = backend.users.update_user(&tenant, &user, &patch, self.clock.now()).await?;
        info!(target: "tenant_identity::service", tenant = %tenant, user = %user, "user updated");
        Ok(updated)
    }

    /// Removes the user, its enrolled secret and every session it holds.
    pub async fn delete_user(&self, tenant: &str, user: &str) -> IdentityResult<bool> {
        let (tenant, user) = (self.tenant(tenant)?, self.user(user)?);
        let backend = self.standalone("delete_user")?;
        if let Some(profile) = backend.users.get_user(&tenant, &user).await? {
            backend.credentials.revoke(&profile).await?;
        }
        let removed = backend.users.delete_user(&tenant, &user).await?;
        let sessions = backend.sessions.delete_user_sessions(&tenant, &user).await?;
        info!(target: "tenant_identity::service", tenant = %tenant, user = %user, removed, sessions, "user deleted");
        Ok(removed)
    }

    pub async fn list_users(&self, tenant: &str, page: Option<Page>) -> IdentityResult<Vec<UserProfile>> {
        let tenant = self.tenant(tenant)?;
        let page = page
            .unwrap_or(Page::new(self.config.default_page_size, 0))
            .validate(self.config.max_page_size)?;
        self.resolver.directory().list_users(&tenant, page).await
    }

    // ---- sessions ----

    /// Standalone login. Unknown user and wrong secret are indistinguishable.
    pub async fn authenticate(&self, credentials: &Credentials, roles: Vec<String>) -> IdentityResult<SessionContext> {
        let tenant = self.tenant(&credentials.tenant_id)?;
        let phone = self.phones.normalize(&credentials.phone)?;
        for role in &roles {
            if role.is_empty() || role.chars().count() > self.config.max_identifier_len {
                return Err(IdentityError::invalid_input("role", format!("must be 1 to {} characters", self.config.max_identifier_len)));
            }
        }
        let backend = self.standalone("authenticate")?;

        let Some(profile) = backend.users.get_user_by_phone(&tenant, &phone).await? else {
            info!(target: "tenant_identity::service", tenant = %tenant, "authentication failed");
            return Err(IdentityError::InvalidCredentials);
        };
        if !backend.credentials.verify(&profile, &credentials.secret).await? {
            info!(target: "tenant_identity::service", tenant = %tenant, user = %profile.user_id, "authentication failed");
            return Err(IdentityError::InvalidCredentials);
        }
        self.resolver.sessions().issue(&tenant, &profile.user_id, roles).await
    }

    pub async fn validate_session(&self, token: &str) -> IdentityResult<SessionValidation> {
        self.resolver.sessions().validate(token).await
    }

    pub async fn resolve_identity(&self, token: &str) -> IdentityResult<IdentityResolution> {
        self.resolver.resolve_identity(token).await
    }

    pub async fn assert_tenant_context(&self, token: &str) -> IdentityResult<TenantContext> {
        self.resolver.assert_tenant_context(token).await
    }

    pub async fn logout(&self, token: &str) -> IdentityResult<bool> {
        self.resolver.sessions().logout(token).await
    }

    pub async fn logout_all(&self, tenant: &str, user: &str) -> IdentityResult<usize> {
        let (tenant, user) = (self.tenant(tenant)?, self.user(user)?);
        self.resolver.sessions().logout_all(&tenant, &user).await
    }
}
