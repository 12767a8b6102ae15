//!
//! Collaborator contracts
//! ----------------------
//! The identity core never owns persistence. It calls three collaborators:
//!
//! - `UserStore`: tenant-scoped user records (tenant is part of every key).
//! - `SessionStore`: standalone-mode session records.
//! - `IdentityProvider`: delegated-mode verification, global user lookup and
//!   the authoritative organization member list.
//!
//! `memory` holds in-process implementations of all three, used by tests and the
//! bundled server binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IdentityResult;
use crate::ident::{Page, SessionId, TenantId, UserId};
use crate::identity::{Metadata, ProviderClaims, SessionContext, UserPatch, UserProfile};
use crate::phone::{CanonicalPhone, PhoneNormalizer};

pub mod memory;

pub use memory::{MemoryIdentityProvider, MemorySessionStore, MemoryUserStore};

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `DuplicateUser` on a (tenant, id), (tenant, phone) or (tenant, email) collision.
    async fn create_user(&self, profile: UserProfile) -> IdentityResult<UserProfile>;
    async fn get_user(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<Option<UserProfile>>;
    async fn get_user_by_phone(&self, tenant: &TenantId, phone: &CanonicalPhone) -> IdentityResult<Option<UserProfile>>;
    /// `email` is already lowercased.
    async fn get_user_by_email(&self, tenant: &TenantId, email: &str) -> IdentityResult<Option<UserProfile>>;
    /// Applies the patch, keeps identity fields, sets `updated_at = now`.
    /// Fails with `UserNotFound` when absent.
    async fn update_user(&self, tenant: &TenantId, user: &UserId, patch: &UserPatch, now: DateTime<Utc>) -> IdentityResult<UserProfile>;
    /// Removes the record and every secondary index entry. Returns whether it existed.
    async fn delete_user(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<bool>;
    /// Stable, otherwise unspecified order.
    async fn list_users(&self, tenant: &TenantId, page: Page) -> IdentityResult<Vec<UserProfile>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: SessionContext) -> IdentityResult<()>;
    async fn get_session(&self, id: &SessionId) -> IdentityResult<Option<SessionContext>>;
    async fn delete_session(&self, id: &SessionId) -> IdentityResult<bool>;
    /// Deletes every session of that tenant+user pair and returns how many went.
    async fn delete_user_sessions(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<usize>;
}

/// User record as the identity provider holds it. Global, not tenant-scoped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalUser {
    pub id: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, alias = "public_metadata")]
    pub metadata: Option<Metadata>,
    /// Milliseconds since epoch.
    pub created_at: i64,
    /// Milliseconds since epoch.
    pub updated_at: i64,
}

impl ExternalUser {
    /// Project into a profile under the tenant the caller asked about.
    /// Only call after membership in `tenant` has been established.
    pub fn into_profile(self, tenant: &TenantId, phones: &PhoneNormalizer) -> UserProfile {
        let raw_phone = self.phone_number.unwrap_or_default();
        let canonical_phone = match phones.normalize(&raw_phone) {
            Ok(p) => p,
            Err(_) => {
                debug!(target: "tenant_identity::directory", user = %self.id, "provider phone not normalisable; keeping raw value");
                CanonicalPhone::from_provider(raw_phone)
            }
        };
        let display_name = match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(f), Some(l)) if !f.is_empty() && !l.is_empty() => Some(format!("{} {}", f, l)),
            (Some(f), _) if !f.is_empty() => Some(f.to_string()),
            (_, Some(l)) if !l.is_empty() => Some(l.to_string()),
            _ => None,
        };
        let timestamp = |field: &str, ms: i64| {
            DateTime::from_timestamp_millis(ms).unwrap_or_else(|| {
                debug!(target: "tenant_identity::directory", user = %self.id, field, ms, "provider timestamp out of range; using epoch");
                DateTime::<Utc>::default()
            })
        };
        let (created_at, updated_at) = (timestamp("created_at", self.created_at), timestamp("updated_at", self.updated_at));
        UserProfile {
            user_id: UserId::trusted(self.id),
            tenant_id: tenant.clone(),
            canonical_phone,
            email: self.email.map(|e| e.trim().to_lowercase()),
            display_name,
            metadata: self.metadata,
            created_at,
            updated_at,
        }
    }
}

/// Delegated-mode collaborator. Errors are opaque transport/provider failures.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Claims for a live token, `None` for anything the provider will not vouch for.
    /// Expiry is the provider's business.
    async fn verify_session(&self, token: &str) -> anyhow::Result<Option<ProviderClaims>>;
    async fn get_user(&self, external_id: &str) -> anyhow::Result<Option<ExternalUser>>;
    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<ExternalUser>>;
    async fn get_user_by_phone(&self, phone: &CanonicalPhone) -> anyhow::Result<Option<ExternalUser>>;
    /// Authoritative member user ids of the organization.
    async fn list_organization_members(&self, tenant: &TenantId) -> anyhow::Result<Vec<String>>;
}
