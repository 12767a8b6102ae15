//! Tenant-scoped user lookup.
//!
//! Standalone: the user store is keyed by tenant, so lookups pass straight through.
//! Delegated: the provider indexes users globally, so every result is gated by the
//! membership guard for the tenant the caller asked about. A user outside that
//! tenant comes back as `None`, exactly like a user that does not exist.

use std::sync::Arc;

use tracing::debug;

use super::membership::MembershipGuard;
use super::mode::DeploymentMode;
use super::model::UserProfile;
use crate::error::IdentityResult;
use crate::ident::{Page, TenantId, UserId};
use crate::phone::{CanonicalPhone, PhoneNormalizer};
use crate::storage::{ExternalUser, IdentityProvider, UserStore};

#[derive(Clone)]
enum DirectoryBackend {
    Standalone(Arc<dyn UserStore>),
    Delegated { idp: Arc<dyn IdentityProvider>, guard: MembershipGuard },
}

#[derive(Clone)]
pub struct UserDirectory {
    backend: DirectoryBackend,
    phones: PhoneNormalizer,
}

impl UserDirectory {
    pub fn new(mode: &DeploymentMode, phones: PhoneNormalizer) -> Self {
        let backend = match mode {
            DeploymentMode::Standalone(b) => DirectoryBackend::Standalone(b.users.clone()),
            DeploymentMode::Delegated(b) => DirectoryBackend::Delegated {
                idp: b.idp.clone(),
                guard: MembershipGuard::new(b.idp.clone()),
            },
        };
        Self { backend, phones }
    }

    pub async fn get_user(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<Option<UserProfile>> {
        match &self.backend {
            DirectoryBackend::Standalone(store) => Ok(scoped(tenant, store.get_user(tenant, user).await?)),
            DirectoryBackend::Delegated { idp, guard } => {
                if !guard.is_member(tenant, user).await {
                    return Ok(None);
                }
                let found = idp.get_user(user.as_str()).await?;
                Ok(found.map(|ext| ext.into_profile(tenant, &self.phones)))
            }
        }
    }

    pub async fn get_user_by_phone(&self, tenant: &TenantId, phone: &CanonicalPhone) -> IdentityResult<Option<UserProfile>> {
        match &self.backend {
            DirectoryBackend::Standalone(store) => Ok(scoped(tenant, store.get_user_by_phone(tenant, phone).await?)),
            DirectoryBackend::Delegated { idp, guard } => {
                let found = idp.get_user_by_phone(phone).await?;
                Ok(self.gate(guard, tenant, found).await)
            }
        }
    }

    /// `email` must already be normalised.
    pub async fn get_user_by_email(&self, tenant: &TenantId, email: &str) -> IdentityResult<Option<UserProfile>> {
        match &self.backend {
            DirectoryBackend::Standalone(store) => Ok(scoped(tenant, store.get_user_by_email(tenant, email).await?)),
            DirectoryBackend::Delegated { idp, guard } => {
                let found = idp.get_user_by_email(email).await?;
                Ok(self.gate(guard, tenant, found).await)
            }
        }
    }

    pub async fn list_users(&self, tenant: &TenantId, page: Page) -> IdentityResult<Vec<UserProfile>> {
        match &self.backend {
            DirectoryBackend::Standalone(store) => {
                let mut users = store.list_users(tenant, page).await?;
                users.retain(|p| &p.tenant_id == tenant);
                Ok(users)
            }
            DirectoryBackend::Delegated { idp, .. } => {
                if tenant.is_no_tenant() {
                    return Ok(Vec::new());
                }
                // The member list is itself the tenant boundary here.
                let members = idp.list_organization_members(tenant).await?;
                let mut out = Vec::new();
                for id in members.iter().skip(page.offset).take(page.limit) {
                    match idp.get_user(id).await? {
                        Some(ext) => out.push(ext.into_profile(tenant, &self.phones)),
                        None => debug!(target: "tenant_identity::directory", tenant = %tenant, user = %id, "member has no provider record"),
                    }
                }
                Ok(out)
            }
        }
    }

    /// Membership gates the result after a global lookup resolved it.
    async fn gate(&self, guard: &MembershipGuard, tenant: &TenantId, found: Option<ExternalUser>) -> Option<UserProfile> {
        let ext = found?;
        let user = UserId::trusted(ext.id.as_str());
        if !guard.is_member(tenant, &user).await {
            debug!(target: "tenant_identity::directory", tenant = %tenant, user = %user, "lookup resolved outside tenant; hiding");
            return None;
        }
        Some(ext.into_profile(tenant, &self.phones))
    }
}

/// Drop anything a store hands back for a different tenant.
fn scoped(tenant: &TenantId, found: Option<UserProfile>) -> Option<UserProfile> {
    found.filter(|p| &p.tenant_id == tenant)
}
