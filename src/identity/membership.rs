use std::sync::Arc;

use tracing::{debug, warn};

use crate::ident::{TenantId, UserId};
use crate::storage::IdentityProvider;

/// Tenant-isolation gate for delegated mode.
///
/// Every call asks the provider for the current member list; nothing is cached,
/// since a membership revoked mid-session must take effect on the next call.
/// A directory that cannot be reached answers "not a member".
#[derive(Clone)]
pub struct MembershipGuard {
    idp: Arc<dyn IdentityProvider>,
}

impl MembershipGuard {
    pub fn new(idp: Arc<dyn IdentityProvider>) -> Self { Self { idp } }

    pub async fn is_member(&self, tenant: &TenantId, user: &UserId) -> bool {
        if tenant.is_no_tenant() {
            debug!(target: "tenant_identity::membership", user = %user, "no-tenant sentinel has no members");
            return false;
        }
        match self.idp.list_organization_members(tenant).await {
            Ok(members) => {
                let member = members.iter().any(|m| m == user.as_str());
                debug!(target: "tenant_identity::membership", tenant = %tenant, user = %user, member, "membership checked");
                member
            }
            Err(e) => {
                warn!(target: "tenant_identity::membership", tenant = %tenant, user = %user, error = %e, "directory unreachable; denying membership");
                false
            }
        }
    }
}
