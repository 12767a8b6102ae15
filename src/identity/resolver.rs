use tracing::debug;

use super::directory::UserDirectory;
use super::model::{IdentityResolution, InvalidReason, SessionContext, SessionValidation, TenantContext};
use super::session::SessionResolver;
use crate::error::{IdentityError, IdentityResult};
use crate::ident::token_fingerprint;

/// Token → identity. Composes session validation, (delegated) membership and the
/// tenant-scoped profile lookup. Fails closed on every path.
#[derive(Clone)]
pub struct IdentityResolver {
    sessions: SessionResolver,
    directory: UserDirectory,
    reject_unscoped: bool,
}

impl IdentityResolver {
    pub fn new(sessions: SessionResolver, directory: UserDirectory, reject_unscoped: bool) -> Self {
        Self { sessions, directory, reject_unscoped }
    }

    pub fn sessions(&self) -> &SessionResolver { &self.sessions }

    pub fn directory(&self) -> &UserDirectory { &self.directory }

    /// Validate, then apply the unscoped-claims policy.
    async fn live_context(&self, token: &str) -> IdentityResult<Result<SessionContext, InvalidReason>> {
        let ctx = match self.sessions.validate(token).await? {
            SessionValidation::Valid(ctx) => ctx,
            SessionValidation::Invalid(reason) => return Ok(Err(reason)),
        };
        if self.reject_unscoped && ctx.tenant_id.is_no_tenant() {
            return Ok(Err(InvalidReason::NoTenant));
        }
        Ok(Ok(ctx))
    }

    /// Full identity. Fails with `UnresolvableIdentity` when the session is invalid
    /// or when the user can no longer be found in the session's tenant.
    pub async fn resolve_identity(&self, token: &str) -> IdentityResult<IdentityResolution> {
        let ctx = match self.live_context(token).await? {
            Ok(ctx) => ctx,
            Err(reason) => {
                debug!(target: "tenant_identity::resolver", token = %token_fingerprint(token), %reason, "identity unresolvable");
                return Err(IdentityError::unresolvable(reason.to_string()));
            }
        };
        let profile = self
            .directory
            .get_user(&ctx.tenant_id, &ctx.user_id)
            .await?
            .filter(|p| p.tenant_id == ctx.tenant_id && p.user_id == ctx.user_id)
            .ok_or_else(|| {
                debug!(target: "tenant_identity::resolver", tenant = %ctx.tenant_id, user = %ctx.user_id, "valid session but no profile");
                IdentityError::unresolvable("user not found")
            })?;
        Ok(IdentityResolution {
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
            roles: ctx.roles,
            profile,
        })
    }

    /// Cheap gate for authorization: tenant/user/roles without a profile fetch.
    /// Any invalid session is `Unauthorized`.
    pub async fn assert_tenant_context(&self, token: &str) -> IdentityResult<TenantContext> {
        match self.live_context(token).await? {
            Ok(ctx) => Ok(ctx.into()),
            Err(reason) => {
                debug!(target: "tenant_identity::resolver", token = %token_fingerprint(token), %reason, "access denied");
                Err(IdentityError::unauthorized(reason.to_string()))
            }
        }
    }
}
