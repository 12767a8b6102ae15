//! Session validation.
//!
//! Per call: token received → shape-checked (or rejected with `InvalidInput`) →
//! looked up (standalone) or verified and mapped from claims (delegated) →
//! `Valid(context)` or `Invalid(reason)`. Nothing is kept between calls. Expiry is
//! checked lazily here; there is no sweeper.

use std::sync::Arc;

use base64::Engine;
use chrono::Duration;
use tracing::{debug, info};

use super::claims::extract_tenant_context;
use super::mode::DeploymentMode;
use super::model::{InvalidReason, SessionContext, SessionValidation};
use crate::clock::Clock;
use crate::error::{IdentityError, IdentityResult};
use crate::ident::{SessionId, TenantId, UserId};
use crate::storage::{IdentityProvider, SessionStore};

fn gen_id() -> IdentityResult<String> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow::anyhow!("session id entropy: {}", e))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

#[derive(Clone)]
enum SessionBackend {
    Standalone(Arc<dyn SessionStore>),
    Delegated(Arc<dyn IdentityProvider>),
}

#[derive(Clone)]
pub struct SessionResolver {
    backend: SessionBackend,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_token_len: usize,
}

impl SessionResolver {
    pub fn new(mode: &DeploymentMode, clock: Arc<dyn Clock>, ttl: Duration, max_token_len: usize) -> Self {
        let backend = match mode {
            DeploymentMode::Standalone(b) => SessionBackend::Standalone(b.sessions.clone()),
            DeploymentMode::Delegated(b) => SessionBackend::Delegated(b.idp.clone()),
        };
        Self { backend, clock, ttl, max_token_len }
    }

    fn mode_name(&self) -> &'static str {
        match self.backend {
            SessionBackend::Standalone(_) => "standalone",
            SessionBackend::Delegated(_) => "delegated",
        }
    }

    fn standalone_store(&self, operation: &'static str) -> IdentityResult<&Arc<dyn SessionStore>> {
        match &self.backend {
            SessionBackend::Standalone(store) => Ok(store),
            SessionBackend::Delegated(_) => Err(IdentityError::UnsupportedInMode { operation, mode: self.mode_name() }),
        }
    }

    pub fn parse_token(&self, token: &str) -> IdentityResult<SessionId> {
        SessionId::with_max_len(token, self.max_token_len)
    }

    pub async fn validate(&self, token: &str) -> IdentityResult<SessionValidation> {
        let sid = self.parse_token(token)?;
        match &self.backend {
            SessionBackend::Standalone(store) => self.validate_stored(store.as_ref(), &sid).await,
            SessionBackend::Delegated(idp) => self.validate_claims(idp.as_ref(), &sid).await,
        }
    }

    async fn validate_stored(&self, store: &dyn SessionStore, sid: &SessionId) -> IdentityResult<SessionValidation> {
        let Some(ctx) = store.get_session(sid).await? else {
            debug!(target: "tenant_identity::session", sid = %sid.fingerprint(), "session not found");
            return Ok(SessionValidation::Invalid(InvalidReason::NotFound));
        };
        let now = self.clock.now();
        if ctx.is_expired_at(now) {
            // A concurrent logout may already have removed it.
            store.delete_session(sid).await?;
            debug!(target: "tenant_identity::session", sid = %sid.fingerprint(), expired_at = %ctx.expires_at, "session expired; evicted");
            return Ok(SessionValidation::Invalid(InvalidReason::Expired));
        }
        Ok(SessionValidation::Valid(ctx))
    }

    async fn validate_claims(&self, idp: &dyn IdentityProvider, token: &SessionId) -> IdentityResult<SessionValidation> {
        let Some(claims) = idp.verify_session(token.as_str()).await? else {
            debug!(target: "tenant_identity::session", sid = %token.fingerprint(), "provider rejected token");
            return Ok(SessionValidation::Invalid(InvalidReason::Rejected));
        };
        let ctx = extract_tenant_context(&claims)?;
        Ok(SessionValidation::Valid(ctx.into()))
    }

    /// Create and persist a standalone session for an already-authenticated user.
    pub async fn issue(&self, tenant: &TenantId, user: &UserId, roles: Vec<String>) -> IdentityResult<SessionContext> {
        let store = self.standalone_store("authenticate")?;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| anyhow::anyhow!("session expiry out of range (ttl {}ms)", self.ttl.num_milliseconds()))?;
        let ctx = SessionContext {
            session_id: SessionId::trusted(gen_id()?),
            user_id: user.clone(),
            tenant_id: tenant.clone(),
            roles,
            issued_at: now,
            expires_at,
            metadata: None,
        };
        store.create_session(ctx.clone()).await?;
        info!(target: "tenant_identity::session", tenant = %tenant, user = %user, sid = %ctx.session_id.fingerprint(), ttl_ms = self.ttl.num_milliseconds(), "session issued");
        Ok(ctx)
    }

    pub async fn logout(&self, token: &str) -> IdentityResult<bool> {
        let store = self.standalone_store("logout")?;
        let sid = self.parse_token(token)?;
        let removed = store.delete_session(&sid).await?;
        info!(target: "tenant_identity::session", sid = %sid.fingerprint(), removed, "logout");
        Ok(removed)
    }

    pub async fn logout_all(&self, tenant: &TenantId, user: &UserId) -> IdentityResult<usize> {
        let store = self.standalone_store("logout_all")?;
        let count = store.delete_user_sessions(tenant, user).await?;
        info!(target: "tenant_identity::session", tenant = %tenant, user = %user, count, "sessions revoked");
        Ok(count)
    }
}
