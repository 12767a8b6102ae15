use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ident::{SessionId, TenantId, UserId};
use crate::phone::CanonicalPhone;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A user as owned by the storage collaborator. `user_id`, `tenant_id`,
/// `canonical_phone` and `created_at` never change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub canonical_phone: CanonicalPhone,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller input for user creation. Raw strings; the service validates and normalises.
#[derive(Clone, Default, Deserialize)]
pub struct NewUser {
    pub tenant_id: String,
    /// Generated when absent.
    #[serde(default)]
    pub user_id: Option<String>,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// Enrolled with the credential verifier when present (standalone only).
    #[serde(default)]
    pub secret: Option<String>,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .field("phone", &self.phone)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("metadata", &self.metadata)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.display_name.is_none() && self.metadata.is_none()
    }
}

/// Proof presented to `authenticate` in standalone mode.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub tenant_id: String,
    pub phone: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("phone", &self.phone)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Tenant-scoped session. Persisted in standalone mode; derived per call in delegated mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub roles: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Provider metadata; only populated in delegated mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl SessionContext {
    /// Expired means `expires_at` is strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool { self.expires_at < now }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Standalone: no record for the session id.
    NotFound,
    /// Standalone: record found past its expiry (and evicted).
    Expired,
    /// Delegated: the provider did not vouch for the token.
    Rejected,
    /// Delegated: claims carried no organization and unscoped sessions are refused.
    NoTenant,
}

impl Display for InvalidReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InvalidReason::NotFound => "session not found",
            InvalidReason::Expired => "session expired",
            InvalidReason::Rejected => "invalid or expired session",
            InvalidReason::NoTenant => "session has no tenant",
        })
    }
}

/// Outcome of validating a token. Invalid sessions are ordinary values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SessionValidation {
    Valid(SessionContext),
    Invalid(InvalidReason),
}

impl SessionValidation {
    pub fn is_valid(&self) -> bool { matches!(self, SessionValidation::Valid(_)) }

    pub fn context(&self) -> Option<&SessionContext> {
        match self {
            SessionValidation::Valid(ctx) => Some(ctx),
            SessionValidation::Invalid(_) => None,
        }
    }

    pub fn into_result(self) -> Result<SessionContext, InvalidReason> {
        match self {
            SessionValidation::Valid(ctx) => Ok(ctx),
            SessionValidation::Invalid(reason) => Err(reason),
        }
    }
}

/// Normalised tenant/user/role facts, as produced from provider claims and as
/// handed to authorization gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub roles: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub session_id: SessionId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TenantContext {
    pub fn has_tenant(&self) -> bool { !self.tenant_id.is_no_tenant() }
}

impl From<TenantContext> for SessionContext {
    fn from(t: TenantContext) -> Self {
        SessionContext {
            session_id: t.session_id,
            user_id: t.user_id,
            tenant_id: t.tenant_id,
            roles: t.roles,
            issued_at: t.issued_at,
            expires_at: t.expires_at,
            metadata: Some(t.metadata),
        }
    }
}

impl From<SessionContext> for TenantContext {
    fn from(s: SessionContext) -> Self {
        TenantContext {
            tenant_id: s.tenant_id,
            user_id: s.user_id,
            roles: s.roles,
            metadata: s.metadata.unwrap_or_default(),
            session_id: s.session_id,
            issued_at: s.issued_at,
            expires_at: s.expires_at,
        }
    }
}

/// Proof that a token is live, the user exists, and (delegated) the user is a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityResolution {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub roles: Vec<String>,
    pub profile: UserProfile,
}
