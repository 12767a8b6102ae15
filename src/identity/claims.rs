//! Provider claims → tenant context.
//!
//! Pure mapping with no I/O. Role order is primary role first, then metadata
//! `roles` in the order given. Duplicates are kept on purpose: callers may count roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{Metadata, TenantContext};
use crate::error::{IdentityError, IdentityResult};
use crate::ident::{SessionId, TenantId, UserId};

/// Claims bundle as returned by the identity provider after it verified a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderClaims {
    /// Subject (provider user id).
    pub sub: String,
    /// Provider session id.
    pub sid: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub org_role: Option<String>,
    #[serde(default, alias = "public_metadata")]
    pub metadata: Option<Metadata>,
    /// Issued at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch.
    pub exp: i64,
}

fn instant_from_secs(field: &str, secs: i64) -> IdentityResult<DateTime<Utc>> {
    if secs < 0 {
        return Err(IdentityError::MalformedClaims(format!("{} is negative ({})", field, secs)));
    }
    secs.checked_mul(1000)
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| IdentityError::MalformedClaims(format!("{} is out of range ({})", field, secs)))
}

fn roles_from(claims: &ProviderClaims) -> Vec<String> {
    let mut roles = Vec::new();
    if let Some(primary) = claims.org_role.as_deref().filter(|r| !r.is_empty()) {
        roles.push(primary.to_string());
    }
    let listed = claims.metadata.as_ref().and_then(|m| m.get("roles")).and_then(|v| v.as_array());
    if let Some(listed) = listed {
        for v in listed {
            match v.as_str() {
                Some(role) if !role.is_empty() => roles.push(role.to_string()),
                _ => debug!(target: "tenant_identity::claims", "ignoring non-string metadata role {}", v),
            }
        }
    }
    roles
}

/// Normalise provider claims. Only timestamps (and empty subject/session ids) can fail.
pub fn extract_tenant_context(claims: &ProviderClaims) -> IdentityResult<TenantContext> {
    let issued_at = instant_from_secs("iat", claims.iat)?;
    let expires_at = instant_from_secs("exp", claims.exp)?;
    if claims.sub.is_empty() {
        return Err(IdentityError::MalformedClaims("sub is empty".into()));
    }
    if claims.sid.is_empty() {
        return Err(IdentityError::MalformedClaims("sid is empty".into()));
    }
    let tenant_id = match claims.org_id.as_deref().filter(|o| !o.is_empty()) {
        Some(org) => TenantId::trusted(org),
        None => TenantId::no_tenant(),
    };
    Ok(TenantContext {
        tenant_id,
        user_id: UserId::trusted(claims.sub.as_str()),
        roles: roles_from(claims),
        metadata: claims.metadata.clone().unwrap_or_default(),
        session_id: SessionId::trusted(claims.sid.as_str()),
        issued_at,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(org: Option<&str>, role: Option<&str>, metadata: Option<serde_json::Value>) -> ProviderClaims {
        ProviderClaims {
            sub: "user_1".into(),
            sid: "sess_1".into(),
            org_id: org.map(String::from),
            org_role: role.map(String::from),
            metadata: metadata.and_then(|m| m.as_object().cloned()),
            iat: 1_700_000_000,
            exp: 1_700_003_600,
        }
    }

    #[test]
    fn primary_role_then_metadata_roles() {
        let c = claims(Some("orgA"), Some("admin"), Some(json!({"roles": ["billing"]})));
        let ctx = extract_tenant_context(&c).unwrap();
        assert_eq!(ctx.tenant_id.as_str(), "orgA");
        assert_eq!(ctx.roles, vec!["admin".to_string(), "billing".to_string()]);
        assert_eq!(ctx.user_id.as_str(), "user_1");
        assert_eq!(ctx.session_id.as_str(), "sess_1");
    }

    #[test]
    fn duplicate_roles_are_preserved() {
        let c = claims(Some("orgA"), Some("admin"), Some(json!({"roles": ["admin", "billing"]})));
        let ctx = extract_tenant_context(&c).unwrap();
        assert_eq!(ctx.roles, vec!["admin", "admin", "billing"]);
    }

    #[test]
    fn missing_org_falls_back_to_sentinel() {
        let ctx = extract_tenant_context(&claims(None, None, None)).unwrap();
        assert!(ctx.tenant_id.is_no_tenant());
        assert!(!ctx.has_tenant());
        assert!(ctx.roles.is_empty());

        let ctx = extract_tenant_context(&claims(Some(""), None, None)).unwrap();
        assert!(ctx.tenant_id.is_no_tenant());
    }

    #[test]
    fn non_string_metadata_roles_are_skipped() {
        let c = claims(Some("orgA"), None, Some(json!({"roles": ["ops", 7, null, ""], "plan": "pro"})));
        let ctx = extract_tenant_context(&c).unwrap();
        assert_eq!(ctx.roles, vec!["ops"]);
        assert_eq!(ctx.metadata.get("plan"), Some(&json!("pro")));
    }

    #[test]
    fn timestamps_become_millisecond_instants() {
        let ctx = extract_tenant_context(&claims(Some("orgA"), None, None)).unwrap();
        assert_eq!(ctx.issued_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(ctx.expires_at.timestamp_millis(), 1_700_003_600_000);
    }

    #[test]
    fn malformed_timestamps_fail() {
        let mut c = claims(Some("orgA"), None, None);
        c.exp = -5;
        assert!(matches!(extract_tenant_context(&c), Err(IdentityError::MalformedClaims(_))));
        let mut c = claims(Some("orgA"), None, None);
        c.iat = i64::MAX;
        assert!(matches!(extract_tenant_context(&c), Err(IdentityError::MalformedClaims(_))));
    }

    #[test]
    fn public_metadata_alias_is_accepted() {
        let c: ProviderClaims = serde_json::from_value(json!({
            "sub": "u", "sid": "s", "org_id": "orgA", "org_role": "member",
            "public_metadata": {"roles": ["viewer"]}, "iat": 1, "exp": 2
        })).unwrap();
        let ctx = extract_tenant_context(&c).unwrap();
        assert_eq!(ctx.roles, vec!["member", "viewer"]);
    }
}
