//! Opaque identifier types and input shape checks
//! ----------------------------------------------
//! Single source of truth for what a tenant/user/session identifier may look like
//! before it is allowed anywhere near a collaborator. Identifiers are never parsed:
//! the only rules are "non-empty" and "at most `max_len` characters".

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

pub const DEFAULT_MAX_IDENTIFIER_LEN: usize = 255;

/// Tenant literal used when provider claims carry no organization.
/// It means "no tenant established" and must never be trusted for isolation.
pub const NO_TENANT: &str = "default";

fn check_shape(field: &'static str, raw: &str, max_len: usize) -> IdentityResult<()> {
    if raw.is_empty() {
        return Err(IdentityError::invalid_input(field, "must not be empty"));
    }
    if raw.chars().count() > max_len {
        return Err(IdentityError::invalid_input(field, format!("must be at most {} characters", max_len)));
    }
    Ok(())
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validate against the default length bound.
            pub fn new(raw: impl Into<String>) -> IdentityResult<Self> {
                Self::with_max_len(raw, DEFAULT_MAX_IDENTIFIER_LEN)
            }

            pub fn with_max_len(raw: impl Into<String>, max_len: usize) -> IdentityResult<Self> {
                let raw = raw.into();
                check_shape($field, &raw, max_len)?;
                Ok(Self(raw))
            }

            /// Wrap a value that already came out of a trusted collaborator.
            pub(crate) fn trusted(raw: impl Into<String>) -> Self { Self(raw.into()) }

            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str { &self.0 }
        }
    };
}

opaque_id!(
    /// Isolation boundary. Every user and session belongs to exactly one tenant.
    TenantId, "tenant_id"
);
opaque_id!(UserId, "user_id");
opaque_id!(
    /// Session handle; in standalone mode this is also the bearer token.
    SessionId, "session_id"
);

impl TenantId {
    pub fn no_tenant() -> Self { Self(NO_TENANT.to_string()) }

    pub fn is_no_tenant(&self) -> bool { self.0 == NO_TENANT }
}

impl SessionId {
    /// Short prefix safe to put in logs.
    pub fn fingerprint(&self) -> String { token_fingerprint(&self.0) }
}

pub fn token_fingerprint(token: &str) -> String {
    let head: String = token.chars().take(6).collect();
    format!("{}…", head)
}

/// Lowercase + trim an email and check its basic shape.
pub fn normalize_email(raw: &str, max_len: usize) -> IdentityResult<String> {
    let email = raw.trim().to_lowercase();
    check_shape("email", &email, max_len)?;
    let Some((local, domain)) = email.split_once('@') else {
        return Err(IdentityError::invalid_input("email", "missing '@'"));
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(IdentityError::invalid_input("email", "malformed address"));
    }
    Ok(email)
}

/// Offset/limit page request for `list_users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self { Self { limit, offset } }

    pub fn validate(self, max_page_size: usize) -> IdentityResult<Self> {
        if self.limit == 0 || self.limit > max_page_size {
            return Err(IdentityError::invalid_input("limit", format!("must be between 1 and {}", max_page_size)));
        }
        Ok(self)
    }
}

impl Default for Page {
    fn default() -> Self { Self { limit: 50, offset: 0 } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_overlong_identifiers() {
        assert!(matches!(TenantId::new(""), Err(IdentityError::InvalidInput { field: "tenant_id", .. })));
        assert!(UserId::new("u".repeat(255)).is_ok());
        assert!(matches!(UserId::new("u".repeat(256)), Err(IdentityError::InvalidInput { field: "user_id", .. })));
        assert!(SessionId::with_max_len("abcd", 3).is_err());
    }

    #[test]
    fn length_bound_counts_characters_not_bytes() {
        let multibyte = "é".repeat(255);
        assert!(TenantId::new(multibyte).is_ok());
    }

    #[test]
    fn no_tenant_sentinel_is_recognised() {
        assert!(TenantId::no_tenant().is_no_tenant());
        assert!(!TenantId::new("orgA").unwrap().is_no_tenant());
    }

    #[test]
    fn email_is_lowercased_and_checked() {
        assert_eq!(normalize_email("  Ada@Example.COM ", 255).unwrap(), "ada@example.com");
        assert!(normalize_email("no-at-sign", 255).is_err());
        assert!(normalize_email("a@b@c", 255).is_err());
        assert!(normalize_email("@example.com", 255).is_err());
    }

    #[test]
    fn page_bounds() {
        assert!(Page::new(0, 0).validate(500).is_err());
        assert!(Page::new(501, 0).validate(500).is_err());
        assert_eq!(Page::new(10, 20).validate(500).unwrap(), Page::new(10, 20));
    }

    #[test]
    fn fingerprint_never_exposes_full_token() {
        let sid = SessionId::new("abcdefghijklmnop").unwrap();
        assert_eq!(sid.fingerprint(), "abcdef…");
    }
}
