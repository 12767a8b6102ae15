//! Phone normalisation.
//!
//! Reduces the handful of ways people type a number for one region to a single
//! canonical international string (`+<cc><national significant number>`), which is
//! then used as a secondary lookup key for users inside a tenant. No tenant or
//! session awareness lives here.

use std::fmt::{Display, Formatter};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-().]").expect("separator pattern"));
static DIALABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\+)?([0-9]+)$").expect("dialable pattern"));

/// Numbering rules for the one region a deployment supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneRegion {
    /// Calling code without the leading '+', e.g. "234".
    pub country_code: String,
    /// Length of the national form *including* the trunk prefix.
    pub national_number_len: usize,
    /// Trunk prefix dialled domestically, e.g. "0".
    pub trunk_prefix: String,
}

impl PhoneRegion {
    pub fn nigeria() -> Self {
        Self { country_code: "234".into(), national_number_len: 11, trunk_prefix: "0".into() }
    }

    /// Length of the national significant number (national form minus trunk).
    pub fn significant_len(&self) -> usize { self.national_number_len - self.trunk_prefix.len() }

    pub fn canonical_len(&self) -> usize { 1 + self.country_code.len() + self.significant_len() }

    pub fn validate(&self) -> anyhow::Result<()> {
        let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if !all_digits(&self.country_code) {
            anyhow::bail!("phone_region.country_code must be digits, got '{}'", self.country_code);
        }
        if !all_digits(&self.trunk_prefix) {
            anyhow::bail!("phone_region.trunk_prefix must be digits, got '{}'", self.trunk_prefix);
        }
        if self.national_number_len <= self.trunk_prefix.len() {
            anyhow::bail!("phone_region.national_number_len must exceed the trunk prefix length");
        }
        Ok(())
    }
}

impl Default for PhoneRegion {
    fn default() -> Self { Self::nigeria() }
}

/// A phone number in canonical international form. Immutable once a user exists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPhone(String);

impl CanonicalPhone {
    pub fn as_str(&self) -> &str { &self.0 }

    /// Keep a provider-supplied value that could not be normalised.
    pub(crate) fn from_provider(raw: impl Into<String>) -> Self { Self(raw.into()) }
}

impl Display for CanonicalPhone {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Default)]
pub struct PhoneNormalizer {
    region: PhoneRegion,
}

impl PhoneNormalizer {
    pub fn new(region: PhoneRegion) -> Self { Self { region } }

    pub fn region(&self) -> &PhoneRegion { &self.region }

    /// Accepts, after stripping spaces, hyphens, parentheses and dots:
    /// `+<cc><nsn>`, `<cc><nsn>`, `<trunk><nsn>` and bare `<nsn>`.
    /// Only ASCII digits count, so byte length equals digit count below.
    pub fn normalize(&self, raw: &str) -> IdentityResult<CanonicalPhone> {
        let invalid = || IdentityError::InvalidPhoneFormat(raw.to_string());
        let cleaned = SEPARATORS.replace_all(raw.trim(), "");
        let caps = DIALABLE.captures(&cleaned).ok_or_else(invalid)?;
        let has_plus = caps.get(1).is_some();
        let digits = caps.get(2).map(|m| m.as_str()).ok_or_else(invalid)?;

        let r = &self.region;
        let nsn_len = r.significant_len();
        let nsn = if has_plus {
            digits.strip_prefix(r.country_code.as_str()).filter(|rest| rest.len() == nsn_len)
        } else if digits.len() == r.country_code.len() + nsn_len {
            digits.strip_prefix(r.country_code.as_str())
        } else if digits.len() == r.national_number_len {
            digits.strip_prefix(r.trunk_prefix.as_str())
        } else if digits.len() == nsn_len && !digits.starts_with(r.trunk_prefix.as_str()) {
            Some(digits)
        } else {
            None
        };
        let nsn = nsn.ok_or_else(invalid)?;
        Ok(CanonicalPhone(format!("+{}{}", r.country_code, nsn)))
    }

    pub fn is_valid(&self, raw: &str) -> bool { self.normalize(raw).is_ok() }

    /// Display form `+<cc> XXX XXX XXXX`. Only accepts exact canonical input.
    pub fn format(&self, canonical: &str) -> IdentityResult<String> {
        let invalid = || IdentityError::InvalidPhoneFormat(canonical.to_string());
        if canonical.len() != self.region.canonical_len() {
            return Err(invalid());
        }
        let nsn = canonical
            .strip_prefix('+')
            .and_then(|s| s.strip_prefix(self.region.country_code.as_str()))
            .filter(|s| s.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(invalid)?;
        let (a, rest) = nsn.split_at(nsn.len().min(3));
        let (b, c) = rest.split_at(rest.len().min(3));
        let groups: Vec<&str> = [a, b, c].into_iter().filter(|g| !g.is_empty()).collect();
        Ok(format!("+{} {}", self.region.country_code, groups.join(" ")))
    }
}
