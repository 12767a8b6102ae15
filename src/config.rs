use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ident::DEFAULT_MAX_IDENTIFIER_LEN;
use crate::phone::PhoneRegion;

pub const CONFIG_PATH_ENV: &str = "TENANT_IDENTITY_CONFIG";
pub const SESSION_DURATION_ENV: &str = "TENANT_IDENTITY_SESSION_DURATION_MS";
pub const HTTP_BIND_ENV: &str = "TENANT_IDENTITY_HTTP_BIND";
pub const REJECT_UNSCOPED_ENV: &str = "TENANT_IDENTITY_REJECT_UNSCOPED";

/// Longest accepted session lifetime: one year.
pub const MAX_SESSION_DURATION_MS: u64 = 366 * 24 * 60 * 60 * 1000;

/// Runtime settings for the identity core and its HTTP frontend.
/// Unspecified keys in a config file fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Lifetime of a standalone session from issuance.
    pub session_duration_ms: u64,
    /// Upper bound on tenant/user/session identifiers and tokens.
    pub max_identifier_len: usize,
    pub phone_region: PhoneRegion,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Treat delegated sessions without an organization as invalid.
    pub reject_unscoped_claims: bool,
    pub http_bind: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            session_duration_ms: 24 * 60 * 60 * 1000,
            max_identifier_len: DEFAULT_MAX_IDENTIFIER_LEN,
            phone_region: PhoneRegion::default(),
            default_page_size: 50,
            max_page_size: 500,
            reject_unscoped_claims: false,
            http_bind: "127.0.0.1:7879".to_string(),
        }
    }
}

impl IdentityConfig {
    /// Defaults, then the JSON file named by `TENANT_IDENTITY_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_slice(&bytes).with_context(|| format!("parsing config '{}'", path.display()))?;
        Ok(cfg)
    }

    /// Overlay environment values. `lookup` is injected so tests need not touch process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(SESSION_DURATION_ENV) {
            self.session_duration_ms = v.trim().parse().with_context(|| format!("{} must be an integer, got '{}'", SESSION_DURATION_ENV, v))?;
        }
        if let Some(v) = lookup(HTTP_BIND_ENV) {
            self.http_bind = v.trim().to_string();
        }
        if let Some(v) = lookup(REJECT_UNSCOPED_ENV) {
            self.reject_unscoped_claims = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => anyhow::bail!("{} must be a boolean, got '{}'", REJECT_UNSCOPED_ENV, other),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_duration_ms == 0 {
            anyhow::bail!("session_duration_ms must be greater than zero");
        }
        if self.session_duration_ms > MAX_SESSION_DURATION_MS {
            anyhow::bail!("session_duration_ms must be at most {} (one year), got {}", MAX_SESSION_DURATION_MS, self.session_duration_ms);
        }
        if self.max_identifier_len == 0 {
            anyhow::bail!("max_identifier_len must be greater than zero");
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            anyhow::bail!("default_page_size must be between 1 and max_page_size ({})", self.max_page_size);
        }
        self.phone_region.validate()
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.session_duration_ms).unwrap_or(i64::MAX))
    }
}
