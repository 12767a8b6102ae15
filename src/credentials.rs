use std::collections::HashMap;

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};

use crate::ident::{TenantId, UserId};
use crate::identity::UserProfile;

/// Checks a secret presented for a user. How the secret is proven (password,
/// OTP, …) is up to the implementation.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, user: &UserProfile, secret: &str) -> Result<bool>;

    /// Record (or replace) the secret for a freshly created user.
    async fn enroll(&self, user: &UserProfile, secret: &str) -> Result<()>;

    /// Forget the user's secret. Returns whether one was held.
    async fn revoke(&self, user: &UserProfile) -> Result<bool>;
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Argon2 PHC hashes per (tenant, user).
#[derive(Default)]
pub struct PasswordVault {
    hashes: RwLock<HashMap<(TenantId, UserId), String>>,
}

impl PasswordVault {
    pub fn new() -> Self { Self::default() }

    pub fn set_password(&self, tenant: &TenantId, user: &UserId, password: &str) -> Result<()> {
        let phc = hash_password(password)?;
        self.hashes.write().insert((tenant.clone(), user.clone()), phc);
        Ok(())
    }

    pub fn remove(&self, tenant: &TenantId, user: &UserId) -> bool {
        self.hashes.write().remove(&(tenant.clone(), user.clone())).is_some()
    }
}

#[async_trait]
impl CredentialVerifier for PasswordVault {
    async fn verify(&self, user: &UserProfile, secret: &str) -> Result<bool> {
        let Some(phc) = self.hashes.read().get(&(user.tenant_id.clone(), user.user_id.clone())).cloned() else {
            return Ok(false);
        };
        // CPU-bound; run on the blocking pool.
        let secret = secret.to_string();
        let ok = tokio::task::spawn_blocking(move || verify_password(&phc, &secret)).await?;
        Ok(ok)
    }

    async fn enroll(&self, user: &UserProfile, secret: &str) -> Result<()> {
        let secret = secret.to_string();
        let phc = tokio::task::spawn_blocking(move || hash_password(&secret)).await??;
        self.hashes.write().insert((user.tenant_id.clone(), user.user_id.clone()), phc);
        Ok(())
    }

    async fn revoke(&self, user: &UserProfile) -> Result<bool> {
        Ok(self.remove(&user.tenant_id, &user.user_id))
    }
}
