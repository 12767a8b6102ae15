use std::sync::Arc;

use crate::credentials::CredentialVerifier;
use crate::storage::{IdentityProvider, SessionStore, UserStore};

/// Which collaborators back this deployment. Chosen once at construction; every
/// component matches on it instead of probing optional fields.
#[derive(Clone)]
pub enum DeploymentMode {
    /// This process issues and stores sessions itself.
    Standalone(StandaloneBackend),
    /// An external identity provider issues sessions and owns users/memberships.
    Delegated(DelegatedBackend),
}

#[derive(Clone)]
pub struct StandaloneBackend {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub credentials: Arc<dyn CredentialVerifier>,
}

#[derive(Clone)]
pub struct DelegatedBackend {
    pub idp: Arc<dyn IdentityProvider>,
}

impl DeploymentMode {
    pub fn standalone(users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>, credentials: Arc<dyn CredentialVerifier>) -> Self {
        DeploymentMode::Standalone(StandaloneBackend { users, sessions, credentials })
    }

    pub fn delegated(idp: Arc<dyn IdentityProvider>) -> Self {
        DeploymentMode::Delegated(DelegatedBackend { idp })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeploymentMode::Standalone(_) => "standalone",
            DeploymentMode::Delegated(_) => "delegated",
        }
    }
}

impl std::fmt::Debug for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
