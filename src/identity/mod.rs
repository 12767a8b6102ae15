//! Tenant-scoped identity: sessions, membership and user lookup across
//! standalone and delegated deployments.
//! Keep the public surface thin and split implementation across sub-modules.

mod model;
mod claims;
mod mode;
mod membership;
mod session;
mod directory;
mod resolver;
mod service;

pub use model::{
    Credentials, IdentityResolution, InvalidReason, Metadata, NewUser, SessionContext, SessionValidation, TenantContext,
    UserPatch, UserProfile,
};
pub use claims::{extract_tenant_context, ProviderClaims};
pub use mode::{DelegatedBackend, DeploymentMode, StandaloneBackend};
pub use membership::MembershipGuard;
pub use session::SessionResolver;
pub use directory::UserDirectory;
pub use resolver::IdentityResolver;
pub use service::IdentityService;
