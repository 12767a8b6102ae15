use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tenant_identity::config::IdentityConfig;
use tenant_identity::credentials::PasswordVault;
use tenant_identity::identity::{DeploymentMode, IdentityService};
use tenant_identity::storage::{MemorySessionStore, MemoryUserStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = IdentityConfig::load()?;

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "tenant_identity",
        "tenant-identity starting: RUST_LOG='{}', http_bind={}, session_duration_ms={}, region=+{}",
        rust_log, config.http_bind, config.session_duration_ms, config.phone_region.country_code
    );

    let mode = DeploymentMode::standalone(
        Arc::new(MemoryUserStore::new()),
        Arc::new(MemorySessionStore::new()),
        Arc::new(PasswordVault::new()),
    );
    let bind = config.http_bind.clone();
    let service = Arc::new(IdentityService::new(mode, config));
    tenant_identity::server::serve(service, &bind).await
}
