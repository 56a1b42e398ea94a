#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    config::Config,
    identity::{IdentityServiceValidator, IdentityValidator},
    orchestrator::ServiceOrchestrator,
    presence::{PresenceService, PresenceStore, store},
};

pub mod config;
pub mod identity;
pub mod orchestrator;
pub mod presence;
pub mod rpc;
pub mod server;

pub async fn build_store(config: &Config) -> Result<Arc<dyn PresenceStore>> {
    match config.store.url.as_deref() {
        Some(url) => {
            let store = store::postgres(url, &config.store)
                .await
                .context("connect presence store")?;
            info!(
                database = %config.store.database,
                collection = %config.store.collection,
                "presence store ready"
            );
            Ok(store)
        }
        None => {
            warn!("STORE_URL not set; presence records are kept in memory");
            Ok(store::memory())
        }
    }
}

pub async fn build_orchestrator(config: Config) -> Result<ServiceOrchestrator> {
    let store = build_store(&config).await?;
    let presence = Arc::new(PresenceService::new(store, config.store.clone()));
    let validator: Arc<dyn IdentityValidator> =
        Arc::new(IdentityServiceValidator::from_config(&config));
    if config.development {
        warn!("development mode: identity checks are skipped");
    }
    Ok(ServiceOrchestrator::new(config, presence, validator))
}
