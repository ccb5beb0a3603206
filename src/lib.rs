use std::sync::Arc;
use tracing::info;

pub mod agent;
pub mod auth;
pub mod config;
pub mod identity;
pub mod logging;

use agent::HttpAgent;
use auth::{ChannelBinder, FileSessionStore, IdentityProviderGateway, SessionManager};

/// Session manager wired to a file store and an HTTP agent
///
/// There is exactly one store handle; the manager owns it and the agent only
/// ever sees identities through the binder.
pub struct SessionClient {
    manager: SessionManager,
    agent: Arc<HttpAgent>,
}

impl SessionClient {
    pub fn from_config(
        config: &config::Config,
        gateway: Arc<dyn IdentityProviderGateway>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let agent = Arc::new(HttpAgent::new(
            config.replica_url()?,
            config.request_timeout(),
        )?);
        let store = Arc::new(FileSessionStore::new(config.session_store_path.clone()));
        let binder = ChannelBinder::new(agent.clone());

        info!(
            provider = %config.identity_provider_url()?,
            store = %config.session_store_path.display(),
            "Session client configured"
        );

        let manager = SessionManager::new(config.session_manager_config()?, store, gateway, binder);
        Ok(Self { manager, agent })
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub fn agent(&self) -> Arc<HttpAgent> {
        Arc::clone(&self.agent)
    }
}
