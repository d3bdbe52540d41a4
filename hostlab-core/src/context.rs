//! Per-worker execution context

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, Connector};
use crate::error::HostlabResult;
use crate::provisioner::ProvisionerRegistry;

/// What a lifecycle action needs besides the resource itself
///
/// The configuration and provisioner registry are read-only and shared.
/// The connection cache is owned: a forked context starts with no sessions.
pub struct ExecutionContext {
    config: Arc<EngineConfig>,
    connections: ConnectionManager,
    provisioners: Arc<ProvisionerRegistry>,
}

impl ExecutionContext {
    /// Fails when `config` does not pass [`EngineConfig::validate`]
    pub fn new(
        config: EngineConfig,
        connector: Arc<dyn Connector>,
        provisioners: ProvisionerRegistry,
    ) -> HostlabResult<Self> {
        config.validate()?;
        let connections = ConnectionManager::new(connector, config.session.clone());
        Ok(Self {
            config: Arc::new(config),
            connections,
            provisioners: Arc::new(provisioners),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn provisioners(&self) -> &ProvisionerRegistry {
        &self.provisioners
    }

    /// Context for a concurrent worker
    pub fn fork(&self) -> Self {
        Self {
            config: self.config.clone(),
            connections: self.connections.fork(),
            provisioners: self.provisioners.clone(),
        }
    }
}
