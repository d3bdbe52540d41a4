//! Provider contract
//!
//! A provider is the backend a [`Node`](crate::model::Node) delegates its
//! infrastructure primitives to (a Vagrant VM, a bare-metal host, ...).
//! Each node owns exactly one provider instance, built from the node's
//! configuration by a [`ProviderFactory`] looked up in a [`ProviderRegistry`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{HostlabError, HostlabResult};
use crate::types::{ConfigMap, ResourceState};

/// Infrastructure primitives for one node
///
/// `create` and `destroy` must be idempotent: creating something that
/// already exists, or destroying something that is absent, is a no-op.
/// `state` never fails; anything the backend reports that does not map to a
/// known state is [`ResourceState::Unknown`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registered type name, e.g. `vagrant`
    fn provider_type(&self) -> &'static str;

    async fn create(&self) -> HostlabResult<()>;

    async fn destroy(&self) -> HostlabResult<()>;

    async fn up(&self) -> HostlabResult<()>;

    async fn down(&self) -> HostlabResult<()>;

    async fn reload(&self) -> HostlabResult<()> {
        self.down().await?;
        self.up().await
    }

    async fn state(&self) -> ResourceState;

    async fn exists(&self) -> bool {
        self.state().await != ResourceState::NotCreated
    }

    async fn alive(&self) -> bool {
        self.state().await == ResourceState::Running
    }

    async fn dead(&self) -> bool {
        !self.alive().await
    }

    /// Whether [`Provider::import`] can stand in for create/up/provision
    fn importable(&self) -> bool {
        false
    }

    async fn import(&self) -> HostlabResult<()> {
        Err(HostlabError::NotImplemented {
            feature: format!("import for {} provider", self.provider_type()),
        })
    }

    fn instance_id(&self) -> String;

    fn ip(&self) -> String;

    fn port(&self) -> u16;

    fn user(&self) -> String;

    /// Private key used for direct sessions
    fn identity(&self) -> Option<PathBuf>;
}

/// Factory trait for creating providers
pub trait ProviderFactory: Send + Sync {
    /// Build a provider for the node `node_id` from the node's configuration
    fn create_provider(&self, node_id: &str, config: &ConfigMap) -> HostlabResult<Arc<dyn Provider>>;

    fn provider_type(&self) -> &'static str;

    fn description(&self) -> &'static str;
}

/// Registry for provider factories
///
/// Empty by default; concrete providers register themselves from the crate
/// that implements them.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        let provider_type = factory.provider_type().to_string();
        tracing::debug!(
            "Registering provider: {} ({})",
            provider_type,
            factory.description()
        );
        self.factories.insert(provider_type, factory);
    }

    /// Create a provider of the given type for one node
    pub fn create_provider(
        &self,
        provider_type: &str,
        node_id: &str,
        config: &ConfigMap,
    ) -> HostlabResult<Arc<dyn Provider>> {
        let factory = self.factories.get(provider_type).ok_or_else(|| {
            HostlabError::topology(format!(
                "Unknown provider type '{}' for node '{}'. Available providers: {:?}",
                provider_type,
                node_id,
                self.list_available_providers()
            ))
        })?;

        factory.create_provider(node_id, config)
    }

    /// Registered type names, sorted
    pub fn list_available_providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn get_provider_info(&self) -> Vec<(String, String)> {
        self.factories
            .values()
            .map(|f| (f.provider_type().to_string(), f.description().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EventLog, RecordingProviderFactory};

    #[test]
    fn test_provider_registry() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.list_available_providers().is_empty());

        registry.register(Arc::new(RecordingProviderFactory::new(EventLog::new())));
        assert_eq!(registry.list_available_providers(), vec!["recording"]);
        assert_eq!(registry.get_provider_info().len(), 1);
    }

    #[test]
    fn test_unknown_provider_error() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(RecordingProviderFactory::new(EventLog::new())));

        let err = registry
            .create_provider("libvirt", "host-1", &ConfigMap::new())
            .err()
            .unwrap();
        let msg = err.to_string();
        assert!(msg.contains("Unknown provider type 'libvirt'"));
        assert!(msg.contains("recording"));
    }

    #[tokio::test]
    async fn test_default_reload_is_down_then_up() {
        let log = EventLog::new();
        let provider = RecordingProviderFactory::new(log.clone())
            .create_provider("host-1", &ConfigMap::new())
            .unwrap();

        provider.reload().await.unwrap();
        assert_eq!(
            log.events(),
            vec!["provider:host-1:down", "provider:host-1:up"]
        );
    }
}
