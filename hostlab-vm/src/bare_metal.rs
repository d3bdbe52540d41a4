//! Provider for hosts that already exist and are always on
//!
//! Lifecycle primitives do nothing; the node is reported as running no
//! matter what. Connection details come from the `bare_metal` section of
//! the node configuration.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use hostlab_core::error::HostlabResult;
use hostlab_core::provider::{Provider, ProviderFactory};
use hostlab_core::types::{config_str, config_u64, ConfigMap, ResourceState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BareMetalProvider {
    instance_id: String,
    ip: String,
    port: u16,
    user: String,
    identity: PathBuf,
}

impl BareMetalProvider {
    pub fn new(node_id: &str, config: &ConfigMap) -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
        Self {
            instance_id: config_str(config, "bare_metal", "id")
                .or_else(|| std::env::var("HOSTNAME").ok())
                .unwrap_or_else(|| node_id.to_string()),
            ip: config_str(config, "bare_metal", "ip").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: config_u64(config, "bare_metal", "port")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(22),
            user: config_str(config, "bare_metal", "user")
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "root".to_string()),
            identity: config_str(config, "bare_metal", "identity")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(home).join(".ssh").join("id_rsa")),
        }
    }
}

#[async_trait]
impl Provider for BareMetalProvider {
    fn provider_type(&self) -> &'static str {
        "bare_metal"
    }

    async fn create(&self) -> HostlabResult<()> {
        Ok(())
    }

    async fn destroy(&self) -> HostlabResult<()> {
        Ok(())
    }

    async fn up(&self) -> HostlabResult<()> {
        Ok(())
    }

    async fn down(&self) -> HostlabResult<()> {
        Ok(())
    }

    async fn state(&self) -> ResourceState {
        ResourceState::Running
    }

    fn instance_id(&self) -> String {
        self.instance_id.clone()
    }

    fn ip(&self) -> String {
        self.ip.clone()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn user(&self) -> String {
        self.user.clone()
    }

    fn identity(&self) -> Option<PathBuf> {
        Some(self.identity.clone())
    }
}

pub struct BareMetalProviderFactory;

impl ProviderFactory for BareMetalProviderFactory {
    fn create_provider(&self, node_id: &str, config: &ConfigMap) -> HostlabResult<Arc<dyn Provider>> {
        Ok(Arc::new(BareMetalProvider::new(node_id, config)))
    }

    fn provider_type(&self) -> &'static str {
        "bare_metal"
    }

    fn description(&self) -> &'static str {
        "Existing, always-on host reached over SSH"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_always_running_and_noop() {
        let provider = BareMetalProvider::new("host", &ConfigMap::new());
        provider.down().await.unwrap();
        provider.destroy().await.unwrap();
        assert_eq!(provider.state().await, ResourceState::Running);
        assert!(provider.exists().await);
        assert!(provider.alive().await);
        assert_eq!(provider.ip(), "127.0.0.1");
        assert_eq!(provider.port(), 22);
    }

    #[test]
    fn test_reads_bare_metal_section() {
        let config = match json!({
            "bare_metal": {
                "ip": "203.0.113.7",
                "port": 2222,
                "user": "ops",
                "identity": "/keys/ops",
                "id": "rack-7",
            }
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let provider = BareMetalProvider::new("host", &config);
        assert_eq!(provider.ip(), "203.0.113.7");
        assert_eq!(provider.port(), 2222);
        assert_eq!(provider.user(), "ops");
        assert_eq!(provider.identity(), Some(PathBuf::from("/keys/ops")));
        assert_eq!(provider.instance_id(), "rack-7");
    }
}
