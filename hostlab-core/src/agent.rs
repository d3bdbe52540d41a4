//! Host container agent
//!
//! The agent is the container/bridge backend running on a node (LXC on the
//! stock setup). Every call is made over a session the caller supplies, so
//! concurrent workers each bring their own.

use async_trait::async_trait;

use crate::connection::RemoteSession;
use crate::error::{HostlabError, HostlabResult};
use crate::model::{Container, Network, User};
use crate::types::ResourceState;

/// A guest as listed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestInfo {
    pub name: String,
    pub state: ResourceState,
}

/// Resource consumption reported for one container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerUsage {
    pub memory_bytes: u64,
    pub cpu_nanos: u64,
    pub disk_bytes: u64,
}

#[async_trait]
pub trait HostAgent: Send + Sync {
    fn agent_type(&self) -> &'static str;

    /// Whether the agent's tooling is present on the node
    async fn installed(&self, session: &dyn RemoteSession) -> HostlabResult<bool>;

    /// Used space on the node's root filesystem, when it can be determined
    async fn disk_usage_percent(&self, session: &dyn RemoteSession) -> HostlabResult<Option<u8>>;

    /// Every guest the backend knows about, declared or not
    async fn list_containers(&self, session: &dyn RemoteSession) -> HostlabResult<Vec<GuestInfo>>;

    async fn container_state(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<ResourceState>;

    async fn create_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()>;

    async fn destroy_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()>;

    async fn start_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()>;

    async fn stop_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()>;

    /// Make sure a user account exists inside a created container
    async fn provision_user(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
        user: &User,
    ) -> HostlabResult<()>;

    /// Resource consumption of a running container
    async fn container_usage(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<ContainerUsage>;

    /// Restore a container from its shipping-container image
    async fn import_container(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        Err(HostlabError::NotImplemented {
            feature: format!(
                "container import for '{}' with {} agent",
                container.id(),
                self.agent_type()
            ),
        })
    }

    async fn network_state(
        &self,
        session: &dyn RemoteSession,
        network: &Network,
    ) -> HostlabResult<ResourceState>;

    async fn create_network(&self, session: &dyn RemoteSession, network: &Network)
        -> HostlabResult<()>;

    async fn destroy_network(
        &self,
        session: &dyn RemoteSession,
        network: &Network,
    ) -> HostlabResult<()>;

    async fn network_up(&self, session: &dyn RemoteSession, network: &Network) -> HostlabResult<()>;

    async fn network_down(&self, session: &dyn RemoteSession, network: &Network)
        -> HostlabResult<()>;
}
