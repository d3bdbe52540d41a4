use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::definition::NetworkDefinition;
use super::node::Node;
use crate::address;
use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult};
use crate::lifecycle::Lifecycle;
use crate::observability::resource_span;
use crate::provisioner::{run_callbacks, HookTarget};
use crate::scheduler::Schedulable;
use crate::types::{Action, ConfigMap, ResourceKind, ResourceState};

/// A bridge on a node
#[derive(Debug)]
pub struct Network {
    id: String,
    node: Arc<Node>,
    address: String,
    bridge: String,
    priority: i64,
    provisioners: Vec<String>,
    config: ConfigMap,
}

impl Network {
    pub fn new(def: &NetworkDefinition, node: Arc<Node>) -> HostlabResult<Self> {
        address::ip(&def.address)
            .map_err(|e| HostlabError::network(&def.id, "load", e.to_string()))?;

        Ok(Self {
            id: def.id.clone(),
            node,
            address: def.address.clone(),
            bridge: def.bridge.clone(),
            priority: def.priority,
            provisioners: def.provisioners.clone(),
            config: def.config.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Bridge address in CIDR form
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn bridge(&self) -> &str {
        &self.bridge
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn provisioners(&self) -> &[String] {
        &self.provisioners
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn ip(&self) -> HostlabResult<Ipv4Addr> {
        address::ip(&self.address)
    }

    pub fn cidr(&self) -> HostlabResult<u8> {
        address::cidr(&self.address)
    }

    pub fn netmask(&self) -> HostlabResult<Ipv4Addr> {
        address::netmask(&self.address)
    }

    pub fn network(&self) -> HostlabResult<Ipv4Addr> {
        address::network(&self.address)
    }

    pub fn broadcast(&self) -> HostlabResult<Ipv4Addr> {
        address::broadcast(&self.address)
    }

    /// Backend-reported state; `Unknown` whenever the node is dead
    pub async fn state(&self, ctx: &ExecutionContext) -> ResourceState {
        if self.node.dead().await {
            return ResourceState::Unknown;
        }
        match self.query_state(ctx).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not query state of network '{}': {}", self.id, e);
                ResourceState::Unknown
            }
        }
    }

    async fn query_state(&self, ctx: &ExecutionContext) -> HostlabResult<ResourceState> {
        let session = ctx.connections().node_session(&self.node).await?;
        self.node.agent().network_state(session.as_ref(), self).await
    }

    /// Fails unless the owning node is running
    async fn require_node(&self, action: Action) -> HostlabResult<()> {
        if self.node.alive().await {
            Ok(())
        } else {
            Err(HostlabError::network(
                &self.id,
                action,
                format!("node '{}' is not running", self.node.id()),
            ))
        }
    }

    fn failed(&self, action: Action) -> impl FnOnce(HostlabError) -> HostlabError + '_ {
        move |e| HostlabError::network(&self.id, action, e.to_string())
    }

    fn span(&self, action: Action) -> tracing::Span {
        resource_span(ResourceKind::Network, &self.id, action)
    }

    async fn callbacks(&self, action: Action, ctx: &ExecutionContext) -> HostlabResult<()> {
        run_callbacks(HookTarget::Network(self), action, ctx).await
    }
}

#[async_trait]
impl Lifecycle for Network {
    async fn create(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            self.require_node(Action::Create).await?;
            let state = self.query_state(ctx).await.map_err(self.failed(Action::Create))?;
            if state == ResourceState::NotCreated {
                info!("Creating bridge {}", self.bridge);
                let session = ctx.connections().node_session(&self.node).await?;
                self.node
                    .agent()
                    .create_network(session.as_ref(), self)
                    .await
                    .map_err(self.failed(Action::Create))?;
            } else {
                debug!("Bridge {} already exists", self.bridge);
            }
            self.callbacks(Action::Create, ctx).await
        }
        .instrument(self.span(Action::Create))
        .await
    }

    async fn destroy(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            if self.node.dead().await {
                warn!("Node '{}' is not running; nothing to destroy", self.node.id());
                return Ok(());
            }
            let state = self.query_state(ctx).await.map_err(self.failed(Action::Destroy))?;
            if state == ResourceState::NotCreated {
                debug!("Bridge {} does not exist", self.bridge);
            } else {
                info!("Destroying bridge {}", self.bridge);
                let session = ctx.connections().node_session(&self.node).await?;
                self.node
                    .agent()
                    .destroy_network(session.as_ref(), self)
                    .await
                    .map_err(self.failed(Action::Destroy))?;
            }
            self.callbacks(Action::Destroy, ctx).await
        }
        .instrument(self.span(Action::Destroy))
        .await
    }

    async fn up(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            self.require_node(Action::Up).await?;
            info!("Bringing bridge {} up", self.bridge);
            let session = ctx.connections().node_session(&self.node).await?;
            self.node
                .agent()
                .network_up(session.as_ref(), self)
                .await
                .map_err(self.failed(Action::Up))?;
            self.callbacks(Action::Up, ctx).await
        }
        .instrument(self.span(Action::Up))
        .await
    }

    async fn down(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            if self.node.dead().await {
                warn!("Node '{}' is not running; nothing to bring down", self.node.id());
                return Ok(());
            }
            let state = self.query_state(ctx).await.map_err(self.failed(Action::Down))?;
            if state == ResourceState::NotCreated {
                debug!("Bridge {} does not exist", self.bridge);
            } else {
                info!("Bringing bridge {} down", self.bridge);
                let session = ctx.connections().node_session(&self.node).await?;
                self.node
                    .agent()
                    .network_down(session.as_ref(), self)
                    .await
                    .map_err(self.failed(Action::Down))?;
            }
            self.callbacks(Action::Down, ctx).await
        }
        .instrument(self.span(Action::Down))
        .await
    }

    async fn provision(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            self.require_node(Action::Provision).await?;
            self.callbacks(Action::Provision, ctx).await
        }
        .instrument(self.span(Action::Provision))
        .await
    }

    async fn deprovision(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            if self.node.dead().await {
                warn!("Node '{}' is not running; nothing to deprovision", self.node.id());
                return Ok(());
            }
            self.callbacks(Action::Deprovision, ctx).await
        }
        .instrument(self.span(Action::Deprovision))
        .await
    }
}

impl Schedulable for Network {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Network
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn node_id(&self) -> &str {
        self.node.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{single_stack_definition, TestLab};

    #[tokio::test]
    async fn test_state_unknown_when_node_dead() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        let network = topology.network("labnet").unwrap();

        assert_eq!(network.state(&ctx).await, ResourceState::Unknown);
        // No session was attempted for a dead node
        assert_eq!(lab.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_create_requires_running_node() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let err = topology
            .network("labnet")
            .unwrap()
            .create(&lab.context())
            .await
            .unwrap_err();

        assert!(matches!(err, HostlabError::Network { .. }));
        assert!(err.to_string().contains("not running"));
    }

    #[tokio::test]
    async fn test_create_up_and_idempotent_create() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        topology.node("host").unwrap().up(&ctx).await.unwrap();
        let network = topology.network("labnet").unwrap();

        network.create(&ctx).await.unwrap();
        network.create(&ctx).await.unwrap();
        network.up(&ctx).await.unwrap();

        assert_eq!(lab.log.matching("agent:create_network").len(), 1);
        assert_eq!(network.state(&ctx).await, ResourceState::Running);
        assert_eq!(network.broadcast().unwrap(), Ipv4Addr::new(10, 10, 255, 255));
    }

    #[tokio::test]
    async fn test_demolish_of_missing_bridge_skips_backend() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        topology.node("host").unwrap().up(&ctx).await.unwrap();
        let network = topology.network("labnet").unwrap();

        network.demolish(&ctx).await.unwrap();

        assert!(lab.log.matching("agent:network_down").is_empty());
        assert!(lab.log.matching("agent:destroy_network").is_empty());
        assert_eq!(network.state(&ctx).await, ResourceState::NotCreated);
    }

    #[tokio::test]
    async fn test_teardown_on_dead_node_is_skipped() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let network = topology.network("labnet").unwrap();

        network.demolish(&lab.context()).await.unwrap();
        assert!(lab.log.matching("labnet").is_empty());
    }
}
