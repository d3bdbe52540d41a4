use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

use super::definition::NodeDefinition;
use crate::agent::HostAgent;
use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult};
use crate::lifecycle::Lifecycle;
use crate::observability::resource_span;
use crate::provider::Provider;
use crate::provisioner::{run_callbacks, HookTarget};
use crate::scheduler::Schedulable;
use crate::types::{config_str, Action, ConfigMap, ResourceKind, ResourceState};

const DEFAULT_DOMAIN: &str = "tld.invalid";

/// A host managed through its provider
///
/// The node forwards the provider's operation set as explicit methods;
/// anything else is not part of its interface.
pub struct Node {
    id: String,
    priority: i64,
    provider: Arc<dyn Provider>,
    agent: Arc<dyn HostAgent>,
    provisioners: Vec<String>,
    config: ConfigMap,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("provider", &self.provider.provider_type())
            .field("agent", &self.agent.agent_type())
            .field("provisioners", &self.provisioners)
            .finish()
    }
}

impl Node {
    pub fn new(def: &NodeDefinition, provider: Arc<dyn Provider>, agent: Arc<dyn HostAgent>) -> Self {
        Self {
            id: def.id.clone(),
            priority: def.priority,
            provider,
            agent,
            provisioners: def.provisioners.clone(),
            config: def.config.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn agent(&self) -> &Arc<dyn HostAgent> {
        &self.agent
    }

    pub fn provisioners(&self) -> &[String] {
        &self.provisioners
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    /// DNS domain for the node's containers (`bind.domain`)
    pub fn domain(&self) -> String {
        config_str(&self.config, "bind", "domain").unwrap_or_else(|| DEFAULT_DOMAIN.to_string())
    }

    pub fn instance_id(&self) -> String {
        self.provider.instance_id()
    }

    pub async fn state(&self) -> ResourceState {
        self.provider.state().await
    }

    pub async fn exists(&self) -> bool {
        self.provider.exists().await
    }

    pub async fn alive(&self) -> bool {
        self.provider.alive().await
    }

    pub async fn dead(&self) -> bool {
        self.provider.dead().await
    }

    pub async fn reload(&self) -> HostlabResult<()> {
        self.provider
            .reload()
            .await
            .map_err(|e| HostlabError::node(&self.id, "reload", e.to_string()))
    }

    pub fn ip(&self) -> String {
        self.provider.ip()
    }

    pub fn port(&self) -> u16 {
        self.provider.port()
    }

    pub fn user(&self) -> String {
        self.provider.user()
    }

    pub fn identity(&self) -> Option<PathBuf> {
        self.provider.identity()
    }

    async fn callbacks(&self, action: Action, ctx: &ExecutionContext) -> HostlabResult<()> {
        run_callbacks(HookTarget::Node(self), action, ctx).await
    }

    fn failed(&self, action: Action) -> impl FnOnce(HostlabError) -> HostlabError + '_ {
        move |e| HostlabError::node(&self.id, action, e.to_string())
    }

    fn span(&self, action: Action) -> tracing::Span {
        resource_span(ResourceKind::Node, &self.id, action)
    }
}

#[async_trait]
impl Lifecycle for Node {
    async fn create(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            if self.provider.exists().await {
                debug!("Node already exists");
            } else {
                info!("Creating node");
                self.provider.create().await.map_err(self.failed(Action::Create))?;
            }
            self.callbacks(Action::Create, ctx).await
        }
        .instrument(self.span(Action::Create))
        .await
    }

    async fn destroy(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            if self.provider.exists().await {
                info!("Destroying node");
                self.provider.destroy().await.map_err(self.failed(Action::Destroy))?;
            } else {
                debug!("Node does not exist");
            }
            self.callbacks(Action::Destroy, ctx).await
        }
        .instrument(self.span(Action::Destroy))
        .await
    }

    async fn up(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            info!("Bringing node up");
            self.provider.up().await.map_err(self.failed(Action::Up))?;
            self.callbacks(Action::Up, ctx).await
        }
        .instrument(self.span(Action::Up))
        .await
    }

    async fn down(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            info!("Bringing node down");
            // Sessions to a halted host are useless
            ctx.connections().shutdown_node(&self.id).await;
            self.provider.down().await.map_err(self.failed(Action::Down))?;
            self.callbacks(Action::Down, ctx).await
        }
        .instrument(self.span(Action::Down))
        .await
    }

    async fn provision(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        self.callbacks(Action::Provision, ctx)
            .instrument(self.span(Action::Provision))
            .await
    }

    async fn deprovision(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        self.callbacks(Action::Deprovision, ctx)
            .instrument(self.span(Action::Deprovision))
            .await
    }

    fn importable(&self) -> bool {
        self.provider.importable()
    }

    async fn import(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            info!("Importing node");
            self.provider.import().await.map_err(self.failed(Action::Import))?;
            self.callbacks(Action::Import, ctx).await
        }
        .instrument(self.span(Action::Import))
        .await
    }
}

impl Schedulable for Node {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Node
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn node_id(&self) -> &str {
        &self.id
    }
}
