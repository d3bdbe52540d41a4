use async_trait::async_trait;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::definition::{ContainerDefinition, InterfaceDefinition};
use super::interface::Interface;
use super::network::Network;
use super::node::Node;
use super::user::User;
use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult};
use crate::lifecycle::Lifecycle;
use crate::observability::resource_span;
use crate::provisioner::{run_callbacks, HookTarget};
use crate::scheduler::Schedulable;
use crate::types::{Action, ConfigMap, ResourceKind, ResourceState};

const DEFAULT_DISTRO: &str = "ubuntu";
const DEFAULT_RELEASE: &str = "precise";

/// Resolved container attributes
///
/// A plain value: inheritance copies a parent spec once at load time and
/// nothing links the two afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub id: String,
    pub inherit: Option<String>,
    pub template: bool,
    pub domain: Option<String>,
    pub distro: String,
    pub release: String,
    pub arch: Option<String>,
    pub persist: bool,
    pub priority: i64,
    pub provisioners: Vec<String>,
    pub config: ConfigMap,
    /// `None` means the default, `[id]`
    pub tags: Option<Vec<String>>,
    pub mounts: Vec<String>,
    pub sc_url: Option<String>,
    pub aa_profile: Option<String>,
    pub cap_drop: Vec<String>,
    pub interfaces: Vec<InterfaceDefinition>,
    pub users: Vec<User>,
}

impl ContainerSpec {
    /// A spec with defaults for everything the definition leaves out
    pub fn from_definition(def: &ContainerDefinition) -> Self {
        Self {
            id: def.id.clone(),
            inherit: def.inherit.clone(),
            template: def.template,
            domain: def.domain.clone(),
            distro: def.distro.clone().unwrap_or_else(|| DEFAULT_DISTRO.to_string()),
            release: def.release.clone().unwrap_or_else(|| DEFAULT_RELEASE.to_string()),
            arch: def.arch.clone(),
            persist: def.persist.unwrap_or(true),
            priority: def.priority.unwrap_or(0),
            provisioners: def.provisioners.clone().unwrap_or_default(),
            config: def.config.clone().unwrap_or_default(),
            tags: def.tags.clone(),
            mounts: def.mounts.clone().unwrap_or_default(),
            sc_url: def.sc_url.clone(),
            aa_profile: def.aa_profile.clone(),
            cap_drop: def.cap_drop.clone().unwrap_or_default(),
            interfaces: def.interfaces.clone(),
            users: def.users.iter().map(User::from).collect(),
        }
    }

    /// Build a child spec from its parent
    ///
    /// Everything but the identity (`id`, `inherit`, `template`) and the
    /// interfaces is copied from the parent, then any attribute the child
    /// sets explicitly wins. The child's own users come first, followed by
    /// copies of the parent's.
    pub fn derive_from(parent: &ContainerSpec, child: &ContainerDefinition) -> Self {
        let mut spec = parent.clone();
        spec.id = child.id.clone();
        spec.inherit = child.inherit.clone();
        spec.template = child.template;
        spec.interfaces = child.interfaces.clone();

        if let Some(domain) = &child.domain {
            spec.domain = Some(domain.clone());
        }
        if let Some(distro) = &child.distro {
            spec.distro = distro.clone();
        }
        if let Some(release) = &child.release {
            spec.release = release.clone();
        }
        if let Some(arch) = &child.arch {
            spec.arch = Some(arch.clone());
        }
        if let Some(persist) = child.persist {
            spec.persist = persist;
        }
        if let Some(priority) = child.priority {
            spec.priority = priority;
        }
        if let Some(provisioners) = &child.provisioners {
            spec.provisioners = provisioners.clone();
        }
        if let Some(config) = &child.config {
            spec.config = config.clone();
        }
        if let Some(tags) = &child.tags {
            spec.tags = Some(tags.clone());
        }
        if let Some(mounts) = &child.mounts {
            spec.mounts = mounts.clone();
        }
        if let Some(sc_url) = &child.sc_url {
            spec.sc_url = Some(sc_url.clone());
        }
        if let Some(aa_profile) = &child.aa_profile {
            spec.aa_profile = Some(aa_profile.clone());
        }
        if let Some(cap_drop) = &child.cap_drop {
            spec.cap_drop = cap_drop.clone();
        }

        spec.users = child
            .users
            .iter()
            .map(User::from)
            .chain(parent.users.iter().cloned())
            .collect();

        spec
    }
}

/// Storage mode of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerMode {
    /// Memory-backed copy discarded on stop
    Ephemeral,
    Persistent,
    Unknown,
}

impl ContainerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerMode::Ephemeral => "ephemeral",
            ContainerMode::Persistent => "persistent",
            ContainerMode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContainerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guest on a node
#[derive(Debug)]
pub struct Container {
    spec: ContainerSpec,
    node: Arc<Node>,
    interfaces: Vec<Interface>,
}

impl Container {
    /// Attach a resolved spec to its node, resolving interfaces against
    /// the node's networks
    pub fn new<'a, F>(spec: ContainerSpec, node: Arc<Node>, find_network: F) -> HostlabResult<Self>
    where
        F: Fn(&str) -> Option<&'a Arc<Network>>,
    {
        let interfaces = spec
            .interfaces
            .iter()
            .map(|def| {
                let network = find_network(&def.network_id).ok_or_else(|| {
                    HostlabError::interface(
                        &format!("{}-{}", spec.id, def.name),
                        "load",
                        format!("unknown network '{}'", def.network_id),
                    )
                })?;
                Interface::resolve(&spec.id, def, network.clone())
            })
            .collect::<HostlabResult<Vec<_>>>()?;

        Ok(Self {
            spec,
            node,
            interfaces,
        })
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn template(&self) -> bool {
        self.spec.template
    }

    pub fn inherit(&self) -> Option<&str> {
        self.spec.inherit.as_deref()
    }

    pub fn distro(&self) -> &str {
        &self.spec.distro
    }

    pub fn release(&self) -> &str {
        &self.spec.release
    }

    pub fn arch(&self) -> Option<&str> {
        self.spec.arch.as_deref()
    }

    pub fn persist(&self) -> bool {
        self.spec.persist
    }

    pub fn priority(&self) -> i64 {
        self.spec.priority
    }

    pub fn provisioners(&self) -> &[String] {
        &self.spec.provisioners
    }

    pub fn config(&self) -> &ConfigMap {
        &self.spec.config
    }

    pub fn tags(&self) -> Vec<String> {
        self.spec
            .tags
            .clone()
            .unwrap_or_else(|| vec![self.spec.id.clone()])
    }

    pub fn mounts(&self) -> &[String] {
        &self.spec.mounts
    }

    pub fn sc_url(&self) -> Option<&str> {
        self.spec.sc_url.as_deref()
    }

    pub fn aa_profile(&self) -> Option<&str> {
        self.spec.aa_profile.as_deref()
    }

    pub fn cap_drop(&self) -> &[String] {
        &self.spec.cap_drop
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn users(&self) -> &[User] {
        &self.spec.users
    }

    /// The first interface marked primary, else the first interface
    pub fn primary_interface(&self) -> Option<&Interface> {
        self.interfaces
            .iter()
            .find(|i| i.primary())
            .or_else(|| self.interfaces.first())
    }

    pub fn primary_user(&self) -> Option<&User> {
        self.spec.users.first()
    }

    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.primary_interface().and_then(|i| i.ip().ok())
    }

    pub fn cidr(&self) -> Option<u8> {
        self.primary_interface().and_then(|i| i.cidr().ok())
    }

    pub fn ptr(&self) -> Option<String> {
        self.primary_interface().and_then(|i| i.ptr().ok())
    }

    /// Own domain, falling back to the node's
    pub fn domain(&self) -> String {
        self.spec.domain.clone().unwrap_or_else(|| self.node.domain())
    }

    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.spec.id, self.domain())
    }

    /// Backend-reported state; `Unknown` whenever the node is dead
    pub async fn state(&self, ctx: &ExecutionContext) -> ResourceState {
        if self.node.dead().await {
            return ResourceState::Unknown;
        }
        match self.query_state(ctx).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not query state of container '{}': {}", self.id(), e);
                ResourceState::Unknown
            }
        }
    }

    pub async fn mode(&self) -> ContainerMode {
        if self.node.dead().await {
            ContainerMode::Unknown
        } else if self.spec.persist {
            ContainerMode::Persistent
        } else {
            ContainerMode::Ephemeral
        }
    }

    async fn query_state(&self, ctx: &ExecutionContext) -> HostlabResult<ResourceState> {
        let session = ctx.connections().node_session(&self.node).await?;
        self.node.agent().container_state(session.as_ref(), self).await
    }

    async fn require_node(&self, action: Action) -> HostlabResult<()> {
        if self.node.alive().await {
            Ok(())
        } else {
            Err(HostlabError::container(
                self.id(),
                action,
                format!("node '{}' is not running", self.node.id()),
            ))
        }
    }

    fn failed(&self, action: Action) -> impl FnOnce(HostlabError) -> HostlabError + '_ {
        move |e| HostlabError::container(self.id(), action, e.to_string())
    }

    fn span(&self, action: Action) -> tracing::Span {
        resource_span(ResourceKind::Container, self.id(), action)
    }

    async fn callbacks(&self, action: Action, ctx: &ExecutionContext) -> HostlabResult<()> {
        run_callbacks(HookTarget::Container(self), action, ctx).await
    }
}

#[async_trait]
impl Lifecycle for Container {
    async fn create(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            self.require_node(Action::Create).await?;
            let state = self.query_state(ctx).await.map_err(self.failed(Action::Create))?;
            if state == ResourceState::NotCreated {
                info!("Creating {} {} container", self.distro(), self.release());
                let session = ctx.connections().node_session(&self.node).await?;
                self.node
                    .agent()
                    .create_container(session.as_ref(), self)
                    .await
                    .map_err(self.failed(Action::Create))?;
            } else {
                debug!("Container already exists ({})", state);
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
                debug!("Container does not exist");
            } else {
                info!("Destroying container");
                let session = ctx.connections().node_session(&self.node).await?;
                self.node
                    .agent()
                    .destroy_container(session.as_ref(), self)
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
            let state = self.query_state(ctx).await.map_err(self.failed(Action::Up))?;
            match state {
                ResourceState::Running => debug!("Container already running"),
                ResourceState::NotCreated => {
                    return Err(HostlabError::container(
                        self.id(),
                        Action::Up,
                        "container has not been created",
                    ))
                }
                _ => {
                    info!("Starting container ({})", self.mode().await);
                    let session = ctx.connections().node_session(&self.node).await?;
                    self.node
                        .agent()
                        .start_container(session.as_ref(), self)
                        .await
                        .map_err(self.failed(Action::Up))?;
                }
            }
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
            // Sessions into a stopped guest are useless
            ctx.connections().close_container(self).await;

            let state = self.query_state(ctx).await.map_err(self.failed(Action::Down))?;
            if state == ResourceState::Running {
                info!("Stopping container");
                let session = ctx.connections().node_session(&self.node).await?;
                self.node
                    .agent()
                    .stop_container(session.as_ref(), self)
                    .await
                    .map_err(self.failed(Action::Down))?;
            } else {
                debug!("Container not running ({})", state);
            }
            self.callbacks(Action::Down, ctx).await
        }
        .instrument(self.span(Action::Down))
        .await
    }

    async fn provision(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            self.require_node(Action::Provision).await?;
            let session = ctx.connections().node_session(&self.node).await?;
            for user in self.users() {
                debug!("Provisioning user {}", user.username);
                self.node
                    .agent()
                    .provision_user(session.as_ref(), self, user)
                    .await
                    .map_err(self.failed(Action::Provision))?;
            }
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

    /// Containers with a shipping-container image can be imported
    fn importable(&self) -> bool {
        self.spec.sc_url.is_some()
    }

    async fn import(&self, ctx: &ExecutionContext) -> HostlabResult<()> {
        async {
            self.require_node(Action::Import).await?;
            info!("Importing container from {}", self.sc_url().unwrap_or_default());
            let session = ctx.connections().node_session(&self.node).await?;
            self.node
                .agent()
                .import_container(session.as_ref(), self)
                .await
                .map_err(self.failed(Action::Import))?;
            self.callbacks(Action::Import, ctx).await
        }
        .instrument(self.span(Action::Import))
        .await
    }
}

impl Schedulable for Container {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Container
    }

    fn priority(&self) -> i64 {
        self.spec.priority
    }

    fn node_id(&self) -> &str {
        self.node.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::definition::UserDefinition;
    use crate::test_helpers::{single_stack_definition, TestLab};
    use pretty_assertions::assert_eq;

    fn parent_definition() -> ContainerDefinition {
        ContainerDefinition {
            id: "base".to_string(),
            template: true,
            release: Some("precise".to_string()),
            arch: Some("amd64".to_string()),
            provisioners: Some(vec!["apt".to_string()]),
            users: vec![UserDefinition {
                username: "deployer".to_string(),
                uid: Some(2600),
                ..Default::default()
            }],
            interfaces: vec![InterfaceDefinition {
                network_id: "labnet".to_string(),
                name: "eth0".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let spec = ContainerSpec::from_definition(&ContainerDefinition {
            id: "plain".to_string(),
            ..Default::default()
        });
        assert_eq!(spec.distro, "ubuntu");
        assert_eq!(spec.release, "precise");
        assert!(spec.persist);
        assert!(!spec.template);
        assert_eq!(spec.priority, 0);
    }

    #[test]
    fn test_derive_copies_parent_attributes() {
        let parent = ContainerSpec::from_definition(&parent_definition());
        let child_def = ContainerDefinition {
            id: "web".to_string(),
            inherit: Some("base".to_string()),
            ..Default::default()
        };

        let mut child = ContainerSpec::derive_from(&parent, &child_def);
        assert_eq!(child.id, "web");
        assert_eq!(child.release, "precise");
        assert_eq!(child.arch.as_deref(), Some("amd64"));
        assert_eq!(child.provisioners, vec!["apt"]);
        assert!(!child.template);
        assert!(child.interfaces.is_empty());
        assert_eq!(child.users.len(), 1);
        assert_eq!(child.users[0].uid, Some(2600));

        child.release = "trusty".to_string();
        child.users[0].username = "changed".to_string();
        assert_eq!(parent.release, "precise");
        assert_eq!(parent.users[0].username, "deployer");
    }

    #[test]
    fn test_child_overrides_and_users_append() {
        let parent = ContainerSpec::from_definition(&parent_definition());
        let child_def = ContainerDefinition {
            id: "db".to_string(),
            inherit: Some("base".to_string()),
            release: Some("trusty".to_string()),
            persist: Some(false),
            users: vec![UserDefinition {
                username: "postgres".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let child = ContainerSpec::derive_from(&parent, &child_def);
        assert_eq!(child.release, "trusty");
        assert!(!child.persist);
        let names: Vec<&str> = child.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["postgres", "deployer"]);
    }

    #[tokio::test]
    async fn test_derived_queries() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let container = topology.container("web").unwrap();

        assert_eq!(container.ip(), Some(Ipv4Addr::new(10, 10, 0, 20)));
        assert_eq!(container.cidr(), Some(16));
        assert_eq!(container.ptr().as_deref(), Some("20.0.10.10.in-addr.arpa"));
        assert_eq!(container.fqdn(), "web.lab.example");
        assert_eq!(container.tags(), vec!["web"]);
        assert_eq!(container.primary_user().unwrap().username, "deployer");
        assert_eq!(container.mode().await, ContainerMode::Unknown);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        topology.node("host").unwrap().up(&ctx).await.unwrap();
        let container = topology.container("web").unwrap();

        container.create(&ctx).await.unwrap();
        container.create(&ctx).await.unwrap();

        assert_eq!(lab.log.matching("agent:create_container"), vec!["agent:create_container:web"]);
        assert_eq!(container.state(&ctx).await, ResourceState::Stopped);
    }

    #[tokio::test]
    async fn test_build_and_demolish_drive_agent_in_order() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        topology.node("host").unwrap().up(&ctx).await.unwrap();
        let container = topology.container("web").unwrap();

        container.build(&ctx, false).await.unwrap();
        assert_eq!(container.state(&ctx).await, ResourceState::Running);
        container.demolish(&ctx).await.unwrap();
        assert_eq!(container.state(&ctx).await, ResourceState::NotCreated);

        assert_eq!(
            lab.log.matching(":web"),
            vec![
                "agent:create_container:web",
                "recorder:on_container_create:web",
                "agent:start_container:web",
                "recorder:on_container_up:web",
                "agent:provision_user:web:deployer",
                "recorder:on_container_provision:web",
                "recorder:on_container_deprovision:web",
                "agent:stop_container:web",
                "recorder:on_container_down:web",
                "agent:destroy_container:web",
                "recorder:on_container_destroy:web",
            ]
        );
    }

    #[tokio::test]
    async fn test_importable_build_uses_import() {
        let lab = TestLab::new();
        let mut def = single_stack_definition();
        def.nodes[0].containers[0].sc_url = Some("https://images.example/web.sc".to_string());
        let topology = lab.load(def).unwrap();
        let ctx = lab.context();
        topology.node("host").unwrap().up(&ctx).await.unwrap();

        let container = topology.container("web").unwrap();
        container.build(&ctx, false).await.unwrap();

        assert_eq!(
            lab.log.matching(":web"),
            vec!["agent:import_container:web", "recorder:on_container_import:web"]
        );
    }

    #[tokio::test]
    async fn test_up_requires_creation() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        topology.node("host").unwrap().up(&ctx).await.unwrap();

        let err = topology.container("web").unwrap().up(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("Container 'web' up failed"));
    }
}
