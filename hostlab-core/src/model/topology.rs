use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::container::{Container, ContainerSpec};
use super::definition::{ContainerDefinition, TopologyDefinition};
use super::network::Network;
use super::node::Node;
use crate::agent::HostAgent;
use crate::error::{HostlabError, HostlabResult};
use crate::provider::ProviderRegistry;
use crate::types::ConfigMap;
use crate::version::{check_compatibility, ENGINE_VERSION};

/// What loading a topology needs from the environment
pub struct LoadContext<'a> {
    pub providers: &'a ProviderRegistry,
    pub agent: Arc<dyn HostAgent>,
    pub engine_version: &'a str,
}

impl<'a> LoadContext<'a> {
    pub fn new(providers: &'a ProviderRegistry, agent: Arc<dyn HostAgent>) -> Self {
        Self {
            providers,
            agent,
            engine_version: ENGINE_VERSION,
        }
    }

    pub fn with_engine_version(mut self, engine_version: &'a str) -> Self {
        self.engine_version = engine_version;
        self
    }
}

/// An id-indexed, insertion-ordered collection
#[derive(Debug)]
struct Index<T> {
    items: Vec<Arc<T>>,
    by_id: HashMap<String, usize>,
}

impl<T> Index<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    fn insert(&mut self, id: &str, item: Arc<T>) {
        self.by_id.insert(id.to_string(), self.items.len());
        self.items.push(item);
    }

    fn get(&self, id: &str) -> Option<&Arc<T>> {
        self.by_id.get(id).map(|&i| &self.items[i])
    }
}

/// All resources of one run, indexed per kind
#[derive(Debug)]
pub struct Topology {
    version: String,
    config: ConfigMap,
    nodes: Index<Node>,
    networks: Index<Network>,
    containers: Index<Container>,
}

impl Topology {
    /// Build live resources from a definition
    ///
    /// Fails on an incompatible version, duplicate ids, unknown provider
    /// types, broken inheritance, or interfaces on unknown networks.
    pub fn load(def: &TopologyDefinition, ctx: &LoadContext<'_>) -> HostlabResult<Self> {
        check_compatibility(def.version.as_deref(), ctx.engine_version)?;

        let mut nodes = Index::new();
        let mut networks = Index::new();

        for node_def in &def.nodes {
            if nodes.contains(&node_def.id) {
                return Err(HostlabError::topology(format!(
                    "Duplicate node id '{}'",
                    node_def.id
                )));
            }
            let provider_type = node_def.provider.as_deref().ok_or_else(|| {
                HostlabError::node(&node_def.id, "load", "no provider specified")
            })?;
            let provider =
                ctx.providers
                    .create_provider(provider_type, &node_def.id, &node_def.config)?;
            let node = Arc::new(Node::new(node_def, provider, ctx.agent.clone()));
            debug!("Loaded node '{}' ({})", node_def.id, provider_type);

            for network_def in &node_def.networks {
                if networks.contains(&network_def.id) {
                    return Err(HostlabError::topology(format!(
                        "Duplicate network id '{}'",
                        network_def.id
                    )));
                }
                let network = Network::new(network_def, node.clone())?;
                networks.insert(&network_def.id, Arc::new(network));
            }

            nodes.insert(&node_def.id, node);
        }

        let mut definitions: HashMap<&str, &ContainerDefinition> = HashMap::new();
        for container_def in def.nodes.iter().flat_map(|n| &n.containers) {
            if definitions.insert(&container_def.id, container_def).is_some() {
                return Err(HostlabError::topology(format!(
                    "Duplicate container id '{}'",
                    container_def.id
                )));
            }
        }

        let mut resolver = SpecResolver {
            definitions: &definitions,
            resolved: HashMap::new(),
        };
        let mut containers = Index::new();
        for node_def in &def.nodes {
            let node = nodes
                .get(&node_def.id)
                .cloned()
                .ok_or_else(|| HostlabError::topology(format!("Node '{}' vanished", node_def.id)))?;

            for container_def in &node_def.containers {
                let spec = resolver.resolve(&container_def.id, &mut Vec::new())?;
                let container = Container::new(spec, node.clone(), |network_id| {
                    networks
                        .get(network_id)
                        .filter(|n| n.node().id() == node.id())
                })?;
                containers.insert(&container_def.id, Arc::new(container));
            }
        }

        Ok(Self {
            version: def.version.clone().unwrap_or_default(),
            config: def.config.clone(),
            nodes,
            networks,
            containers,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes.items
    }

    pub fn networks(&self) -> &[Arc<Network>] {
        &self.networks.items
    }

    /// Every container, templates included
    pub fn containers(&self) -> &[Arc<Container>] {
        &self.containers.items
    }

    /// Containers that bulk actions run on; templates are never built
    pub fn schedulable_containers(&self) -> Vec<Arc<Container>> {
        self.containers
            .items
            .iter()
            .filter(|c| !c.template())
            .cloned()
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<&Arc<Node>> {
        self.nodes.get(id)
    }

    pub fn network(&self, id: &str) -> Option<&Arc<Network>> {
        self.networks.get(id)
    }

    pub fn container(&self, id: &str) -> Option<&Arc<Container>> {
        self.containers.get(id)
    }

    pub fn networks_on(&self, node_id: &str) -> Vec<&Arc<Network>> {
        self.networks
            .items
            .iter()
            .filter(|n| n.node().id() == node_id)
            .collect()
    }

    pub fn containers_on(&self, node_id: &str) -> Vec<&Arc<Container>> {
        self.containers
            .items
            .iter()
            .filter(|c| c.node().id() == node_id)
            .collect()
    }
}

/// Resolves container inheritance across the whole topology
struct SpecResolver<'a> {
    definitions: &'a HashMap<&'a str, &'a ContainerDefinition>,
    resolved: HashMap<String, ContainerSpec>,
}

impl SpecResolver<'_> {
    fn resolve(&mut self, id: &str, chain: &mut Vec<String>) -> HostlabResult<ContainerSpec> {
        if let Some(spec) = self.resolved.get(id) {
            return Ok(spec.clone());
        }
        if chain.iter().any(|seen| seen == id) {
            chain.push(id.to_string());
            return Err(HostlabError::container(
                &chain[0],
                "load",
                format!("inheritance cycle: {}", chain.join(" -> ")),
            ));
        }

        let definitions = self.definitions;
        let def = *definitions.get(id).ok_or_else(|| {
            HostlabError::container(
                chain.last().map(String::as_str).unwrap_or(id),
                "load",
                format!("cannot inherit from unknown container '{}'", id),
            )
        })?;

        chain.push(id.to_string());
        let spec = match &def.inherit {
            Some(parent_id) => {
                let parent = self.resolve(parent_id, chain)?;
                ContainerSpec::derive_from(&parent, def)
            }
            None => ContainerSpec::from_definition(def),
        };
        chain.pop();

        self.resolved.insert(id.to_string(), spec.clone());
        Ok(spec)
    }
}
