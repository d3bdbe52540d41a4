//! Provisioner callbacks
//!
//! After a resource runs one of its own primitives it fires the matching
//! hook (`on_<kind>_<action>`) on each provisioner in its list, in list
//! order. Provisioners declare which hooks they handle; a hook nobody
//! handles is skipped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult};
use crate::model::{Container, Network, Node};
use crate::types::{Action, ConfigMap, ResourceKind};

/// A `(resource kind, action)` callback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hook {
    pub kind: ResourceKind,
    pub action: Action,
}

impl Hook {
    pub fn new(kind: ResourceKind, action: Action) -> Self {
        Self { kind, action }
    }

    pub fn method_name(&self) -> String {
        format!("on_{}_{}", self.kind, self.action)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "on_{}_{}", self.kind, self.action)
    }
}

/// The resource a hook fires for
#[derive(Clone, Copy)]
pub enum HookTarget<'a> {
    Node(&'a Node),
    Network(&'a Network),
    Container(&'a Container),
}

impl<'a> HookTarget<'a> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            HookTarget::Node(_) => ResourceKind::Node,
            HookTarget::Network(_) => ResourceKind::Network,
            HookTarget::Container(_) => ResourceKind::Container,
        }
    }

    pub fn id(&self) -> &'a str {
        match self {
            HookTarget::Node(node) => node.id(),
            HookTarget::Network(network) => network.id(),
            HookTarget::Container(container) => container.id(),
        }
    }

    pub fn config(&self) -> &'a ConfigMap {
        match self {
            HookTarget::Node(node) => node.config(),
            HookTarget::Network(network) => network.config(),
            HookTarget::Container(container) => container.config(),
        }
    }

    pub fn provisioners(&self) -> &'a [String] {
        match self {
            HookTarget::Node(node) => node.provisioners(),
            HookTarget::Network(network) => network.provisioners(),
            HookTarget::Container(container) => container.provisioners(),
        }
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Whether this provisioner implements the given hook
    fn supports(&self, hook: Hook) -> bool;

    async fn invoke(
        &self,
        hook: Hook,
        target: HookTarget<'_>,
        ctx: &ExecutionContext,
    ) -> HostlabResult<()>;
}

/// Builds a provisioner from a resource's configuration, once per hook
pub trait ProvisionerFactory: Send + Sync {
    fn create_provisioner(&self, config: &ConfigMap) -> HostlabResult<Box<dyn Provisioner>>;

    fn provisioner_type(&self) -> &'static str;

    fn description(&self) -> &'static str;
}

#[derive(Clone, Default)]
pub struct ProvisionerRegistry {
    factories: HashMap<String, Arc<dyn ProvisionerFactory>>,
}

impl ProvisionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ProvisionerFactory>) {
        let provisioner_type = factory.provisioner_type().to_string();
        debug!(
            "Registering provisioner: {} ({})",
            provisioner_type,
            factory.description()
        );
        self.factories.insert(provisioner_type, factory);
    }

    pub fn create_provisioner(
        &self,
        provisioner_type: &str,
        config: &ConfigMap,
    ) -> HostlabResult<Box<dyn Provisioner>> {
        let factory = self.factories.get(provisioner_type).ok_or_else(|| {
            HostlabError::Provisioner {
                provisioner: provisioner_type.to_string(),
                hook: "construct".to_string(),
                details: format!(
                    "unknown provisioner type. Available provisioners: {:?}",
                    self.list_available_provisioners()
                ),
            }
        })?;
        factory.create_provisioner(config)
    }

    pub fn list_available_provisioners(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Fire `action`'s hook on every provisioner the target lists
pub async fn run_callbacks(
    target: HookTarget<'_>,
    action: Action,
    ctx: &ExecutionContext,
) -> HostlabResult<()> {
    let hook = Hook::new(target.kind(), action);

    for name in target.provisioners() {
        let provisioner = ctx.provisioners().create_provisioner(name, target.config())?;
        if !provisioner.supports(hook) {
            continue;
        }

        debug!("Running {}::{} for {}", name, hook, target.id());
        provisioner
            .invoke(hook, target, ctx)
            .await
            .map_err(|e| HostlabError::Provisioner {
                provisioner: name.clone(),
                hook: hook.method_name(),
                details: format!("{} '{}': {}", target.kind(), target.id(), e),
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{single_stack_definition, RecordingProvisionerFactory, TestLab};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hook_method_name() {
        assert_eq!(
            Hook::new(ResourceKind::Container, Action::Provision).method_name(),
            "on_container_provision"
        );
        assert_eq!(
            Hook::new(ResourceKind::Network, Action::Up).to_string(),
            "on_network_up"
        );
    }

    #[tokio::test]
    async fn test_callbacks_run_in_list_order_and_skip_unsupported() {
        let mut lab = TestLab::new();
        lab.register_provisioner(
            RecordingProvisionerFactory::new("first", lab.log.clone())
                .supporting(&[Hook::new(ResourceKind::Node, Action::Up)]),
        );
        lab.register_provisioner(RecordingProvisionerFactory::new("second", lab.log.clone()));

        let mut def = single_stack_definition();
        def.nodes[0].provisioners = vec!["first".to_string(), "second".to_string()];
        let topology = lab.load(def).unwrap();
        let ctx = lab.context();
        let node = topology.node("host").unwrap();

        run_callbacks(HookTarget::Node(node), Action::Up, &ctx).await.unwrap();
        run_callbacks(HookTarget::Node(node), Action::Down, &ctx).await.unwrap();

        assert_eq!(
            lab.log.events(),
            vec![
                "first:on_node_up:host",
                "second:on_node_up:host",
                "second:on_node_down:host",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_names_provisioner_and_hook() {
        let mut lab = TestLab::new();
        lab.register_provisioner(
            RecordingProvisionerFactory::new("broken", lab.log.clone())
                .failing_on(Hook::new(ResourceKind::Node, Action::Provision)),
        );
        let mut def = single_stack_definition();
        def.nodes[0].provisioners = vec!["broken".to_string()];
        let topology = lab.load(def).unwrap();
        let ctx = lab.context();

        let err = run_callbacks(
            HookTarget::Node(topology.node("host").unwrap()),
            Action::Provision,
            &ctx,
        )
        .await
        .unwrap_err();

        match err {
            HostlabError::Provisioner { provisioner, hook, details } => {
                assert_eq!(provisioner, "broken");
                assert_eq!(hook, "on_node_provision");
                assert!(details.contains("host"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_provisioner_is_an_error() {
        let lab = TestLab::new();
        let mut def = single_stack_definition();
        def.nodes[0].provisioners = vec!["missing".to_string()];
        let topology = lab.load(def).unwrap();
        let ctx = lab.context();

        let result =
            run_callbacks(HookTarget::Node(topology.node("host").unwrap()), Action::Up, &ctx).await;
        assert!(matches!(result, Err(HostlabError::Provisioner { .. })));
    }
}
