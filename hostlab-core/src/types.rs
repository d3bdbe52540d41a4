use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form configuration attached to topologies and resources.
///
/// Providers and provisioners read their own section out of it, keyed by
/// their type name (e.g. `config.vagrant.box`, `config.bind.domain`).
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Look up a nested string value such as `vagrant.id`
pub fn config_str(config: &ConfigMap, section: &str, key: &str) -> Option<String> {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Look up a nested unsigned integer value such as `bare_metal.port`
pub fn config_u64(config: &ConfigMap, section: &str, key: &str) -> Option<u64> {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_u64())
}

/// The three kinds of schedulable resources in a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Node,
    Network,
    Container,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Node => "node",
            ResourceKind::Network => "network",
            ResourceKind::Container => "container",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle actions, primitive and composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Destroy,
    Up,
    Down,
    Provision,
    Deprovision,
    Import,
    Build,
    Demolish,
    Bounce,
    Recycle,
}

impl Action {
    pub const PRIMITIVES: [Action; 6] = [
        Action::Create,
        Action::Destroy,
        Action::Up,
        Action::Down,
        Action::Provision,
        Action::Deprovision,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Destroy => "destroy",
            Action::Up => "up",
            Action::Down => "down",
            Action::Provision => "provision",
            Action::Deprovision => "deprovision",
            Action::Import => "import",
            Action::Build => "build",
            Action::Demolish => "demolish",
            Action::Bounce => "bounce",
            Action::Recycle => "recycle",
        }
    }

    /// Teardown actions walk the topology Container -> Network -> Node and
    /// visit priority tiers lowest first.
    pub fn is_reverse(&self) -> bool {
        matches!(
            self,
            Action::Destroy | Action::Down | Action::Deprovision | Action::Demolish
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-reported state of a resource. Never cached; every query asks the
/// backend again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    NotCreated,
    Running,
    Stopped,
    Unknown,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::NotCreated => "not_created",
            ResourceState::Running => "running",
            ResourceState::Stopped => "stopped",
            ResourceState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
