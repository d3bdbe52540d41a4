//! Status reports
//!
//! Each resource kind reports a fixed set of keys, in a fixed order, so
//! reports for the same kind can be rendered as table rows.

use std::fmt;
use tracing::warn;

use crate::agent::ContainerUsage;
use crate::context::ExecutionContext;
use crate::model::{Container, Network, Node};
use crate::types::{ResourceKind, ResourceState};

pub const NODE_STATUS_KEYS: &[&str] = &[
    "id",
    "instance_id",
    "ok",
    "state",
    "user",
    "ip",
    "port",
    "provider",
    "provisioners",
];

pub const NETWORK_STATUS_KEYS: &[&str] = &[
    "id",
    "node_id",
    "state",
    "interface",
    "network",
    "netmask",
    "broadcast",
    "provisioners",
];

pub const CONTAINER_STATUS_KEYS: &[&str] = &[
    "id",
    "node_id",
    "cpu_time",
    "memory_usage",
    "disk_usage",
    "mode",
    "fqdn",
    "state",
    "distro",
    "release",
    "interfaces",
    "provisioners",
    "inherited",
];

pub fn status_keys(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Node => NODE_STATUS_KEYS,
        ResourceKind::Network => NETWORK_STATUS_KEYS,
        ResourceKind::Container => CONTAINER_STATUS_KEYS,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    kind: ResourceKind,
    values: Vec<String>,
}

impl StatusReport {
    fn new(kind: ResourceKind, values: Vec<String>) -> Self {
        debug_assert_eq!(values.len(), status_keys(kind).len());
        Self { kind, values }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn keys(&self) -> &'static [&'static str] {
        status_keys(self.kind)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys()
            .iter()
            .position(|k| *k == key)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.keys()
            .iter()
            .copied()
            .zip(self.values.iter().map(String::as_str))
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (key, value) in self.entries() {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

fn display_or_unknown<T: fmt::Display, E>(value: Result<T, E>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

impl Node {
    pub async fn status(&self, ctx: &ExecutionContext) -> StatusReport {
        let ok = match self.ok(ctx).await {
            Ok(ok) => ok.to_string(),
            Err(e) => {
                warn!("node '{}' health check failed: {}", self.id(), e);
                "false".to_string()
            }
        };
        StatusReport::new(
            ResourceKind::Node,
            vec![
                self.id().to_string(),
                self.instance_id(),
                ok,
                self.state().await.to_string(),
                self.user(),
                self.ip(),
                self.port().to_string(),
                self.provider().provider_type().to_string(),
                self.provisioners().join(","),
            ],
        )
    }
}

impl Network {
    pub async fn status(&self, ctx: &ExecutionContext) -> StatusReport {
        let interface = match self.ip() {
            Ok(ip) => format!("{}:{}", self.bridge(), ip),
            Err(_) => format!("{}:unknown", self.bridge()),
        };
        StatusReport::new(
            ResourceKind::Network,
            vec![
                self.id().to_string(),
                self.node().id().to_string(),
                self.state(ctx).await.to_string(),
                interface,
                display_or_unknown(self.network()),
                display_or_unknown(self.netmask()),
                display_or_unknown(self.broadcast()),
                self.provisioners().join(","),
            ],
        )
    }
}

impl Container {
    /// Usage is reported as zero unless the container is running
    async fn usage(&self, state: ResourceState, ctx: &ExecutionContext) -> ContainerUsage {
        if state != ResourceState::Running {
            return ContainerUsage::default();
        }
        let result = async {
            let session = ctx.connections().node_session(self.node()).await?;
            self.node()
                .agent()
                .container_usage(session.as_ref(), self)
                .await
        }
        .await;
        result.unwrap_or_else(|e| {
            warn!("could not read usage of container '{}': {}", self.id(), e);
            ContainerUsage::default()
        })
    }

    pub async fn status(&self, ctx: &ExecutionContext) -> StatusReport {
        let state = self.state(ctx).await;
        let usage = self.usage(state, ctx).await;
        let interfaces: Vec<String> = self
            .interfaces()
            .iter()
            .map(|i| format!("{}:{}:{}", i.network_id(), i.name(), i.address()))
            .collect();

        StatusReport::new(
            ResourceKind::Container,
            vec![
                self.id().to_string(),
                self.node().id().to_string(),
                format!("{}s", usage.cpu_nanos / 1_000_000_000),
                format!("{}M", usage.memory_bytes / (1024 * 1024)),
                format!("{}MB", usage.disk_bytes / (1024 * 1024)),
                self.mode().await.to_string(),
                self.fqdn(),
                state.to_string(),
                self.distro().to_string(),
                self.release().to_string(),
                interfaces.join(", "),
                self.provisioners().join(","),
                self.inherit().unwrap_or("none").to_string(),
            ],
        )
    }
}
