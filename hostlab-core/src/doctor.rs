//! Health checks
//!
//! The doctor reports; it never changes anything. Conditions it can
//! describe become findings and clear the `healthy` flag. Only conditions
//! that make diagnosis itself impossible (no container agent on a running
//! node, a backend that cannot list its guests) are returned as errors.

use nix::sys::resource::{getrlimit, Resource};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::DoctorConfig;
use crate::connection::RemoteSession;
use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult};
use crate::model::{Node, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Worth knowing; does not make the topology unhealthy
    Warning,
    /// Makes the topology unhealthy
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// What the finding is about, e.g. `node 'host'`
    pub scope: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub healthy: bool,
    pub findings: Vec<Finding>,
}

impl Default for DoctorReport {
    fn default() -> Self {
        Self {
            healthy: true,
            findings: Vec::new(),
        }
    }
}

impl DoctorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, scope: impl Into<String>, message: impl Into<String>) {
        let (scope, message) = (scope.into(), message.into());
        warn!("{}: {}", scope, message);
        self.findings.push(Finding {
            scope,
            severity: Severity::Warning,
            message,
        });
    }

    pub fn fail(&mut self, scope: impl Into<String>, message: impl Into<String>) {
        let (scope, message) = (scope.into(), message.into());
        error!("{}: {}", scope, message);
        self.healthy = false;
        self.findings.push(Finding {
            scope,
            severity: Severity::Error,
            message,
        });
    }

    pub fn merge(&mut self, other: DoctorReport) {
        self.healthy &= other.healthy;
        self.findings.extend(other.findings);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }
}

/// Recognizes backend guests that belong to a declared container without
/// carrying its name (the master copy of an ephemeral container)
pub trait EphemeralNaming: Send + Sync {
    fn belongs_to(&self, guest_name: &str, container_id: &str) -> bool;
}

/// `<container-id><suffix>`, `-master` on LXC by default
#[derive(Debug, Clone)]
pub struct SuffixNaming {
    suffix: String,
}

impl SuffixNaming {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl EphemeralNaming for SuffixNaming {
    fn belongs_to(&self, guest_name: &str, container_id: &str) -> bool {
        !self.suffix.is_empty()
            && guest_name
                .strip_suffix(self.suffix.as_str())
                .is_some_and(|base| base == container_id)
    }
}

fn node_scope(node: &Node) -> String {
    format!("node '{}'", node.id())
}

pub struct Doctor {
    config: DoctorConfig,
    naming: Arc<dyn EphemeralNaming>,
}

impl Doctor {
    pub fn new(config: DoctorConfig) -> Self {
        let naming = Arc::new(SuffixNaming::new(config.ephemeral_suffix.clone()));
        Self { config, naming }
    }

    pub fn with_naming(mut self, naming: Arc<dyn EphemeralNaming>) -> Self {
        self.naming = naming;
        self
    }

    /// Check this process and then every node
    pub async fn check_topology(
        &self,
        topology: &Topology,
        ctx: &ExecutionContext,
    ) -> HostlabResult<DoctorReport> {
        let mut report = self.check_open_files();
        for node in topology.nodes() {
            let declared: Vec<(String, bool)> = topology
                .containers_on(node.id())
                .iter()
                .map(|c| (c.id().to_string(), c.template()))
                .collect();
            report.merge(self.check_node(node, &declared, ctx).await?);
        }
        Ok(report)
    }

    /// The soft limit on open files must allow many concurrent sessions
    pub fn check_open_files(&self) -> DoctorReport {
        let mut report = DoctorReport::new();
        match getrlimit(Resource::RLIMIT_NOFILE) {
            Ok((soft, _hard)) if (soft as u64) < self.config.min_open_files => report.fail(
                "hostlab",
                format!(
                    "open file limit is {}, at least {} is required (try `ulimit -n {}`)",
                    soft, self.config.min_open_files, self.config.min_open_files
                ),
            ),
            Ok(_) => {}
            Err(e) => report.warn("hostlab", format!("could not read open file limit: {}", e)),
        }
        report
    }

    /// Check one node against the containers declared on it
    ///
    /// `declared` pairs each container id with whether it is a template.
    /// Templates are never built, so their absence is not reported.
    pub async fn check_node(
        &self,
        node: &Node,
        declared: &[(String, bool)],
        ctx: &ExecutionContext,
    ) -> HostlabResult<DoctorReport> {
        let mut report = DoctorReport::new();
        let scope = node_scope(node);

        if node.dead().await {
            report.fail(
                &scope,
                "node is not running (did you forget to up or build it?)",
            );
            return Ok(report);
        }

        let session = ctx.connections().node_session(node).await?;
        let agent = node.agent();
        if !agent.installed(session.as_ref()).await? {
            return Err(HostlabError::node(
                node.id(),
                "doctor",
                format!(
                    "{} does not appear to be installed (did you forget to provision or build the node?)",
                    agent.agent_type()
                ),
            ));
        }

        self.check_disk(node, session.as_ref(), &mut report).await;

        let guests = agent.list_containers(session.as_ref()).await?;
        let visible: Vec<_> = guests
            .iter()
            .filter(|g| {
                !declared
                    .iter()
                    .any(|(id, _)| self.naming.belongs_to(&g.name, id))
            })
            .collect();
        let guest_names: BTreeSet<&str> = visible.iter().map(|g| g.name.as_str()).collect();
        let declared_ids: BTreeSet<&str> = declared.iter().map(|(id, _)| id.as_str()).collect();

        let absent: Vec<&str> = declared
            .iter()
            .filter(|(id, template)| !template && !guest_names.contains(id.as_str()))
            .map(|(id, _)| id.as_str())
            .collect();
        if !absent.is_empty() {
            report.warn(
                &scope,
                format!(
                    "declared containers are missing from the node: {}",
                    absent.join(", ")
                ),
            );
        }

        let undeclared: Vec<_> = visible
            .iter()
            .filter(|g| !declared_ids.contains(g.name.as_str()))
            .collect();
        let undeclared_running: Vec<&str> = undeclared
            .iter()
            .filter(|g| g.state == crate::types::ResourceState::Running)
            .map(|g| g.name.as_str())
            .collect();

        if !undeclared_running.is_empty() {
            report.fail(
                &scope,
                format!(
                    "*running* containers not defined in the topology, you may need to stop them manually: {}",
                    undeclared_running.join(", ")
                ),
            );
        }
        if !undeclared.is_empty() {
            let names: Vec<&str> = undeclared.iter().map(|g| g.name.as_str()).collect();
            report.warn(
                &scope,
                format!(
                    "containers not defined in the topology, you may need to remove them manually: {}",
                    names.join(", ")
                ),
            );
        }

        Ok(report)
    }

    async fn check_disk(&self, node: &Node, session: &dyn RemoteSession, report: &mut DoctorReport) {
        let scope = node_scope(node);
        match node.agent().disk_usage_percent(session).await {
            Ok(Some(used)) if used >= self.config.disk_usage_threshold => report.fail(
                scope,
                format!("node is using {}% of its available disk space", used),
            ),
            Ok(Some(_)) => {}
            Ok(None) => report.fail(scope, "could not determine how much free space the node has"),
            Err(e) => report.fail(
                scope,
                format!("could not determine how much free space the node has: {}", e),
            ),
        }
    }
}

impl Node {
    /// Quick health check: disk usage only
    pub async fn ok(&self, ctx: &ExecutionContext) -> HostlabResult<bool> {
        if self.dead().await {
            return Ok(false);
        }
        let session = ctx.connections().node_session(self).await?;
        let doctor = Doctor::new(ctx.config().doctor.clone());
        let mut report = DoctorReport::new();
        doctor.check_disk(self, session.as_ref(), &mut report).await;
        Ok(report.healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::lifecycle::Lifecycle;
    use crate::test_helpers::{single_stack_definition, TestLab};
    use crate::types::ResourceState;

    async fn running_lab() -> (TestLab, Topology, ExecutionContext) {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        let node = topology.node("host").unwrap().clone();
        node.up(&ctx).await.unwrap();
        lab.agent.add_guest("web", ResourceState::Running);
        (lab, topology, ctx)
    }

    fn doctor() -> Doctor {
        Doctor::new(DoctorConfig {
            min_open_files: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_suffix_naming() {
        let naming = SuffixNaming::new("-master");
        assert!(naming.belongs_to("web-master", "web"));
        assert!(!naming.belongs_to("web", "web"));
        assert!(!naming.belongs_to("db-master", "web"));
        assert!(!SuffixNaming::new("").belongs_to("web", "web"));
    }

    #[tokio::test]
    async fn test_healthy_topology() {
        let (_lab, topology, ctx) = running_lab().await;
        let report = doctor().check_topology(&topology, &ctx).await.unwrap();
        assert!(report.healthy, "{:?}", report.findings);
        assert!(report.findings.is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_running_container_is_unhealthy() {
        let (lab, topology, ctx) = running_lab().await;
        lab.agent.add_guest("rogue", ResourceState::Running);

        let report = doctor().check_topology(&topology, &ctx).await.unwrap();
        assert!(!report.healthy);
        assert!(report.warnings().any(|f| f.message.contains("rogue")));
        assert!(report.errors().any(|f| f.message.contains("rogue")));
    }

    #[tokio::test]
    async fn test_undeclared_stopped_container_only_warns() {
        let (lab, topology, ctx) = running_lab().await;
        lab.agent.add_guest("leftover", ResourceState::Stopped);

        let report = doctor().check_topology(&topology, &ctx).await.unwrap();
        assert!(report.healthy);
        assert_eq!(report.warnings().count(), 1);
    }

    #[tokio::test]
    async fn test_ephemeral_master_is_not_undeclared() {
        let (lab, topology, ctx) = running_lab().await;
        lab.agent.add_guest("web-master", ResourceState::Running);

        let report = doctor().check_topology(&topology, &ctx).await.unwrap();
        assert!(report.healthy);
        assert!(report.findings.is_empty());
    }

    #[tokio::test]
    async fn test_declared_but_absent_warns() {
        let (lab, topology, ctx) = running_lab().await;
        lab.agent.remove_guest("web");

        let report = doctor().check_topology(&topology, &ctx).await.unwrap();
        assert!(report.healthy);
        assert!(report.warnings().any(|f| f.message.contains("missing") && f.message.contains("web")));
    }

    #[tokio::test]
    async fn test_disk_usage() {
        let (lab, topology, ctx) = running_lab().await;
        let node = topology.node("host").unwrap();
        assert!(node.ok(&ctx).await.unwrap());

        lab.agent.set_disk_usage(Some(95));
        assert!(!node.ok(&ctx).await.unwrap());
        let report = doctor().check_topology(&topology, &ctx).await.unwrap();
        assert!(report.errors().any(|f| f.message.contains("95%")));

        lab.agent.set_disk_usage(None);
        assert!(!node.ok(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_node_is_unhealthy() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let report = doctor()
            .check_topology(&topology, &lab.context())
            .await
            .unwrap();
        assert!(!report.healthy);
        assert!(report.errors().any(|f| f.scope == "node 'host'"));
    }

    #[tokio::test]
    async fn test_missing_agent_is_an_error() {
        let (lab, topology, ctx) = running_lab().await;
        lab.agent.set_installed(false);
        let result = doctor().check_topology(&topology, &ctx).await;
        assert!(matches!(result, Err(HostlabError::Node { .. })));
    }

    #[test]
    fn test_open_file_limit() {
        assert!(doctor().check_open_files().healthy);

        let strict = Doctor::new(DoctorConfig {
            min_open_files: u64::MAX,
            ..EngineConfig::default().doctor
        });
        assert!(!strict.check_open_files().healthy);
    }
}
