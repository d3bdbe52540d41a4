//! Test doubles for the engine
//!
//! Every double writes what it is asked to do into a shared [`EventLog`],
//! so tests can assert on the order of backend calls without a real host.
//! Enabled for this crate's tests and, through the `test-helpers` feature,
//! for crates that build on it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::agent::{ContainerUsage, GuestInfo, HostAgent};
use crate::command::{command_line, CommandExecutor, CommandOptions, CommandOutput};
use crate::config::EngineConfig;
use crate::connection::{Connector, ExecOutput, RemoteSession, SessionTarget};
use crate::context::ExecutionContext;
use crate::error::{HostlabError, HostlabResult};
use crate::lifecycle::Lifecycle;
use crate::model::{
    Container, ContainerDefinition, InterfaceDefinition, LoadContext, Network, NetworkDefinition,
    NodeDefinition, Topology, TopologyDefinition, User, UserDefinition,
};
use crate::provider::{Provider, ProviderFactory, ProviderRegistry};
use crate::provisioner::{Hook, HookTarget, Provisioner, ProvisionerFactory, ProvisionerRegistry};
use crate::scheduler::Schedulable;
use crate::types::{config_str, Action, ConfigMap, ResourceKind, ResourceState};

/// Ordered record of everything the doubles were asked to do
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Index of the first event equal to `event`
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    /// Events containing `pattern`, in order
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.contains(pattern))
            .cloned()
            .collect()
    }
}

fn config_object(value: serde_json::Value) -> ConfigMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => ConfigMap::new(),
    }
}

// Providers

/// Registers as `recording`; reads `recording.ip`, `recording.user` and
/// `recording.identity` from the node configuration
pub struct RecordingProviderFactory {
    log: EventLog,
    fail_on: Arc<Mutex<Option<String>>>,
}

impl RecordingProviderFactory {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_on: Arc::new(Mutex::new(None)),
        }
    }

    /// Make `operation` fail on every provider built by this factory
    pub fn fail_on(&self, operation: &str) {
        *self.fail_on.lock() = Some(operation.to_string());
    }
}

impl ProviderFactory for RecordingProviderFactory {
    fn create_provider(&self, node_id: &str, config: &ConfigMap) -> HostlabResult<Arc<dyn Provider>> {
        Ok(Arc::new(RecordingProvider {
            node_id: node_id.to_string(),
            ip: config_str(config, "recording", "ip").unwrap_or_else(|| "127.0.0.1".to_string()),
            user: config_str(config, "recording", "user").unwrap_or_else(|| "root".to_string()),
            identity: config_str(config, "recording", "identity").map(PathBuf::from),
            log: self.log.clone(),
            fail_on: self.fail_on.clone(),
            state: Mutex::new(ResourceState::NotCreated),
        }))
    }

    fn provider_type(&self) -> &'static str {
        "recording"
    }

    fn description(&self) -> &'static str {
        "In-memory provider that records every call"
    }
}

pub struct RecordingProvider {
    node_id: String,
    ip: String,
    user: String,
    identity: Option<PathBuf>,
    log: EventLog,
    fail_on: Arc<Mutex<Option<String>>>,
    state: Mutex<ResourceState>,
}

impl RecordingProvider {
    fn step(&self, operation: &str, next: ResourceState) -> HostlabResult<()> {
        self.log
            .record(format!("provider:{}:{}", self.node_id, operation));
        if self.fail_on.lock().as_deref() == Some(operation) {
            return Err(HostlabError::provider("recording", operation, "injected failure"));
        }
        *self.state.lock() = next;
        Ok(())
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn provider_type(&self) -> &'static str {
        "recording"
    }

    async fn create(&self) -> HostlabResult<()> {
        self.step("create", ResourceState::Stopped)
    }

    async fn destroy(&self) -> HostlabResult<()> {
        self.step("destroy", ResourceState::NotCreated)
    }

    async fn up(&self) -> HostlabResult<()> {
        self.step("up", ResourceState::Running)
    }

    async fn down(&self) -> HostlabResult<()> {
        self.step("down", ResourceState::Stopped)
    }

    async fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    fn instance_id(&self) -> String {
        format!("recording-{}", self.node_id)
    }

    fn ip(&self) -> String {
        self.ip.clone()
    }

    fn port(&self) -> u16 {
        22
    }

    fn user(&self) -> String {
        self.user.clone()
    }

    fn identity(&self) -> Option<PathBuf> {
        self.identity.clone()
    }
}

// Container agent

/// In-memory container backend shared by every node of a [`TestLab`]
pub struct RecordingAgent {
    log: EventLog,
    installed: Mutex<bool>,
    disk_usage: Mutex<Option<u8>>,
    usage: Mutex<ContainerUsage>,
    containers: Mutex<BTreeMap<String, ResourceState>>,
    networks: Mutex<BTreeMap<String, ResourceState>>,
}

impl RecordingAgent {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            installed: Mutex::new(true),
            disk_usage: Mutex::new(Some(40)),
            usage: Mutex::new(ContainerUsage::default()),
            containers: Mutex::new(BTreeMap::new()),
            networks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_installed(&self, installed: bool) {
        *self.installed.lock() = installed;
    }

    pub fn set_disk_usage(&self, percent: Option<u8>) {
        *self.disk_usage.lock() = percent;
    }

    pub fn set_usage(&self, usage: ContainerUsage) {
        *self.usage.lock() = usage;
    }

    /// Put a guest on the backend without going through the lifecycle
    pub fn add_guest(&self, name: &str, state: ResourceState) {
        self.containers.lock().insert(name.to_string(), state);
    }

    pub fn remove_guest(&self, name: &str) {
        self.containers.lock().remove(name);
    }

    fn set_container(&self, operation: &str, id: &str, state: Option<ResourceState>) {
        self.log.record(format!("agent:{}:{}", operation, id));
        let mut containers = self.containers.lock();
        match state {
            Some(state) => containers.insert(id.to_string(), state),
            None => containers.remove(id),
        };
    }

    fn set_network(&self, operation: &str, id: &str, state: Option<ResourceState>) {
        self.log.record(format!("agent:{}:{}", operation, id));
        let mut networks = self.networks.lock();
        match state {
            Some(state) => networks.insert(id.to_string(), state),
            None => networks.remove(id),
        };
    }
}

#[async_trait]
impl HostAgent for RecordingAgent {
    fn agent_type(&self) -> &'static str {
        "recording"
    }

    async fn installed(&self, _session: &dyn RemoteSession) -> HostlabResult<bool> {
        Ok(*self.installed.lock())
    }

    async fn disk_usage_percent(&self, _session: &dyn RemoteSession) -> HostlabResult<Option<u8>> {
        Ok(*self.disk_usage.lock())
    }

    async fn list_containers(&self, _session: &dyn RemoteSession) -> HostlabResult<Vec<GuestInfo>> {
        Ok(self
            .containers
            .lock()
            .iter()
            .map(|(name, state)| GuestInfo {
                name: name.clone(),
                state: *state,
            })
            .collect())
    }

    async fn container_state(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<ResourceState> {
        Ok(self
            .containers
            .lock()
            .get(container.id())
            .copied()
            .unwrap_or(ResourceState::NotCreated))
    }

    async fn create_container(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        self.set_container("create_container", container.id(), Some(ResourceState::Stopped));
        Ok(())
    }

    async fn destroy_container(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        self.set_container("destroy_container", container.id(), None);
        Ok(())
    }

    async fn start_container(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        self.set_container("start_container", container.id(), Some(ResourceState::Running));
        Ok(())
    }

    async fn stop_container(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        self.set_container("stop_container", container.id(), Some(ResourceState::Stopped));
        Ok(())
    }

    async fn provision_user(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
        user: &User,
    ) -> HostlabResult<()> {
        self.log.record(format!(
            "agent:provision_user:{}:{}",
            container.id(),
            user.username
        ));
        Ok(())
    }

    async fn container_usage(
        &self,
        _session: &dyn RemoteSession,
        _container: &Container,
    ) -> HostlabResult<ContainerUsage> {
        Ok(*self.usage.lock())
    }

    async fn import_container(
        &self,
        _session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        self.set_container("import_container", container.id(), Some(ResourceState::Running));
        Ok(())
    }

    async fn network_state(
        &self,
        _session: &dyn RemoteSession,
        network: &Network,
    ) -> HostlabResult<ResourceState> {
        Ok(self
            .networks
            .lock()
            .get(network.id())
            .copied()
            .unwrap_or(ResourceState::NotCreated))
    }

    async fn create_network(&self, _session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        self.set_network("create_network", network.id(), Some(ResourceState::Stopped));
        Ok(())
    }

    async fn destroy_network(&self, _session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        self.set_network("destroy_network", network.id(), None);
        Ok(())
    }

    async fn network_up(&self, _session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        self.set_network("network_up", network.id(), Some(ResourceState::Running));
        Ok(())
    }

    async fn network_down(&self, _session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        self.set_network("network_down", network.id(), Some(ResourceState::Stopped));
        Ok(())
    }
}

// Sessions

type Script = Arc<Mutex<Vec<(String, ExecOutput)>>>;

pub fn exec_ok(output: &str) -> ExecOutput {
    ExecOutput {
        output: output.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

pub fn exec_failed(exit_code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        output: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

/// Session that answers from a script of `(substring, output)` pairs
///
/// The first pair whose substring occurs in the command wins; anything
/// unscripted succeeds with empty output.
#[derive(Clone)]
pub struct MockSession {
    address: String,
    script: Script,
    commands: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

impl MockSession {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            script: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn respond(&self, pattern: &str, output: ExecOutput) -> &Self {
        self.script.lock().push((pattern.to_string(), output));
        self
    }

    /// Every command and script sent so far
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn answer(&self, command: &str) -> ExecOutput {
        self.commands.lock().push(command.to_string());
        self.script
            .lock()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn run(&self, command: &str, _timeout: Option<Duration>) -> HostlabResult<ExecOutput> {
        Ok(self.answer(command))
    }

    async fn run_script(&self, script: &str) -> HostlabResult<ExecOutput> {
        Ok(self.answer(script))
    }

    async fn upload(&self, local: &Path, remote: &str) -> HostlabResult<()> {
        self.commands
            .lock()
            .push(format!("upload {} {}", local.display(), remote));
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> HostlabResult<()> {
        self.commands
            .lock()
            .push(format!("download {} {}", remote, local.display()));
        Ok(())
    }

    async fn close(&self) -> HostlabResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`MockSession`]s sharing one script and counts what happens
/// to them
pub struct MockConnector {
    connects: AtomicUsize,
    targets: Mutex<Vec<SessionTarget>>,
    template: MockSession,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
            template: MockSession::new("mock"),
        }
    }
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, output: ExecOutput) {
        self.template.respond(pattern, output);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.template.close_count()
    }

    pub fn commands(&self) -> Vec<String> {
        self.template.commands()
    }

    pub fn targets(&self) -> Vec<SessionTarget> {
        self.targets.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &SessionTarget) -> HostlabResult<Arc<dyn RemoteSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().push(target.clone());
        let mut session = self.template.clone();
        session.address = target.address();
        Ok(Arc::new(session))
    }
}

// Provisioners

/// Records `<name>:<hook>:<resource id>` for every hook it handles
pub struct RecordingProvisionerFactory {
    name: &'static str,
    log: EventLog,
    supported: Option<Vec<Hook>>,
    failing: Option<Hook>,
}

impl RecordingProvisionerFactory {
    pub fn new(name: &'static str, log: EventLog) -> Self {
        Self {
            name,
            log,
            supported: None,
            failing: None,
        }
    }

    /// Only implement these hooks; all hooks are implemented otherwise
    pub fn supporting(mut self, hooks: &[Hook]) -> Self {
        self.supported = Some(hooks.to_vec());
        self
    }

    pub fn failing_on(mut self, hook: Hook) -> Self {
        self.failing = Some(hook);
        self
    }
}

impl ProvisionerFactory for RecordingProvisionerFactory {
    fn create_provisioner(&self, _config: &ConfigMap) -> HostlabResult<Box<dyn Provisioner>> {
        Ok(Box::new(RecordingProvisioner {
            name: self.name,
            log: self.log.clone(),
            supported: self.supported.clone(),
            failing: self.failing,
        }))
    }

    fn provisioner_type(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Records every hook it is invoked for"
    }
}

struct RecordingProvisioner {
    name: &'static str,
    log: EventLog,
    supported: Option<Vec<Hook>>,
    failing: Option<Hook>,
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    fn supports(&self, hook: Hook) -> bool {
        self.supported
            .as_ref()
            .map_or(true, |hooks| hooks.contains(&hook))
    }

    async fn invoke(
        &self,
        hook: Hook,
        target: HookTarget<'_>,
        _ctx: &ExecutionContext,
    ) -> HostlabResult<()> {
        self.log
            .record(format!("{}:{}:{}", self.name, hook, target.id()));
        if self.failing == Some(hook) {
            return Err(HostlabError::provider(
                self.name,
                hook.method_name(),
                "injected failure",
            ));
        }
        Ok(())
    }
}

// Schedulable probe

/// A resource that only records which actions reach it
pub struct ProbeResource {
    id: String,
    priority: i64,
    node_id: String,
    log: EventLog,
    delay: Option<Duration>,
    failing: Option<Action>,
    importable: bool,
    panicking: bool,
}

impl ProbeResource {
    pub fn new(id: &str, priority: i64, log: &EventLog) -> Self {
        Self {
            id: id.to_string(),
            priority,
            node_id: "probe-node".to_string(),
            log: log.clone(),
            delay: None,
            failing: None,
            importable: false,
            panicking: false,
        }
    }

    /// Sleep inside every action and record `<id>:<action>:done` after
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_on(mut self, action: Action) -> Self {
        self.failing = Some(action);
        self
    }

    pub fn importable(mut self) -> Self {
        self.importable = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panicking = true;
        self
    }

    pub fn on_node(mut self, node_id: &str) -> Self {
        self.node_id = node_id.to_string();
        self
    }

    async fn step(&self, action: Action) -> HostlabResult<()> {
        info!("probe {} {}", self.id, action);
        self.log.record(format!("{}:{}", self.id, action));
        if self.panicking {
            panic!("probe {} blew up during {}", self.id, action);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            self.log.record(format!("{}:{}:done", self.id, action));
        }
        if self.failing == Some(action) {
            return Err(HostlabError::node(&self.id, action, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for ProbeResource {
    async fn create(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        self.step(Action::Create).await
    }

    async fn destroy(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        self.step(Action::Destroy).await
    }

    async fn up(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        self.step(Action::Up).await
    }

    async fn down(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        self.step(Action::Down).await
    }

    async fn provision(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        self.step(Action::Provision).await
    }

    async fn deprovision(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        self.step(Action::Deprovision).await
    }

    fn importable(&self) -> bool {
        self.importable
    }

    async fn import(&self, _ctx: &ExecutionContext) -> HostlabResult<()> {
        self.step(Action::Import).await
    }
}

impl Schedulable for ProbeResource {
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
        &self.node_id
    }
}

// Local commands

/// Command executor that answers from a script of `(substring, output)`
/// pairs matched against the full command line
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<Vec<(String, i32, String)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, status: i32, stdout: &str) -> &Self {
        self.script
            .lock()
            .push((pattern.to_string(), status, stdout.to_string()));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        _options: CommandOptions,
    ) -> HostlabResult<CommandOutput> {
        let started = Instant::now();
        let line = command_line(program, args);
        self.commands.lock().push(line.clone());
        let (status, stdout) = self
            .script
            .lock()
            .iter()
            .find(|(pattern, _, _)| line.contains(pattern.as_str()))
            .map(|(_, status, stdout)| (*status, stdout.clone()))
            .unwrap_or((0, String::new()));
        Ok(CommandOutput {
            status,
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
            success: status == 0,
            duration: started.elapsed(),
        })
    }
}

// Fixtures

/// A recording backend wired together: provider `recording`, provisioner
/// `recorder`, one agent and one connector shared by every node
pub struct TestLab {
    pub log: EventLog,
    pub connector: Arc<MockConnector>,
    pub agent: Arc<RecordingAgent>,
    pub providers: ProviderRegistry,
    pub provisioners: ProvisionerRegistry,
    provider_factory: Arc<RecordingProviderFactory>,
}

impl Default for TestLab {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLab {
    pub fn new() -> Self {
        let log = EventLog::new();
        let provider_factory = Arc::new(RecordingProviderFactory::new(log.clone()));

        let mut providers = ProviderRegistry::new();
        providers.register(provider_factory.clone());
        let mut provisioners = ProvisionerRegistry::new();
        provisioners.register(Arc::new(RecordingProvisionerFactory::new("recorder", log.clone())));

        Self {
            agent: Arc::new(RecordingAgent::new(log.clone())),
            connector: Arc::new(MockConnector::new()),
            log,
            providers,
            provisioners,
            provider_factory,
        }
    }

    pub fn load(&self, def: TopologyDefinition) -> HostlabResult<Topology> {
        Topology::load(&def, &LoadContext::new(&self.providers, self.agent.clone()))
    }

    pub fn context(&self) -> ExecutionContext {
        self.context_with(EngineConfig::default())
    }

    pub fn context_with(&self, config: EngineConfig) -> ExecutionContext {
        ExecutionContext::new(config, self.connector.clone(), self.provisioners.clone())
            .expect("test engine config should be valid")
    }

    pub fn register_provisioner(&mut self, factory: impl ProvisionerFactory + 'static) {
        self.provisioners.register(Arc::new(factory));
    }

    pub fn register_provider(&mut self, factory: impl ProviderFactory + 'static) {
        self.providers.register(Arc::new(factory));
    }

    /// Make `operation` fail on every recording provider loaded afterwards
    pub fn providers_fail_on(&self, operation: &str) {
        self.provider_factory.fail_on(operation);
    }
}

/// One node `host` carrying network `labnet` and container `web`
pub fn single_stack_definition() -> TopologyDefinition {
    TopologyDefinition {
        version: Some(">= 0.1.0".to_string()),
        config: ConfigMap::new(),
        nodes: vec![NodeDefinition {
            id: "host".to_string(),
            provider: Some("recording".to_string()),
            priority: 0,
            provisioners: vec!["recorder".to_string()],
            config: config_object(json!({
                "bind": { "domain": "lab.example" },
                "recording": {
                    "ip": "192.0.2.10",
                    "user": "operator",
                    "identity": "/keys/host",
                },
            })),
            networks: vec![NetworkDefinition {
                id: "labnet".to_string(),
                address: "10.10.0.1/16".to_string(),
                bridge: "br0".to_string(),
                provisioners: vec!["recorder".to_string()],
                ..Default::default()
            }],
            containers: vec![ContainerDefinition {
                id: "web".to_string(),
                provisioners: Some(vec!["recorder".to_string()]),
                interfaces: vec![InterfaceDefinition {
                    network_id: "labnet".to_string(),
                    name: "eth0".to_string(),
                    address: Some("10.10.0.20/16".to_string()),
                    primary: true,
                    ..Default::default()
                }],
                users: vec![UserDefinition {
                    username: "deployer".to_string(),
                    password: Some("deployer".to_string()),
                    identity: Some(PathBuf::from("/home/deployer/.ssh/id_rsa")),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }],
    }
}
