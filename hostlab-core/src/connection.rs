//! Remote sessions and the per-context session cache
//!
//! Nodes are reached directly with the credentials their provider reports.
//! Containers are reached through their node, which acts as the bastion.
//! A [`ConnectionManager`] caches sessions lazily and is never shared
//! between concurrent workers: each worker gets [`ConnectionManager::fork`],
//! an empty cache that only shares the [`Connector`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{HostlabError, HostlabResult};
use crate::model::{Container, Node};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Return the output of a failed command instead of an error
    pub ignore_exit_status: bool,
    /// Overrides the session timeout for this command
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    pub fn ignore_exit_status() -> Self {
        Self {
            ignore_exit_status: true,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub output: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `CommandFailed` unless told to ignore it
    pub fn check(self, command: &str, options: ExecOptions) -> HostlabResult<Self> {
        if self.success() || options.ignore_exit_status {
            Ok(self)
        } else {
            Err(HostlabError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stdout: self.output,
                stderr: self.stderr,
            })
        }
    }
}

/// An established remote-command session
///
/// Implementations provide the raw `run`/`run_script` primitives; exit
/// status checking is shared.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// `user@host:port` of the far end, for logs and errors
    fn address(&self) -> String;

    /// Run a command and report its output whatever the exit status
    async fn run(&self, command: &str, timeout: Option<Duration>) -> HostlabResult<ExecOutput>;

    /// Feed a script to a shell on the far end
    async fn run_script(&self, script: &str) -> HostlabResult<ExecOutput>;

    async fn upload(&self, local: &Path, remote: &str) -> HostlabResult<()>;

    async fn download(&self, remote: &str, local: &Path) -> HostlabResult<()>;

    async fn close(&self) -> HostlabResult<()>;

    async fn exec_with(&self, command: &str, options: ExecOptions) -> HostlabResult<ExecOutput> {
        self.run(command, options.timeout)
            .await?
            .check(command, options)
    }

    async fn exec(&self, command: &str) -> HostlabResult<ExecOutput> {
        self.exec_with(command, ExecOptions::default()).await
    }

    async fn bootstrap(&self, script: &str) -> HostlabResult<ExecOutput> {
        self.run_script(script)
            .await?
            .check("bootstrap", ExecOptions::default())
    }
}

/// Bastion a proxied session hops through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub keys: Vec<PathBuf>,
}

/// Everything needed to open a session; handed to workers instead of a
/// live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub keys: Vec<PathBuf>,
    pub proxy: Option<ProxyTarget>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl SessionTarget {
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Opens sessions for a target
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &SessionTarget) -> HostlabResult<Arc<dyn RemoteSession>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Node(String),
    Container { node_id: String, container_id: String },
}

impl SessionKey {
    pub fn node_id(&self) -> &str {
        match self {
            SessionKey::Node(node_id) => node_id,
            SessionKey::Container { node_id, .. } => node_id,
        }
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    session_config: SessionConfig,
    sessions: Mutex<HashMap<SessionKey, Arc<dyn RemoteSession>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session_config", &self.session_config)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, session_config: SessionConfig) -> Self {
        Self {
            connector,
            session_config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// A new, empty cache that opens sessions the same way
    pub fn fork(&self) -> Self {
        Self::new(self.connector.clone(), self.session_config.clone())
    }

    /// Direct session target for a node, from its provider's credentials
    pub fn node_target(&self, node: &Node) -> SessionTarget {
        SessionTarget {
            host: node.ip(),
            port: node.port(),
            user: node.user(),
            password: None,
            keys: node.identity().into_iter().collect(),
            proxy: None,
            timeout: self.session_config.timeout,
            connect_timeout: self.session_config.connect_timeout,
        }
    }

    /// Proxied session target for a container, hopping through its node
    pub fn container_target(&self, container: &Container) -> HostlabResult<SessionTarget> {
        let node = container.node();
        let interface = container.primary_interface().ok_or_else(|| {
            HostlabError::container(container.id(), "connect", "has no interfaces to connect to")
        })?;
        let user = container.primary_user().ok_or_else(|| {
            HostlabError::container(container.id(), "connect", "has no users to connect as")
        })?;

        let keys = user
            .identity
            .iter()
            .cloned()
            .chain(node.identity())
            .collect();

        Ok(SessionTarget {
            host: interface.ip()?.to_string(),
            port: 22,
            user: user.username.clone(),
            password: user.password.clone(),
            keys,
            proxy: Some(ProxyTarget {
                host: node.ip(),
                port: node.port(),
                user: node.user(),
                keys: node.identity().into_iter().collect(),
            }),
            timeout: self.session_config.timeout,
            connect_timeout: self.session_config.connect_timeout,
        })
    }

    pub async fn node_session(&self, node: &Node) -> HostlabResult<Arc<dyn RemoteSession>> {
        let key = SessionKey::Node(node.id().to_string());
        self.get_or_connect(key, || Ok(self.node_target(node)))
            .await
    }

    pub async fn container_session(
        &self,
        container: &Container,
    ) -> HostlabResult<Arc<dyn RemoteSession>> {
        let key = SessionKey::Container {
            node_id: container.node().id().to_string(),
            container_id: container.id().to_string(),
        };
        self.get_or_connect(key, || self.container_target(container))
            .await
    }

    async fn get_or_connect<F>(&self, key: SessionKey, target: F) -> HostlabResult<Arc<dyn RemoteSession>>
    where
        F: FnOnce() -> HostlabResult<SessionTarget>,
    {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            return Ok(session.clone());
        }

        let target = target()?;
        debug!("Opening session {:?} to {}", key, target.address());
        let session = tokio::time::timeout(target.connect_timeout, self.connector.connect(&target))
            .await
            .map_err(|_| {
                HostlabError::connection(
                    target.address(),
                    format!("timed out after {:?}", target.connect_timeout),
                )
            })??;

        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Close and forget every session belonging to a node, including the
    /// proxied sessions of its containers
    pub async fn shutdown_node(&self, node_id: &str) {
        let closing: Vec<(SessionKey, Arc<dyn RemoteSession>)> = {
            let mut sessions = self.sessions.lock().await;
            let keys: Vec<SessionKey> = sessions
                .keys()
                .filter(|k| k.node_id() == node_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| sessions.remove(&k).map(|s| (k, s)))
                .collect()
        };

        Self::close_all(closing).await;
    }

    /// Close and forget the proxied session to one container
    pub async fn close_container(&self, container: &Container) {
        let key = SessionKey::Container {
            node_id: container.node().id().to_string(),
            container_id: container.id().to_string(),
        };
        let closing: Vec<(SessionKey, Arc<dyn RemoteSession>)> = self
            .sessions
            .lock()
            .await
            .remove_entry(&key)
            .into_iter()
            .collect();
        Self::close_all(closing).await;
    }

    pub async fn shutdown_all(&self) {
        let closing: Vec<(SessionKey, Arc<dyn RemoteSession>)> =
            self.sessions.lock().await.drain().collect();
        Self::close_all(closing).await;
    }

    async fn close_all(closing: Vec<(SessionKey, Arc<dyn RemoteSession>)>) {
        for (key, session) in closing {
            debug!("Closing session {:?} to {}", key, session.address());
            if let Err(e) = session.close().await {
                warn!("Failed to close session to {}: {}", session.address(), e);
            }
        }
    }

    /// Number of cached sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{single_stack_definition, TestLab};

    #[test]
    fn test_exec_output_check() {
        let failed = ExecOutput {
            output: "partial".to_string(),
            stderr: "denied".to_string(),
            exit_code: 2,
        };

        assert!(failed.clone().check("ls", ExecOptions::ignore_exit_status()).is_ok());
        match failed.check("ls", ExecOptions::default()) {
            Err(HostlabError::CommandFailed { exit_code, stderr, .. }) => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "denied");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_cached_per_key() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        let node = topology.node("host").unwrap();
        let container = topology.container("web").unwrap();

        ctx.connections().node_session(node).await.unwrap();
        ctx.connections().node_session(node).await.unwrap();
        ctx.connections().container_session(container).await.unwrap();

        assert_eq!(ctx.connections().session_count().await, 2);
        assert_eq!(lab.connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_container_target_uses_node_as_bastion() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();
        let container = topology.container("web").unwrap();

        let target = ctx.connections().container_target(container).unwrap();
        assert_eq!(target.host, "10.10.0.20");
        assert_eq!(target.user, "deployer");
        assert_eq!(target.password.as_deref(), Some("deployer"));
        assert_eq!(
            target.keys,
            vec![PathBuf::from("/home/deployer/.ssh/id_rsa"), PathBuf::from("/keys/host")]
        );

        let proxy = target.proxy.unwrap();
        assert_eq!(proxy.host, "192.0.2.10");
        assert_eq!(proxy.user, "operator");
    }

    #[tokio::test]
    async fn test_shutdown_node_closes_node_and_container_sessions() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();

        ctx.connections()
            .node_session(topology.node("host").unwrap())
            .await
            .unwrap();
        ctx.connections()
            .container_session(topology.container("web").unwrap())
            .await
            .unwrap();

        ctx.connections().shutdown_node("other").await;
        assert_eq!(ctx.connections().session_count().await, 2);

        ctx.connections().shutdown_node("host").await;
        assert_eq!(ctx.connections().session_count().await, 0);
        assert_eq!(lab.connector.close_count(), 2);

        // Reopened lazily on next use
        ctx.connections()
            .node_session(topology.node("host").unwrap())
            .await
            .unwrap();
        assert_eq!(lab.connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_fork_starts_empty() {
        let lab = TestLab::new();
        let topology = lab.load(single_stack_definition()).unwrap();
        let ctx = lab.context();

        ctx.connections()
            .node_session(topology.node("host").unwrap())
            .await
            .unwrap();
        let forked = ctx.connections().fork();
        assert_eq!(forked.session_count().await, 0);
    }
}
