//! Vagrant-managed virtual machines
//!
//! Drives the `vagrant` CLI. Every call asks Vagrant again; nothing about
//! the machine's state is remembered between calls. Settings come from the
//! `vagrant` section of the node configuration:
//!
//! | key | default |
//! |---|---|
//! | `id` | `hostlab-<node-id>` (plus `-<basename of file>` when `file` is set) |
//! | `file` | current directory; where the Vagrantfile lives |
//! | `ip` | `192.168.33.<crc32(id) mod 254 + 1>` |
//! | `port` | 22 |
//! | `user` | `vagrant` |
//! | `identity` | `~/.vagrant.d/insecure_private_key` |
//! | `boot_timeout` | 120 (seconds to wait for SSH after `up`; 0 skips the wait) |

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use hostlab_core::command::{CommandExecutor, CommandOptions, CommandOutput};
use hostlab_core::error::{HostlabError, HostlabResult};
use hostlab_core::provider::{Provider, ProviderFactory};
use hostlab_core::types::{config_str, config_u64, ConfigMap, ResourceState};

const STATUS_LINE: &str = r"^(?P<name>\S+)\s+(?P<state>[a-z][a-z ]*?)(?:\s+\([^)]*\))?\s*$";

/// Map a `vagrant status` state to ours
fn parse_state(state: &str) -> ResourceState {
    match state.trim() {
        "running" => ResourceState::Running,
        "poweroff" | "aborted" | "paused" | "saved" => ResourceState::Stopped,
        "not created" => ResourceState::NotCreated,
        _ => ResourceState::Unknown,
    }
}

/// Find the state of `instance_id` in `vagrant status` output
pub fn state_from_status(output: &str, instance_id: &str) -> HostlabResult<ResourceState> {
    let status_line = Regex::new(STATUS_LINE).map_err(|e| {
        HostlabError::provider("vagrant", "status", format!("invalid status pattern: {}", e))
    })?;
    Ok(output
        .lines()
        .filter_map(|line| status_line.captures(line))
        .find(|caps| &caps["name"] == instance_id)
        .map(|caps| parse_state(&caps["state"]))
        .unwrap_or(ResourceState::Unknown))
}

/// Last octet of the default address, stable for a given instance id
fn last_octet(instance_id: &str) -> u32 {
    crc32fast::hash(instance_id.as_bytes()) % 254 + 1
}

pub struct VagrantProvider {
    instance_id: String,
    directory: Option<PathBuf>,
    ip: String,
    port: u16,
    user: String,
    identity: PathBuf,
    boot_timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl VagrantProvider {
    pub fn new(node_id: &str, config: &ConfigMap, executor: Arc<dyn CommandExecutor>) -> Self {
        let directory = config_str(config, "vagrant", "file").map(PathBuf::from);
        let instance_id = config_str(config, "vagrant", "id").unwrap_or_else(|| {
            let mut id = format!("hostlab-{}", node_id);
            if let Some(name) = directory.as_deref().and_then(Path::file_name) {
                id.push('-');
                id.push_str(&name.to_string_lossy());
            }
            id.to_lowercase()
        });
        let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());

        Self {
            ip: config_str(config, "vagrant", "ip")
                .unwrap_or_else(|| format!("192.168.33.{}", last_octet(&instance_id))),
            port: config_u64(config, "vagrant", "port")
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(22),
            user: config_str(config, "vagrant", "user").unwrap_or_else(|| "vagrant".to_string()),
            identity: config_str(config, "vagrant", "identity")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    PathBuf::from(home)
                        .join(".vagrant.d")
                        .join("insecure_private_key")
                }),
            boot_timeout: Duration::from_secs(
                config_u64(config, "vagrant", "boot_timeout").unwrap_or(120),
            ),
            instance_id,
            directory,
            executor,
        }
    }

    async fn vagrant(&self, args: &[&str]) -> HostlabResult<CommandOutput> {
        let mut options = CommandOptions::new();
        if let Some(directory) = &self.directory {
            options = options.with_cwd(directory);
        }
        debug!("vagrant {}", args.join(" "));
        self.executor
            .execute_checked("vagrant", args, options)
            .await
            .map_err(|e| match e {
                HostlabError::CommandFailed { .. } => e,
                other => HostlabError::provider("vagrant", args.first().copied().unwrap_or(""), other.to_string()),
            })
    }

    async fn query_state(&self) -> HostlabResult<ResourceState> {
        let output = self.vagrant(&["status"]).await?;
        state_from_status(&output.stdout_string(), &self.instance_id)
    }

    /// Wait until the SSH port accepts connections
    async fn wait_for_ssh(&self) -> HostlabResult<()> {
        if self.boot_timeout.is_zero() {
            return Ok(());
        }
        let address = format!("{}:{}", self.ip, self.port);
        let deadline = Instant::now() + self.boot_timeout;
        loop {
            match time::timeout(Duration::from_secs(5), TcpStream::connect(&address)).await {
                Ok(Ok(_)) => return Ok(()),
                _ if Instant::now() >= deadline => {
                    return Err(HostlabError::Timeout {
                        operation: format!("waiting for SSH on {}", address),
                        duration: self.boot_timeout,
                    })
                }
                _ => time::sleep(Duration::from_secs(1)).await,
            }
        }
    }
}

#[async_trait]
impl Provider for VagrantProvider {
    fn provider_type(&self) -> &'static str {
        "vagrant"
    }

    /// `vagrant up` creates the machine
    async fn create(&self) -> HostlabResult<()> {
        Ok(())
    }

    async fn destroy(&self) -> HostlabResult<()> {
        if self.alive().await {
            self.down().await?;
        }
        if self.exists().await {
            info!("Destroying vagrant machine {}", self.instance_id);
            self.vagrant(&["destroy", "--force", &self.instance_id]).await?;
        }
        Ok(())
    }

    async fn up(&self) -> HostlabResult<()> {
        info!("Starting vagrant machine {}", self.instance_id);
        self.vagrant(&["up", &self.instance_id]).await?;
        self.wait_for_ssh().await
    }

    async fn down(&self) -> HostlabResult<()> {
        info!("Halting vagrant machine {}", self.instance_id);
        self.vagrant(&["halt", &self.instance_id]).await?;
        Ok(())
    }

    async fn state(&self) -> ResourceState {
        match self.query_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not query vagrant machine {}: {}", self.instance_id, e);
                ResourceState::Unknown
            }
        }
    }

    fn instance_id(&self) -> String {
        self.instance_id.clone()
    }

    fn ip(&self) -> String {
        self.ip.clone()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn user(&self) -> String {
        self.user.clone()
    }

    fn identity(&self) -> Option<PathBuf> {
        Some(self.identity.clone())
    }
}

pub struct VagrantProviderFactory {
    executor: Arc<dyn CommandExecutor>,
}

impl VagrantProviderFactory {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

impl ProviderFactory for VagrantProviderFactory {
    fn create_provider(&self, node_id: &str, config: &ConfigMap) -> HostlabResult<Arc<dyn Provider>> {
        Ok(Arc::new(VagrantProvider::new(node_id, config, self.executor.clone())))
    }

    fn provider_type(&self) -> &'static str {
        "vagrant"
    }

    fn description(&self) -> &'static str {
        "Local virtual machine managed by Vagrant"
    }
}
