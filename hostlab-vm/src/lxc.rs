//! LXC host agent
//!
//! Manages containers with the `lxc-*` tools and bridges with `ip link`,
//! all through the node session handed in by the caller.
//!
//! Ephemeral containers (`persist: false`) keep their root filesystem in a
//! master copy named `<id><suffix>` (`<id>-master` by default); starting one runs a tmpfs-backed
//! ephemeral clone of the master under the container's own name, which
//! disappears again when it stops.

use async_trait::async_trait;
use std::fmt::Write as _;
use tracing::{debug, info};

use hostlab_core::agent::{ContainerUsage, GuestInfo, HostAgent};
use hostlab_core::config::DEFAULT_EPHEMERAL_SUFFIX;
use hostlab_core::connection::{ExecOptions, RemoteSession};
use hostlab_core::error::{HostlabError, HostlabResult};
use hostlab_core::model::{Container, Network, User};
use hostlab_core::types::ResourceState;

/// Quote a string for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// State from `lxc-info -s` output
pub fn parse_lxc_state(output: &str) -> ResourceState {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("State:"))
        .map(|state| match state.trim() {
            "RUNNING" => ResourceState::Running,
            "STOPPED" => ResourceState::Stopped,
            _ => ResourceState::Unknown,
        })
        .unwrap_or(ResourceState::Unknown)
}

/// Guests from `lxc-ls --fancy --fancy-format name,state` output
pub fn parse_lxc_ls(output: &str) -> Vec<GuestInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let state = fields.next()?;
            if name == "NAME" {
                return None;
            }
            Some(GuestInfo {
                name: name.to_string(),
                state: parse_lxc_state(&format!("State: {}", state)),
            })
        })
        .collect()
}

/// Use% of the filesystem in `df -P` output
pub fn parse_df(output: &str) -> Option<u8> {
    output
        .lines()
        .nth(1)?
        .split_whitespace()
        .rev()
        .nth(1)?
        .trim_end_matches('%')
        .parse()
        .ok()
}

/// CPU and memory counters from `lxc-info -H` output
pub fn parse_lxc_usage(output: &str) -> ContainerUsage {
    let value = |key: &str| {
        output
            .lines()
            .find_map(|line| line.trim().strip_prefix(key))
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0)
    };
    ContainerUsage {
        cpu_nanos: value("CPU use:"),
        memory_bytes: value("Memory use:"),
        disk_bytes: 0,
    }
}

/// Whether `ip link show` reports the link administratively up
pub fn link_is_up(output: &str) -> bool {
    output
        .split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map(|(flags, _)| flags.split(',').any(|flag| flag == "UP"))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct LxcAgent {
    lxc_root: String,
    master_suffix: String,
}

impl Default for LxcAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl LxcAgent {
    pub fn new() -> Self {
        Self::with_root("/var/lib/lxc")
    }

    pub fn with_root(lxc_root: impl Into<String>) -> Self {
        Self {
            lxc_root: lxc_root.into(),
            master_suffix: DEFAULT_EPHEMERAL_SUFFIX.to_string(),
        }
    }

    /// Name ephemeral masters `<id><suffix>`; pass the doctor's
    /// `ephemeral_suffix` so health checks recognise them
    pub fn with_master_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.master_suffix = suffix.into();
        self
    }

    fn container_dir(&self, name: &str) -> String {
        format!("{}/{}", self.lxc_root, name)
    }

    fn master_name(&self, container: &Container) -> String {
        format!("{}{}", container.id(), self.master_suffix)
    }

    async fn lxc_state(&self, session: &dyn RemoteSession, name: &str) -> HostlabResult<ResourceState> {
        let output = session
            .exec_with(
                &format!("sudo lxc-info -n {} -s", shell_quote(name)),
                ExecOptions::ignore_exit_status(),
            )
            .await?;
        if !output.success() {
            return Ok(ResourceState::NotCreated);
        }
        Ok(parse_lxc_state(&output.output))
    }

    /// Extra lines for the container's LXC config
    fn config_lines(&self, container: &Container) -> String {
        let mut config = String::from("\n# hostlab\n");
        for interface in container.interfaces() {
            let _ = writeln!(config, "lxc.network.type = veth");
            let _ = writeln!(config, "lxc.network.flags = up");
            let _ = writeln!(config, "lxc.network.link = {}", interface.network().bridge());
            let _ = writeln!(config, "lxc.network.name = {}", interface.name());
            let _ = writeln!(config, "lxc.network.hwaddr = {}", interface.mac());
            let _ = writeln!(config, "lxc.network.ipv4 = {}", interface.address());
        }
        if let Some(profile) = container.aa_profile() {
            let _ = writeln!(config, "lxc.aa_profile = {}", profile);
        }
        if !container.cap_drop().is_empty() {
            let _ = writeln!(config, "lxc.cap.drop = {}", container.cap_drop().join(" "));
        }
        for mount in container.mounts() {
            let _ = writeln!(config, "lxc.mount.entry = {}", mount);
        }
        config
    }

    async fn user_script(&self, container: &Container, user: &User) -> HostlabResult<String> {
        let rootfs = format!("{}/rootfs", self.container_dir(container.id()));
        let name = shell_quote(&user.username);
        let home = format!("{}{}", rootfs, user.home_dir().display());
        let mut script = format!(
            "set -e\nROOTFS={}\nHOME_DIR={}\n",
            shell_quote(&rootfs),
            shell_quote(&home)
        );

        let _ = writeln!(
            script,
            "if ! sudo chroot \"$ROOTFS\" id -u {} >/dev/null 2>&1; then",
            name
        );
        let mut useradd = String::from("useradd --create-home --shell /bin/bash --groups sudo");
        if let Some(gid) = user.gid {
            let _ = writeln!(
                script,
                "  sudo chroot \"$ROOTFS\" groupadd --gid {} {}",
                gid, name
            );
            let _ = write!(useradd, " --gid {}", gid);
        }
        if let Some(uid) = user.uid {
            let _ = write!(useradd, " --uid {}", uid);
        }
        let _ = writeln!(script, "  sudo chroot \"$ROOTFS\" {} {}", useradd, name);
        if let Some(password) = &user.password {
            let _ = writeln!(
                script,
                "  echo {} | sudo chroot \"$ROOTFS\" chpasswd",
                shell_quote(&format!("{}:{}", user.username, password))
            );
        }
        script.push_str("fi\n");

        // The node user's keys, plus the user's own public key when we have it
        script.push_str(
            "sudo mkdir -p \"$HOME_DIR/.ssh\"\n\
             KEYS=$(mktemp)\n\
             { sudo cat \"$HOME_DIR/.ssh/authorized_keys\" 2>/dev/null || true; cat \"$HOME/.ssh/authorized_keys\" 2>/dev/null || true; } > \"$KEYS\"\n",
        );
        if let Some(path) = &user.public_identity {
            match tokio::fs::read_to_string(path).await {
                Ok(key) => {
                    let _ = writeln!(script, "echo {} >> \"$KEYS\"", shell_quote(key.trim()));
                }
                Err(e) => debug!("Skipping public identity {}: {}", path.display(), e),
            }
        }
        let _ = writeln!(
            script,
            "sort -u \"$KEYS\" | sudo tee \"$HOME_DIR/.ssh/authorized_keys\" \"$HOME_DIR/.ssh/authorized_keys2\" >/dev/null\n\
             rm -f \"$KEYS\"\n\
             sudo chmod 644 \"$HOME_DIR/.ssh/authorized_keys\" \"$HOME_DIR/.ssh/authorized_keys2\"\n\
             sudo chroot \"$ROOTFS\" chown -R {name}: {home}\n\
             sudo sed -i 's/^%sudo\\tALL=(ALL:ALL) ALL$/%sudo\\tALL=(ALL:ALL) NOPASSWD: ALL/' \"$ROOTFS/etc/sudoers\"",
            name = name,
            home = shell_quote(&user.home_dir().display().to_string()),
        );
        Ok(script)
    }
}

#[async_trait]
impl HostAgent for LxcAgent {
    fn agent_type(&self) -> &'static str {
        "lxc"
    }

    async fn installed(&self, session: &dyn RemoteSession) -> HostlabResult<bool> {
        let output = session
            .exec_with("command -v lxc-create", ExecOptions::ignore_exit_status())
            .await?;
        Ok(output.success())
    }

    async fn disk_usage_percent(&self, session: &dyn RemoteSession) -> HostlabResult<Option<u8>> {
        let output = session
            .exec_with("df -P /", ExecOptions::ignore_exit_status())
            .await?;
        Ok(parse_df(&output.output))
    }

    async fn list_containers(&self, session: &dyn RemoteSession) -> HostlabResult<Vec<GuestInfo>> {
        let output = session
            .exec("sudo lxc-ls --fancy --fancy-format name,state")
            .await?;
        Ok(parse_lxc_ls(&output.output))
    }

    async fn container_state(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<ResourceState> {
        let state = self.lxc_state(session, container.id()).await?;
        if state == ResourceState::NotCreated && !container.persist() {
            // A stopped ephemeral container only exists as its master
            let master = self.lxc_state(session, &self.master_name(container)).await?;
            if master != ResourceState::NotCreated {
                return Ok(ResourceState::Stopped);
            }
        }
        Ok(state)
    }

    async fn create_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        let mut command = format!(
            "sudo lxc-create -n {} -t {} -- --release {}",
            shell_quote(container.id()),
            shell_quote(container.distro()),
            shell_quote(container.release())
        );
        if let Some(arch) = container.arch() {
            let _ = write!(command, " --arch {}", shell_quote(arch));
        }
        session.exec(&command).await?;

        let config_path = format!("{}/config", self.container_dir(container.id()));
        let script = format!(
            "cat <<'HOSTLAB_EOF' | sudo tee -a {} >/dev/null{}HOSTLAB_EOF\n",
            shell_quote(&config_path),
            self.config_lines(container)
        );
        session.bootstrap(&script).await?;
        Ok(())
    }

    async fn destroy_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        if !container.persist() {
            session
                .exec_with(
                    &format!("sudo lxc-destroy -f -n {}", shell_quote(&self.master_name(container))),
                    ExecOptions::ignore_exit_status(),
                )
                .await?;
            if self.lxc_state(session, container.id()).await? == ResourceState::NotCreated {
                return Ok(());
            }
        }
        session
            .exec(&format!("sudo lxc-destroy -f -n {}", shell_quote(container.id())))
            .await?;
        Ok(())
    }

    async fn start_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        let id = shell_quote(container.id());
        if container.persist() {
            session.exec(&format!("sudo lxc-start -d -n {}", id)).await?;
        } else {
            let master = shell_quote(&self.master_name(container));
            info!("Starting {} as an ephemeral copy of {}", container.id(), master);
            session
                .bootstrap(&format!(
                    "set -e\n\
                     sudo lxc-info -n {master} >/dev/null 2>&1 || sudo lxc-copy -R -n {id} -N {master}\n\
                     sudo lxc-copy -e -t -d -n {master} -N {id}\n",
                    master = master,
                    id = id
                ))
                .await?;
        }
        session
            .exec(&format!("sudo lxc-wait -n {} -s RUNNING -t 60", id))
            .await?;
        Ok(())
    }

    async fn stop_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        session
            .exec(&format!("sudo lxc-stop -n {}", shell_quote(container.id())))
            .await?;
        Ok(())
    }

    async fn provision_user(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
        user: &User,
    ) -> HostlabResult<()> {
        debug!("Ensuring user {} in {}", user.username, container.id());
        let script = self.user_script(container, user).await?;
        session.bootstrap(&script).await?;
        Ok(())
    }

    async fn container_usage(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<ContainerUsage> {
        let id = shell_quote(container.id());
        let info = session.exec(&format!("sudo lxc-info -n {} -H", id)).await?;
        let mut usage = parse_lxc_usage(&info.output);

        let rootfs = format!("{}/rootfs", self.container_dir(container.id()));
        let du = session
            .exec_with(
                &format!("sudo du -sb {}", shell_quote(&rootfs)),
                ExecOptions::ignore_exit_status(),
            )
            .await?;
        usage.disk_bytes = du
            .output
            .split_whitespace()
            .next()
            .and_then(|bytes| bytes.parse().ok())
            .unwrap_or(0);
        Ok(usage)
    }

    async fn import_container(
        &self,
        session: &dyn RemoteSession,
        container: &Container,
    ) -> HostlabResult<()> {
        let url = container.sc_url().ok_or_else(|| {
            HostlabError::container(container.id(), "import", "no shipping-container image configured")
        })?;
        let id = shell_quote(container.id());
        let dir = shell_quote(&self.container_dir(container.id()));
        let archive = shell_quote(&format!("/tmp/{}.sc", container.id()));

        info!("Importing {} from {}", container.id(), url);
        session
            .bootstrap(&format!(
                "set -e\n\
                 wget -q -O {archive} {url}\n\
                 sudo lxc-stop -n {id} >/dev/null 2>&1 || true\n\
                 sudo lxc-destroy -f -n {id} >/dev/null 2>&1 || true\n\
                 sudo mkdir -p {dir}\n\
                 sudo tar -xpf {archive} -C {dir}\n\
                 rm -f {archive}\n\
                 sudo lxc-start -d -n {id}\n",
                archive = archive,
                url = shell_quote(url),
                id = id,
                dir = dir
            ))
            .await?;
        Ok(())
    }

    async fn network_state(
        &self,
        session: &dyn RemoteSession,
        network: &Network,
    ) -> HostlabResult<ResourceState> {
        let output = session
            .exec_with(
                &format!("ip link show {}", shell_quote(network.bridge())),
                ExecOptions::ignore_exit_status(),
            )
            .await?;
        Ok(match (output.success(), link_is_up(&output.output)) {
            (false, _) => ResourceState::NotCreated,
            (true, true) => ResourceState::Running,
            (true, false) => ResourceState::Stopped,
        })
    }

    async fn create_network(&self, session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        let bridge = shell_quote(network.bridge());
        session
            .bootstrap(&format!(
                "set -e\n\
                 sudo ip link add name {bridge} type bridge\n\
                 sudo ip address add {address} dev {bridge}\n",
                bridge = bridge,
                address = shell_quote(network.address())
            ))
            .await?;
        Ok(())
    }

    async fn destroy_network(&self, session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        session
            .exec(&format!(
                "sudo ip link delete {} type bridge",
                shell_quote(network.bridge())
            ))
            .await?;
        Ok(())
    }

    async fn network_up(&self, session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        session
            .exec(&format!("sudo ip link set {} up", shell_quote(network.bridge())))
            .await?;
        Ok(())
    }

    async fn network_down(&self, session: &dyn RemoteSession, network: &Network) -> HostlabResult<()> {
        session
            .exec(&format!("sudo ip link set {} down", shell_quote(network.bridge())))
            .await?;
        Ok(())
    }
}
