//! Remote sessions over the system `ssh` client
//!
//! Each session owns a private control socket directory; the first command
//! opens an OpenSSH master connection and every later command, script or
//! copy multiplexes over it. Password logins go through `sshpass -e` so
//! the password never shows up on a command line. Container sessions hop
//! through their node with a `ProxyCommand`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

use hostlab_core::command::{CommandExecutor, CommandOptions, CommandOutput};
use hostlab_core::connection::{Connector, ExecOutput, ProxyTarget, RemoteSession, SessionTarget};
use hostlab_core::error::{HostlabError, HostlabResult};

/// ssh reports its own failures with this status
const SSH_ERROR_STATUS: i32 = 255;

const HOST_KEY_OPTIONS: [&str; 6] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

/// `ProxyCommand` value hopping through `proxy`
pub fn proxy_command(proxy: &ProxyTarget) -> String {
    let mut command = vec!["ssh".to_string()];
    command.extend(HOST_KEY_OPTIONS.iter().map(|s| s.to_string()));
    command.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
    for key in &proxy.keys {
        command.push("-i".to_string());
        command.push(key.display().to_string());
    }
    command.extend([
        "-p".to_string(),
        proxy.port.to_string(),
        "-W".to_string(),
        "%h:%p".to_string(),
        format!("{}@{}", proxy.user, proxy.host),
    ]);
    command.join(" ")
}

pub struct OpenSshSession {
    target: SessionTarget,
    executor: Arc<dyn CommandExecutor>,
    control_dir: TempDir,
}

impl OpenSshSession {
    /// Open the master connection to `target`
    pub async fn open(target: SessionTarget, executor: Arc<dyn CommandExecutor>) -> HostlabResult<Self> {
        let control_dir = tempfile::Builder::new().prefix("hostlab-ssh-").tempdir()?;
        let session = Self {
            target,
            executor,
            control_dir,
        };

        let output = session
            .ssh(&["true"], session.target.connect_timeout, None)
            .await?;
        if !output.success {
            return Err(HostlabError::connection(
                session.address(),
                output.stderr_string().trim().to_string(),
            ));
        }
        info!("Connected to {}", session.address());
        Ok(session)
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("control")
    }

    /// Options shared by `ssh` and `scp`
    pub fn common_options(&self) -> Vec<String> {
        let mut options: Vec<String> = HOST_KEY_OPTIONS.iter().map(|s| s.to_string()).collect();
        options.extend([
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.target.connect_timeout.as_secs().max(1)),
        ]);
        if self.target.password.is_none() {
            options.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        for key in &self.target.keys {
            options.push("-i".to_string());
            options.push(key.display().to_string());
        }
        if let Some(proxy) = &self.target.proxy {
            options.push("-o".to_string());
            options.push(format!("ProxyCommand={}", proxy_command(proxy)));
        }
        options
    }

    /// Full `ssh` argument list running `remote` on the far end
    pub fn ssh_args(&self, remote: &[&str]) -> Vec<String> {
        let mut args = self.common_options();
        args.extend([
            "-p".to_string(),
            self.target.port.to_string(),
            "-l".to_string(),
            self.target.user.clone(),
            self.target.host.clone(),
            "--".to_string(),
        ]);
        args.extend(remote.iter().map(|s| s.to_string()));
        args
    }

    fn remote_path(&self, path: &str) -> String {
        format!("{}@{}:{}", self.target.user, self.target.host, path)
    }

    fn scp_args(&self, from: String, to: String) -> Vec<String> {
        let mut args = self.common_options();
        args.extend(["-P".to_string(), self.target.port.to_string(), from, to]);
        args
    }

    async fn invoke(
        &self,
        program: &str,
        args: Vec<String>,
        mut options: CommandOptions,
    ) -> HostlabResult<CommandOutput> {
        let mut argv: Vec<&str> = Vec::with_capacity(args.len() + 2);
        let program = match &self.target.password {
            Some(password) => {
                options = options.with_env_var("SSHPASS", password.clone());
                argv.extend(["-e", program]);
                "sshpass"
            }
            None => program,
        };
        argv.extend(args.iter().map(String::as_str));
        self.executor.execute(program, &argv, options).await
    }

    async fn ssh(
        &self,
        remote: &[&str],
        timeout: Duration,
        stdin: Option<&str>,
    ) -> HostlabResult<CommandOutput> {
        let mut options = CommandOptions::new().with_timeout(timeout);
        if let Some(input) = stdin {
            options = options.with_stdin(input.as_bytes().to_vec());
        }
        self.invoke("ssh", self.ssh_args(remote), options).await
    }

    fn exec_output(&self, output: CommandOutput) -> HostlabResult<ExecOutput> {
        if output.status == SSH_ERROR_STATUS {
            return Err(HostlabError::connection(
                self.address(),
                output.stderr_string().trim().to_string(),
            ));
        }
        Ok(ExecOutput {
            output: output.stdout_string(),
            stderr: output.stderr_string(),
            exit_code: output.status,
        })
    }

    async fn copy(&self, from: String, to: String) -> HostlabResult<()> {
        let line = format!("scp {} {}", from, to);
        debug!("{}", line);
        self.invoke(
            "scp",
            self.scp_args(from, to),
            CommandOptions::new().with_timeout(self.target.timeout),
        )
        .await?
        .into_result(&line)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for OpenSshSession {
    fn address(&self) -> String {
        self.target.address()
    }

    async fn run(&self, command: &str, timeout: Option<Duration>) -> HostlabResult<ExecOutput> {
        debug!("[{}] {}", self.address(), command);
        let output = self
            .ssh(&[command], timeout.unwrap_or(self.target.timeout), None)
            .await?;
        self.exec_output(output)
    }

    async fn run_script(&self, script: &str) -> HostlabResult<ExecOutput> {
        debug!("[{}] script of {} bytes", self.address(), script.len());
        let output = self
            .ssh(&["/bin/bash", "-s"], self.target.timeout, Some(script))
            .await?;
        self.exec_output(output)
    }

    async fn upload(&self, local: &Path, remote: &str) -> HostlabResult<()> {
        self.copy(local.display().to_string(), self.remote_path(remote))
            .await
    }

    async fn download(&self, remote: &str, local: &Path) -> HostlabResult<()> {
        self.copy(self.remote_path(remote), local.display().to_string())
            .await
    }

    async fn close(&self) -> HostlabResult<()> {
        let control = format!("ControlPath={}", self.control_path().display());
        let output = self
            .executor
            .execute(
                "ssh",
                &["-o", control.as_str(), "-O", "exit", self.target.host.as_str()],
                CommandOptions::new().with_timeout(self.target.connect_timeout),
            )
            .await?;
        if !output.success {
            debug!(
                "No master connection to close for {}: {}",
                self.address(),
                output.stderr_string().trim()
            );
        }
        Ok(())
    }
}

/// Opens [`OpenSshSession`]s
pub struct OpenSshConnector {
    executor: Arc<dyn CommandExecutor>,
}

impl OpenSshConnector {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn connect(&self, target: &SessionTarget) -> HostlabResult<Arc<dyn RemoteSession>> {
        let session = OpenSshSession::open(target.clone(), self.executor.clone()).await?;
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlab_core::test_helpers::ScriptedExecutor;
    use pretty_assertions::assert_eq;

    fn node_target() -> SessionTarget {
        SessionTarget {
            host: "192.0.2.10".to_string(),
            port: 2222,
            user: "operator".to_string(),
            password: None,
            keys: vec![PathBuf::from("/keys/host")],
            proxy: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }

    fn container_target() -> SessionTarget {
        SessionTarget {
            host: "10.10.0.20".to_string(),
            port: 22,
            user: "deployer".to_string(),
            password: Some("s3cret".to_string()),
            keys: vec![],
            proxy: Some(ProxyTarget {
                host: "192.0.2.10".to_string(),
                port: 2222,
                user: "operator".to_string(),
                keys: vec![PathBuf::from("/keys/host")],
            }),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_connect_opens_master_connection() {
        let executor = Arc::new(ScriptedExecutor::new());
        let connector = OpenSshConnector::new(executor.clone());

        let session = connector.connect(&node_target()).await.unwrap();
        assert_eq!(session.address(), "operator@192.0.2.10:2222");

        let commands = executor.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("ssh -o StrictHostKeyChecking=no"));
        assert!(commands[0].contains("-o ControlMaster=auto"));
        assert!(commands[0].contains("-o BatchMode=yes"));
        assert!(commands[0].ends_with("-i /keys/host -p 2222 -l operator 192.0.2.10 -- true"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_a_connection_error() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("-- true", 255, "");
        let connector = OpenSshConnector::new(executor);

        match connector.connect(&node_target()).await {
            Err(HostlabError::Connection { address, .. }) => {
                assert_eq!(address, "operator@192.0.2.10:2222")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
    }

    #[tokio::test]
    async fn test_password_and_proxy() {
        let executor = Arc::new(ScriptedExecutor::new());
        let session = OpenSshSession::open(container_target(), executor.clone())
            .await
            .unwrap();

        let line = &executor.commands()[0];
        assert!(line.starts_with("sshpass -e ssh "));
        assert!(!line.contains("s3cret"));
        assert!(!line.contains("BatchMode=yes -p 22"));
        assert!(line.contains(
            "ProxyCommand=ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o LogLevel=ERROR -o BatchMode=yes -i /keys/host -p 2222 -W %h:%p operator@192.0.2.10"
        ));
        assert_eq!(session.target().user, "deployer");
    }

    #[tokio::test]
    async fn test_run_reports_exit_status() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("-- lxc-ls", 1, "partial");
        let session = OpenSshSession::open(node_target(), executor.clone())
            .await
            .unwrap();

        let output = session.run("lxc-ls", None).await.unwrap();
        assert_eq!(output.exit_code, 1);
        assert_eq!(output.output, "partial");
        assert!(session.exec("lxc-ls").await.is_err());
    }

    #[tokio::test]
    async fn test_script_copy_and_close() {
        let executor = Arc::new(ScriptedExecutor::new());
        let session = OpenSshSession::open(node_target(), executor.clone())
            .await
            .unwrap();

        session.bootstrap("echo hi").await.unwrap();
        session
            .upload(Path::new("/tmp/web.sc"), "/tmp/web.sc")
            .await
            .unwrap();
        session.close().await.unwrap();

        let commands = executor.commands();
        assert!(commands[1].ends_with("-- /bin/bash -s"));
        assert!(commands[2].starts_with("scp "));
        assert!(commands[2].ends_with("-P 2222 /tmp/web.sc operator@192.0.2.10:/tmp/web.sc"));
        assert!(commands[3].contains("-O exit 192.0.2.10"));
    }
}
