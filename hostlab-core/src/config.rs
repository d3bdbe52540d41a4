//! Engine configuration
//!
//! Loaded from TOML, with every value overridable through `HOSTLAB_*`
//! environment variables. Topology-level settings (domains, provider
//! sections) live in the topology definition instead.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HostlabError, HostlabResult};

/// Suffix of an ephemeral container's master copy unless configured
pub const DEFAULT_EPHEMERAL_SUFFIX: &str = "-master";

/// Parse an environment variable as a typed value
fn env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel scheduler settings
    pub scheduler: SchedulerConfig,

    /// Remote session settings
    pub session: SessionConfig,

    /// Health check settings
    pub doctor: DoctorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the set of still-running workers is reported
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Directory for per-resource worker logs; workers log through the
    /// ambient subscriber when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound for any single remote command
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Upper bound for establishing a session
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    /// Disk usage (percent) at which a node is flagged
    pub disk_usage_threshold: u8,

    /// Suffix the container backend gives the master copy of an ephemeral
    /// container; such names are not reported as undeclared
    pub ephemeral_suffix: String,

    /// Minimum soft limit on open file descriptors for this process
    pub min_open_files: u64,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            disk_usage_threshold: 90,
            ephemeral_suffix: DEFAULT_EPHEMERAL_SUFFIX.to_string(),
            min_open_files: 1024,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> HostlabResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HostlabError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> HostlabResult<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HOSTLAB_*` environment overrides and validate the result
    pub fn with_env_overrides(mut self) -> HostlabResult<Self> {
        if let Some(ms) = env_var::<u64>("HOSTLAB_POLL_INTERVAL_MS") {
            self.scheduler.poll_interval = Duration::from_millis(ms);
        }
        if let Ok(dir) = env::var("HOSTLAB_LOG_DIR") {
            self.scheduler.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = env_var::<u64>("HOSTLAB_SESSION_TIMEOUT_SECS") {
            self.session.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_var::<u64>("HOSTLAB_CONNECT_TIMEOUT_SECS") {
            self.session.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(pct) = env_var::<u8>("HOSTLAB_DISK_USAGE_THRESHOLD") {
            self.doctor.disk_usage_threshold = pct;
        }
        if let Ok(suffix) = env::var("HOSTLAB_EPHEMERAL_SUFFIX") {
            self.doctor.ephemeral_suffix = suffix;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> HostlabResult<()> {
        if self.scheduler.poll_interval.is_zero() {
            return Err(HostlabError::ConfigError(
                "scheduler.poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.session.timeout.is_zero() || self.session.connect_timeout.is_zero() {
            return Err(HostlabError::ConfigError(
                "session timeouts must be greater than zero".to_string(),
            ));
        }
        if self.doctor.disk_usage_threshold == 0 || self.doctor.disk_usage_threshold > 100 {
            return Err(HostlabError::ConfigError(format!(
                "doctor.disk_usage_threshold must be between 1 and 100, got {}",
                self.doctor.disk_usage_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(1));
        assert_eq!(config.session.timeout, Duration::from_secs(3600));
        assert_eq!(config.doctor.disk_usage_threshold, 90);
        assert_eq!(config.doctor.ephemeral_suffix, "-master");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scheduler]
            poll_interval = "250ms"
            log_dir = "/tmp/hostlab-logs"

            [doctor]
            disk_usage_threshold = 80
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.poll_interval, Duration::from_millis(250));
        assert_eq!(
            config.scheduler.log_dir.as_deref(),
            Some(Path::new("/tmp/hostlab-logs"))
        );
        assert_eq!(config.doctor.disk_usage_threshold, 80);
        assert_eq!(config.session.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let result = EngineConfig::from_toml_str("[doctor]\ndisk_usage_threshold = 0\n");
        assert!(matches!(result, Err(HostlabError::ConfigError(_))));
    }

    #[test]
    fn test_zero_poll_interval_override_rejected() {
        std::env::set_var("HOSTLAB_POLL_INTERVAL_MS", "0");
        let result = EngineConfig::default().with_env_overrides();
        std::env::remove_var("HOSTLAB_POLL_INTERVAL_MS");

        match result {
            Err(HostlabError::ConfigError(message)) => assert!(message.contains("poll_interval")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hostlab.toml");
        std::fs::write(&path, "[session]\ntimeout = \"10m\"\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.session.timeout, Duration::from_secs(600));
    }
}
