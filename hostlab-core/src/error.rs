use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// One failed worker inside a scheduler tier
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    pub resource_id: String,
    pub message: String,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource_id, self.message)
    }
}

fn join_failures(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum HostlabError {
    #[error("Topology error: {message}")]
    Topology { message: String },

    #[error("Node '{id}' {action} failed: {message}")]
    Node {
        id: String,
        action: String,
        message: String,
    },

    #[error("Network '{id}' {action} failed: {message}")]
    Network {
        id: String,
        action: String,
        message: String,
    },

    #[error("Container '{id}' {action} failed: {message}")]
    Container {
        id: String,
        action: String,
        message: String,
    },

    #[error("Interface '{id}' {action} failed: {message}")]
    Interface {
        id: String,
        action: String,
        message: String,
    },

    #[error("Provider '{provider}' operation '{operation}' failed: {details}")]
    Provider {
        provider: String,
        operation: String,
        details: String,
    },

    #[error("Provisioner '{provisioner}' failed during {hook}: {details}")]
    Provisioner {
        provisioner: String,
        hook: String,
        details: String,
    },

    #[error("Connection error to {address}: {details}")]
    Connection { address: String, details: String },

    #[error("Command '{command}' exited with status {exit_code}\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Parallel {action} of {kind} resources failed: {}", join_failures(.failures))]
    Scheduler {
        kind: String,
        action: String,
        failures: Vec<WorkerFailure>,
    },

    #[error("Feature not implemented: {feature}")]
    NotImplemented { feature: String },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type HostlabResult<T> = std::result::Result<T, HostlabError>;

impl HostlabError {
    pub fn topology(message: impl Into<String>) -> Self {
        HostlabError::Topology {
            message: message.into(),
        }
    }

    pub fn node(id: &str, action: impl fmt::Display, message: impl Into<String>) -> Self {
        HostlabError::Node {
            id: id.to_string(),
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn network(id: &str, action: impl fmt::Display, message: impl Into<String>) -> Self {
        HostlabError::Network {
            id: id.to_string(),
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn container(id: &str, action: impl fmt::Display, message: impl Into<String>) -> Self {
        HostlabError::Container {
            id: id.to_string(),
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn interface(id: &str, action: impl fmt::Display, message: impl Into<String>) -> Self {
        HostlabError::Interface {
            id: id.to_string(),
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn provider(
        provider: impl Into<String>,
        operation: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        HostlabError::Provider {
            provider: provider.into(),
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub fn connection(address: impl Into<String>, details: impl Into<String>) -> Self {
        HostlabError::Connection {
            address: address.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_errors_name_id_and_action() {
        let err = HostlabError::container("web-1", "create", "node is dead");
        let msg = err.to_string();
        assert!(msg.contains("web-1"));
        assert!(msg.contains("create"));
        assert!(msg.contains("node is dead"));
    }

    #[test]
    fn test_command_failure_includes_output() {
        let err = HostlabError::CommandFailed {
            command: "lxc-start -n web".to_string(),
            exit_code: 1,
            stdout: "starting".to_string(),
            stderr: "no such container".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("starting"));
        assert!(msg.contains("no such container"));
    }

    #[test]
    fn test_scheduler_error_lists_failures() {
        let err = HostlabError::Scheduler {
            kind: "container".to_string(),
            action: "up".to_string(),
            failures: vec![
                WorkerFailure {
                    resource_id: "a".to_string(),
                    message: "boom".to_string(),
                },
                WorkerFailure {
                    resource_id: "b".to_string(),
                    message: "bang".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Parallel up of container resources failed: a: boom; b: bang"
        );
    }
}
