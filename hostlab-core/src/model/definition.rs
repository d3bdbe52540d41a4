//! Declarative topology definitions
//!
//! These are the parsed shape of a topology file. They carry no behaviour;
//! [`Topology::load`](super::Topology::load) turns them into live resources.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::HostlabResult;
use crate::types::ConfigMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyDefinition {
    /// Engine version requirement, e.g. `"0.1.0"` or `">= 0.1.0"`
    pub version: Option<String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
}

impl TopologyDefinition {
    pub fn from_yaml_str(contents: &str) -> HostlabResult<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn from_yaml_file(path: &Path) -> HostlabResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDefinition {
    pub id: String,
    /// Registered provider type, e.g. `vagrant` or `bare_metal`
    pub provider: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub provisioners: Vec<String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub networks: Vec<NetworkDefinition>,
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkDefinition {
    pub id: String,
    /// Bridge address in CIDR form
    pub address: String,
    pub bridge: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub provisioners: Vec<String>,
    #[serde(default)]
    pub config: ConfigMap,
}

/// A container as written. Attributes that can be inherited from another
/// container are optional so an explicit value can be told apart from the
/// default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerDefinition {
    pub id: String,
    /// Id of the container to copy attributes from
    pub inherit: Option<String>,
    /// Templates exist only to be inherited from and are never built
    #[serde(default)]
    pub template: bool,

    pub domain: Option<String>,
    pub distro: Option<String>,
    pub release: Option<String>,
    pub arch: Option<String>,
    pub persist: Option<bool>,
    pub priority: Option<i64>,
    pub provisioners: Option<Vec<String>>,
    pub config: Option<ConfigMap>,
    pub tags: Option<Vec<String>>,
    pub mounts: Option<Vec<String>>,
    /// Location of a shipping-container image; makes the container importable
    pub sc_url: Option<String>,
    pub aa_profile: Option<String>,
    pub cap_drop: Option<Vec<String>>,

    #[serde(default)]
    pub interfaces: Vec<InterfaceDefinition>,
    #[serde(default)]
    pub users: Vec<UserDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceDefinition {
    /// Defaults to `<container-id>-<name>`; seeds address generation
    pub id: Option<String>,
    pub network_id: String,
    pub name: String,
    pub address: Option<String>,
    pub mac: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserDefinition {
    pub username: String,
    pub password: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Private key used to log in as this user
    pub identity: Option<PathBuf>,
    pub public_identity: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LABFILE: &str = r#"
version: ">= 0.1.0"
config:
  domain: lab.zone
nodes:
  - id: vagrant
    provider: vagrant
    config:
      vagrant:
        box: raring64
    networks:
      - id: labnet
        address: 10.10.0.1/16
        bridge: br0
    containers:
      - id: base
        template: true
        distro: ubuntu
        release: precise
        users:
          - username: deployer
            password: deployer
            uid: 2600
            gid: 2600
      - id: web
        inherit: base
        interfaces:
          - network_id: labnet
            name: eth0
            address: 10.10.0.254/16
"#;

    #[test]
    fn test_parse_yaml_topology() {
        let def = TopologyDefinition::from_yaml_str(LABFILE).unwrap();
        assert_eq!(def.version.as_deref(), Some(">= 0.1.0"));
        assert_eq!(def.nodes.len(), 1);

        let node = &def.nodes[0];
        assert_eq!(node.provider.as_deref(), Some("vagrant"));
        assert_eq!(node.networks[0].bridge, "br0");
        assert_eq!(node.containers.len(), 2);
        assert!(node.containers[0].template);
        assert_eq!(node.containers[1].inherit.as_deref(), Some("base"));
        assert_eq!(node.containers[1].release, None);
        assert_eq!(node.containers[0].users[0].uid, Some(2600));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = TopologyDefinition::from_yaml_str("version: '0.1.0'\nbogus: 1\n");
        assert!(result.is_err());
    }
}
