use std::io::Write;
use std::time::Duration;

use hostlab_core::model::TopologyDefinition;
use hostlab_core::{EngineConfig, HostlabError};
use tempfile::NamedTempFile;

fn file_with(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_topology_file() {
    let file = file_with(
        r#"
version: "0.1.0"
config:
  owner: lab-team
nodes:
  - id: rack
    provider: bare_metal
    networks:
      - id: lab
        address: 10.20.0.1/16
        bridge: br-lab
    containers:
      - id: web
        persist: false
        interfaces:
          - network_id: lab
            name: eth0
        users:
          - username: root
            password: toor
"#,
    );

    let def = TopologyDefinition::from_yaml_file(file.path()).unwrap();
    assert_eq!(def.version.as_deref(), Some("0.1.0"));
    assert_eq!(def.nodes.len(), 1);

    let node = &def.nodes[0];
    assert_eq!(node.provider.as_deref(), Some("bare_metal"));
    assert_eq!(node.networks[0].bridge, "br-lab");

    let web = &node.containers[0];
    assert_eq!(web.persist, Some(false));
    assert_eq!(web.distro, None);
    assert_eq!(web.interfaces[0].address, None);
    assert_eq!(web.users[0].password.as_deref(), Some("toor"));
}

#[test]
fn test_unknown_topology_keys_are_rejected() {
    let file = file_with("nodes:\n  - id: rack\n    flavour: large\n");
    match TopologyDefinition::from_yaml_file(file.path()) {
        Err(HostlabError::YamlError(e)) => assert!(e.to_string().contains("flavour")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_engine_config_file() {
    let file = file_with(
        r#"
[scheduler]
poll_interval = "250ms"

[session]
connect_timeout = "10s"

[doctor]
disk_usage_threshold = 75
"#,
    );

    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.scheduler.poll_interval, Duration::from_millis(250));
    assert_eq!(config.session.connect_timeout, Duration::from_secs(10));
    assert_eq!(config.session.timeout, Duration::from_secs(3600));
    assert_eq!(config.doctor.disk_usage_threshold, 75);
    assert_eq!(config.doctor.ephemeral_suffix, "-master");
}

#[test]
fn test_invalid_engine_config_file() {
    let file = file_with("[doctor]\ndisk_usage_threshold = 0\n");
    assert!(matches!(
        EngineConfig::from_file(file.path()),
        Err(HostlabError::ConfigError(_))
    ));

    let missing = EngineConfig::from_file(std::path::Path::new("/nonexistent/hostlab.toml"));
    assert!(matches!(missing, Err(HostlabError::ConfigError(_))));
}
