//! Orchestration engine for topologies of virtual hosts
//!
//! A topology is a set of nodes (hosts), bridge networks on those nodes and
//! containers attached to the networks. The engine drives every resource
//! through one lifecycle, runs resources of equal priority in parallel and
//! reports on health and status. Concrete providers, the container agent
//! and remote sessions plug in through the traits defined here.

pub mod address;
pub mod agent;
pub mod command;
pub mod config;
pub mod connection;
pub mod context;
pub mod doctor;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod provisioner;
pub mod scheduler;
pub mod status;
pub mod types;
pub mod version;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use agent::{ContainerUsage, GuestInfo, HostAgent};
pub use config::EngineConfig;
pub use connection::{ConnectionManager, Connector, ExecOptions, ExecOutput, RemoteSession, SessionTarget};
pub use context::ExecutionContext;
pub use doctor::{Doctor, DoctorReport, Finding, Severity};
pub use error::{HostlabError, HostlabResult};
pub use lifecycle::Lifecycle;
pub use model::{Container, Interface, LoadContext, Network, Node, Topology, TopologyDefinition};
pub use orchestrator::Orchestrator;
pub use provider::{Provider, ProviderFactory, ProviderRegistry};
pub use provisioner::{Hook, HookTarget, Provisioner, ProvisionerFactory, ProvisionerRegistry};
pub use scheduler::{ParallelScheduler, Schedulable};
pub use status::StatusReport;
pub use types::{Action, ConfigMap, ResourceKind, ResourceState};
