//! Topology object model
//!
//! [`definition`] holds the declarative shape of a topology; the rest are
//! the live resources [`Topology::load`] builds from it.

mod container;
pub mod definition;
mod interface;
mod network;
mod node;
mod topology;
mod user;

pub use container::{Container, ContainerMode, ContainerSpec};
pub use definition::{
    ContainerDefinition, InterfaceDefinition, NetworkDefinition, NodeDefinition,
    TopologyDefinition, UserDefinition,
};
pub use interface::Interface;
pub use network::Network;
pub use node::Node;
pub use topology::{LoadContext, Topology};
pub use user::User;
