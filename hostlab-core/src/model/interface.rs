use std::net::Ipv4Addr;
use std::sync::Arc;

use super::definition::InterfaceDefinition;
use super::network::Network;
use crate::address;
use crate::error::{HostlabError, HostlabResult};

/// A container's attachment to a network
///
/// The address and MAC are fixed at load time. When the definition leaves
/// them out they are derived from the interface id, so loading the same
/// definition twice yields the same values.
#[derive(Debug, Clone)]
pub struct Interface {
    id: String,
    name: String,
    network: Arc<Network>,
    address: String,
    mac: String,
    primary: bool,
}

impl Interface {
    pub(crate) fn resolve(
        container_id: &str,
        def: &InterfaceDefinition,
        network: Arc<Network>,
    ) -> HostlabResult<Self> {
        let id = def
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", container_id, def.name));

        let address = match &def.address {
            Some(address) => address.clone(),
            None => address::generate_ip(&id),
        };
        address::ip(&address).map_err(|e| HostlabError::interface(&id, "load", e.to_string()))?;

        let mac = def.mac.clone().unwrap_or_else(|| address::generate_mac(&id));

        Ok(Self {
            id,
            name: def.name.clone(),
            network,
            address,
            mac,
            primary: def.primary,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Device name inside the container, e.g. `eth0`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn network_id(&self) -> &str {
        self.network.id()
    }

    /// Address in CIDR form
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    pub fn ip(&self) -> HostlabResult<Ipv4Addr> {
        address::ip(&self.address)
    }

    pub fn cidr(&self) -> HostlabResult<u8> {
        address::cidr(&self.address)
    }

    pub fn netmask(&self) -> HostlabResult<Ipv4Addr> {
        address::netmask(&self.address)
    }

    pub fn ptr(&self) -> HostlabResult<String> {
        address::ptr(&self.address)
    }
}
