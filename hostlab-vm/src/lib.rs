//! Stock backends for Hostlab: bare-metal and Vagrant node providers, the
//! LXC host agent and sessions over the system OpenSSH client.

pub mod bare_metal;
pub mod lxc;
pub mod ssh;
pub mod vagrant;

use std::sync::Arc;

pub use bare_metal::{BareMetalProvider, BareMetalProviderFactory};
pub use lxc::LxcAgent;
pub use ssh::{OpenSshConnector, OpenSshSession};
pub use vagrant::{VagrantProvider, VagrantProviderFactory};

// Re-export core types for convenience
pub use hostlab_core::{
    command::{CommandExecutor, TokioCommandExecutor},
    error::{HostlabError, HostlabResult},
    provider::ProviderRegistry,
};

/// Register `bare_metal` and `vagrant`
pub fn register_builtin_providers(registry: &mut ProviderRegistry, executor: Arc<dyn CommandExecutor>) {
    registry.register(Arc::new(BareMetalProviderFactory));
    registry.register(Arc::new(VagrantProviderFactory::new(executor)));
}

/// A registry holding every stock provider, driving local commands with
/// `executor`
pub fn builtin_providers(executor: Arc<dyn CommandExecutor>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    register_builtin_providers(&mut registry, executor);
    registry
}
