//! Arranges host configurations by the address they bind.
//!
//! Configurations that resolve to the same socket address must share one
//! listener, so they end up in the same [`BindingGroup`] and become virtual
//! hosts of one server.

use std::net::SocketAddr;

use log::debug;

use crate::{address::resolve_host, config::Config, errors::FleetError};

/// Configurations sharing one resolved address, in input order.
pub struct BindingGroup {
    address: SocketAddr,
    configs: Vec<Config>,
}

impl BindingGroup {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn configs(&self) -> &[Config] {
        &self.configs
    }

    /// Returns whether the group's first configuration enables TLS.
    pub fn is_secure(&self) -> bool {
        self.configs
            .first()
            .is_some_and(Config::is_secure)
    }

    pub fn into_configs(self) -> Vec<Config> {
        self.configs
    }
}

/// Binding groups in the order their address was first seen.
#[derive(Default)]
pub struct Bindings {
    groups: Vec<BindingGroup>,
}

impl Bindings {
    pub fn len(&self) -> usize {
        self.groups
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups
            .is_empty()
    }

    pub fn get(&self, address: &SocketAddr) -> Option<&BindingGroup> {
        self.groups
            .iter()
            .find(|group| &group.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BindingGroup> {
        self.groups
            .iter()
    }
}

impl IntoIterator for Bindings {
    type Item = BindingGroup;
    type IntoIter = std::vec::IntoIter<BindingGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups
            .into_iter()
    }
}

/// Groups configurations by resolved address.
///
/// The arrangement is all or nothing: the first address that fails to
/// resolve aborts the whole call with [`FleetError::Binding`].
pub async fn arrange_bindings(configs: Vec<Config>) -> Result<Bindings, FleetError> {
    let mut groups: Vec<BindingGroup> = Vec::new();

    for config in configs {
        let address = resolve_host(config.host(), config.port())
            .await
            .map_err(FleetError::Binding)?;

        debug!("{} resolved to {}", config.address(), address);

        match groups
            .iter_mut()
            .find(|group| group.address == address)
        {
            Some(group) => group
                .configs
                .push(config),
            None => groups.push(BindingGroup { address, configs: vec![config] }),
        }
    }

    Ok(Bindings { groups })
}
