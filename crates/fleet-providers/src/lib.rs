//! Fleet Providers
//!
//! Cloud backends implementing [`fleet_core::Provider`].
//!
//! Only Hetzner Cloud and DigitalOcean are supported. Other clouds (AWS,
//! Linode, Vultr, Scaleway, Equinix Metal, Oracle) need their own module and
//! a [`ProviderConfig`] variant.

mod api;
pub mod digitalocean;
pub mod hetzner;
pub mod labels;

pub use digitalocean::{DigitalOceanConfig, DigitalOceanProvider};
pub use hetzner::{HetznerCloudProvider, HetznerConfig};

use fleet_core::{PoolConfig, Provider, Result, UserDataTemplate};
use std::sync::Arc;

/// Settings of the selected cloud backend.
pub enum ProviderConfig {
    HetznerCloud(HetznerConfig),
    DigitalOcean(DigitalOceanConfig),
}

impl ProviderConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::HetznerCloud(_) => hetzner::NAME,
            ProviderConfig::DigitalOcean(_) => digitalocean::NAME,
        }
    }
}

/// Build the provider for `config`. Every instance it deploys boots from
/// `user_data`.
pub fn new_provider(
    config: ProviderConfig,
    pool: &PoolConfig,
    user_data: UserDataTemplate,
) -> Result<Arc<dyn Provider>> {
    Ok(match config {
        ProviderConfig::HetznerCloud(c) => Arc::new(HetznerCloudProvider::new(c, pool, user_data)?),
        ProviderConfig::DigitalOcean(c) => Arc::new(DigitalOceanProvider::new(c, pool, user_data)?),
    })
}
