//! # VeTiS Fleet
//!
//! **The runtime control plane for a multi-host VeTiS process**
//!
//! VeTiS Fleet turns declarative host configuration into live listeners,
//! multiplexes virtual hosts onto shared bind addresses and exposes an
//! administrative HTTP API to create, replace, inspect and gracefully stop
//! servers without disturbing unrelated traffic.
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use std::{sync::Arc, time::Duration};
//! use vetis_fleet::{
//!     admin::AdminServer,
//!     config::{loader, AdminConfig},
//!     fleet::Fleet,
//!     server::handler::HandlerRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fleet = Arc::new(Fleet::new(HandlerRegistry::with_defaults(), Duration::from_secs(5)));
//!
//!     let configs = loader::load("Fleetfile", "localhost:8080\ngzip".as_bytes())?;
//!     fleet.create(configs).await?;
//!
//!     let config = AdminConfig::builder()
//!         .port(2019)
//!         .build()?;
//!     let mut admin = AdminServer::new(config, fleet.clone());
//!     admin.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **[`address`]**: resolves `host:port` text into a canonical socket address
//! - **[`binding`]**: groups host configurations by resolved address
//! - **[`server`]**: one listener per address, its virtual hosts and shutdown
//! - **[`fleet::Fleet`]**: the registry of every constructed server
//! - **[`admin`]**: HTTP handlers driving the fleet lifecycle
//!
//! ## TLS
//!
//! TLS termination is enabled by the `tokio-rust-tls` feature (default).

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;

pub(crate) type FleetRwLock<T> = RwLock<T>;

pub(crate) type FleetVirtualHosts = Arc<FleetRwLock<HashMap<String, Arc<VirtualHost>>>>;

use crate::server::virtual_host::VirtualHost;

pub mod address;
pub mod admin;
pub mod binding;
pub mod config;
pub mod errors;
pub mod fleet;
pub mod server;
#[cfg(test)]
mod tests;

/// Default name given to configuration text submitted through the admin API.
pub static CONFIG: &str = "Fleetfile";

/// Process-wide bound on how long a stop waits for drain and shutdown hooks.
pub const DEFAULT_SHUTDOWN_CUTOFF: Duration = Duration::from_secs(5);
