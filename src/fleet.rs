//! The fleet registry: every server the process has constructed.
//!
//! [`Fleet`] is the single source of truth for what is running. Creating
//! and replacing servers validate and construct the whole request before the
//! registry lock is taken, so a rejected request never leaves live state
//! half changed.
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use vetis_fleet::{config::loader, fleet::Fleet, server::handler::HandlerRegistry};
//!
//! let fleet = Fleet::new(HandlerRegistry::with_defaults(), Duration::from_secs(5));
//! fleet.create(loader::load("Fleetfile", "127.0.0.1:8080\ngzip".as_bytes())?).await?;
//!
//! let report = fleet.stop("127.0.0.1:8080").await?.await?;
//! assert!(report.is_clean());
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use log::{error, info, warn};
use tokio::{sync::RwLockReadGuard, task::JoinHandle};

use crate::{
    address,
    binding::arrange_bindings,
    config::Config,
    errors::{ConflictError, FleetError},
    server::{
        handler::HandlerRegistry,
        shutdown::{Drain, ShutdownReport},
        virtual_host::VirtualHost,
        Server, ServerState,
    },
    FleetRwLock,
};

pub struct Fleet {
    servers: FleetRwLock<Vec<Arc<Server>>>,
    handlers: HandlerRegistry,
    shutdown_cutoff: Duration,
}

impl Fleet {
    /// Creates an empty fleet.
    ///
    /// `shutdown_cutoff` bounds the drain and hooks of every server stopped
    /// through [`Fleet::stop`] or superseded by [`Fleet::replace`].
    pub fn new(handlers: HandlerRegistry, shutdown_cutoff: Duration) -> Self {
        Self { servers: FleetRwLock::new(Vec::new()), handlers, shutdown_cutoff }
    }

    /// Locks the registry for reading.
    ///
    /// No create, replace or stop can apply while the guard is held, so
    /// views built under it see the fleet between two mutations.
    pub async fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Server>>> {
        self.servers
            .read()
            .await
    }

    /// Returns the servers in registration order.
    pub async fn servers(&self) -> Vec<Arc<Server>> {
        self.servers
            .read()
            .await
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.servers
            .read()
            .await
            .len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Registers a constructed server without starting it.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::AddressInUse`] when a server is already
    /// registered at the same address.
    pub async fn register(&self, server: Server) -> Result<Arc<Server>, FleetError> {
        let mut servers = self
            .servers
            .write()
            .await;

        if servers
            .iter()
            .any(|existing| existing.address() == server.address())
        {
            return Err(ConflictError::AddressInUse(
                server
                    .address()
                    .to_string(),
            )
            .into());
        }

        let server = Arc::new(server);
        servers.push(server.clone());
        Ok(server)
    }

    /// Arranges configurations by address and constructs one stopped server
    /// per address. Touches no live state.
    pub async fn build(&self, configs: Vec<Config>) -> Result<Vec<Server>, FleetError> {
        let bindings = arrange_bindings(configs).await?;

        bindings
            .into_iter()
            .map(|group| {
                let address = group.address();
                let tls = group.is_secure();
                Server::new(address, group.into_configs(), tls, &self.handlers)
                    .map_err(FleetError::from)
            })
            .collect()
    }

    /// Adds the configured hosts to the fleet.
    ///
    /// Hosts whose address is already served are merged into that server;
    /// the others get a new, started server. The request is all or nothing:
    /// any conflict or bind failure leaves the fleet as it was.
    pub async fn create(&self, configs: Vec<Config>) -> Result<(), FleetError> {
        let built = self
            .build(configs)
            .await?;

        let mut servers = self
            .servers
            .write()
            .await;

        let mut merges: Vec<(Arc<Server>, Vec<Arc<VirtualHost>>)> = Vec::new();
        let mut fresh: Vec<Arc<Server>> = Vec::new();
        for server in built {
            let existing = servers
                .iter()
                .find(|existing| existing.address() == server.address())
                .cloned();

            match existing {
                Some(existing) => {
                    let hosts = server
                        .virtual_hosts()
                        .await;
                    for host in &hosts {
                        existing
                            .check_merge(host.hostname(), host.is_secure())
                            .await?;
                    }
                    merges.push((existing, hosts));
                }
                None => fresh.push(Arc::new(server)),
            }
        }

        let to_start: Vec<Arc<Server>> = fresh
            .iter()
            .cloned()
            .chain(
                merges
                    .iter()
                    .map(|(server, _)| server.clone()),
            )
            .filter(|server| server.state() == ServerState::Stopped)
            .collect();

        let mut started: Vec<Arc<Server>> = Vec::new();
        for server in to_start {
            if let Err(e) = server
                .start()
                .await
            {
                error!("Cannot start {}: {}", server.address(), e);
                for server in &started {
                    server
                        .halt()
                        .await;
                }
                return Err(e);
            }
            started.push(server);
        }

        for (server, hosts) in merges {
            for host in hosts {
                server
                    .merge_virtual_host(host)
                    .await?;
            }
        }

        servers.extend(fresh);
        info!("Fleet updated, {} servers registered", servers.len());
        Ok(())
    }

    /// Replaces the whole fleet with the configured hosts.
    ///
    /// The previous servers stop listening before the new ones bind, then
    /// drain and run their hooks in the background. If any new server fails
    /// to start, the new servers are closed and the previous fleet is
    /// restored and restarted.
    pub async fn replace(&self, configs: Vec<Config>) -> Result<(), FleetError> {
        let fresh: Vec<Arc<Server>> = self
            .build(configs)
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();

        let mut servers = self
            .servers
            .write()
            .await;

        let previous = std::mem::take(&mut *servers);
        let mut drains: Vec<Drain> = Vec::new();
        for server in &previous {
            if let Some(drain) = server
                .begin_shutdown()
                .await
            {
                drains.push(drain);
            }
        }

        let mut started: Vec<Arc<Server>> = Vec::new();
        for server in &fresh {
            if let Err(e) = server
                .start()
                .await
            {
                error!("Cannot start {}, restoring the previous fleet: {}", server.address(), e);
                for server in &started {
                    server
                        .halt()
                        .await;
                }

                let interrupted: Vec<SocketAddr> = drains
                    .iter()
                    .map(Drain::address)
                    .collect();
                for drain in drains {
                    drain.release();
                }
                for server in previous
                    .iter()
                    .filter(|server| interrupted.contains(&server.address()))
                {
                    if let Err(e) = server
                        .start()
                        .await
                    {
                        error!("Cannot restart {}: {}", server.address(), e);
                    }
                }

                *servers = previous;
                return Err(e);
            }
            started.push(server.clone());
        }

        *servers = fresh;
        info!("Fleet replaced, {} servers registered", servers.len());

        for drain in drains {
            let cutoff = self.shutdown_cutoff;
            tokio::spawn(async move {
                let report = drain
                    .finish(cutoff)
                    .await;
                log_report(&report);
            });
        }

        Ok(())
    }

    pub(crate) async fn locate(address: &str) -> Option<SocketAddr> {
        if let Ok(address) = address.parse::<SocketAddr>() {
            return Some(address);
        }
        address::resolve(address)
            .await
            .ok()
    }

    /// Picks the server matching `address` as written or as `resolved`.
    pub(crate) fn find_in(
        servers: &[Arc<Server>],
        address: &str,
        resolved: Option<SocketAddr>,
    ) -> Option<Arc<Server>> {
        servers
            .iter()
            .find(|server| {
                Some(server.address()) == resolved || server.address().to_string() == address
            })
            .cloned()
    }

    /// Finds a server by its address, as written or once resolved.
    pub async fn find(&self, address: &str) -> Option<Arc<Server>> {
        let resolved = Self::locate(address).await;
        Self::find_in(
            &self
                .servers
                .read()
                .await,
            address,
            resolved,
        )
    }

    /// Gracefully stops one server.
    ///
    /// The listener is closed when this returns; the returned task drains
    /// connections and runs hooks within the fleet's cutoff. The server stays
    /// registered in the stopped state.
    pub async fn stop(&self, address: &str) -> Result<JoinHandle<ShutdownReport>, FleetError> {
        let resolved = Self::locate(address).await;

        let (server, drain) = {
            let servers = self
                .servers
                .write()
                .await;
            let Some(server) = Self::find_in(&servers, address, resolved) else {
                return Err(FleetError::NotFound(address.to_string()));
            };
            let drain = server
                .begin_shutdown()
                .await;
            (server, drain)
        };

        let cutoff = self.shutdown_cutoff;
        Ok(tokio::spawn(async move {
            let report = match drain {
                Some(drain) => {
                    drain
                        .finish(cutoff)
                        .await
                }
                None => ShutdownReport::empty(server.address()),
            };
            log_report(&report);
            report
        }))
    }

    /// Stops every server, waiting at most `cutoff` for each.
    pub async fn shutdown(&self, cutoff: Duration) -> Vec<ShutdownReport> {
        let mut reports = Vec::new();
        for server in self
            .servers()
            .await
        {
            let report = server
                .stop(cutoff)
                .await;
            log_report(&report);
            reports.push(report);
        }
        reports
    }
}

fn log_report(report: &ShutdownReport) {
    for failure in report.failures() {
        warn!(
            "Shutdown hook {} of {} on {} failed: {}",
            failure.index,
            failure.hostname,
            report.address(),
            failure.message
        );
    }
    if report.timed_out() {
        warn!("Server {} stopped after its shutdown cutoff", report.address());
    }
}
