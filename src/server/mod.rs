//! Servers: one listener bound to one resolved address.
//!
//! A [`Server`] owns the virtual hosts sharing its address and moves through
//! the [`ServerState`] lifecycle:
//!
//! ```text
//! Stopped --start--> Listening --begin_shutdown--> ShuttingDown --finish--> Stopped
//! ```

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::info;
use serde::Serialize;

use crate::{
    config::Config,
    errors::{ConflictError, ConstructionError, FleetError},
    server::{
        conn::listener::{
            tcp::{TcpServerListener, TlsAcceptor},
            RunningListener,
        },
        handler::HandlerRegistry,
        shutdown::{Drain, ShutdownReport},
        virtual_host::VirtualHost,
    },
    FleetRwLock, FleetVirtualHosts,
};

pub(crate) mod conn;
pub mod handler;
pub mod shutdown;
#[cfg(feature = "tokio-rust-tls")]
pub mod tls;
pub mod virtual_host;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Listening,
    ShuttingDown,
}

pub(crate) struct Lifecycle {
    pub(crate) state: ServerState,
    listener: Option<RunningListener>,
}

pub struct Server {
    address: SocketAddr,
    tls: bool,
    virtual_hosts: FleetVirtualHosts,
    #[cfg(feature = "tokio-rust-tls")]
    certificates: Arc<tls::SniResolver>,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Server {
    /// Builds a stopped server with one virtual host per configuration.
    ///
    /// `tls` is the TLS posture of the whole server. No socket is opened
    /// until [`Server::start`].
    ///
    /// # Errors
    ///
    /// Fails when two configurations share a hostname, when a configuration
    /// does not match `tls`, when a directive cannot be built or when TLS
    /// material cannot be read.
    pub fn new(
        address: SocketAddr,
        configs: Vec<Config>,
        tls: bool,
        handlers: &HandlerRegistry,
    ) -> Result<Self, ConstructionError> {
        #[cfg(feature = "tokio-rust-tls")]
        let certificates = Arc::new(tls::SniResolver::default());

        let mut virtual_hosts: HashMap<String, Arc<VirtualHost>> = HashMap::new();
        for config in configs {
            if config.is_secure() != tls {
                return Err(ConstructionError::MixedTls {
                    address: address.to_string(),
                    hostname: config
                        .host()
                        .to_string(),
                });
            }

            let virtual_host = VirtualHost::new(config, handlers)?;
            if virtual_hosts.contains_key(&virtual_host.key()) {
                return Err(ConstructionError::DuplicateHostname {
                    address: address.to_string(),
                    hostname: virtual_host
                        .hostname()
                        .to_string(),
                });
            }

            #[cfg(feature = "tokio-rust-tls")]
            if let Some(certificate) = virtual_host.certificate() {
                certificates.insert(virtual_host.hostname(), certificate);
            }

            virtual_hosts.insert(virtual_host.key(), Arc::new(virtual_host));
        }

        Ok(Self {
            address,
            tls,
            virtual_hosts: Arc::new(FleetRwLock::new(virtual_hosts)),
            #[cfg(feature = "tokio-rust-tls")]
            certificates,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: ServerState::Stopped,
                listener: None,
            })),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn is_secure(&self) -> bool {
        self.tls
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle()
            .state
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the hostnames of the virtual hosts, sorted.
    pub async fn hostnames(&self) -> Vec<String> {
        let mut hostnames: Vec<String> = self
            .virtual_hosts
            .read()
            .await
            .values()
            .map(|host| {
                host.hostname()
                    .to_string()
            })
            .collect();
        hostnames.sort();
        hostnames
    }

    /// Returns the virtual hosts sorted by hostname.
    pub async fn virtual_hosts(&self) -> Vec<Arc<VirtualHost>> {
        let mut hosts: Vec<Arc<VirtualHost>> = self
            .virtual_hosts
            .read()
            .await
            .values()
            .cloned()
            .collect();
        hosts.sort_by(|a, b| {
            a.hostname()
                .cmp(b.hostname())
        });
        hosts
    }

    pub async fn virtual_host(&self, hostname: &str) -> Option<Arc<VirtualHost>> {
        self.virtual_hosts
            .read()
            .await
            .get(&hostname.to_ascii_lowercase())
            .cloned()
    }

    /// Checks whether a host with this name and TLS posture could be merged.
    pub async fn check_merge(&self, hostname: &str, secure: bool) -> Result<(), ConflictError> {
        if self.state() == ServerState::ShuttingDown {
            return Err(ConflictError::ShuttingDown(
                self.address
                    .to_string(),
            ));
        }

        if secure != self.tls {
            return Err(ConflictError::TlsMismatch {
                address: self
                    .address
                    .to_string(),
                hostname: hostname.to_string(),
            });
        }

        if self
            .virtual_hosts
            .read()
            .await
            .contains_key(&hostname.to_ascii_lowercase())
        {
            return Err(ConflictError::HostnameInUse {
                address: self
                    .address
                    .to_string(),
                hostname: hostname.to_string(),
            });
        }

        Ok(())
    }

    /// Adds a virtual host to this server.
    ///
    /// The host is served by the running listener, if any, from the next
    /// request on. A rejected merge leaves the server untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::HostnameInUse`] when the hostname is already
    /// served here and [`ConflictError::TlsMismatch`] when the host's TLS
    /// posture differs from the server's.
    pub async fn merge_virtual_host(
        &self,
        virtual_host: Arc<VirtualHost>,
    ) -> Result<(), ConflictError> {
        let mut virtual_hosts = self
            .virtual_hosts
            .write()
            .await;

        if virtual_host.is_secure() != self.tls {
            return Err(ConflictError::TlsMismatch {
                address: self
                    .address
                    .to_string(),
                hostname: virtual_host
                    .hostname()
                    .to_string(),
            });
        }

        let key = virtual_host.key();
        if virtual_hosts.contains_key(&key) {
            return Err(ConflictError::HostnameInUse {
                address: self
                    .address
                    .to_string(),
                hostname: virtual_host
                    .hostname()
                    .to_string(),
            });
        }

        #[cfg(feature = "tokio-rust-tls")]
        if let Some(certificate) = virtual_host.certificate() {
            self.certificates
                .insert(virtual_host.hostname(), certificate);
        }

        info!("Virtual host {} added to {}", virtual_host.hostname(), self.address);
        virtual_hosts.insert(key, virtual_host);
        Ok(())
    }

    fn acceptor(&self) -> Result<Option<TlsAcceptor>, FleetError> {
        if !self.tls {
            return Ok(None);
        }

        #[cfg(feature = "tokio-rust-tls")]
        return Ok(Some(tls::create_acceptor(
            self.certificates
                .clone(),
        )?));

        #[cfg(not(feature = "tokio-rust-tls"))]
        Err(ConstructionError::Tls("TLS support is not enabled".to_string()).into())
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Starting a listening server does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Listen`] when the address cannot be bound and a
    /// conflict when the server is still shutting down.
    pub async fn start(&self) -> Result<(), FleetError> {
        let acceptor = self.acceptor()?;

        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            ServerState::Listening => return Ok(()),
            ServerState::ShuttingDown => {
                return Err(ConflictError::ShuttingDown(
                    self.address
                        .to_string(),
                )
                .into())
            }
            ServerState::Stopped => {}
        }

        let listener =
            TcpServerListener::bind(self.address).map_err(|e| FleetError::Listen {
                address: self
                    .address
                    .to_string(),
                reason: e.to_string(),
            })?;

        lifecycle.listener = Some(listener.serve(
            self.virtual_hosts
                .clone(),
            acceptor,
        ));
        lifecycle.state = ServerState::Listening;

        info!("Server listening on {}", self.address);
        Ok(())
    }

    /// Closes the listener and asks open connections to finish.
    ///
    /// When this returns, new connections to the address are refused. The
    /// returned [`Drain`] completes the stop. Returns `None` when the server
    /// was not listening.
    pub async fn begin_shutdown(&self) -> Option<Drain> {
        let listener = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != ServerState::Listening {
                return None;
            }
            lifecycle.state = ServerState::ShuttingDown;
            lifecycle
                .listener
                .take()
        };

        info!("Server {} shutting down", self.address);

        let connections = match listener {
            Some(listener) => {
                listener
                    .close()
                    .await
            }
            None => tokio::task::JoinSet::new(),
        };

        Some(Drain::new(
            self.address,
            connections,
            self.virtual_hosts
                .clone(),
            self.lifecycle
                .clone(),
        ))
    }

    /// Stops the server, waiting at most `cutoff` for drain and hooks.
    pub async fn stop(&self, cutoff: Duration) -> ShutdownReport {
        match self
            .begin_shutdown()
            .await
        {
            Some(drain) => {
                drain
                    .finish(cutoff)
                    .await
            }
            None => ShutdownReport::empty(self.address),
        }
    }

    /// Closes the listener without running hooks.
    pub(crate) async fn halt(&self) {
        if let Some(drain) = self
            .begin_shutdown()
            .await
        {
            drain.release();
        }
    }
}
