//! Graceful shutdown of a server.
//!
//! Stopping a server happens in two phases. [`Server::begin_shutdown`]
//! closes the listening socket and asks every open connection to finish,
//! handing back a [`Drain`]. [`Drain::finish`] then waits for the
//! connections, runs each virtual host's shutdown hooks in registration
//! order and marks the server stopped, all bounded by a cutoff.
//!
//! [`Server::begin_shutdown`]: crate::server::Server::begin_shutdown

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::{error, info, warn};
use serde::Serialize;
use tokio::{task::JoinSet, time::Instant};

use crate::{
    errors::BoxError,
    server::{Lifecycle, ServerState},
    FleetVirtualHosts,
};

/// A cleanup callback run once when the owning virtual host stops.
pub type ShutdownHook = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// Append-only list of shutdown hooks.
///
/// Clones share the same list, so hooks registered through any clone of a
/// [`Config`](crate::config::Config) are seen by the server that owns it.
///
/// # Examples
///
/// ```rust,ignore
/// use vetis_fleet::server::shutdown::ShutdownHooks;
///
/// let hooks = ShutdownHooks::default();
/// hooks.push(|| {
///     println!("closing");
///     Ok(())
/// });
/// assert_eq!(hooks.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct ShutdownHooks {
    hooks: Arc<Mutex<Vec<ShutdownHook>>>,
}

impl ShutdownHooks {
    /// Registers a hook after the ones already present.
    pub fn push<F>(&self, hook: F)
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Returns the hooks registered so far, in registration order.
    pub fn snapshot(&self) -> Vec<ShutdownHook> {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A shutdown hook that returned an error or panicked.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HookFailure {
    pub hostname: String,
    /// Position of the hook in its host's list.
    pub index: usize,
    pub message: String,
}

/// Outcome of stopping one server.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShutdownReport {
    address: String,
    failures: Vec<HookFailure>,
    timed_out: bool,
}

impl ShutdownReport {
    pub(crate) fn empty(address: SocketAddr) -> Self {
        Self { address: address.to_string(), failures: Vec::new(), timed_out: false }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Hooks that failed before the cutoff.
    pub fn failures(&self) -> &[HookFailure] {
        &self.failures
    }

    /// Returns whether the cutoff elapsed before drain and hooks completed.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn is_clean(&self) -> bool {
        self.failures
            .is_empty()
            && !self.timed_out
    }
}

/// Connections and hooks left to settle after a server closed its listener.
pub struct Drain {
    address: SocketAddr,
    connections: JoinSet<()>,
    virtual_hosts: FleetVirtualHosts,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Drain {
    pub(crate) fn new(
        address: SocketAddr,
        connections: JoinSet<()>,
        virtual_hosts: FleetVirtualHosts,
        lifecycle: Arc<Mutex<Lifecycle>>,
    ) -> Self {
        Self { address, connections, virtual_hosts, lifecycle }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Number of connections still open.
    pub fn pending(&self) -> usize {
        self.connections
            .len()
    }

    /// Waits for open connections, then runs every virtual host's hooks.
    ///
    /// Open connections get the first half of `cutoff` to finish; those
    /// still open after that are aborted and the hooks start anyway. Hosts
    /// are visited in hostname order and each host's hooks in registration
    /// order. A failing hook is recorded and the next one still runs. Hooks
    /// still running when `cutoff` elapses are abandoned and the ones after
    /// them never start. The server is marked stopped in every case.
    pub async fn finish(mut self, cutoff: Duration) -> ShutdownReport {
        let deadline = Instant::now() + cutoff;
        let drain_deadline = Instant::now() + cutoff / 2;

        let drained = tokio::time::timeout_at(drain_deadline, async {
            while let Some(result) = self
                .connections
                .join_next()
                .await
            {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!("Connection task panicked: {}", e);
                    }
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "Connections of {} did not drain within {:?}, aborting {} of them",
                self.address,
                cutoff / 2,
                self.pending()
            );
            self.connections
                .abort_all();
        }

        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = tokio::spawn(run_hooks(
            self.virtual_hosts
                .clone(),
            failures.clone(),
        ));

        let hooks_done = tokio::time::timeout_at(deadline, &mut hooks)
            .await
            .is_ok();

        if !hooks_done {
            warn!(
                "Shutdown hooks of {} exceeded the cutoff of {:?}, abandoning the rest",
                self.address, cutoff
            );
            hooks.abort();
        }

        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state = ServerState::Stopped;

        info!("Server {} stopped", self.address);

        let failures = failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        ShutdownReport {
            address: self
                .address
                .to_string(),
            failures,
            timed_out: !drained || !hooks_done,
        }
    }

    /// Marks the server stopped without running hooks.
    ///
    /// Used when a replacement is rolled back and the server is about to be
    /// started again. Open connections settle in the background.
    pub fn release(self) {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state = ServerState::Stopped;

        let mut connections = self.connections;
        if !connections.is_empty() {
            tokio::spawn(async move { while connections.join_next().await.is_some() {} });
        }
    }
}

async fn run_hooks(virtual_hosts: FleetVirtualHosts, failures: Arc<Mutex<Vec<HookFailure>>>) {
    let mut hosts: Vec<(String, Vec<ShutdownHook>)> = virtual_hosts
        .read()
        .await
        .values()
        .map(|host| {
            (
                host.hostname()
                    .to_string(),
                host.shutdown_hooks()
                    .snapshot(),
            )
        })
        .collect();
    hosts.sort_by(|a, b| a.0.cmp(&b.0));

    for (hostname, hooks) in hosts {
        for (index, hook) in hooks
            .into_iter()
            .enumerate()
        {
            let message = match tokio::task::spawn_blocking(move || hook()).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("hook panicked: {}", e),
            };
            error!("Shutdown hook {} of {} failed: {}", index, hostname, message);
            failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(HookFailure { hostname: hostname.clone(), index, message });
        }
    }
}
