//! Configuration builders and types for VeTiS Fleet.
//!
//! This module provides a fluent builder API for configuring:
//! - Virtual hosts (host, port, handler directives, shutdown hooks)
//! - TLS material for secure virtual hosts
//! - The admin API listener and shutdown cutoff
//!
//! Configuration text submitted to the admin API is turned into [`Config`]
//! values by [`loader::load`].
//!
//! # Examples
//!
//! ```rust,ignore
//! use vetis_fleet::config::{Config, Directive, TlsConfig};
//!
//! let tls = TlsConfig::builder()
//!     .cert("certs/server.der")
//!     .key("certs/server.key.der")
//!     .build()?;
//!
//! let config = Config::builder()
//!     .host("example.com")
//!     .directive(Directive::new("gzip", vec![]))
//!     .tls(tls)
//!     .build()?;
//!
//! assert_eq!(config.port(), 443);
//! ```

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::FleetError, server::shutdown::ShutdownHooks, DEFAULT_SHUTDOWN_CUTOFF};

pub mod loader;

/// Port used by plain HTTP hosts without an explicit port.
pub const DEFAULT_PORT: u16 = 80;

/// Port used by TLS hosts without an explicit port.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Port of the admin API when none is given.
pub const DEFAULT_ADMIN_PORT: u16 = 2019;

/// A named handler directive and its arguments, in configuration order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Directive {
    name: String,
    args: Vec<String>,
}

impl Directive {
    pub fn new(name: &str, args: Vec<String>) -> Self {
        Self { name: name.to_string(), args }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Builder for creating `Config` instances.
///
/// # Examples
///
/// ```rust,ignore
/// use vetis_fleet::config::Config;
///
/// let config = Config::builder()
///     .host("localhost")
///     .port(8080)
///     .build()?;
/// ```
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    tls: Option<TlsConfig>,
    directives: Vec<Directive>,
}

impl ConfigBuilder {
    /// Sets the hostname served by this virtual host.
    ///
    /// An empty host matches any request on the bound address and binds
    /// every interface.
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Sets the port. Defaults to 80, or 443 when TLS is configured.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enables TLS for this host with the given certificate material.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Appends a handler directive.
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives
            .push(directive);
        self
    }

    /// Replaces all handler directives.
    pub fn directives(mut self, directives: Vec<Directive>) -> Self {
        self.directives = directives;
        self
    }

    /// Creates the `Config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is zero or the host contains whitespace
    /// or path separators.
    pub fn build(self) -> Result<Config, FleetError> {
        if self.port == Some(0) {
            return Err(FleetError::Config("port must not be zero".to_string()));
        }

        if self
            .host
            .chars()
            .any(|c| c.is_whitespace() || c == '/')
        {
            return Err(FleetError::Config(format!("invalid host '{}'", self.host)));
        }

        let port = self
            .port
            .unwrap_or(if self.tls.is_some() { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        Ok(Config {
            host: self.host,
            port,
            tls: self.tls,
            directives: self.directives,
            shutdown: ShutdownHooks::default(),
        })
    }
}

/// One virtual host's desired configuration.
///
/// Everything but the shutdown hook list is fixed once built. Clones share
/// the same hook list.
#[derive(Clone)]
pub struct Config {
    host: String,
    port: u16,
    tls: Option<TlsConfig>,
    directives: Vec<Directive>,
    shutdown: ShutdownHooks,
}

impl Config {
    /// Creates a new `ConfigBuilder` with default settings.
    ///
    /// Default values:
    /// - host: empty (any host)
    /// - port: 80, or 443 with TLS
    /// - tls: None
    /// - directives: none
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder { host: String::new(), port: None, tls: None, directives: Vec::new() }
    }

    /// Returns the hostname.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the `host:port` text this host was configured with.
    pub fn address(&self) -> String {
        if self
            .host
            .contains(':')
        {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns the TLS settings if present.
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls
            .as_ref()
    }

    /// Returns whether TLS is enabled.
    pub fn is_secure(&self) -> bool {
        self.tls
            .is_some()
    }

    /// Returns the handler directives in configuration order.
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Returns the append-only list of shutdown hooks.
    pub fn shutdown_hooks(&self) -> &ShutdownHooks {
        &self.shutdown
    }
}

/// Builder for creating `TlsConfig` instances.
#[derive(Clone, Default)]
pub struct TlsConfigBuilder {
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
}

impl TlsConfigBuilder {
    /// Sets the path of the DER encoded server certificate.
    pub fn cert<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cert = Some(
            path.as_ref()
                .to_path_buf(),
        );
        self
    }

    /// Sets the path of the DER encoded private key.
    pub fn key<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.key = Some(
            path.as_ref()
                .to_path_buf(),
        );
        self
    }

    /// Creates the `TlsConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate or key path is missing.
    pub fn build(self) -> Result<TlsConfig, FleetError> {
        let Some(cert) = self.cert else {
            return Err(FleetError::Config("tls certificate is missing".to_string()));
        };
        let Some(key) = self.key else {
            return Err(FleetError::Config("tls key is missing".to_string()));
        };
        Ok(TlsConfig { cert, key })
    }
}

/// TLS material for a secure virtual host.
///
/// Files are read when the owning server is constructed, not when the
/// configuration is loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlsConfig {
    cert: PathBuf,
    key: PathBuf,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Returns the certificate path.
    pub fn cert(&self) -> &Path {
        &self.cert
    }

    /// Returns the private key path.
    pub fn key(&self) -> &Path {
        &self.key
    }
}

/// Builder for creating `AdminConfig` instances.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
/// use vetis_fleet::config::AdminConfig;
///
/// let config = AdminConfig::builder()
///     .interface("127.0.0.1")
///     .port(2019)
///     .shutdown_cutoff(Duration::from_secs(10))
///     .build()?;
/// ```
#[derive(Clone)]
pub struct AdminConfigBuilder {
    interface: String,
    port: u16,
    shutdown_cutoff: Duration,
    max_body_size: usize,
}

impl AdminConfigBuilder {
    /// Sets the interface the admin API binds to.
    pub fn interface(mut self, interface: &str) -> Self {
        self.interface = interface.to_string();
        self
    }

    /// Sets the admin API port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets how long stopping a server may wait for drain and hooks.
    pub fn shutdown_cutoff(mut self, cutoff: Duration) -> Self {
        self.shutdown_cutoff = cutoff;
        self
    }

    /// Sets the largest request body the admin API accepts, in bytes.
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Sets interface and port from a resolved socket address.
    pub fn socket_addr(mut self, address: SocketAddr) -> Self {
        self.interface = address
            .ip()
            .to_string();
        self.port = address.port();
        self
    }

    /// Creates the `AdminConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface is not an IP address.
    pub fn build(self) -> Result<AdminConfig, FleetError> {
        let interface = self
            .interface
            .parse::<IpAddr>()
            .map_err(|_| {
                FleetError::Config(format!("admin interface '{}' is not an ip", self.interface))
            })?;

        Ok(AdminConfig {
            interface,
            port: self.port,
            shutdown_cutoff: self.shutdown_cutoff,
            max_body_size: self.max_body_size,
        })
    }
}

/// Configuration of the admin API listener.
#[derive(Clone, Debug)]
pub struct AdminConfig {
    interface: IpAddr,
    port: u16,
    shutdown_cutoff: Duration,
    max_body_size: usize,
}

impl AdminConfig {
    /// Creates a new `AdminConfigBuilder` with default settings.
    ///
    /// Default values:
    /// - interface: 127.0.0.1
    /// - port: 2019
    /// - shutdown_cutoff: [`DEFAULT_SHUTDOWN_CUTOFF`]
    /// - max_body_size: 1 MiB
    pub fn builder() -> AdminConfigBuilder {
        AdminConfigBuilder {
            interface: "127.0.0.1".to_string(),
            port: DEFAULT_ADMIN_PORT,
            shutdown_cutoff: DEFAULT_SHUTDOWN_CUTOFF,
            max_body_size: 1024 * 1024,
        }
    }

    pub fn interface(&self) -> IpAddr {
        self.interface
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.interface, self.port)
    }

    pub fn shutdown_cutoff(&self) -> Duration {
        self.shutdown_cutoff
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}
