//! Error handling types for VeTiS Fleet.
//!
//! Every failure the fleet controller can surface to an admin caller is a
//! [`FleetError`]. The nested enums carry the detail for each stage:
//! resolving addresses, constructing servers and merging virtual hosts.
//!
//! # Examples
//!
//! ```rust,ignore
//! use vetis_fleet::errors::{ConflictError, FleetError};
//!
//! match fleet.create(configs).await {
//!     Ok(()) => println!("fleet updated"),
//!     Err(FleetError::Conflict(ConflictError::HostnameInUse { hostname, .. })) => {
//!         eprintln!("{} is already served", hostname);
//!     }
//!     Err(other) => eprintln!("Other error: {}", other),
//! }
//! ```

use http::StatusCode;
use thiserror::Error;

/// Error type shared by callbacks that return a boxed error, such as shutdown hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for fleet operations.
///
/// # Examples
///
/// ```rust,ignore
/// use vetis_fleet::errors::FleetError;
///
/// let status = FleetError::NotFound("127.0.0.1:80".to_string()).status();
/// assert_eq!(status, http::StatusCode::NOT_FOUND);
/// ```
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FleetError {
    /// Configuration text could not be parsed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A configuration value is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// An address could not be resolved
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Arranging configurations by address failed on a resolution error
    #[error("Binding error: {0}")]
    Binding(ResolutionError),

    /// A server or virtual host could not be built
    #[error("Construction error: {0}")]
    Construction(#[from] ConstructionError),

    /// A virtual host collides with one already live
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// The operating system refused to bind the listener
    #[error("Failed to listen on {address}: {reason}")]
    Listen { address: String, reason: String },

    /// No server is registered at the address
    #[error("Server not found: {0}")]
    NotFound(String),
}

impl FleetError {
    /// Returns the HTTP status used when reporting this error to an admin caller.
    pub fn status(&self) -> StatusCode {
        match self {
            FleetError::Parse(_)
            | FleetError::Config(_)
            | FleetError::Resolution(_)
            | FleetError::Binding(_)
            | FleetError::Construction(_) => StatusCode::BAD_REQUEST,
            FleetError::Conflict(_) => StatusCode::CONFLICT,
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::Listen { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Malformed configuration text.
///
/// Carries the name the text was loaded under and the 1-based line where
/// the problem was found.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{name}:{line}: {message}")]
pub struct ParseError {
    pub name: String,
    pub line: usize,
    pub message: String,
}

/// Address resolution errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolutionError {
    /// The address text could not be split into host and port
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The port is not a number between 0 and 65535
    #[error("Invalid port in {0}")]
    InvalidPort(String),

    /// The name service failed to resolve the host
    #[error("Cannot resolve {address}: {reason}")]
    Lookup { address: String, reason: String },
}

/// Server construction errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConstructionError {
    /// Two configurations of one binding group claim the same hostname
    #[error("Duplicate virtual host {hostname} on {address}")]
    DuplicateHostname { address: String, hostname: String },

    /// A configuration in the group does not share the group's TLS posture
    #[error("Mixed TLS posture for {hostname} on {address}")]
    MixedTls { address: String, hostname: String },

    /// No handler is registered under the directive name
    #[error("Unknown directive '{directive}' for {hostname}")]
    UnknownDirective { hostname: String, directive: String },

    /// A handler rejected its directive arguments
    #[error("Invalid directive '{directive}' for {hostname}: {reason}")]
    InvalidDirective { hostname: String, directive: String, reason: String },

    /// TLS material could not be loaded
    #[error("Tls error: {0}")]
    Tls(String),
}

/// Conflicts between a new virtual host and an existing server.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConflictError {
    /// The hostname is already served on that address
    #[error("Virtual host {hostname} already exists on {address}")]
    HostnameInUse { address: String, hostname: String },

    /// The new host does not match the server's TLS posture
    #[error("Virtual host {hostname} does not match the TLS posture of {address}")]
    TlsMismatch { address: String, hostname: String },

    /// A server is already registered at the address
    #[error("A server is already registered at {0}")]
    AddressInUse(String),

    /// The server at the address is shutting down
    #[error("Server {0} is shutting down")]
    ShuttingDown(String),
}
