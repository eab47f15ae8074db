//! Address resolution.
//!
//! Turns the textual addresses found in configuration (`host:port`, `host`,
//! `:port`, `[v6]:port`, optionally prefixed by `http://` or `https://`)
//! into the canonical [`SocketAddr`] a server binds to and is keyed by.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::{
    config::{DEFAULT_PORT, DEFAULT_TLS_PORT},
    errors::ResolutionError,
};

/// A parsed, not yet resolved, address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostPort {
    host: String,
    port: Option<u16>,
    secure: bool,
}

impl HostPort {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the explicit port, if the text carried one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns whether the text used the `https://` scheme.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Returns the explicit port or the default for the scheme.
    pub fn port_or_default(&self) -> u16 {
        self.port
            .unwrap_or(if self.secure { DEFAULT_TLS_PORT } else { DEFAULT_PORT })
    }
}

/// Splits address text into host, optional port and scheme.
///
/// # Errors
///
/// Returns [`ResolutionError::InvalidPort`] when the port is not a `u16`
/// and [`ResolutionError::InvalidAddress`] when the text has a path or an
/// unbalanced IPv6 bracket.
pub fn parse(text: &str) -> Result<HostPort, ResolutionError> {
    let trimmed = text.trim();
    let (secure, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        (false, rest)
    } else {
        (false, trimmed)
    };

    let rest = rest.trim_end_matches('/');
    if rest.contains('/') {
        return Err(ResolutionError::InvalidAddress(text.to_string()));
    }

    if let Some(inner) = rest.strip_prefix('[') {
        let Some((host, tail)) = inner.split_once(']') else {
            return Err(ResolutionError::InvalidAddress(text.to_string()));
        };
        let port = if tail.is_empty() {
            None
        } else {
            let Some(port) = tail.strip_prefix(':') else {
                return Err(ResolutionError::InvalidAddress(text.to_string()));
            };
            Some(parse_port(port, text)?)
        };
        return Ok(HostPort { host: host.to_string(), port, secure });
    }

    match rest.matches(':').count() {
        0 => Ok(HostPort { host: rest.to_string(), port: None, secure }),
        1 => {
            let (host, port) = rest
                .split_once(':')
                .unwrap_or((rest, ""));
            Ok(HostPort { host: host.to_string(), port: Some(parse_port(port, text)?), secure })
        }
        _ if rest
            .parse::<Ipv6Addr>()
            .is_ok() =>
        {
            Ok(HostPort { host: rest.to_string(), port: None, secure })
        }
        _ => Err(ResolutionError::InvalidAddress(text.to_string())),
    }
}

fn parse_port(port: &str, text: &str) -> Result<u16, ResolutionError> {
    port.parse::<u16>()
        .map_err(|_| ResolutionError::InvalidPort(text.to_string()))
}

/// Resolves a host and port into the socket address a server binds to.
///
/// An empty host binds every IPv4 interface. IP literals are used as they
/// are; names go through the system resolver and the first IPv4 answer wins,
/// falling back to the first answer of any family.
pub async fn resolve_host(host: &str, port: u16) -> Result<SocketAddr, ResolutionError> {
    if host.is_empty() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let address = format!("{}:{}", host, port);
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| ResolutionError::Lookup { address: address.clone(), reason: e.to_string() })?
        .collect();

    candidates
        .iter()
        .find(|candidate| candidate.is_ipv4())
        .or(candidates.first())
        .copied()
        .ok_or(ResolutionError::Lookup { address, reason: "no addresses found".to_string() })
}

/// Parses and resolves address text in one step.
pub async fn resolve(text: &str) -> Result<SocketAddr, ResolutionError> {
    let host_port = parse(text)?;
    resolve_host(host_port.host(), host_port.port_or_default()).await
}

/// Parses and resolves address text, using `default_port` when the text
/// has no port.
pub async fn resolve_or(text: &str, default_port: u16) -> Result<SocketAddr, ResolutionError> {
    let host_port = parse(text)?;
    resolve_host(
        host_port.host(),
        host_port
            .port()
            .unwrap_or(default_port),
    )
    .await
}
