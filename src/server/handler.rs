//! Request handlers built from configuration directives.
//!
//! Each directive of a virtual host names a handler. The handlers of a host
//! are applied in directive order to a response that starts as
//! `404 Not Found`, so a host without a `respond` directive still answers.
//!
//! # Examples
//!
//! ```rust,ignore
//! use vetis_fleet::server::handler::{Handler, HandlerRegistry};
//!
//! struct Teapot;
//!
//! impl Handler for Teapot {
//!     fn handle(&self, _request: &http::request::Parts, response: &mut Response) {
//!         *response.status_mut() = http::StatusCode::IM_A_TEAPOT;
//!     }
//! }
//!
//! let mut registry = HandlerRegistry::with_defaults();
//! registry.register("teapot", |_directive: &Directive, _config: &Config| {
//!     Ok(Box::new(Teapot) as Box<dyn Handler>)
//! });
//! ```

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use http::{
    header::{HeaderName, HeaderValue, VARY},
    request::Parts,
    StatusCode,
};
use http_body_util::Full;
use log::info;

use crate::{
    config::{Config, Directive},
    errors::{BoxError, ConstructionError},
};

/// Response type produced by virtual hosts.
pub type Response = http::Response<Full<Bytes>>;

/// Transforms the response for one request.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Parts, response: &mut Response);
}

/// Builds a handler from its directive and the host configuration.
///
/// Factories may register shutdown hooks on the configuration.
pub trait HandlerFactory: Send + Sync + 'static {
    fn build(&self, directive: &Directive, config: &Config) -> Result<Box<dyn Handler>, BoxError>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&Directive, &Config) -> Result<Box<dyn Handler>, BoxError> + Send + Sync + 'static,
{
    fn build(&self, directive: &Directive, config: &Config) -> Result<Box<dyn Handler>, BoxError> {
        self(directive, config)
    }
}

/// Maps directive names to handler factories.
#[derive(Clone)]
pub struct HandlerRegistry {
    factories: HashMap<String, Arc<dyn HandlerFactory>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl HandlerRegistry {
    /// Creates a registry without any handler.
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Creates a registry with the built-in `gzip`, `header`, `respond` and
    /// `log` handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("gzip", gzip);
        registry.register("header", header);
        registry.register("respond", respond);
        registry.register("log", request_log);
        registry
    }

    /// Registers a factory, replacing any previous one with the same name.
    pub fn register<F: HandlerFactory>(&mut self, name: &str, factory: F) {
        self.factories
            .insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories
            .contains_key(name)
    }

    /// Builds the handler for one directive of `config`.
    pub fn build(
        &self,
        directive: &Directive,
        config: &Config,
    ) -> Result<Box<dyn Handler>, ConstructionError> {
        let Some(factory) = self
            .factories
            .get(directive.name())
        else {
            return Err(ConstructionError::UnknownDirective {
                hostname: config
                    .host()
                    .to_string(),
                directive: directive
                    .name()
                    .to_string(),
            });
        };

        factory
            .build(directive, config)
            .map_err(|e| ConstructionError::InvalidDirective {
                hostname: config
                    .host()
                    .to_string(),
                directive: directive
                    .name()
                    .to_string(),
                reason: e.to_string(),
            })
    }
}

fn expect_args(directive: &Directive, min: usize, max: usize) -> Result<(), BoxError> {
    let count = directive
        .args()
        .len();
    if count < min || count > max {
        let message = if min == max {
            format!("expected {} arguments, got {}", min, count)
        } else if max == usize::MAX {
            format!("expected at least {} arguments, got {}", min, count)
        } else {
            format!("expected {} to {} arguments, got {}", min, max, count)
        };
        return Err(message.into());
    }
    Ok(())
}

/// Handler of the `gzip` directive.
///
/// Marks responses as varying on `Accept-Encoding` so caches keep encoded
/// and plain variants apart. Bodies are sent as they are: no encoding is
/// applied and no `Content-Encoding` header is set.
struct VaryOnEncoding;

impl Handler for VaryOnEncoding {
    fn handle(&self, _request: &Parts, response: &mut Response) {
        response
            .headers_mut()
            .append(VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

fn gzip(directive: &Directive, _config: &Config) -> Result<Box<dyn Handler>, BoxError> {
    expect_args(directive, 0, 0)?;
    Ok(Box::new(VaryOnEncoding))
}

struct SetHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl Handler for SetHeader {
    fn handle(&self, _request: &Parts, response: &mut Response) {
        response
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
    }
}

fn header(directive: &Directive, _config: &Config) -> Result<Box<dyn Handler>, BoxError> {
    expect_args(directive, 2, 2)?;
    let args = directive.args();
    Ok(Box::new(SetHeader {
        name: HeaderName::try_from(args[0].as_str())?,
        value: HeaderValue::try_from(args[1].as_str())?,
    }))
}

struct Respond {
    status: StatusCode,
    body: Bytes,
}

impl Handler for Respond {
    fn handle(&self, _request: &Parts, response: &mut Response) {
        *response.status_mut() = self.status;
        *response.body_mut() = Full::new(
            self.body
                .clone(),
        );
    }
}

fn respond(directive: &Directive, _config: &Config) -> Result<Box<dyn Handler>, BoxError> {
    expect_args(directive, 1, usize::MAX)?;
    let args = directive.args();
    Ok(Box::new(Respond {
        status: StatusCode::from_bytes(args[0].as_bytes())?,
        body: Bytes::from(args[1..].join(" ")),
    }))
}

struct RequestLog {
    hostname: String,
}

impl Handler for RequestLog {
    fn handle(&self, request: &Parts, response: &mut Response) {
        info!(
            "{} \"{} {} {:?}\" {}",
            self.hostname,
            request.method,
            request.uri,
            request.version,
            response.status()
        );
    }
}

fn request_log(directive: &Directive, config: &Config) -> Result<Box<dyn Handler>, BoxError> {
    expect_args(directive, 0, 0)?;

    let hostname = config
        .host()
        .to_string();
    let closing = hostname.clone();
    config
        .shutdown_hooks()
        .push(move || {
            info!("Closing request log of {}", closing);
            Ok(())
        });

    Ok(Box::new(RequestLog { hostname }))
}
