//! Virtual hosts served by a server.
//!
//! A virtual host pairs one [`Config`] with the handlers built from its
//! directives. Hosts are keyed by hostname inside their server; the empty
//! hostname answers requests whose `Host` matches no other host.

use bytes::Bytes;
use http::{request::Parts, StatusCode};
use http_body_util::Full;

use crate::{
    config::Config,
    errors::ConstructionError,
    server::{
        handler::{Handler, HandlerRegistry, Response},
        shutdown::ShutdownHooks,
    },
};

#[cfg(feature = "tokio-rust-tls")]
use {rustls::sign::CertifiedKey, std::sync::Arc};

pub struct VirtualHost {
    config: Config,
    handlers: Vec<(String, Box<dyn Handler>)>,
    #[cfg(feature = "tokio-rust-tls")]
    certificate: Option<Arc<CertifiedKey>>,
}

impl VirtualHost {
    /// Builds the host's handlers from its directives, in order.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::UnknownDirective`] or
    /// [`ConstructionError::InvalidDirective`] when a directive cannot be
    /// turned into a handler, and [`ConstructionError::Tls`] when the TLS
    /// certificate or key cannot be read.
    pub fn new(config: Config, registry: &HandlerRegistry) -> Result<Self, ConstructionError> {
        #[cfg(feature = "tokio-rust-tls")]
        let certificate = config
            .tls()
            .map(crate::server::tls::load_certified_key)
            .transpose()?;

        #[cfg(not(feature = "tokio-rust-tls"))]
        if config.is_secure() {
            return Err(ConstructionError::Tls(format!(
                "{} requires TLS support, which is not enabled",
                config.host()
            )));
        }

        let handlers = config
            .directives()
            .iter()
            .map(|directive| {
                registry
                    .build(directive, &config)
                    .map(|handler| {
                        (
                            directive
                                .name()
                                .to_string(),
                            handler,
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            handlers,
            #[cfg(feature = "tokio-rust-tls")]
            certificate,
        })
    }

    #[cfg(feature = "tokio-rust-tls")]
    pub(crate) fn certificate(&self) -> Option<Arc<CertifiedKey>> {
        self.certificate
            .clone()
    }

    pub fn hostname(&self) -> &str {
        self.config
            .host()
    }

    /// Returns the lookup key of this host inside its server.
    pub(crate) fn key(&self) -> String {
        self.config
            .host()
            .to_ascii_lowercase()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_secure(&self) -> bool {
        self.config
            .is_secure()
    }

    /// Returns the directive names of the handlers, in order.
    pub fn handler_names(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn shutdown_hooks(&self) -> &ShutdownHooks {
        self.config
            .shutdown_hooks()
    }

    /// Runs every handler over a `404 Not Found` response.
    pub fn respond(&self, request: &Parts) -> Response {
        let mut response = not_found();
        for (_, handler) in &self.handlers {
            handler.handle(request, &mut response);
        }
        response
    }
}

pub(crate) fn not_found() -> Response {
    let mut response = http::Response::new(Full::new(Bytes::from_static(b"Not Found")));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
