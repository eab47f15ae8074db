use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use rustls::{
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
};
use tokio_rustls::TlsAcceptor;

use crate::{
    config::TlsConfig,
    errors::ConstructionError::{self, Tls},
};

fn crypto_provider() -> CryptoProvider {
    #[cfg(feature = "__rustls_ring")]
    let provider = rustls::crypto::ring::default_provider();
    #[cfg(all(feature = "__rustls_awc_lc_rs", not(feature = "__rustls_ring")))]
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    provider
}

/// Certificates of a server's virtual hosts, selected by SNI.
///
/// Requests without a matching server name fall back to the certificate of
/// the catch-all host, or to the only certificate when there is just one.
#[derive(Default)]
pub struct SniResolver {
    certificates: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let certificates = self
            .certificates
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SniResolver")
            .field("hostnames", &certificates.keys())
            .finish()
    }
}

impl SniResolver {
    /// Serves `certified_key` for `hostname`.
    pub fn insert(&self, hostname: &str, certified_key: Arc<CertifiedKey>) {
        self.certificates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hostname.to_ascii_lowercase(), certified_key);
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let certificates = self
            .certificates
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        client_hello
            .server_name()
            .and_then(|name| certificates.get(&name.to_ascii_lowercase()))
            .or_else(|| certificates.get(""))
            .or_else(|| {
                if certificates.len() == 1 {
                    certificates
                        .values()
                        .next()
                } else {
                    None
                }
            })
            .cloned()
    }
}

/// Reads the DER encoded certificate and private key of `tls`.
pub(crate) fn load_certified_key(tls: &TlsConfig) -> Result<Arc<CertifiedKey>, ConstructionError> {
    let cert = std::fs::read(tls.cert()).map_err(|e| {
        Tls(format!("Failed to read certificate {}: {}", tls.cert().display(), e))
    })?;
    let key = std::fs::read(tls.key())
        .map_err(|e| Tls(format!("Failed to read private key {}: {}", tls.key().display(), e)))?;

    let cert = CertificateDer::from(cert);
    let key = PrivateKeyDer::try_from(key)
        .map_err(|_| Tls("Failed to parse private key".to_string()))?;

    CertifiedKey::from_der(vec![cert], key, &crypto_provider())
        .map(Arc::new)
        .map_err(|_| Tls("Failed to create certified key".to_string()))
}

/// Builds the acceptor a TLS server terminates connections with.
pub(crate) fn create_acceptor(resolver: Arc<SniResolver>) -> Result<TlsAcceptor, ConstructionError> {
    let builder = rustls::ServerConfig::builder_with_provider(Arc::new(crypto_provider()))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| Tls(e.to_string()))?;

    let mut tls_config = builder
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
