//! rustls configuration built from a [`NetConfig`].
//!
//! Dialing over TLS verifies the broker against `authority`, or the system's
//! trusted roots when there is none, and presents
//! `certificate`/`key` as a client certificate when both are given.
//! Listening over TLS requires `certificate` and `key`; with an `authority`
//! the listener asks clients for a certificate and verifies it when one is
//! presented.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::{debug, warn};

use crate::config::NetConfig;
use crate::utils::{Error, Result};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", path.display())))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// The platform's trusted roots. Honors `SSL_CERT_FILE` and `SSL_CERT_DIR`.
fn native_roots() -> Result<RootCertStore> {
    let found = rustls_native_certs::load_native_certs();
    for err in &found.errors {
        warn!("skipping system certificates: {err}");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(found.certs);
    if ignored > 0 {
        debug!("ignored {ignored} unparsable system certificates");
    }
    if added == 0 {
        return Err(Error::Tls("no trusted system certificates found".to_string()));
    }
    Ok(roots)
}

pub fn client_config(cfg: &NetConfig) -> Result<ClientConfig> {
    let roots = match cfg.authority.as_deref() {
        Some(authority) => load_roots(authority)?,
        None => native_roots()?,
    };

    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots);

    let config = match (cfg.certificate.as_deref(), cfg.key.as_deref()) {
        (Some(cert), Some(key)) => {
            builder.with_client_auth_cert(load_certs(cert)?, load_key(key)?)?
        }
        _ => builder.with_no_client_auth(),
    };
    Ok(config)
}

pub fn server_config(cfg: &NetConfig) -> Result<ServerConfig> {
    let (Some(cert), Some(key)) = (cfg.certificate.as_deref(), cfg.key.as_deref()) else {
        return Err(Error::Tls(
            "listening with TLS needs a certificate and a key".to_string(),
        ));
    };

    let builder =
        ServerConfig::builder_with_provider(provider()).with_safe_default_protocol_versions()?;

    let builder = match cfg.authority.as_deref() {
        Some(authority) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(load_roots(authority)?), provider())
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| Error::Tls(e.to_string()))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    Ok(builder.with_single_cert(load_certs(cert)?, load_key(key)?)?)
}

pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    let host = host.trim_matches(|c| c == '[' || c == ']').to_string();
    ServerName::try_from(host).map_err(|e| Error::Tls(e.to_string()))
}
