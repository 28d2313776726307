//! Loads X.509 material for the mutually-authenticated submission RPC
//! link (C8's external interface). The teacher declares `rustls` /
//! `tokio-rustls` / `rustls-pemfile` but never wires them up; this is
//! that wiring, not a new dependency.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("opening certificate file {path:?}"))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificate file {path:?}"))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("opening key file {path:?}"))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("parsing key file {path:?}"))?
        .ok_or_else(|| anyhow!("no private key found in {path:?}"))
}

fn load_root_store(ca_path: &Path) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        store
            .add(cert)
            .map_err(|e| anyhow!("invalid CA certificate in {ca_path:?}: {e}"))?;
    }
    Ok(store)
}

/// Builds a client config for the front tier's connection to the back
/// tier: presents `cert`/`key` for mutual auth, trusts `ca_cert` to
/// verify the back tier's own certificate.
pub fn client_config(cert: &Path, key: &Path, ca_cert: &Path) -> Result<Arc<rustls::ClientConfig>> {
    let certs = load_certs(cert)?;
    let key = load_private_key(key)?;
    let roots = load_root_store(ca_cert)?;

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .context("building RPC client TLS config")?;
    Ok(Arc::new(config))
}

/// Builds a server config for the back tier: presents `cert`/`key` to
/// clients, and when `ca_cert` is set, verifies any client certificate
/// presented against that CA pool without requiring one — anonymous
/// clients are always allowed, matching spec.md §6's "anonymous clients
/// allowed when the pool permits."
pub fn server_config(
    cert: &Path,
    key: &Path,
    ca_cert: Option<&Path>,
) -> Result<Arc<rustls::ServerConfig>> {
    let certs = load_certs(cert)?;
    let key = load_private_key(key)?;

    let builder = rustls::ServerConfig::builder();
    let config = match ca_cert {
        Some(ca_path) => {
            let roots = load_root_store(ca_path)?;
            // Anonymous clients are allowed even when a CA pool is
            // configured, matching the original's `VerifyClientCertIfGiven`
            // (client certs are verified when presented, not required).
            let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .context("building client certificate verifier")?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .context("building RPC server TLS config")?
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("building RPC server TLS config")?,
    };
    Ok(Arc::new(config))
}
