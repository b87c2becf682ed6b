//! TLS configuration utilities.

use crate::error::{Error, Result};
use rcgen::{generate_simple_self_signed, CertifiedKey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

type CertChain = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Create a TLS acceptor from PEM files, or from a generated self-signed
/// certificate for `server_name` when no files are given.
pub async fn create_acceptor(
    key_path: Option<&str>,
    cert_path: Option<&str>,
    server_name: &str,
) -> Result<TlsAcceptor> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let (certs, key) = match (key_path, cert_path) {
        (Some(key_path), Some(cert_path)) => load_certs_from_files(key_path, cert_path).await?,
        (None, None) => {
            info!(server_name, "Generating self-signed TLS certificate");
            generate_self_signed(server_name)?
        }
        _ => {
            return Err(Error::Config(
                "TLS key and certificate must be given together".into(),
            ))
        }
    };

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn load_certs_from_files(key_path: &str, cert_path: &str) -> Result<CertChain> {
    let key_data = tokio::fs::read(key_path).await?;
    let cert_data = tokio::fs::read(cert_path).await?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(cert_data.as_slice()))
            .filter_map(std::result::Result::ok)
            .collect();
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates found in {cert_path}")));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_data.as_slice()))?
        .ok_or_else(|| Error::Tls(format!("no private key found in {key_path}")))?;

    Ok((certs, key))
}

fn generate_self_signed(server_name: &str) -> Result<CertChain> {
    let subject_alt_names = vec![server_name.to_string()];
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(subject_alt_names).map_err(|e| Error::Tls(e.to_string()))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der =
        PrivateKeyDer::try_from(key_pair.serialize_der()).map_err(|e| Error::Tls(e.to_string()))?;

    Ok((vec![cert_der], key_der))
}
