//! TLS-terminating transport.
//!
//! Wraps accepted TCP connections in a server-side TLS session. Certificates
//! come from PEM files when configured, otherwise an ephemeral self-signed
//! certificate is generated in memory at startup (useful for local relays
//! and tests; clients must skip verification or pin the certificate).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rcgen::{CertificateParams, KeyPair, PKCS_ECDSA_P256_SHA256};
use tokio::net::TcpStream;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::tls_config::TlsFileConfig;
use crate::{Acceptor, BoxedStream, TransportError};

/// TLS acceptor that terminates the handshake and yields the decrypted
/// stream.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Build from optional certificate files. With `None`, an ephemeral
    /// self-signed certificate is generated.
    pub fn new(files: Option<&TlsFileConfig>) -> Result<Self, TransportError> {
        let (certs, key) = match files {
            Some(cfg) => load_cert_files(&cfg.cert, &cfg.key)?,
            None => generate_self_signed()?,
        };

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(config)),
        })
    }
}

impl Acceptor for TlsAcceptor {
    fn accept(
        &self,
        tcp: TcpStream,
    ) -> Pin<Box<dyn Future<Output = Result<BoxedStream, TransportError>> + Send + '_>> {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let tls = acceptor.accept(tcp).await?;
            Ok(Box::new(tls) as BoxedStream)
        })
    }
}

/// Generate an ephemeral self-signed certificate in memory.
fn generate_self_signed(
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256)
        .map_err(|e| TransportError::CertGeneration(e.to_string()))?;

    let params = CertificateParams::default();
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TransportError::CertGeneration(e.to_string()))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    Ok((vec![cert_der], key_der))
}

/// Load a certificate chain and private key from PEM files.
fn load_cert_files(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TransportError> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok().map(|v| v.into_owned()))
        .collect();

    if certs.is_empty() {
        return Err(TransportError::Config(format!(
            "no certificates found in {}",
            cert_path
        )));
    }

    let mut reader = std::io::BufReader::new(std::fs::File::open(key_path)?);
    let key = loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => {
                break PrivateKeyDer::Pkcs8(key);
            }
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => {
                break PrivateKeyDer::Pkcs1(key);
            }
            Some(_) => continue,
            None => {
                return Err(TransportError::Config(format!(
                    "no private key found in {}",
                    key_path
                )));
            }
        }
    };

    Ok((certs, key))
}
