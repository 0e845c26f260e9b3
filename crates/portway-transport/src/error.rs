//! Error types for the transport crate.

use thiserror::Error;

/// Errors raised while building or running a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("certificate generation failed: {0}")]
    CertGeneration(String),
}
