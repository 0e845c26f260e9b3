//! Server error types.

use thiserror::Error;

/// Errors that can reach the embedder. Per-connection faults never do;
/// they are contained to their pair and reported through the event sink.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport: {0}")]
    Transport(#[from] portway_transport::TransportError),

    #[error("config: {0}")]
    Config(String),
}
