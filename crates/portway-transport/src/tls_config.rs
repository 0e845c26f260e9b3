//! TLS certificate configuration.

use serde::{Deserialize, Serialize};

/// Paths to a PEM certificate chain and private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsFileConfig {
    pub cert: String,
    pub key: String,
}
