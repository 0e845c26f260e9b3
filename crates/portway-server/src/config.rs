//! Relay configuration.
//!
//! Loaded from a TOML file; every field beyond the port and target has a
//! default so a minimal config is just:
//!
//! ```toml
//! port = 8080
//!
//! [target]
//! host = "127.0.0.1"
//! port = 8181
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use portway_core::defaults;
use portway_transport::TlsFileConfig;

use crate::error::RelayError;

/// Top-level relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local port the relay listens on. 0 picks an ephemeral port.
    pub port: u16,

    /// Fixed backend every accepted connection is relayed to.
    pub target: TargetConfig,

    /// Inbound transport: plain TCP (default) or TLS termination.
    #[serde(default)]
    pub transport: TransportKind,

    /// Certificate files for `transport = "tls"`. Absent means an
    /// ephemeral self-signed certificate is generated at startup.
    #[serde(default)]
    pub tls: Option<TlsFileConfig>,

    /// Timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// TCP socket tuning.
    #[serde(default)]
    pub tcp: TcpConfig,
}

/// The backend address dialed per accepted connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
}

/// Inbound transport type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP (default).
    #[default]
    Plain,
    /// Terminate TLS on the listener.
    Tls,
}

/// Timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Backend connect timeout (seconds). A timed-out dial is terminal for
    /// its pair.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout for established relays (seconds). 0 disables it: the
    /// relay runs until either side closes or errors.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// TCP socket tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// TCP_NODELAY on both legs.
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,

    /// SO_KEEPALIVE on accepted front sockets.
    #[serde(default = "default_keepalive")]
    pub keepalive: bool,

    /// Listener backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Per-direction copy buffer size (bytes).
    #[serde(default = "default_copy_buffer")]
    pub copy_buffer_bytes: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            nodelay: default_nodelay(),
            keepalive: default_keepalive(),
            backlog: default_backlog(),
            copy_buffer_bytes: default_copy_buffer(),
        }
    }
}

impl RelayConfig {
    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&data).map_err(|e| RelayError::Config(format!("parse error: {e}")))
    }

    /// Reject configurations that cannot work before any socket is opened.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.target.host.trim().is_empty() {
            return Err(RelayError::Config("target.host is empty".into()));
        }
        if self.target.port == 0 {
            return Err(RelayError::Config("target.port must be > 0".into()));
        }
        if self.timeouts.connect_timeout_secs == 0 {
            return Err(RelayError::Config(
                "timeouts.connect_timeout_secs must be > 0".into(),
            ));
        }
        if self.tcp.backlog == 0 {
            return Err(RelayError::Config("tcp.backlog must be > 0".into()));
        }
        if self.tcp.copy_buffer_bytes < 1024 || self.tcp.copy_buffer_bytes > 1024 * 1024 {
            return Err(RelayError::Config(
                "tcp.copy_buffer_bytes must be 1024..=1048576".into(),
            ));
        }
        if self.transport == TransportKind::Plain && self.tls.is_some() {
            return Err(RelayError::Config(
                "tls cert/key configured but transport is plain".into(),
            ));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    defaults::DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_idle_timeout() -> u64 {
    defaults::DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_nodelay() -> bool {
    defaults::DEFAULT_TCP_NODELAY
}
fn default_keepalive() -> bool {
    defaults::DEFAULT_TCP_KEEPALIVE
}
fn default_backlog() -> u32 {
    defaults::DEFAULT_CONNECTION_BACKLOG
}
fn default_copy_buffer() -> usize {
    defaults::DEFAULT_COPY_BUFFER_BYTES
}
