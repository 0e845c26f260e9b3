//! CLI entry point for the portway binary.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{RelayConfig, TargetConfig};
use crate::error::RelayError;
use crate::event::LogSink;
use crate::server::Relay;

/// CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "portway",
    version,
    about = "Transparent TCP/TLS port relay to a fixed backend"
)]
pub struct Args {
    /// Config file path (toml).
    #[arg(short, long, default_value = "portway.toml")]
    pub config: PathBuf,

    /// Override the listening port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the backend target, host:port.
    #[arg(long)]
    pub target: Option<String>,

    /// Log level override (e.g. "info", "debug", "trace").
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Run the relay with the given CLI arguments, until a shutdown signal.
pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RelayConfig::load(&args.config)
        .map_err(|e| format!("failed to load config {:?}: {e}", args.config))?;
    apply_overrides(&mut config, &args)?;

    init_tracing(args.log_level.as_deref());

    let relay = Relay::new(config, Arc::new(LogSink))?;
    relay.start().await?;

    shutdown_signal().await;
    info!("shutdown signal received");
    relay.stop().await;
    Ok(())
}

fn apply_overrides(config: &mut RelayConfig, args: &Args) -> Result<(), RelayError> {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(target) = &args.target {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| RelayError::Config("target must be host:port".into()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| RelayError::Config(format!("invalid target port: {port}")))?;
        config.target = TargetConfig {
            host: host.to_string(),
            port,
        };
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(level: Option<&str>) {
    let level = level.unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RelayConfig {
        toml::from_str("port = 1\n[target]\nhost = \"h\"\nport = 2\n").unwrap()
    }

    #[test]
    fn target_override_parses_host_and_port() {
        let mut config = base_config();
        let args = Args {
            config: PathBuf::new(),
            port: Some(9000),
            target: Some("backend.internal:8181".into()),
            log_level: None,
        };
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.target.host, "backend.internal");
        assert_eq!(config.target.port, 8181);
    }

    #[test]
    fn malformed_target_override_is_rejected() {
        let mut config = base_config();
        let args = Args {
            config: PathBuf::new(),
            port: None,
            target: Some("no-port".into()),
            log_level: None,
        };
        assert!(apply_overrides(&mut config, &args).is_err());
    }
}
