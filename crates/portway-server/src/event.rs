//! Lifecycle events and the sink they are reported through.
//!
//! The relay reports one notification per terminal condition, never zero
//! and never duplicated: a pair that faults produces exactly one `Error`
//! and exactly one `Close`. What happens to the events is up to the embedder;
//! the default [`LogSink`] forwards them to `tracing`, while
//! [`ChannelSink`] exposes them as a stream for tests and embedders that
//! want the data.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use portway_core::errors;

/// Classification of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The listening port could not be bound. Fatal to `start()`.
    Bind,
    /// The backend dial failed or timed out. Terminal for one pair.
    BackendUnreachable,
    /// A read on one leg failed; the peer leg was forcibly closed.
    LegRead,
    /// A write on one leg failed; the peer leg was forcibly closed.
    LegWrite,
}

impl ErrorKind {
    /// Stable label for logs and metrics-style consumers.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Bind => errors::ERROR_BIND,
            ErrorKind::BackendUnreachable => errors::ERROR_BACKEND_UNREACHABLE,
            ErrorKind::LegRead => errors::ERROR_LEG_READ,
            ErrorKind::LegWrite => errors::ERROR_LEG_WRITE,
        }
    }
}

/// Why a pair closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Both legs reached end-of-stream.
    Normal,
    /// The idle timeout elapsed with no data moving.
    IdleTimeout,
    /// The server was stopped while the pair was live.
    Shutdown,
    /// A fault terminated the pair; the matching `Error` event carries
    /// detail.
    Error(ErrorKind),
}

/// A lifecycle event emitted by the relay.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// The listener is bound and accepting; carries the local port.
    Listening { port: u16 },
    /// An error occurred. `pair` is `None` for server-level errors.
    Error {
        pair: Option<u64>,
        kind: ErrorKind,
        message: String,
    },
    /// A pair fully terminated and left the active set.
    Close {
        pair: u64,
        peer: SocketAddr,
        reason: CloseReason,
        /// Bytes moved front→back.
        sent: u64,
        /// Bytes moved back→front.
        received: u64,
    },
    /// The listener has fully released its port.
    Stopped { port: u16 },
}

/// Destination for relay lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RelayEvent);
}

/// Default sink: forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: RelayEvent) {
        match event {
            RelayEvent::Listening { port } => info!(port, "listening"),
            RelayEvent::Error {
                pair,
                kind,
                message,
            } => match pair {
                Some(pair) => warn!(pair, kind = kind.label(), "{message}"),
                None => error!(kind = kind.label(), "{message}"),
            },
            RelayEvent::Close {
                pair,
                peer,
                reason,
                sent,
                received,
            } => info!(pair, peer = %peer, ?reason, sent, received, "pair closed"),
            RelayEvent::Stopped { port } => info!(port, "stopped"),
        }
    }
}

/// Sink that forwards events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl ChannelSink {
    /// Create a sink plus the receiving end of its event stream.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RelayEvent) {
        // The receiver may be gone (embedder stopped listening); that must
        // never take a connection down with it.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(ErrorKind::Bind.label(), "bind");
        assert_eq!(ErrorKind::BackendUnreachable.label(), "backend_unreachable");
        assert_eq!(ErrorKind::LegRead.label(), "leg_read");
        assert_eq!(ErrorKind::LegWrite.label(), "leg_write");
    }

    #[tokio::test]
    async fn channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(RelayEvent::Listening { port: 9 });
        match rx.recv().await {
            Some(RelayEvent::Listening { port }) => assert_eq!(port, 9),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(RelayEvent::Stopped { port: 9 });
    }
}
