//! One relayed connection pair: the accepted `front` leg and the dialed
//! `back` leg.
//!
//! Lifecycle: the pair exists from the moment a connection is accepted.
//! Front data that arrives while the backend dial is outstanding is
//! buffered, then flushed in arrival order the instant the dial lands;
//! from there both directions are live byte pipes until either side closes
//! or errors. A pair reports exactly one `close` event (and at most one
//! `error` event) before it leaves the active set.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use portway_core::io::{copy_bidirectional, CopyEnd, IoOp, Leg};
use portway_transport::Acceptor;

use crate::event::{CloseReason, ErrorKind, EventSink, RelayEvent};
use crate::util::connect_backend;

/// Per-pair knobs, snapshotted from the relay config.
#[derive(Debug, Clone)]
pub(crate) struct PairSettings {
    pub target_host: String,
    pub target_port: u16,
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub copy_buffer: usize,
    pub nodelay: bool,
}

/// Front→back chunks that arrived before the backend dial completed.
///
/// FIFO; draining consumes the buffer by value, so a drained buffer cannot
/// be refilled or drained a second time.
#[derive(Default)]
struct PendingWrites {
    chunks: Vec<Bytes>,
}

impl PendingWrites {
    fn push(&mut self, chunk: Bytes) {
        self.chunks.push(chunk);
    }

    fn into_chunks(self) -> Vec<Bytes> {
        self.chunks
    }
}

/// How a pair's relay work ended.
enum PairEnd {
    /// Both legs reached end-of-stream.
    Eof,
    /// The idle timeout elapsed.
    Idle,
    /// Forced teardown from `stop()`.
    Cancelled,
    /// A fault terminated the pair.
    Fault(ErrorKind, String),
}

/// A single front/back connection pair.
pub(crate) struct ConnectionPair {
    pub(crate) id: u64,
    pub(crate) peer: SocketAddr,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) cancel: CancellationToken,
}

impl ConnectionPair {
    /// Full lifecycle for an accepted TCP connection: transport
    /// establishment (TLS handshake for TLS listeners), backend dial, then
    /// bidirectional relay.
    pub(crate) async fn run(
        self,
        tcp: TcpStream,
        acceptor: Arc<dyn Acceptor>,
        settings: PairSettings,
    ) {
        let front = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.finish(0, 0, PairEnd::Cancelled);
                return;
            }
            res = acceptor.accept(tcp) => match res {
                Ok(front) => front,
                Err(e) => {
                    // The front leg never reached Connected; its handshake
                    // bytes are reads on the front leg.
                    self.finish(
                        0,
                        0,
                        PairEnd::Fault(
                            ErrorKind::LegRead,
                            format!("front transport accept failed: {e}"),
                        ),
                    );
                    return;
                }
            },
        };

        let dial = connect_backend(
            settings.target_host.clone(),
            settings.target_port,
            settings.connect_timeout,
            settings.nodelay,
        );
        self.relay(front, dial, settings).await;
    }

    /// Relay an established front stream through a backend dialed by
    /// `dial`. Split out from [`run`] so tests can drive the pair with
    /// in-memory streams and a controllable dial.
    pub(crate) async fn relay<F, B, D>(self, front: F, dial: D, settings: PairSettings)
    where
        F: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
        D: Future<Output = io::Result<B>>,
    {
        let (sent, received, end) = self.drive(front, dial, &settings).await;
        self.finish(sent, received, end);
    }

    /// The dial-then-relay protocol. Returns bytes moved in each direction
    /// and how the pair ended.
    async fn drive<F, B, D>(
        &self,
        mut front: F,
        dial: D,
        settings: &PairSettings,
    ) -> (u64, u64, PairEnd)
    where
        F: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
        D: Future<Output = io::Result<B>>,
    {
        tokio::pin!(dial);

        let mut pending = PendingWrites::default();
        let mut buf = vec![0u8; settings.copy_buffer];
        let mut front_eof = false;

        // Buffer front data until the dial lands. `biased` makes the
        // dial arm win over a simultaneously-ready read, so the switch to
        // direct forwarding cannot interleave with new front data.
        let mut back: B = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return (0, 0, PairEnd::Cancelled);
                }
                res = &mut dial => match res {
                    Ok(back) => break back,
                    Err(e) => {
                        return (0, 0, PairEnd::Fault(
                            ErrorKind::BackendUnreachable,
                            format!(
                                "backend {}:{} unreachable: {e}",
                                settings.target_host, settings.target_port
                            ),
                        ));
                    }
                },
                res = front.read(&mut buf), if !front_eof => match res {
                    // Front ended before the backend was up: stop reading
                    // but keep dialing, so buffered data still reaches the
                    // backend.
                    Ok(0) => front_eof = true,
                    Ok(n) => pending.push(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        return (0, 0, PairEnd::Fault(
                            ErrorKind::LegRead,
                            format!("front read failed: {e}"),
                        ));
                    }
                },
            }
        };

        // Drain the pre-dial buffer, in arrival order. Consuming the
        // buffer here is what makes "drained exactly once" hold.
        let mut sent = 0u64;
        for chunk in pending.into_chunks() {
            if let Err(e) = back.write_all(&chunk).await {
                return (
                    sent,
                    0,
                    PairEnd::Fault(ErrorKind::LegWrite, format!("back write failed: {e}")),
                );
            }
            sent += chunk.len() as u64;
        }
        if sent > 0 {
            debug!(pair = self.id, bytes = sent, "pre-dial buffer flushed");
        }

        // Both directions live. If the front already hit EOF above, the
        // pump sees it immediately and half-closes the backend after the
        // flushed bytes.
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => (sent, 0, PairEnd::Cancelled),
            outcome = copy_bidirectional(
                front,
                back,
                settings.idle_timeout,
                settings.copy_buffer,
            ) => {
                let sent = sent + outcome.front_to_back;
                let received = outcome.back_to_front;
                match outcome.end {
                    CopyEnd::Eof => (sent, received, PairEnd::Eof),
                    CopyEnd::Idle => (sent, received, PairEnd::Idle),
                    CopyEnd::Fault(fault) => {
                        let kind = match fault.op {
                            IoOp::Read => ErrorKind::LegRead,
                            IoOp::Write => ErrorKind::LegWrite,
                        };
                        let side = match fault.leg {
                            Leg::Front => "front",
                            Leg::Back => "back",
                        };
                        let op = match fault.op {
                            IoOp::Read => "read",
                            IoOp::Write => "write",
                        };
                        (sent, received, PairEnd::Fault(
                            kind,
                            format!("{side} {op} failed: {}", fault.error),
                        ))
                    }
                }
            }
        }
    }

    /// Report the pair's terminal condition: at most one `error` event,
    /// then exactly one `close` event.
    fn finish(&self, sent: u64, received: u64, end: PairEnd) {
        let reason = match end {
            PairEnd::Eof => CloseReason::Normal,
            PairEnd::Idle => CloseReason::IdleTimeout,
            PairEnd::Cancelled => CloseReason::Shutdown,
            PairEnd::Fault(kind, message) => {
                self.events.emit(RelayEvent::Error {
                    pair: Some(self.id),
                    kind,
                    message,
                });
                CloseReason::Error(kind)
            }
        };
        debug!(pair = self.id, peer = %self.peer, ?reason, sent, received, "pair finished");
        self.events.emit(RelayEvent::Close {
            pair: self.id,
            peer: self.peer,
            reason,
            sent,
            received,
        });
    }
}
