//! Socket helpers and the active-pair registry.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Create a TCP listener with SO_REUSEADDR and a custom backlog.
pub(crate) fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    TcpListener::from_std(std::net::TcpListener::from(socket))
}

/// Apply per-socket options to an accepted front connection. Failures are
/// logged and ignored; a relay must not drop a connection over a tuning
/// sockopt.
pub(crate) fn tune_socket(tcp: &TcpStream, keepalive: bool, nodelay: bool) {
    if keepalive {
        let sock = socket2::SockRef::from(tcp);
        if let Err(e) = sock.set_keepalive(true) {
            debug!(error = %e, "failed to set SO_KEEPALIVE");
        }
    }
    if nodelay {
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
    }
}

/// Dial the backend with a connect timeout.
pub(crate) async fn connect_backend(
    host: String,
    port: u16,
    timeout: Duration,
    nodelay: bool,
) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    if nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(stream)
}

/// Tracks live connection pairs for forced teardown and shutdown
/// bookkeeping.
///
/// Only two paths mutate the set: the accept path inserts, the pair-closed
/// path removes. Removal of an absent pair is a no-op.
#[derive(Clone)]
pub(crate) struct PairRegistry {
    pairs: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    empty: Arc<Notify>,
}

impl PairRegistry {
    pub(crate) fn new() -> Self {
        Self {
            pairs: Arc::new(Mutex::new(HashMap::new())),
            empty: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn insert(&self, id: u64, cancel: CancellationToken) {
        self.pairs.lock().insert(id, cancel);
    }

    pub(crate) fn remove(&self, id: u64) {
        let mut pairs = self.pairs.lock();
        if pairs.remove(&id).is_some() && pairs.is_empty() {
            self.empty.notify_waiters();
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.pairs.lock().len()
    }

    /// Force-close every tracked pair. Pairs that already finished are
    /// skipped implicitly; cancelling a token twice is harmless.
    pub(crate) fn cancel_all(&self) {
        for cancel in self.pairs.lock().values() {
            cancel.cancel();
        }
    }

    /// Wait until the set is empty, bounded by `timeout`. Returns whether
    /// the set drained.
    pub(crate) async fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so a removal that lands
            // between the check and the await is not missed.
            let notified = self.empty.notified();
            if self.count() == 0 {
                return true;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.count() == 0,
            }
        }
    }
}
