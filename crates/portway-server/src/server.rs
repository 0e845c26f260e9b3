//! The relay server: listener lifecycle, accept loop, and pair tracking.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use portway_core::defaults;
use portway_transport::{Acceptor, PlainAcceptor, TlsAcceptor};

use crate::config::{RelayConfig, TransportKind};
use crate::error::RelayError;
use crate::event::{ErrorKind, EventSink, RelayEvent};
use crate::pair::{ConnectionPair, PairSettings};
use crate::util::{create_listener, tune_socket, PairRegistry};

/// How long `stop()` waits for cancelled pairs to report closure.
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(defaults::DEFAULT_SHUTDOWN_WAIT_SECS);

/// State that exists only while the relay is serving.
struct Running {
    port: u16,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// State shared between the relay handle, the accept loop, and pair tasks.
struct Shared {
    acceptor: Arc<dyn Acceptor>,
    events: Arc<dyn EventSink>,
    pairs: PairRegistry,
    settings: PairSettings,
    keepalive: bool,
    next_pair_id: AtomicU64,
}

/// A transparent TCP/TLS relay to a fixed backend.
///
/// `start()` and `stop()` are both idempotent; the listener exists exactly
/// while the relay is serving. All per-connection work runs in independent
/// tasks; a stalled backend dial for one connection never delays another
/// accept.
pub struct Relay {
    config: RelayConfig,
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Relay {
    /// Build a relay from a validated config. Fails if the config is
    /// inconsistent or the TLS material cannot be loaded.
    pub fn new(config: RelayConfig, events: Arc<dyn EventSink>) -> Result<Self, RelayError> {
        config.validate()?;

        let acceptor: Arc<dyn Acceptor> = match config.transport {
            TransportKind::Plain => Arc::new(PlainAcceptor),
            TransportKind::Tls => Arc::new(TlsAcceptor::new(config.tls.as_ref())?),
        };

        let idle = match config.timeouts.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let settings = PairSettings {
            target_host: config.target.host.clone(),
            target_port: config.target.port,
            connect_timeout: Duration::from_secs(config.timeouts.connect_timeout_secs),
            idle_timeout: idle,
            copy_buffer: config.tcp.copy_buffer_bytes,
            nodelay: config.tcp.nodelay,
        };

        let shared = Arc::new(Shared {
            acceptor,
            events,
            pairs: PairRegistry::new(),
            settings,
            keepalive: config.tcp.keepalive,
            next_pair_id: AtomicU64::new(1),
        });

        Ok(Self {
            config,
            shared,
            running: tokio::sync::Mutex::new(None),
        })
    }

    /// Open the listening socket and begin accepting. A no-op if already
    /// serving. A port that cannot be bound is fatal and is not retried.
    pub async fn start(&self) -> Result<(), RelayError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("start called while already serving");
            return Ok(());
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = create_listener(addr, self.config.tcp.backlog).map_err(|e| {
            self.shared.events.emit(RelayEvent::Error {
                pair: None,
                kind: ErrorKind::Bind,
                message: format!("failed to bind port {}: {e}", self.config.port),
            });
            RelayError::Bind(e)
        })?;
        let port = listener.local_addr()?.port();
        info!(
            port,
            target = %format!("{}:{}", self.config.target.host, self.config.target.port),
            transport = ?self.config.transport,
            "relay listening"
        );

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            cancel.clone(),
            self.shared.clone(),
        ));

        self.shared.events.emit(RelayEvent::Listening { port });
        *running = Some(Running {
            port,
            cancel,
            accept_task,
        });
        Ok(())
    }

    /// Stop serving: force-close every live pair, release the listener,
    /// then emit `stopped`. Safe to call when not started; calling twice
    /// emits one `stopped`.
    ///
    /// Teardown is immediate: in-flight bytes not yet flushed to a peer
    /// are lost.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(state) = running.take() else {
            debug!("stop called while not serving");
            return;
        };

        state.cancel.cancel();
        self.shared.pairs.cancel_all();

        // The accept task owns the listener; once it exits, the port is
        // released.
        if let Err(e) = state.accept_task.await {
            warn!(error = %e, "accept task did not exit cleanly");
        }
        if !self.shared.pairs.wait_empty(SHUTDOWN_WAIT).await {
            warn!(
                remaining = self.shared.pairs.count(),
                "pairs still open after shutdown wait"
            );
        }

        info!(port = state.port, "relay stopped");
        self.shared.events.emit(RelayEvent::Stopped { port: state.port });
    }

    /// Port the relay is currently bound to, if serving. With `port = 0`
    /// in the config this reports the ephemeral port.
    pub async fn local_port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.port)
    }

    /// Number of live connection pairs.
    pub fn active_pairs(&self) -> usize {
        self.shared.pairs.count()
    }
}

/// Accept inbound connections until cancelled, spawning a pair task per
/// connection.
async fn accept_loop(listener: TcpListener, cancel: CancellationToken, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("accept loop shutting down");
                return;
            }
            res = listener.accept() => match res {
                Ok((tcp, peer)) => spawn_pair(&shared, tcp, peer),
                Err(e) => {
                    // Transient accept failures (e.g. EMFILE) must not kill
                    // the server; back off briefly and keep serving.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Create and track a pair for an accepted connection, then run it in its
/// own task.
fn spawn_pair(shared: &Arc<Shared>, tcp: TcpStream, peer: SocketAddr) {
    tune_socket(&tcp, shared.keepalive, shared.settings.nodelay);

    let id = shared.next_pair_id.fetch_add(1, Ordering::Relaxed);
    let cancel = CancellationToken::new();
    shared.pairs.insert(id, cancel.clone());
    debug!(pair = id, peer = %peer, "connection accepted");

    let shared = shared.clone();
    tokio::spawn(
        async move {
            let pair = ConnectionPair {
                id,
                peer,
                events: shared.events.clone(),
                cancel,
            };
            pair.run(tcp, shared.acceptor.clone(), shared.settings.clone())
                .await;
            // The pair has reported closure; drop it from the active set.
            shared.pairs.remove(id);
        }
        .instrument(info_span!("pair", id, peer = %peer)),
    );
}
