//! Inbound transport for portway.
//!
//! The relay server treats the listener transport as an opaque capability:
//! it hands each accepted TCP stream to an [`Acceptor`] and gets back a
//! byte stream to relay. Two implementations exist: [`PlainAcceptor`]
//! (pass-through TCP) and [`TlsAcceptor`] (TLS termination with file-based
//! or ephemeral self-signed certificates).

mod error;
mod plain;
mod tls;
mod tls_config;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub use error::TransportError;
pub use plain::PlainAcceptor;
pub use tls::TlsAcceptor;
pub use tls_config::TlsFileConfig;

/// A byte stream produced by an acceptor.
pub trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// A boxed byte stream, so the server can hold acceptors behind `dyn`.
pub type BoxedStream = Box<dyn IoStream>;

/// Turns an accepted TCP connection into a relayable byte stream.
///
/// For plain TCP this is the identity; for TLS it performs the server-side
/// handshake. The stream type is erased because the transport is selected
/// from configuration at runtime.
pub trait Acceptor: Send + Sync {
    fn accept(
        &self,
        tcp: TcpStream,
    ) -> Pin<Box<dyn Future<Output = Result<BoxedStream, TransportError>> + Send + '_>>;
}
