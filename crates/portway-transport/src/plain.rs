//! Plain TCP transport (no encryption).

use std::future::Future;
use std::pin::Pin;

use tokio::net::TcpStream;

use crate::{Acceptor, BoxedStream, TransportError};

/// Pass-through acceptor: the accepted TCP stream is relayed as-is.
#[derive(Debug, Clone, Default)]
pub struct PlainAcceptor;

impl Acceptor for PlainAcceptor {
    fn accept(
        &self,
        tcp: TcpStream,
    ) -> Pin<Box<dyn Future<Output = Result<BoxedStream, TransportError>> + Send + '_>> {
        Box::pin(async move { Ok(Box::new(tcp) as BoxedStream) })
    }
}
