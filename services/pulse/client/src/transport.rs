//! Transport seam for duplex streams.
//!
//! The session drives any `AsyncRead + AsyncWrite` duplex stream;
//! [`TcpConnector`] is the shipped implementation. TLS or in-memory
//! transports plug in behind [`Connector`] without touching the state
//! machine.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::endpoint::Endpoint;

/// A duplex byte stream the session can drive.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

/// Boxed stream type returned by connectors.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Opens duplex streams to endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a stream to the given endpoint.
    ///
    /// Open timeouts are enforced by the session; implementations simply
    /// attempt the connect.
    async fn connect(&self, endpoint: &Endpoint) -> std::io::Result<BoxedStream>;
}

/// Plain TCP connector.
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> std::io::Result<BoxedStream> {
        let stream = TcpStream::connect(endpoint.as_str()).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_connector_reaches_a_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::new(listener.local_addr().unwrap().to_string());

        let connector = TcpConnector;
        let stream = connector.connect(&endpoint).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn tcp_connector_reports_refused_connections() {
        // Bind then drop to obtain a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::new(listener.local_addr().unwrap().to_string());
        drop(listener);

        let connector = TcpConnector;
        assert!(connector.connect(&endpoint).await.is_err());
    }
}
