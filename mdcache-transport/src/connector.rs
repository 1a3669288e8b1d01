//! Connection establishment, abstracted so the transport can run without a network.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Byte stream carrying the feed.
pub trait FeedIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> FeedIo for T {}

/// Boxed feed stream handed out by a [`Connector`].
pub type BoxedStream = Box<dyn FeedIo>;

/// Opens byte streams to the exchange data endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new stream.
    ///
    /// # Errors
    /// Returns IO error if the endpoint cannot be reached.
    async fn connect(&self) -> std::io::Result<BoxedStream>;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// TCP connector for production use.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
    tcp_nodelay: bool,
}

impl TcpConnector {
    /// Creates a connector for a `host:port` endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tcp_nodelay: true,
        }
    }

    /// Sets TCP_NODELAY option.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> std::io::Result<BoxedStream> {
        let stream = TcpStream::connect(self.endpoint.as_str()).await?;
        stream.set_nodelay(self.tcp_nodelay)?;
        Ok(Box::new(stream))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_connector_builder() {
        let connector = TcpConnector::new("127.0.0.1:9001").tcp_nodelay(false);
        assert_eq!(connector.endpoint(), "127.0.0.1:9001");
        assert!(!connector.tcp_nodelay);
    }

    #[tokio::test]
    async fn test_tcp_connector_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.is_ok() });

        let connector = TcpConnector::new(addr.to_string());
        assert!(connector.connect().await.is_ok());
        assert!(accept.await.unwrap());
    }
}
