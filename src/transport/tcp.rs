//! TCP plumbing for sessions.
//!
//! The session layer is generic over any `AsyncRead + AsyncWrite`
//! stream; these helpers cover the common case of running it over TCP.
//! Socket acceptance policy, TLS, and keepalives stay with the host.
//!
//! # Example
//!
//! ```ignore
//! use blizzard::transport::tcp;
//!
//! // Caller side
//! let stream = tcp::connect("127.0.0.1:4100").await?;
//!
//! // Listener side
//! let listener = tcp::Listener::bind("127.0.0.1:4100").await?;
//! let (stream, peer) = listener.accept().await?;
//! ```

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::Result;

/// Connect to a peer; the connecting side is the session instigator.
///
/// Disables Nagle's algorithm: frames are small and latency-sensitive.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// TCP listener handing out streams for acceptor sessions.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Bind to an address.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<(TcpStream, std::net::SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    /// The locally bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
