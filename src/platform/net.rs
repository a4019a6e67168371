use async_trait::async_trait;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tokio::net::TcpStream;

/// Local TCP probing.
#[async_trait]
pub trait NetworkDialer: Send + Sync {
    /// Bind `addr` and release it immediately.
    fn try_bind(&self, addr: SocketAddr) -> io::Result<()>;

    /// Open a TCP connection to `addr` within `timeout`.
    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpNetwork;

#[async_trait]
impl NetworkDialer for TcpNetwork {
    fn try_bind(&self, addr: SocketAddr) -> io::Result<()> {
        let listener = TcpListener::bind(addr)?;
        drop(listener);
        Ok(())
    }

    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<()> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", addr, timeout),
            )),
        }
    }
}
