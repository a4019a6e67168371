use super::HealthChecker;
use crate::error::Result;
use crate::platform::NetworkDialer;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Passes when `127.0.0.1:<port>` accepts a connection within the timeout.
pub struct TcpChecker {
    addr: SocketAddr,
    network: Arc<dyn NetworkDialer>,
    timeout: Duration,
}

impl TcpChecker {
    pub fn new(port: u16, network: Arc<dyn NetworkDialer>, timeout: Duration) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            network,
            timeout,
        }
    }
}

#[async_trait]
impl HealthChecker for TcpChecker {
    async fn check(&self) -> Result<bool> {
        self.network.connect(self.addr, self.timeout).await?;
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "tcp"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
