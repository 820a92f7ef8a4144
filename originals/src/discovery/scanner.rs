//! TCP port scanning of the local subnet.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Finds addresses accepting TCP connections.
#[async_trait]
pub trait HostScanner: Send + Sync {
    /// Returns every `host:port` combination that accepted a connection.
    async fn scan(&self, hosts: Vec<IpAddr>, ports: Vec<u16>) -> Vec<SocketAddr>;
}

/// Every host address of the /24 containing `ip` (`.1` to `.254`).
pub fn subnet_hosts(ip: Ipv4Addr) -> Vec<IpAddr> {
    let [a, b, c, _] = ip.octets();
    (1..=254).map(|d| IpAddr::V4(Ipv4Addr::new(a, b, c, d))).collect()
}

/// Scans with plain TCP connects, bounded in time and concurrency.
#[derive(Debug, Clone)]
pub struct TcpConnectScanner {
    connect_timeout: Duration,
    max_concurrent: usize,
}

impl TcpConnectScanner {
    pub fn new(connect_timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            connect_timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    async fn is_open(&self, addr: SocketAddr) -> bool {
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl HostScanner for TcpConnectScanner {
    async fn scan(&self, hosts: Vec<IpAddr>, ports: Vec<u16>) -> Vec<SocketAddr> {
        let candidates: Vec<SocketAddr> = hosts
            .iter()
            .flat_map(|&ip| ports.iter().map(move |&port| SocketAddr::new(ip, port)))
            .collect();
        let total = candidates.len();

        let open: Vec<SocketAddr> = stream::iter(candidates)
            .map(|addr| async move { self.is_open(addr).await.then_some(addr) })
            .buffer_unordered(self.max_concurrent)
            .filter_map(std::future::ready)
            .collect()
            .await;

        debug!(total, open = open.len(), "Port scan finished");
        open
    }
}
