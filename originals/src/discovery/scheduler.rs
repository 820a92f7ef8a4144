//! The discovery loop.
//!
//! Each cycle self-registers this machine as the master node, scans the local /24 for open
//! control-API ports, probes every open candidate concurrently, reconciles the positives into the
//! registry and finally marks nodes that have gone quiet as offline.
//!
//! The loop runs as a background task owned by [`BackgroundServices`](crate::BackgroundServices)
//! and stops when its cancellation token fires. A cycle that fails or panics is logged and
//! followed by a longer backoff; it never takes the task down.

use crate::config::DiscoveryConfig;
use crate::db::models::nodes::{NodeDBResponse, NodeFilter, NodeStatus};
use crate::discovery::local::LocalNode;
use crate::discovery::prober::{PeerInfo, Prober};
use crate::discovery::scanner::{HostScanner, subnet_hosts};
use crate::nodes::registry::{NodeAttributes, NodeRegistry, ResourceMetrics, is_valid_node_name};
use crate::types::abbrev_uuid;
use futures::FutureExt;
use metrics::{counter, gauge};
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const MAX_HOSTNAME_LEN: usize = 255;

/// Summary of one discovery cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub local_ip: IpAddr,
    /// Open `ip:port` candidates found by the scan
    pub candidates: usize,
    /// Candidates that answered as peers and were reconciled
    pub peers: usize,
    /// Nodes marked offline by the staleness sweep
    pub stale: usize,
}

/// Periodic LAN discovery and registry reconciliation.
#[derive(Clone)]
pub struct DiscoveryLoop {
    registry: NodeRegistry,
    local: Arc<LocalNode>,
    prober: Arc<dyn Prober>,
    scanner: Arc<dyn HostScanner>,
    config: DiscoveryConfig,
}

impl DiscoveryLoop {
    pub fn new(
        registry: NodeRegistry,
        local: Arc<LocalNode>,
        prober: Arc<dyn Prober>,
        scanner: Arc<dyn HostScanner>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            registry,
            local,
            prober,
            scanner,
            config,
        }
    }

    /// Upsert this machine as the master node and refresh its liveness and gauges.
    #[instrument(skip(self), err)]
    pub async fn register_self(&self, ip: IpAddr) -> crate::errors::Result<NodeDBResponse> {
        let attrs = NodeAttributes {
            name: Some(self.local.master_name()),
            hostname: Some(self.local.hostname().to_string()),
            capabilities: Some(self.local.capabilities().await),
            is_master: true,
        };
        let master = self.registry.upsert(ip, self.local.port(), attrs).await?;
        self.registry.mark_status(master.id, NodeStatus::Online, true).await?;
        self.registry
            .set_resource_metrics(master.id, self.local.resource_metrics().await)
            .await?;
        let master = self
            .registry
            .set_running_servers(master.id, self.local.running_servers())
            .await?;
        self.registry.demote_other_masters(master.id).await?;

        debug!(node_id = %abbrev_uuid(&master.id), address = %master.address(), "Master node refreshed");
        Ok(master)
    }

    /// Fold a positive probe into the registry.
    async fn reconcile_peer(&self, addr: SocketAddr, info: PeerInfo) -> crate::errors::Result<NodeDBResponse> {
        // Peers are not trusted to send valid names; invalid ones keep the stored or default name
        let name = info.name.map(|n| n.trim().to_string()).filter(|n| is_valid_node_name(n));
        let hostname = info
            .hostname
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty() && h.len() <= MAX_HOSTNAME_LEN);
        let capabilities = info.capabilities.filter(serde_json::Value::is_object);

        let attrs = NodeAttributes {
            name,
            hostname,
            capabilities,
            is_master: false,
        };
        let node = self.registry.upsert(addr.ip(), addr.port(), attrs).await?;
        let mut node = self.registry.mark_status(node.id, NodeStatus::Online, true).await?;

        if let Some(usage) = info.resource_usage {
            let metrics = ResourceMetrics {
                cpu: usage.cpu,
                memory: usage.memory,
                disk: usage.disk,
            };
            node = self.registry.set_resource_metrics(node.id, metrics).await?;
        }
        if let Some(running) = info.running_servers {
            node = self.registry.set_running_servers(node.id, running).await?;
        }
        Ok(node)
    }

    /// Scan the /24 around `local_ip`, excluding this machine's own control port.
    async fn scan(&self, local_ip: IpAddr) -> Vec<SocketAddr> {
        let IpAddr::V4(v4) = local_ip else {
            info!(%local_ip, "Local address is IPv6, skipping subnet scan");
            return Vec::new();
        };
        let own = SocketAddr::new(local_ip, self.local.port());
        let ports = self.config.scan_ports.ports().collect();

        self.scanner
            .scan(subnet_hosts(v4), ports)
            .await
            .into_iter()
            .filter(|addr| *addr != own)
            .collect()
    }

    /// Run a single discovery cycle.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let local_ip = self.local.detect_ip().await;
        self.register_self(local_ip).await?;

        let candidates = self.scan(local_ip).await;
        debug!(count = candidates.len(), "Probing scan candidates");

        // One task per probe so a panicking probe cannot take the others down
        let mut probes = JoinSet::new();
        for addr in &candidates {
            let prober = Arc::clone(&self.prober);
            let addr = *addr;
            probes.spawn(async move { (addr, prober.probe(addr.ip(), addr.port()).await) });
        }

        let mut peers = 0;
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((addr, Some(info))) => {
                    counter!("originals_probes_total", "outcome" => "peer").increment(1);
                    match self.reconcile_peer(addr, info).await {
                        Ok(node) => {
                            peers += 1;
                            debug!(node_id = %abbrev_uuid(&node.id), %addr, "Peer reconciled");
                        }
                        Err(e) => warn!(%addr, error = %e, "Failed to record discovered peer"),
                    }
                }
                Ok((_, None)) => {
                    counter!("originals_probes_total", "outcome" => "not_peer").increment(1);
                }
                Err(e) => {
                    counter!("originals_probes_total", "outcome" => "panicked").increment(1);
                    error!(error = %e, "Probe task failed");
                }
            }
        }

        let stale = self.registry.mark_stale_offline(self.config.offline_after).await?;
        for node in &stale {
            info!(node_id = %abbrev_uuid(&node.id), name = %node.name, "Node went offline");
        }

        let online = NodeFilter {
            status: Some(NodeStatus::Online),
            ..Default::default()
        };
        gauge!("originals_nodes_online").set(self.registry.list(&online).await?.len() as f64);

        Ok(CycleReport {
            local_ip,
            candidates: candidates.len(),
            peers,
            stale: stale.len(),
        })
    }

    /// Run cycles until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval = ?self.config.interval,
            ports = ?self.config.scan_ports,
            "Starting node discovery"
        );

        loop {
            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind();
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = cycle => outcome,
            };

            let delay: Duration = match outcome {
                Ok(Ok(report)) => {
                    counter!("originals_discovery_cycles_total", "outcome" => "success").increment(1);
                    info!(
                        local_ip = %report.local_ip,
                        candidates = report.candidates,
                        peers = report.peers,
                        stale = report.stale,
                        "Network scan complete"
                    );
                    self.config.interval
                }
                Ok(Err(e)) => {
                    counter!("originals_discovery_cycles_total", "outcome" => "error").increment(1);
                    error!(error = %e, "Node discovery cycle failed");
                    self.config.error_backoff
                }
                Err(panic) => {
                    counter!("originals_discovery_cycles_total", "outcome" => "panic").increment(1);
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(panic = %message, "Node discovery cycle panicked");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Node discovery stopped");
    }
}
