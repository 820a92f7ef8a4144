//! This machine as a node: address detection, hardware capabilities and resource sampling.

use crate::config::Config;
use crate::discovery::prober::{PeerInfo, PeerResourceUsage};
use crate::nodes::deploy::ServerLauncher;
use crate::nodes::registry::{ResourceMetrics, is_valid_node_name};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use sysinfo::{Disks, System};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

const GIB: f64 = (1024 * 1024 * 1024) as f64;
const FALLBACK_HOSTNAME: &str = "localhost";
const FALLBACK_MASTER_NAME: &str = "Master Node";
/// Never contacted; connecting a UDP socket only selects the outbound interface
const ROUTE_PROBE_ADDR: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Reads hardware facts and resource usage from the operating system.
pub struct SystemSampler {
    system: Mutex<System>,
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler").finish_non_exhaustive()
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_all()),
        }
    }

    /// Root filesystem (or the first disk when there is no `/` mount) as `(total, available)` bytes.
    fn root_disk() -> Option<(u64, u64)> {
        let disks = Disks::new_with_refreshed_list();
        let list = disks.list();
        list.iter()
            .find(|disk| disk.mount_point() == Path::new("/"))
            .or_else(|| list.first())
            .map(|disk| (disk.total_space(), disk.available_space()))
    }

    /// Static hardware description stored as the node's capabilities.
    pub fn capabilities(&self) -> serde_json::Value {
        let (cpu_cores, ram_gb) = match self.system.lock() {
            Ok(mut system) => {
                system.refresh_memory();
                (system.cpus().len(), round2(system.total_memory() as f64 / GIB))
            }
            Err(_) => (0, 0.0),
        };
        let disk_gb = Self::root_disk().map_or(0.0, |(total, _)| round2(total as f64 / GIB));
        let os = System::name().unwrap_or_else(|| std::env::consts::OS.to_string());

        json!({
            "cpu_cores": cpu_cores,
            "ram_gb": ram_gb,
            "disk_gb": disk_gb,
            "os": os,
        })
    }

    /// Current CPU, memory and disk usage in percent.
    ///
    /// CPU usage is measured against the previous sample, so the first reading is 0.
    pub fn sample(&self) -> ResourceMetrics {
        let (cpu, memory) = match self.system.lock() {
            Ok(mut system) => {
                system.refresh_cpu_usage();
                system.refresh_memory();
                let memory = match system.total_memory() {
                    0 => None,
                    total => Some(system.used_memory() as f64 / total as f64 * 100.0),
                };
                (Some(f64::from(system.global_cpu_usage())), memory)
            }
            Err(_) => (None, None),
        };
        let disk = Self::root_disk()
            .filter(|(total, _)| *total > 0)
            .map(|(total, available)| (total - available.min(total)) as f64 / total as f64 * 100.0);

        ResourceMetrics { cpu, memory, disk }
    }
}

/// The machine this process runs on, as seen by the node registry and by peers.
pub struct LocalNode {
    hostname: String,
    port: u16,
    advertise_address: Option<IpAddr>,
    sampler: Arc<SystemSampler>,
    launcher: Arc<dyn ServerLauncher>,
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("advertise_address", &self.advertise_address)
            .finish_non_exhaustive()
    }
}

impl LocalNode {
    pub fn new(hostname: impl Into<String>, port: u16, launcher: Arc<dyn ServerLauncher>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            advertise_address: None,
            sampler: Arc::new(SystemSampler::new()),
            launcher,
        }
    }

    pub fn from_config(config: &Config, launcher: Arc<dyn ServerLauncher>) -> Self {
        let hostname = config
            .local_node
            .hostname
            .clone()
            .or_else(System::host_name)
            .unwrap_or_else(|| FALLBACK_HOSTNAME.to_string());

        Self::new(hostname, config.port, launcher)
            .with_advertise_address(config.discovery.advertise_address)
    }

    pub fn with_advertise_address(mut self, address: Option<IpAddr>) -> Self {
        self.advertise_address = address;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Control-API port peers reach this machine on
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn launcher(&self) -> &Arc<dyn ServerLauncher> {
        &self.launcher
    }

    /// Display name of the master record, `"{hostname} (Master)"`.
    pub fn master_name(&self) -> String {
        let name = format!("{} (Master)", self.hostname);
        if is_valid_node_name(&name) {
            name
        } else {
            FALLBACK_MASTER_NAME.to_string()
        }
    }

    /// Read hardware capabilities off the async runtime.
    pub async fn capabilities(&self) -> serde_json::Value {
        let sampler = Arc::clone(&self.sampler);
        match tokio::task::spawn_blocking(move || sampler.capabilities()).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                warn!(error = %e, "Capability sampling task failed");
                json!({})
            }
        }
    }

    /// Sample resource usage off the async runtime.
    pub async fn resource_metrics(&self) -> ResourceMetrics {
        let sampler = Arc::clone(&self.sampler);
        match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = %e, "Resource sampling task failed");
                ResourceMetrics::default()
            }
        }
    }

    pub fn running_servers(&self) -> u32 {
        self.launcher.running_servers()
    }

    /// Best guess at the LAN address peers can reach this machine on.
    ///
    /// Tries the configured advertise address, then a non-loopback IPv4 address the hostname
    /// resolves to, then the source address of a route to a public IP, then loopback.
    pub async fn detect_ip(&self) -> IpAddr {
        if let Some(address) = self.advertise_address {
            return address;
        }

        match tokio::net::lookup_host((self.hostname.as_str(), 0)).await {
            Ok(addrs) => {
                if let Some(addr) = addrs.map(|a| a.ip()).find(|ip| ip.is_ipv4() && !ip.is_loopback()) {
                    return addr;
                }
                debug!(hostname = %self.hostname, "Hostname resolves only to loopback addresses");
            }
            Err(e) => debug!(hostname = %self.hostname, error = %e, "Hostname resolution failed"),
        }

        match Self::route_source_address().await {
            Ok(ip) if !ip.is_unspecified() => return ip,
            Ok(_) => debug!("Route probe returned an unspecified address"),
            Err(e) => debug!(error = %e, "Route probe failed"),
        }

        warn!("Could not determine LAN address, falling back to loopback");
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    async fn route_source_address() -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect(ROUTE_PROBE_ADDR).await?;
        Ok(socket.local_addr()?.ip())
    }

    /// Self-description served to peers at `GET /api/node/info`.
    pub async fn peer_info(&self) -> PeerInfo {
        let (capabilities, usage) = tokio::join!(self.capabilities(), self.resource_metrics());
        PeerInfo {
            name: Some(format!("The Originals - {}", self.hostname)),
            hostname: Some(self.hostname.clone()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            capabilities: Some(capabilities),
            resource_usage: Some(PeerResourceUsage {
                cpu: usage.cpu,
                memory: usage.memory,
                disk: usage.disk,
            }),
            running_servers: Some(self.running_servers()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::deploy::UnconfiguredLauncher;

    fn local(hostname: &str) -> LocalNode {
        LocalNode::new(hostname, 3000, Arc::new(UnconfiguredLauncher))
    }

    #[test]
    fn test_master_name() {
        assert_eq!(local("gaming-rig").master_name(), "gaming-rig (Master)");
        assert_eq!(local("büro").master_name(), FALLBACK_MASTER_NAME);
        assert_eq!(local(&"a".repeat(120)).master_name(), FALLBACK_MASTER_NAME);
    }

    #[tokio::test]
    async fn test_advertise_address_wins() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let node = local("gaming-rig").with_advertise_address(Some(ip));
        assert_eq!(node.detect_ip().await, ip);
    }

    #[tokio::test]
    async fn test_detected_address_is_usable() {
        let ip = local("no-such-host.invalid").detect_ip().await;
        assert!(!ip.is_unspecified());
    }

    #[test]
    fn test_capabilities_shape() {
        let caps = SystemSampler::new().capabilities();
        assert!(caps["cpu_cores"].is_u64());
        assert!(caps["ram_gb"].is_number());
        assert!(caps["disk_gb"].is_number());
        assert!(caps["os"].is_string());
    }

    #[test]
    fn test_sample_stays_in_range() {
        let metrics = SystemSampler::new().sample();
        for value in [metrics.cpu, metrics.memory, metrics.disk].into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value), "out of range: {value}");
        }
    }

    #[tokio::test]
    async fn test_peer_info_describes_this_machine() {
        let info = local("gaming-rig").peer_info().await;
        assert_eq!(info.name.as_deref(), Some("The Originals - gaming-rig"));
        assert_eq!(info.hostname.as_deref(), Some("gaming-rig"));
        assert_eq!(info.version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
        assert_eq!(info.running_servers, Some(0));
        assert!(info.capabilities.unwrap()["cpu_cores"].is_u64());
    }

    #[tokio::test]
    async fn test_capabilities_sampled_off_runtime() {
        let caps = local("gaming-rig").capabilities().await;
        assert!(caps.is_object());
        assert!(caps["os"].is_string());
    }
}
