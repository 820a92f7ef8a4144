//! Peer classification over HTTP.
//!
//! A candidate `ip:port` is a peer if `GET /api/node/info` answers 200 with a JSON object. Any
//! other outcome (refused, timed out, non-200, non-JSON) classifies it as "not a peer". Probes
//! never retry and never return errors.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, instrument};
use utoipa::ToSchema;

pub const NODE_INFO_PATH: &str = "/api/node/info";

/// Resource gauges a peer reports about itself, in percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PeerResourceUsage {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<f64>,
    #[serde(default)]
    pub disk: Option<f64>,
}

/// Self-description served by every node at `GET /api/node/info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PeerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Opaque capability object (`cpu_cores`, `ram_gb`, `disk_gb`, `os`)
    #[serde(default)]
    #[schema(value_type = Object)]
    pub capabilities: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_usage: Option<PeerResourceUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_servers: Option<u32>,
}

/// Classifies a single candidate address.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns the peer's self-description, or `None` if the address is not a peer.
    async fn probe(&self, ip: IpAddr, port: u16) -> Option<PeerInfo>;
}

/// Probes peers with one HTTP GET each.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

/// Decode a probe response body. Any JSON object counts as a peer; fields with an unexpected
/// type are dropped rather than rejecting the peer.
fn parse_peer_info(body: &str) -> Option<PeerInfo> {
    let serde_json::Value::Object(mut fields) = serde_json::from_str::<serde_json::Value>(body).ok()? else {
        return None;
    };

    let mut string_field = |key: &str| match fields.remove(key) {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    };
    let name = string_field("name");
    let hostname = string_field("hostname");
    let version = string_field("version");

    let resource_usage = match fields.remove("resource_usage") {
        Some(serde_json::Value::Object(usage)) => Some(PeerResourceUsage {
            cpu: usage.get("cpu").and_then(serde_json::Value::as_f64),
            memory: usage.get("memory").and_then(serde_json::Value::as_f64),
            disk: usage.get("disk").and_then(serde_json::Value::as_f64),
        }),
        _ => None,
    };

    Some(PeerInfo {
        name,
        hostname,
        version,
        capabilities: fields.remove("capabilities"),
        resource_usage,
        running_servers: fields
            .remove("running_servers")
            .and_then(|v| serde_json::from_value(v).ok()),
    })
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip(self), level = "debug")]
    async fn probe(&self, ip: IpAddr, port: u16) -> Option<PeerInfo> {
        let url = format!("http://{}{NODE_INFO_PATH}", SocketAddr::new(ip, port));

        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Probe failed");
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            debug!(status = response.status().as_u16(), "Probe answered with non-200 status");
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "Failed to read probe response body");
                return None;
            }
        };

        let info = parse_peer_info(&body);
        if info.is_none() {
            debug!("Probe response is not a node info object");
        }
        info
    }
}
