use crate::types::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use utoipa::ToSchema;

/// Load above this percentage makes a node unavailable for new deployments
pub const MAX_DEPLOY_LOAD: f64 = 80.0;
/// Memory usage above this percentage makes a node unavailable for new deployments
pub const MAX_DEPLOY_MEMORY: f64 = 85.0;

/// Reachability of a node as last observed by discovery or an operator action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Connecting,
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Connecting => "connecting",
            NodeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Store request for inserting a node at a fresh address
#[derive(Debug, Clone)]
pub struct NodeCreateDBRequest {
    pub name: String,
    pub hostname: String,
    pub ip_address: IpAddr,
    pub port: u16,
    pub ssh_port: u16,
    pub ssh_username: Option<String>,
    pub status: NodeStatus,
    pub capabilities: serde_json::Value,
    pub is_master: bool,
    pub max_servers: u32,
}

/// Attributes merged into an existing record by an address upsert
#[derive(Debug, Clone, Default)]
pub struct NodeUpsertDBRequest {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub capabilities: Option<serde_json::Value>,
    pub is_master: Option<bool>,
}

/// Store request for mutating a node by ID. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdateDBRequest {
    pub name: Option<String>,
    pub is_enabled: Option<bool>,
    pub max_servers: Option<u32>,
    pub ssh_port: Option<u16>,
    pub ssh_username: Option<Option<String>>,
    pub status: Option<NodeStatus>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub current_load: Option<f64>,
    pub memory_usage: Option<f64>,
    pub disk_usage: Option<f64>,
    pub running_servers: Option<u32>,
    pub is_master: Option<bool>,
}

/// Filter for listing nodes
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub status: Option<NodeStatus>,
    pub is_enabled: Option<bool>,
    pub is_master: Option<bool>,
}

impl NodeFilter {
    pub fn matches(&self, node: &NodeDBResponse) -> bool {
        self.status.is_none_or(|s| node.status == s)
            && self.is_enabled.is_none_or(|e| node.is_enabled == e)
            && self.is_master.is_none_or(|m| node.is_master == m)
    }
}

/// Stored node record
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDBResponse {
    pub id: NodeId,
    pub name: String,
    pub hostname: String,
    pub ip_address: IpAddr,
    pub port: u16,
    pub ssh_port: u16,
    pub ssh_username: Option<String>,
    pub status: NodeStatus,
    pub capabilities: serde_json::Value,
    pub is_master: bool,
    pub is_enabled: bool,
    pub current_load: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub max_servers: u32,
    pub running_servers: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl NodeDBResponse {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }

    /// Base URL of the node's control API, e.g. `http://192.168.1.20:3000`
    pub fn connection_string(&self) -> String {
        format!("http://{}", self.address())
    }

    /// Whether new game servers may be placed on this node.
    pub fn is_available_for_deployment(&self) -> bool {
        self.is_enabled
            && self.status == NodeStatus::Online
            && self.running_servers < self.max_servers
            && self.current_load <= MAX_DEPLOY_LOAD
            && self.memory_usage <= MAX_DEPLOY_MEMORY
    }
}
