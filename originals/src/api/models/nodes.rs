//! API request/response models for nodes.

use crate::db::models::nodes::{NodeDBResponse, NodeFilter, NodeStatus};
use crate::nodes::registry::{ManualNode, NodeEdit};
use crate::types::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::IpAddr;
use utoipa::{IntoParams, ToSchema};

fn default_port() -> u16 {
    3000
}

/// Distinguishes an absent field from an explicit `null`
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Query parameters for listing nodes
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListNodesQuery {
    /// Only nodes with this status
    pub status: Option<NodeStatus>,
    /// Only enabled (`true`) or disabled (`false`) nodes
    pub enabled: Option<bool>,
}

impl From<ListNodesQuery> for NodeFilter {
    fn from(query: ListNodesQuery) -> Self {
        NodeFilter {
            status: query.status,
            is_enabled: query.enabled,
            is_master: None,
        }
    }
}

/// Request body for adding a node by hand
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeCreate {
    /// Display name
    #[schema(example = "Friend-PC")]
    pub name: String,
    #[schema(value_type = String, example = "192.168.1.50")]
    pub ip_address: IpAddr,
    /// Control-API port of the node
    #[serde(default = "default_port")]
    #[schema(example = 3000)]
    pub port: u16,
}

impl From<NodeCreate> for ManualNode {
    fn from(create: NodeCreate) -> Self {
        ManualNode {
            name: create.name,
            ip_address: create.ip_address,
            port: create.port,
        }
    }
}

/// Request body for editing a node. Omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub is_enabled: Option<bool>,
    pub max_servers: Option<u32>,
    pub ssh_port: Option<u16>,
    /// `null` clears the stored username
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub ssh_username: Option<Option<String>>,
}

impl From<NodeUpdate> for NodeEdit {
    fn from(update: NodeUpdate) -> Self {
        NodeEdit {
            name: update.name,
            is_enabled: update.is_enabled,
            max_servers: update.max_servers,
            ssh_port: update.ssh_port,
            ssh_username: update.ssh_username,
        }
    }
}

/// Current gauges of a node, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResourceUsage {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    /// Running game servers as a share of `max_servers`
    pub servers: f64,
}

/// Node as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NodeResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: NodeId,
    pub name: String,
    pub hostname: String,
    #[schema(value_type = String)]
    pub ip_address: IpAddr,
    pub port: u16,
    pub ssh_port: u16,
    pub ssh_username: Option<String>,
    pub status: NodeStatus,
    /// Hardware description reported by the node (`cpu_cores`, `ram_gb`, `disk_gb`, `os`)
    #[schema(value_type = Object)]
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
    /// Whether the node can accept a new game server right now
    pub is_available: bool,
    /// Base URL of the node's control API
    #[schema(example = "http://192.168.1.50:3000")]
    pub connection_string: String,
    pub resource_usage: ResourceUsage,
}

impl From<NodeDBResponse> for NodeResponse {
    fn from(db: NodeDBResponse) -> Self {
        let is_available = db.is_available_for_deployment();
        let connection_string = db.connection_string();
        let servers = if db.max_servers == 0 {
            0.0
        } else {
            f64::from(db.running_servers) / f64::from(db.max_servers) * 100.0
        };
        let resource_usage = ResourceUsage {
            cpu: db.current_load,
            memory: db.memory_usage,
            disk: db.disk_usage,
            servers,
        };

        Self {
            id: db.id,
            name: db.name,
            hostname: db.hostname,
            ip_address: db.ip_address,
            port: db.port,
            ssh_port: db.ssh_port,
            ssh_username: db.ssh_username,
            status: db.status,
            capabilities: db.capabilities,
            is_master: db.is_master,
            is_enabled: db.is_enabled,
            current_load: db.current_load,
            memory_usage: db.memory_usage,
            disk_usage: db.disk_usage,
            max_servers: db.max_servers,
            running_servers: db.running_servers,
            created_at: db.created_at,
            updated_at: db.updated_at,
            last_seen: db.last_seen,
            last_heartbeat: db.last_heartbeat,
            is_available,
            connection_string,
            resource_usage,
        }
    }
}

/// Payload of a `node_removed` event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeRemoved {
    #[schema(value_type = String, format = "uuid")]
    pub id: NodeId,
}
