//! The node registry service.
//!
//! [`NodeRegistry`] is the single entry point for reading and mutating node records. It validates
//! input, clamps resource gauges, delegates storage to a [`NodeStore`] and publishes a
//! [`NodeEvent`] for every successful mutation.

use crate::db::errors::DbError;
use crate::db::handlers::NodeStore;
use crate::db::models::nodes::{
    NodeCreateDBRequest, NodeDBResponse, NodeFilter, NodeStatus, NodeUpdateDBRequest, NodeUpsertDBRequest,
};
use crate::errors::{Error, Result};
use crate::nodes::notifier::{ChangeNotifier, NodeEvent};
use crate::types::{NodeId, abbrev_uuid};
use chrono::Utc;
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_MAX_SERVERS: u32 = 5;

const NAME_MIN_LEN: usize = 3;
const NAME_MAX_LEN: usize = 100;
const HOSTNAME_MAX_LEN: usize = 255;

/// Whether `name` is acceptable as a node display name.
///
/// Names are 3 to 100 characters of letters, digits, whitespace, `-`, `_`, `.`, `(` and `)`.
pub fn is_valid_node_name(name: &str) -> bool {
    let len = name.chars().count();
    (NAME_MIN_LEN..=NAME_MAX_LEN).contains(&len)
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '_' | '.' | '(' | ')'))
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if !is_valid_node_name(name) {
        return Err(Error::BadRequest {
            message: format!(
                "Invalid node name '{name}': must be {NAME_MIN_LEN}-{NAME_MAX_LEN} characters of letters, numbers, spaces, hyphens, underscores, dots and parentheses"
            ),
        });
    }
    Ok(name.to_string())
}

fn validate_hostname(hostname: &str) -> Result<String> {
    let hostname = hostname.trim();
    if hostname.is_empty() || hostname.len() > HOSTNAME_MAX_LEN {
        return Err(Error::BadRequest {
            message: format!("Invalid hostname: must be 1-{HOSTNAME_MAX_LEN} characters"),
        });
    }
    Ok(hostname.to_string())
}

fn validate_address(ip: IpAddr, port: u16) -> Result<()> {
    if ip.is_unspecified() || ip.is_multicast() {
        return Err(Error::BadRequest {
            message: format!("Invalid IP address {ip}"),
        });
    }
    if port == 0 {
        return Err(Error::BadRequest {
            message: "Invalid port: must be between 1 and 65535".to_string(),
        });
    }
    Ok(())
}

/// Clamp a gauge into [0, 100]. NaN readings are discarded.
fn clamp_percent(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan()).map(|v| v.clamp(0.0, 100.0))
}

/// Attributes supplied when registering a node by address
#[derive(Debug, Clone, Default)]
pub struct NodeAttributes {
    /// Display name; defaults to `Node-{ip}` for new records
    pub name: Option<String>,
    /// Defaults to the IP for new records
    pub hostname: Option<String>,
    /// Opaque capability object; defaults to `{}` for new records
    pub capabilities: Option<serde_json::Value>,
    pub is_master: bool,
}

/// Operator request to register a node by hand
#[derive(Debug, Clone)]
pub struct ManualNode {
    pub name: String,
    pub ip_address: IpAddr,
    pub port: u16,
}

/// Operator edits to an existing node
#[derive(Debug, Clone, Default)]
pub struct NodeEdit {
    pub name: Option<String>,
    pub is_enabled: Option<bool>,
    pub max_servers: Option<u32>,
    pub ssh_port: Option<u16>,
    pub ssh_username: Option<Option<String>>,
}

/// Resource gauge readings in percent. Absent readings leave the stored gauge untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceMetrics {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<f64>,
}

/// Shared registry of known nodes.
///
/// Cheap to clone; clones share the same store and notifier.
#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<dyn NodeStore>,
    notifier: ChangeNotifier,
    default_max_servers: u32,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("default_max_servers", &self.default_max_servers)
            .finish_non_exhaustive()
    }
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn NodeStore>, notifier: ChangeNotifier) -> Self {
        Self {
            store,
            notifier,
            default_max_servers: DEFAULT_MAX_SERVERS,
        }
    }

    /// Capacity given to nodes the registry creates
    pub fn with_default_max_servers(mut self, max_servers: u32) -> Self {
        self.default_max_servers = max_servers;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.notifier.subscribe()
    }

    fn emit(&self, node: &NodeDBResponse) {
        self.notifier.publish(NodeEvent::Updated(node.clone()));
    }

    fn not_found(id: NodeId) -> Error {
        Error::NotFound {
            resource: "Node".to_string(),
            id: id.to_string(),
        }
    }

    async fn apply(&self, id: NodeId, request: &NodeUpdateDBRequest) -> Result<NodeDBResponse> {
        let node = self.store.update(id, request).await.map_err(|e| match e {
            DbError::NotFound => Self::not_found(id),
            other => other.into(),
        })?;
        self.emit(&node);
        Ok(node)
    }

    /// Create or merge a node keyed by `(ip, port)`.
    ///
    /// New records start in `connecting`. For existing records the supplied attributes replace
    /// the stored ones and the ID is kept.
    #[instrument(skip(self, attrs), err)]
    pub async fn upsert(&self, ip: IpAddr, port: u16, attrs: NodeAttributes) -> Result<NodeDBResponse> {
        validate_address(ip, port)?;
        let name = attrs.name.as_deref().map(validate_name).transpose()?;
        let hostname = attrs.hostname.as_deref().map(validate_hostname).transpose()?;

        let request = NodeCreateDBRequest {
            name: name.clone().unwrap_or_else(|| format!("Node-{ip}")),
            hostname: hostname.clone().unwrap_or_else(|| ip.to_string()),
            ip_address: ip,
            port,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_username: None,
            status: NodeStatus::Connecting,
            capabilities: attrs.capabilities.clone().unwrap_or_else(|| json!({})),
            is_master: attrs.is_master,
            max_servers: self.default_max_servers,
        };
        let merge = NodeUpsertDBRequest {
            name,
            hostname,
            capabilities: attrs.capabilities,
            is_master: Some(attrs.is_master),
        };

        let (node, created) = self.store.upsert(&request, &merge).await?;
        if created {
            info!(node_id = %abbrev_uuid(&node.id), name = %node.name, "Registered new node");
        }
        self.emit(&node);
        Ok(node)
    }

    /// Register a node by hand. It starts `offline` until discovery reaches it.
    #[instrument(skip(self, manual), fields(ip = %manual.ip_address, port = manual.port), err)]
    pub async fn create(&self, manual: ManualNode) -> Result<NodeDBResponse> {
        validate_address(manual.ip_address, manual.port)?;
        let name = validate_name(&manual.name)?;

        let request = NodeCreateDBRequest {
            hostname: name.clone(),
            name,
            ip_address: manual.ip_address,
            port: manual.port,
            ssh_port: DEFAULT_SSH_PORT,
            ssh_username: None,
            status: NodeStatus::Offline,
            capabilities: json!({
                "cpu_cores": "N/A",
                "ram_gb": "N/A",
                "disk_gb": "N/A",
                "os": "Unknown",
            }),
            is_master: false,
            max_servers: self.default_max_servers,
        };

        let node = self.store.create(&request).await?;
        info!(node_id = %abbrev_uuid(&node.id), name = %node.name, "Node added manually");
        self.emit(&node);
        Ok(node)
    }

    pub async fn get(&self, id: NodeId) -> Result<NodeDBResponse> {
        self.store.get_by_id(id).await?.ok_or_else(|| Self::not_found(id))
    }

    pub async fn list(&self, filter: &NodeFilter) -> Result<Vec<NodeDBResponse>> {
        Ok(self.store.list(filter).await?)
    }

    /// Nodes that can accept a new game server right now
    pub async fn available(&self) -> Result<Vec<NodeDBResponse>> {
        let filter = NodeFilter {
            status: Some(NodeStatus::Online),
            is_enabled: Some(true),
            ..Default::default()
        };
        Ok(self
            .list(&filter)
            .await?
            .into_iter()
            .filter(NodeDBResponse::is_available_for_deployment)
            .collect())
    }

    /// Delete a node. The master record cannot be removed.
    #[instrument(skip(self), fields(node_id = %abbrev_uuid(&id)), err)]
    pub async fn remove(&self, id: NodeId) -> Result<()> {
        if !self.store.delete(id).await? {
            return Err(Self::not_found(id));
        }
        info!(node_id = %abbrev_uuid(&id), "Node removed");
        self.notifier.publish(NodeEvent::Removed(id));
        Ok(())
    }

    /// Apply operator edits
    #[instrument(skip(self, edit), fields(node_id = %abbrev_uuid(&id)), err)]
    pub async fn update(&self, id: NodeId, edit: NodeEdit) -> Result<NodeDBResponse> {
        let name = edit.name.as_deref().map(validate_name).transpose()?;
        if edit.ssh_port == Some(0) {
            return Err(Error::BadRequest {
                message: "Invalid SSH port: must be between 1 and 65535".to_string(),
            });
        }
        let ssh_username = edit
            .ssh_username
            .map(|username| username.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()));

        let request = NodeUpdateDBRequest {
            name,
            is_enabled: edit.is_enabled,
            max_servers: edit.max_servers,
            ssh_port: edit.ssh_port,
            ssh_username,
            ..Default::default()
        };
        self.apply(id, &request).await
    }

    /// Record a status transition. `online` stamps `last_seen`; `heartbeat` stamps `last_heartbeat`.
    #[instrument(skip(self), fields(node_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_status(&self, id: NodeId, status: NodeStatus, heartbeat: bool) -> Result<NodeDBResponse> {
        let now = Utc::now();
        let request = NodeUpdateDBRequest {
            status: Some(status),
            last_seen: (status == NodeStatus::Online).then_some(now),
            last_heartbeat: heartbeat.then_some(now),
            ..Default::default()
        };
        self.apply(id, &request).await
    }

    /// Store resource gauges, clamped to [0, 100]
    #[instrument(skip(self), fields(node_id = %abbrev_uuid(&id)), err)]
    pub async fn set_resource_metrics(&self, id: NodeId, metrics: ResourceMetrics) -> Result<NodeDBResponse> {
        let request = NodeUpdateDBRequest {
            current_load: clamp_percent(metrics.cpu),
            memory_usage: clamp_percent(metrics.memory),
            disk_usage: clamp_percent(metrics.disk),
            ..Default::default()
        };
        self.apply(id, &request).await
    }

    /// Record how many game servers are running on a node
    pub async fn set_running_servers(&self, id: NodeId, running: u32) -> Result<NodeDBResponse> {
        let request = NodeUpdateDBRequest {
            running_servers: Some(running),
            ..Default::default()
        };
        self.apply(id, &request).await
    }

    /// Clear the master flag on every record except `keep`
    pub async fn demote_other_masters(&self, keep: NodeId) -> Result<Vec<NodeDBResponse>> {
        let filter = NodeFilter {
            is_master: Some(true),
            ..Default::default()
        };
        let mut demoted = Vec::new();
        for node in self.list(&filter).await? {
            if node.id == keep {
                continue;
            }
            info!(node_id = %abbrev_uuid(&node.id), name = %node.name, "Demoting stale master record");
            let request = NodeUpdateDBRequest {
                is_master: Some(false),
                ..Default::default()
            };
            demoted.push(self.apply(node.id, &request).await?);
        }
        Ok(demoted)
    }

    /// Mark non-master `online` nodes that have not been seen for `older_than` as `offline`.
    pub async fn mark_stale_offline(&self, older_than: Duration) -> Result<Vec<NodeDBResponse>> {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };
        let filter = NodeFilter {
            status: Some(NodeStatus::Online),
            is_master: Some(false),
            ..Default::default()
        };

        let mut marked = Vec::new();
        for node in self.list(&filter).await? {
            if node.last_seen.is_some_and(|seen| seen >= cutoff) {
                continue;
            }
            debug!(node_id = %abbrev_uuid(&node.id), last_seen = ?node.last_seen, "Node went stale");
            marked.push(self.mark_status(node.id, NodeStatus::Offline, false).await?);
        }
        Ok(marked)
    }
}
