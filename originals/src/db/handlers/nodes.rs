//! In-memory node store.

use crate::db::errors::{DbError, Result};
use crate::db::handlers::repository::NodeStore;
use crate::db::models::nodes::{NodeCreateDBRequest, NodeDBResponse, NodeFilter, NodeUpdateDBRequest, NodeUpsertDBRequest};
use crate::types::{NodeId, Operation, abbrev_uuid};
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use std::net::SocketAddr;
use tracing::instrument;
use uuid::Uuid;

/// Node store backed by sharded concurrent maps.
///
/// Records are keyed by ID with a secondary index on `(ip, port)`. Writers always lock the
/// address index before the record map, never the other way round.
#[derive(Debug, Default)]
pub struct Nodes {
    nodes: DashMap<NodeId, NodeDBResponse>,
    addresses: DashMap<SocketAddr, NodeId>,
}

impl Nodes {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_new(&self, request: &NodeCreateDBRequest) -> NodeDBResponse {
        let now = Utc::now();
        let node = NodeDBResponse {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            hostname: request.hostname.clone(),
            ip_address: request.ip_address,
            port: request.port,
            ssh_port: request.ssh_port,
            ssh_username: request.ssh_username.clone(),
            status: request.status,
            capabilities: request.capabilities.clone(),
            is_master: request.is_master,
            is_enabled: true,
            current_load: 0.0,
            memory_usage: 0.0,
            disk_usage: 0.0,
            max_servers: request.max_servers,
            running_servers: 0,
            created_at: now,
            updated_at: now,
            last_seen: None,
            last_heartbeat: None,
        };
        self.nodes.insert(node.id, node.clone());
        node
    }
}

fn merge_attrs(node: &mut NodeDBResponse, attrs: &NodeUpsertDBRequest) {
    if let Some(name) = &attrs.name {
        node.name.clone_from(name);
    }
    if let Some(hostname) = &attrs.hostname {
        node.hostname.clone_from(hostname);
    }
    if let Some(capabilities) = &attrs.capabilities {
        node.capabilities.clone_from(capabilities);
    }
    if let Some(is_master) = attrs.is_master {
        node.is_master = is_master;
    }
    node.updated_at = Utc::now();
}

fn apply_update(node: &mut NodeDBResponse, request: &NodeUpdateDBRequest) {
    if let Some(name) = &request.name {
        node.name.clone_from(name);
    }
    if let Some(is_enabled) = request.is_enabled {
        node.is_enabled = is_enabled;
    }
    if let Some(max_servers) = request.max_servers {
        node.max_servers = max_servers;
    }
    if let Some(ssh_port) = request.ssh_port {
        node.ssh_port = ssh_port;
    }
    if let Some(ssh_username) = &request.ssh_username {
        node.ssh_username.clone_from(ssh_username);
    }
    if let Some(status) = request.status {
        node.status = status;
    }
    if let Some(last_seen) = request.last_seen {
        node.last_seen = Some(last_seen);
    }
    if let Some(last_heartbeat) = request.last_heartbeat {
        node.last_heartbeat = Some(last_heartbeat);
    }
    if let Some(load) = request.current_load {
        node.current_load = load;
    }
    if let Some(memory) = request.memory_usage {
        node.memory_usage = memory;
    }
    if let Some(disk) = request.disk_usage {
        node.disk_usage = disk;
    }
    if let Some(running) = request.running_servers {
        node.running_servers = running;
    }
    if let Some(is_master) = request.is_master {
        node.is_master = is_master;
    }
    node.updated_at = Utc::now();
}

#[async_trait::async_trait]
impl NodeStore for Nodes {
    #[instrument(skip(self, request), fields(ip = %request.ip_address, port = request.port), err)]
    async fn create(&self, request: &NodeCreateDBRequest) -> Result<NodeDBResponse> {
        let address = SocketAddr::new(request.ip_address, request.port);
        match self.addresses.entry(address) {
            Entry::Occupied(_) => Err(DbError::UniqueViolation {
                constraint: Some("nodes_ip_address_port_key".to_string()),
                table: Some("nodes".to_string()),
                message: format!("a node is already registered at {address}"),
                conflicting_value: Some(address.to_string()),
            }),
            Entry::Vacant(entry) => {
                let node = self.insert_new(request);
                entry.insert(node.id);
                Ok(node)
            }
        }
    }

    #[instrument(skip(self, request, attrs), fields(ip = %request.ip_address, port = request.port), err)]
    async fn upsert(&self, request: &NodeCreateDBRequest, attrs: &NodeUpsertDBRequest) -> Result<(NodeDBResponse, bool)> {
        let address = SocketAddr::new(request.ip_address, request.port);
        match self.addresses.entry(address) {
            Entry::Occupied(mut entry) => {
                if let Some(mut node) = self.nodes.get_mut(entry.get()) {
                    merge_attrs(&mut node, attrs);
                    return Ok((node.clone(), false));
                }
                // The record was deleted between index lookup and merge
                let node = self.insert_new(request);
                entry.insert(node.id);
                Ok((node, true))
            }
            Entry::Vacant(entry) => {
                let node = self.insert_new(request);
                entry.insert(node.id);
                Ok((node, true))
            }
        }
    }

    async fn get_by_id(&self, id: NodeId) -> Result<Option<NodeDBResponse>> {
        Ok(self.nodes.get(&id).map(|node| node.clone()))
    }

    async fn list(&self, filter: &NodeFilter) -> Result<Vec<NodeDBResponse>> {
        let mut nodes: Vec<NodeDBResponse> = self
            .nodes
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(nodes)
    }

    #[instrument(skip(self), fields(node_id = %abbrev_uuid(&id)), err)]
    async fn delete(&self, id: NodeId) -> Result<bool> {
        // The master check runs under the shard lock so a concurrent promotion cannot slip past it
        match self.nodes.remove_if(&id, |_, node| !node.is_master) {
            Some((_, removed)) => {
                self.addresses.remove_if(&removed.address(), |_, indexed| *indexed == id);
                Ok(true)
            }
            None if self.nodes.contains_key(&id) => Err(DbError::ProtectedEntity {
                operation: Operation::Delete,
                reason: "cannot remove master node".to_string(),
                entity_type: "node".to_string(),
                entity_id: Some(id.to_string()),
            }),
            None => Ok(false),
        }
    }

    #[instrument(skip(self, request), fields(node_id = %abbrev_uuid(&id)), err)]
    async fn update(&self, id: NodeId, request: &NodeUpdateDBRequest) -> Result<NodeDBResponse> {
        let mut node = self.nodes.get_mut(&id).ok_or(DbError::NotFound)?;
        apply_update(&mut node, request);
        Ok(node.clone())
    }
}
