//! Storage interface for node records.

use crate::db::errors::Result;
use crate::db::models::nodes::{NodeCreateDBRequest, NodeDBResponse, NodeFilter, NodeUpdateDBRequest, NodeUpsertDBRequest};
use crate::types::NodeId;

/// Contains the NodeStore trait.
///
/// A store is the data access layer for node records. It provides methods for creating, reading,
/// updating, and deleting nodes, as well as listing them with simple filters. Relational
/// persistence lives outside this crate; anything implementing this trait can back the registry.
///
/// Implementations must apply each read-modify-write on a single key atomically. Concurrent
/// writers to the same key are serialized and the last writer wins.
#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    /// Insert a node at an address that must not already be registered
    async fn create(&self, request: &NodeCreateDBRequest) -> Result<NodeDBResponse>;

    /// Insert `request` if nothing is registered at its address, otherwise merge `attrs` into the
    /// existing record. Returns the resulting record and whether it was newly created.
    async fn upsert(&self, request: &NodeCreateDBRequest, attrs: &NodeUpsertDBRequest) -> Result<(NodeDBResponse, bool)>;

    /// Get a node by ID
    async fn get_by_id(&self, id: NodeId) -> Result<Option<NodeDBResponse>>;

    /// List nodes matching the filter, oldest first
    async fn list(&self, filter: &NodeFilter) -> Result<Vec<NodeDBResponse>>;

    /// Delete a node by ID. Master records are protected.
    async fn delete(&self, id: NodeId) -> Result<bool>;

    /// Update a node by ID
    async fn update(&self, id: NodeId, request: &NodeUpdateDBRequest) -> Result<NodeDBResponse>;
}
