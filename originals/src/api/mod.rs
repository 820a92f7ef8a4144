//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Nodes** (`/api/nodes/*`): Operator view and management of the node registry
//! - **Events** (`/api/nodes/events`): Live node changes over Server-Sent Events
//! - **Peer** (`/api/node/info`, `/api/server/deploy`): Calls made by other nodes
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The rendered docs are served at `/docs`.

pub mod handlers;
pub mod models;
