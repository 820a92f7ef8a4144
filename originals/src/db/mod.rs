//! Storage layer for node records.
//!
//! Persistent relational storage is an external collaborator; this module defines the storage
//! interface the registry depends on and an in-memory implementation of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Registry   │  (nodes::registry - validation, clamping, change events)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │    Store    │  (db::handlers - NodeStore trait and implementations)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - stored records)
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: The [`NodeStore`](handlers::NodeStore) trait and the in-memory [`Nodes`](handlers::Nodes) store
//! - [`models`]: Stored record structures and store requests
//! - [`errors`]: Store-specific error types

pub mod errors;
pub mod handlers;
pub mod models;
