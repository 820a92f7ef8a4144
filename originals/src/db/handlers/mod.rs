//! Store implementations for node records.
//!
//! # Design Pattern
//!
//! Each store:
//! - Implements the [`NodeStore`] trait
//! - Performs per-key read-modify-write atomically
//! - Returns records from [`crate::db::models`]
//!
//! # Available Stores
//!
//! - [`Nodes`]: In-memory store used by a standalone master

pub mod nodes;
pub mod repository;

pub use nodes::Nodes;
pub use repository::NodeStore;
