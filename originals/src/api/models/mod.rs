//! API request and response data models.
//!
//! API models are distinct from the store models in [`crate::db::models`], so the wire format
//! can carry derived fields (availability, connection string, usage percentages) that are never
//! stored.
//!
//! - [`nodes`]: Node views, manual add and edit payloads, list filters
//! - [`users`]: Roles, their capability table and the authenticated caller

pub mod nodes;
pub mod users;
