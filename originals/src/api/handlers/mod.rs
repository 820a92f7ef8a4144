//! HTTP request handlers.
//!
//! # Handler Modules
//!
//! - [`nodes`]: Node listing, manual add, edits, removal and deployment
//! - [`events`]: Server-Sent Events stream of node changes
//! - [`peer`]: Endpoints other nodes call on this machine (`/api/node/info`, `/api/server/deploy`)
//!
//! # Authentication
//!
//! Operator handlers take a [`RequiresCapability`](crate::auth::permissions::RequiresCapability)
//! extractor, which reads the caller from the trusted proxy headers and checks their role. Peer
//! handlers are unauthenticated.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the matching HTTP status and a
//! JSON `{"error": ...}` body.

pub mod events;
pub mod nodes;
pub mod peer;
