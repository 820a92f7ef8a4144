//! Authentication and authorization.
//!
//! The dashboard sits behind a reverse proxy that handles login. The proxy forwards the
//! authenticated username and role in trusted headers (`x-originals-user` and
//! `x-originals-role` by default, see
//! [`ProxyHeaderAuthConfig`](crate::config::ProxyHeaderAuthConfig)).
//!
//! # Authorization
//!
//! Each role maps to a fixed set of capabilities
//! ([`Role::capabilities`](crate::api::models::users::Role::capabilities)). Privileged handlers
//! check the caller's role through [`permissions::RequiresCapability`]. Peer-facing endpoints
//! (`/api/node/info`, `/api/server/deploy`) are not authenticated.
//!
//! # Modules
//!
//! - [`current_user`]: Extractor for the authenticated caller
//! - [`permissions`]: Capability checks and extractors

pub mod current_user;
pub mod permissions;
