//! Node bookkeeping: the registry, its change notifier and deployment to nodes.
//!
//! - [`registry`]: [`NodeRegistry`], validated and event-emitting access to node records
//! - [`notifier`]: [`ChangeNotifier`], best-effort broadcast of node changes
//! - [`deploy`]: Outbound deploy client and the inbound [`ServerLauncher`](deploy::ServerLauncher) seam

pub mod deploy;
pub mod notifier;
pub mod registry;

pub use notifier::{ChangeNotifier, NodeEvent};
pub use registry::NodeRegistry;
