//! LAN discovery of other nodes.
//!
//! - [`scanner`]: TCP-connect scan of the local /24
//! - [`prober`]: HTTP classification of open candidates as peers
//! - [`local`]: this machine's address, hardware capabilities and resource usage
//! - [`scheduler`]: [`DiscoveryLoop`], the periodic reconcile loop tying the above to the registry

pub mod local;
pub mod prober;
pub mod scanner;
pub mod scheduler;

pub use local::LocalNode;
pub use prober::{HttpProber, PeerInfo, Prober};
pub use scanner::{HostScanner, TcpConnectScanner};
pub use scheduler::DiscoveryLoop;
