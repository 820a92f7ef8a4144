//! Stored record models.
//!
//! These models are distinct from API models to allow independent evolution of storage and API
//! representations.
//!
//! - [`nodes`]: Node records, store requests and list filters

pub mod nodes;
