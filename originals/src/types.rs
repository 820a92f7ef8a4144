//! Common type definitions and the capability system.
//!
//! This module defines:
//! - Type aliases for entity IDs
//! - The [`Capability`] set that gates privileged operations
//! - The [`Operation`] enum used when describing rejected mutations
//!
//! # Capability System
//!
//! Every authenticated caller carries exactly one [`Role`](crate::api::models::users::Role).
//! Roles map to a fixed capability table (see
//! [`Role::capabilities`](crate::api::models::users::Role::capabilities)), and handlers declare
//! the capability they need through the
//! [`RequiresCapability`](crate::auth::permissions::RequiresCapability) extractor:
//!
//! ```ignore
//! use originals::auth::permissions::{capability, RequiresCapability};
//!
//! async fn list_nodes(_: RequiresCapability<capability::NodeManagement>) { /* ... */ }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

pub type NodeId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Mutations that can be rejected by a protection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Privileged actions a role may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ServerControl,
    ServerView,
    UserManagement,
    NodeManagement,
    ConfigEdit,
    SystemAdmin,
    ViewLogs,
    ManageUpdates,
    ProfileEdit,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::ServerControl => "server_control",
            Capability::ServerView => "server_view",
            Capability::UserManagement => "user_management",
            Capability::NodeManagement => "node_management",
            Capability::ConfigEdit => "config_edit",
            Capability::SystemAdmin => "system_admin",
            Capability::ViewLogs => "view_logs",
            Capability::ManageUpdates => "manage_updates",
            Capability::ProfileEdit => "profile_edit",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_capability_display_matches_serde() {
        let json = serde_json::to_string(&Capability::NodeManagement).unwrap();
        assert_eq!(json, format!("\"{}\"", Capability::NodeManagement));
    }
}
