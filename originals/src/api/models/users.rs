//! API data models for callers and roles.

use crate::types::Capability;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

// Role enum for different job functions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    User,
}

impl Role {
    /// Fixed capability table for each role.
    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Admin => &[
                ServerControl,
                UserManagement,
                NodeManagement,
                ConfigEdit,
                SystemAdmin,
                ViewLogs,
                ManageUpdates,
            ],
            Role::Moderator => &[ServerControl, ConfigEdit, NodeManagement, ViewLogs],
            Role::User => &[ServerView, ProfileEdit],
        }
    }

    pub fn has_capability(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "moderator" => Ok(Role::Moderator),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Authenticated caller, as forwarded by the trusted front proxy
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    pub username: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.role.has_capability(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_management_roles() {
        assert!(Role::Admin.has_capability(Capability::NodeManagement));
        assert!(Role::Moderator.has_capability(Capability::NodeManagement));
        assert!(!Role::User.has_capability(Capability::NodeManagement));
    }

    #[test]
    fn test_server_control_roles() {
        assert!(Role::Admin.has_capability(Capability::ServerControl));
        assert!(Role::Moderator.has_capability(Capability::ServerControl));
        assert!(!Role::User.has_capability(Capability::ServerControl));
        assert!(Role::User.has_capability(Capability::ServerView));
    }

    #[test]
    fn test_admin_only_capabilities() {
        for capability in [Capability::UserManagement, Capability::SystemAdmin, Capability::ManageUpdates] {
            assert!(Role::Admin.has_capability(capability));
            assert!(!Role::Moderator.has_capability(capability));
            assert!(!Role::User.has_capability(capability));
        }
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" moderator ".parse::<Role>().unwrap(), Role::Moderator);
        assert!("superuser".parse::<Role>().is_err());
    }
}
