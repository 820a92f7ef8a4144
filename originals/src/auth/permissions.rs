//! Capability checks for privileged operations.
//!
//! Handlers declare the capability they need with the [`RequiresCapability`] extractor, which
//! authenticates the caller and checks their role against the fixed capability table:
//!
//! ```ignore
//! async fn delete_node(
//!     _: RequiresCapability<capability::NodeManagement>,
//!     Path(id): Path<NodeId>,
//! ) -> Result<StatusCode> { /* ... */ }
//! ```

use crate::{
    AppState,
    api::models::users::CurrentUser,
    errors::{Error, Result},
    types::Capability,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use std::marker::PhantomData;

/// Type-level capability markers
pub mod capability {
    use crate::types::Capability;

    pub trait CapabilityMarker: Send + Sync + 'static {
        const CAPABILITY: Capability;
    }

    macro_rules! marker {
        ($($name:ident),* $(,)?) => {
            $(
                pub struct $name;
                impl CapabilityMarker for $name {
                    const CAPABILITY: Capability = Capability::$name;
                }
            )*
        };
    }

    marker!(ServerControl, NodeManagement);
}

/// Check a caller's role for a capability
pub fn require(user: &CurrentUser, required: Capability, action: &str) -> Result<()> {
    if user.has_capability(required) {
        Ok(())
    } else {
        Err(Error::InsufficientPermissions {
            required,
            action: action.to_string(),
        })
    }
}

/// Extractor yielding the authenticated caller once their role holds capability `C`
pub struct RequiresCapability<C: capability::CapabilityMarker> {
    pub user: CurrentUser,
    _capability: PhantomData<C>,
}

impl<C: capability::CapabilityMarker> FromRequestParts<AppState> for RequiresCapability<C> {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        require(&user, C::CAPABILITY, &format!("{} {}", parts.method, parts.uri.path()))?;
        Ok(Self {
            user,
            _capability: PhantomData,
        })
    }
}
