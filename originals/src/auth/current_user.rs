use crate::{
    AppState,
    api::models::users::{CurrentUser, Role},
    config::Config,
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument, trace};

/// Extract user from the trusted proxy headers if present and valid
/// Returns:
/// - None: No user header present
/// - Some(Ok(user)): Valid headers found
/// - Some(Err(error)): User header present but the identity is malformed
#[instrument(skip(parts, config))]
fn try_proxy_header_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    let proxy = &config.auth.proxy_header;
    let username = parts.headers.get(&proxy.header_name)?;

    let username = match username.to_str() {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            return Some(Err(Error::Unauthenticated {
                message: Some("Invalid user header".to_string()),
            }));
        }
    };

    let role = match parts.headers.get(&proxy.role_header_name) {
        None => proxy.default_role,
        Some(value) => match value.to_str().ok().map(str::parse::<Role>) {
            Some(Ok(role)) => role,
            _ => {
                return Some(Err(Error::Unauthenticated {
                    message: Some("Invalid role header".to_string()),
                }));
            }
        },
    };

    Some(Ok(CurrentUser { username, role }))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match try_proxy_header_auth(parts, &state.config) {
            Some(Ok(user)) => {
                debug!("Found proxy header authenticated user: {}", user.username);
                Ok(user)
            }
            Some(Err(e)) => {
                trace!("Proxy header authentication failed: {:?}", e);
                Err(e)
            }
            None => {
                trace!("No authentication credentials found in request");
                Err(Error::Unauthenticated { message: None })
            }
        }
    }
}
