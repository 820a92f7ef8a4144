//! OpenAPI documentation for the node control API.
//!
//! The document is served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api;
use crate::discovery::prober;
use crate::nodes::{deploy, notifier};

/// Security scheme for the operator surface: identity forwarded by the trusted front proxy.
struct ProxyHeaderSecurityAddon;

impl Modify for ProxyHeaderSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Originals-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-originals-user",
                    "Username set by the authenticating reverse proxy. The caller's role is read from \
                     `x-originals-role` (`admin`, `moderator` or `user`).",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "The Originals node control API"),
    modifiers(&ProxyHeaderSecurityAddon),
    paths(
        api::handlers::nodes::list_nodes,
        api::handlers::nodes::list_available_nodes,
        api::handlers::nodes::get_node,
        api::handlers::nodes::create_node,
        api::handlers::nodes::update_node,
        api::handlers::nodes::delete_node,
        api::handlers::nodes::deploy_node,
        api::handlers::events::node_events,
        api::handlers::peer::node_info,
        api::handlers::peer::accept_deploy,
    ),
    components(
        schemas(
            api::models::nodes::NodeResponse,
            api::models::nodes::NodeCreate,
            api::models::nodes::NodeUpdate,
            api::models::nodes::NodeRemoved,
            api::models::nodes::ResourceUsage,
            api::models::nodes::ListNodesQuery,
            api::models::users::Role,
            crate::db::models::nodes::NodeStatus,
            crate::types::Capability,
            deploy::DeployOutcome,
            notifier::NodeEventType,
            prober::PeerInfo,
            prober::PeerResourceUsage,
        )
    ),
    tags(
        (name = "nodes", description = "Node registry: discovered, self-registered and manually added nodes."),
        (name = "peer", description = "Endpoints other nodes call on this machine. No user identity is required."),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_node_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/nodes",
            "/api/nodes/available",
            "/api/nodes/{id}",
            "/api/nodes/{id}/deploy",
            "/api/nodes/events",
            "/api/node/info",
            "/api/server/deploy",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("X-Originals-User"));
    }
}
