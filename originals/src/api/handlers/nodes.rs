use crate::api::models::nodes::{ListNodesQuery, NodeCreate, NodeResponse, NodeUpdate};
use crate::auth::permissions::{RequiresCapability, capability};
use crate::db::models::nodes::NodeFilter;
use crate::errors::Result;
use crate::nodes::deploy::{DeployOutcome, deploy_to_node};
use crate::types::NodeId;
use crate::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

#[utoipa::path(
    get,
    path = "/api/nodes",
    tag = "nodes",
    summary = "List nodes",
    description = "All known nodes, ordered by registration time.",
    params(ListNodesQuery),
    responses(
        (status = 200, description = "List of nodes", body = Vec<NodeResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - node_management required"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<ListNodesQuery>,
    _: RequiresCapability<capability::NodeManagement>,
) -> Result<Json<Vec<NodeResponse>>> {
    let nodes = state.registry.list(&NodeFilter::from(query)).await?;
    Ok(Json(nodes.into_iter().map(NodeResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/nodes/available",
    tag = "nodes",
    summary = "List nodes available for deployment",
    description = "Enabled, online nodes with spare server capacity and load and memory below the deployment thresholds.",
    responses(
        (status = 200, description = "Available nodes", body = Vec<NodeResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - node_management required"),
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_available_nodes(
    State(state): State<AppState>,
    _: RequiresCapability<capability::NodeManagement>,
) -> Result<Json<Vec<NodeResponse>>> {
    let nodes = state.registry.available().await?;
    Ok(Json(nodes.into_iter().map(NodeResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/nodes/{id}",
    tag = "nodes",
    summary = "Get node",
    params(("id" = uuid::Uuid, Path, description = "Node ID")),
    responses(
        (status = 200, description = "Node details", body = NodeResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - node_management required"),
        (status = 404, description = "Node not found"),
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all, fields(node_id = %id))]
pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    _: RequiresCapability<capability::NodeManagement>,
) -> Result<Json<NodeResponse>> {
    Ok(Json(state.registry.get(id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/api/nodes",
    tag = "nodes",
    summary = "Add node",
    description = "Register a node by hand. It stays offline until discovery reaches it.",
    request_body = NodeCreate,
    responses(
        (status = 201, description = "Node added", body = NodeResponse),
        (status = 400, description = "Invalid name or address"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - node_management required"),
        (status = 409, description = "A node with this IP and port already exists"),
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_node(
    State(state): State<AppState>,
    _: RequiresCapability<capability::NodeManagement>,
    Json(create): Json<NodeCreate>,
) -> Result<(StatusCode, Json<NodeResponse>)> {
    let node = state.registry.create(create.into()).await?;
    Ok((StatusCode::CREATED, Json(node.into())))
}

#[utoipa::path(
    patch,
    path = "/api/nodes/{id}",
    tag = "nodes",
    summary = "Update node",
    params(("id" = uuid::Uuid, Path, description = "Node ID")),
    request_body = NodeUpdate,
    responses(
        (status = 200, description = "Node updated", body = NodeResponse),
        (status = 400, description = "Invalid field value"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - node_management required"),
        (status = 404, description = "Node not found"),
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all, fields(node_id = %id))]
pub async fn update_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    _: RequiresCapability<capability::NodeManagement>,
    Json(update): Json<NodeUpdate>,
) -> Result<Json<NodeResponse>> {
    let node = state.registry.update(id, update.into()).await?;
    Ok(Json(node.into()))
}

#[utoipa::path(
    delete,
    path = "/api/nodes/{id}",
    tag = "nodes",
    summary = "Remove node",
    description = "The master node cannot be removed.",
    params(("id" = uuid::Uuid, Path, description = "Node ID")),
    responses(
        (status = 204, description = "Node removed"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - node_management required, or the node is the master"),
        (status = 404, description = "Node not found"),
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all, fields(node_id = %id))]
pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    _: RequiresCapability<capability::NodeManagement>,
) -> Result<StatusCode> {
    state.registry.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/nodes/{id}/deploy",
    tag = "nodes",
    summary = "Deploy a game server to a node",
    description = "Forwards the server configuration to the node's control API. Deploy failures are reported in the body with status 200.",
    params(("id" = uuid::Uuid, Path, description = "Node ID")),
    request_body(content = Object, description = "Server configuration forwarded to the node"),
    responses(
        (status = 200, description = "Deploy attempted", body = DeployOutcome),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - server_control required"),
        (status = 404, description = "Node not found"),
    ),
    security(("X-Originals-User" = []))
)]
#[tracing::instrument(skip_all, fields(node_id = %id))]
pub async fn deploy_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    _: RequiresCapability<capability::ServerControl>,
    Json(server_config): Json<serde_json::Value>,
) -> Result<Json<DeployOutcome>> {
    let outcome = deploy_to_node(&state.registry, &state.deploy_client, id, &server_config).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use crate::api::models::nodes::NodeResponse;
    use crate::api::models::users::Role;
    use crate::db::models::nodes::NodeStatus;
    use crate::nodes::deploy::{DEPLOY_PATH, DeployOutcome};
    use crate::nodes::registry::{ManualNode, NodeAttributes};
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test_log::test(tokio::test)]
    async fn test_list_requires_authentication() {
        let (app, _state) = create_test_app();

        app.get("/api/nodes").await.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[test_log::test(tokio::test)]
    async fn test_list_requires_node_management() {
        let (app, _state) = create_test_app();
        let headers = add_auth_headers("alex", Role::User);

        app.get("/api/nodes")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[test_log::test(tokio::test)]
    async fn test_manual_add_then_list() {
        let (app, _state) = create_test_app();
        let headers = add_auth_headers("steve", Role::Moderator);

        let response = app
            .post("/api/nodes")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({"name": "Friend-PC", "ip_address": "192.168.1.50"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: NodeResponse = response.json();
        assert_eq!(created.status, NodeStatus::Offline);
        assert_eq!(created.port, 3000);
        assert_eq!(created.capabilities["os"], "Unknown");

        let response = app
            .get("/api/nodes")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;
        response.assert_status_ok();
        let nodes: Vec<NodeResponse> = response.json();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, created.id);
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_address_conflicts() {
        let (app, _state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);

        app.post("/api/nodes")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({"name": "Friend-PC", "ip_address": "192.168.1.50", "port": 3001}))
            .await
            .assert_status(StatusCode::CREATED);

        let response = app
            .post("/api/nodes")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({"name": "Other-PC", "ip_address": "192.168.1.50", "port": 3001}))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(
            response.json::<serde_json::Value>()["error"],
            "Node with this IP and port already exists"
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_name_is_bad_request() {
        let (app, _state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);

        app.post("/api/nodes")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({"name": "x", "ip_address": "192.168.1.50"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn test_get_unknown_node_is_not_found() {
        let (app, _state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);

        app.get(&format!("/api/nodes/{}", uuid::Uuid::new_v4()))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_master_cannot_be_deleted() {
        let (app, state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);
        let master = state
            .registry
            .upsert(
                "192.168.1.10".parse().unwrap(),
                3000,
                NodeAttributes {
                    name: Some("gaming-rig (Master)".to_string()),
                    is_master: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let response = app
            .delete(&format!("/api/nodes/{}", master.id))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        assert!(state.registry.get(master.id).await.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_patch_then_delete() {
        let (app, state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);
        let node = state
            .registry
            .upsert("192.168.1.60".parse().unwrap(), 3000, NodeAttributes::default())
            .await
            .unwrap();

        let response = app
            .patch(&format!("/api/nodes/{}", node.id))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({"is_enabled": false, "max_servers": 2}))
            .await;
        response.assert_status_ok();
        let updated: NodeResponse = response.json();
        assert!(!updated.is_enabled);
        assert_eq!(updated.max_servers, 2);

        app.delete(&format!("/api/nodes/{}", node.id))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        assert!(state.registry.get(node.id).await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_available_excludes_connecting_nodes() {
        let (app, state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);
        let online = state
            .registry
            .upsert("192.168.1.61".parse().unwrap(), 3000, NodeAttributes::default())
            .await
            .unwrap();
        state.registry.mark_status(online.id, NodeStatus::Online, true).await.unwrap();
        state
            .registry
            .upsert("192.168.1.62".parse().unwrap(), 3000, NodeAttributes::default())
            .await
            .unwrap();

        let response = app
            .get("/api/nodes/available")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;
        response.assert_status_ok();
        let nodes: Vec<NodeResponse> = response.json();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, online.id);
        assert!(nodes[0].is_available);
    }

    #[test_log::test(tokio::test)]
    async fn test_list_filters_by_status() {
        let (app, state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);
        let online = state
            .registry
            .upsert("192.168.1.63".parse().unwrap(), 3000, NodeAttributes::default())
            .await
            .unwrap();
        state.registry.mark_status(online.id, NodeStatus::Online, true).await.unwrap();
        state
            .registry
            .upsert("192.168.1.64".parse().unwrap(), 3000, NodeAttributes::default())
            .await
            .unwrap();

        let response = app
            .get("/api/nodes?status=online")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;
        response.assert_status_ok();
        let nodes: Vec<NodeResponse> = response.json();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, online.id);
    }

    #[test_log::test(tokio::test)]
    async fn test_deploy_requires_server_control() {
        let (app, state) = create_test_app();
        let headers = add_auth_headers("alex", Role::User);
        let node = state
            .registry
            .upsert("192.168.1.65".parse().unwrap(), 3000, NodeAttributes::default())
            .await
            .unwrap();

        app.post(&format!("/api/nodes/{}/deploy", node.id))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({}))
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[test_log::test(tokio::test)]
    async fn test_deploy_forwards_config_to_node() {
        let peer = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(DEPLOY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Server starting"})))
            .expect(1)
            .mount(&peer)
            .await;

        let (app, state) = create_test_app();
        let headers = add_auth_headers("steve", Role::Moderator);
        let node = state
            .registry
            .upsert(peer.address().ip(), peer.address().port(), NodeAttributes::default())
            .await
            .unwrap();
        state.registry.mark_status(node.id, NodeStatus::Online, true).await.unwrap();

        let response = app
            .post(&format!("/api/nodes/{}/deploy", node.id))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({"name": "survival", "version": "1.21"}))
            .await;
        response.assert_status_ok();
        let outcome: DeployOutcome = response.json();
        assert!(outcome.success);
        assert_eq!(outcome.message, "Server starting");
    }

    #[test_log::test(tokio::test)]
    async fn test_deploy_to_offline_node_reports_failure() {
        let (app, state) = create_test_app();
        let headers = add_auth_headers("admin", Role::Admin);
        let node = state
            .registry
            .create(ManualNode {
                name: "Friend-PC".to_string(),
                ip_address: "192.168.1.50".parse().unwrap(),
                port: 3000,
            })
            .await
            .unwrap();

        let response = app
            .post(&format!("/api/nodes/{}/deploy", node.id))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<DeployOutcome>(), DeployOutcome::failed("Node not available"));
    }
}
