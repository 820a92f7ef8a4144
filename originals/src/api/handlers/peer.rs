//! Endpoints other nodes call on this machine. They carry no user identity.

use crate::AppState;
use crate::discovery::prober::PeerInfo;
use crate::nodes::deploy::DeployOutcome;
use axum::{Json, extract::State, http::StatusCode};
use tracing::{info, warn};

#[utoipa::path(
    get,
    path = "/api/node/info",
    tag = "peer",
    summary = "Describe this node",
    description = "Used by other nodes during discovery to recognise this machine as a peer.",
    responses(
        (status = 200, description = "This node's self-description", body = PeerInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn node_info(State(state): State<AppState>) -> Json<PeerInfo> {
    Json(state.local_node.peer_info().await)
}

#[utoipa::path(
    post,
    path = "/api/server/deploy",
    tag = "peer",
    summary = "Start a game server on this node",
    description = "Called by another node's deploy client. Refused with 503 when no launcher can start the server.",
    request_body(content = Object, description = "Server configuration"),
    responses(
        (status = 200, description = "Server launch accepted", body = DeployOutcome),
        (status = 503, description = "Server could not be launched", body = DeployOutcome),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn accept_deploy(
    State(state): State<AppState>,
    Json(server_config): Json<serde_json::Value>,
) -> (StatusCode, Json<DeployOutcome>) {
    match state.local_node.launcher().launch(server_config).await {
        Ok(message) => {
            info!(%message, "Accepted deploy from peer");
            (StatusCode::OK, Json(DeployOutcome { success: true, message }))
        }
        Err(e) => {
            warn!(error = %e, "Refused deploy from peer");
            (StatusCode::SERVICE_UNAVAILABLE, Json(DeployOutcome::failed(e.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::discovery::prober::PeerInfo;
    use crate::nodes::deploy::DeployOutcome;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    #[test_log::test(tokio::test)]
    async fn test_node_info_needs_no_identity() {
        let (app, state) = create_test_app();

        let response = app.get("/api/node/info").await;
        response.assert_status_ok();
        let info: PeerInfo = response.json();
        assert_eq!(info.hostname.as_deref(), Some(state.local_node.hostname()));
        assert_eq!(info.version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
        assert!(info.capabilities.unwrap().is_object());
    }

    #[test_log::test(tokio::test)]
    async fn test_deploy_without_launcher_is_unavailable() {
        let (app, _state) = create_test_app();

        let response = app.post("/api/server/deploy").json(&json!({"name": "survival"})).await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.json::<DeployOutcome>().success);
    }

    #[test_log::test(tokio::test)]
    async fn test_deploy_reaches_launcher() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (app, _state) = create_test_app_with_launcher(launcher.clone());

        let response = app.post("/api/server/deploy").json(&json!({"name": "survival"})).await;
        response.assert_status_ok();
        assert_eq!(
            response.json::<DeployOutcome>(),
            DeployOutcome {
                success: true,
                message: "Started survival".to_string()
            }
        );
        assert_eq!(launcher.launched(), vec![json!({"name": "survival"})]);
    }
}
