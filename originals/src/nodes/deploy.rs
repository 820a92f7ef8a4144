//! Game-server deployment across nodes.
//!
//! Outbound, [`DeployClient`] asks a peer's control API to start a game server. Inbound, a
//! [`ServerLauncher`] is the collaborator that actually starts processes on this machine; the
//! process lifecycle itself lives outside this crate.

use crate::db::models::nodes::{NodeDBResponse, NodeStatus};
use crate::errors::Result;
use crate::nodes::registry::NodeRegistry;
use crate::types::{NodeId, abbrev_uuid};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

pub const DEPLOY_PATH: &str = "/api/server/deploy";

/// Result of a deploy attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeployOutcome {
    pub success: bool,
    pub message: String,
}

impl DeployOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// What came back from a peer's deploy endpoint
#[derive(Debug)]
pub enum DeployAttempt {
    /// The peer answered; the outcome reflects its status code and message
    Answered(DeployOutcome),
    /// No usable answer: connect failure, timeout, or an unreadable body
    Unreachable(String),
}

#[derive(Deserialize)]
struct PeerReply {
    message: Option<String>,
}

/// Sends deploy requests to peer nodes
#[derive(Debug, Clone)]
pub struct DeployClient {
    client: Client,
    timeout: Duration,
}

impl DeployClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    /// POST the server configuration to `http://{ip}:{port}/api/server/deploy`.
    #[instrument(skip(self, node, server_config), fields(node_id = %abbrev_uuid(&node.id), address = %node.address()))]
    pub async fn send(&self, node: &NodeDBResponse, server_config: &serde_json::Value) -> DeployAttempt {
        let url = format!("{}{DEPLOY_PATH}", node.connection_string());
        let response = match self.client.post(&url).timeout(self.timeout).json(server_config).send().await {
            Ok(response) => response,
            Err(e) => return DeployAttempt::Unreachable(e.to_string()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return DeployAttempt::Unreachable(e.to_string()),
        };
        let message = serde_json::from_str::<PeerReply>(&body).ok().and_then(|reply| reply.message);

        if status == StatusCode::OK {
            DeployAttempt::Answered(DeployOutcome {
                success: true,
                message: message.unwrap_or_else(|| "Deployment accepted".to_string()),
            })
        } else {
            DeployAttempt::Answered(DeployOutcome::failed(
                message.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            ))
        }
    }
}

/// Deploy a game server to a registered node.
///
/// Unavailable nodes are refused without contacting them. A node that cannot be reached is
/// marked `error`; a node that answers with a failure keeps its status.
#[instrument(skip(registry, client, server_config), fields(node_id = %abbrev_uuid(&node_id)), err)]
pub async fn deploy_to_node(
    registry: &NodeRegistry,
    client: &DeployClient,
    node_id: NodeId,
    server_config: &serde_json::Value,
) -> Result<DeployOutcome> {
    let node = registry.get(node_id).await?;
    if !node.is_available_for_deployment() {
        info!(status = %node.status, "Refusing deploy to unavailable node");
        return Ok(DeployOutcome::failed("Node not available"));
    }

    match client.send(&node, server_config).await {
        DeployAttempt::Answered(outcome) => {
            info!(success = outcome.success, message = %outcome.message, "Deploy answered");
            Ok(outcome)
        }
        DeployAttempt::Unreachable(reason) => {
            warn!(%reason, "Deploy failed, marking node as errored");
            registry.mark_status(node.id, NodeStatus::Error, false).await?;
            Ok(DeployOutcome::failed(format!("Deployment failed: {reason}")))
        }
    }
}

/// Starts game servers on this machine.
#[async_trait::async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Launch a game server from a peer-supplied configuration. Returns a status message.
    async fn launch(&self, server_config: serde_json::Value) -> anyhow::Result<String>;

    /// Number of game servers currently running on this machine
    fn running_servers(&self) -> u32;
}

/// Launcher for a node with no game-server runtime attached. Refuses every launch.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredLauncher;

#[async_trait::async_trait]
impl ServerLauncher for UnconfiguredLauncher {
    async fn launch(&self, _server_config: serde_json::Value) -> anyhow::Result<String> {
        anyhow::bail!("No game-server launcher is configured on this node")
    }

    fn running_servers(&self) -> u32 {
        0
    }
}
