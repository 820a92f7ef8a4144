//! # originals: node discovery and health reconciliation for The Originals
//!
//! `originals` is the networking core of The Originals, a self-hosted dashboard for running
//! Minecraft servers across the machines of a home LAN. It keeps a registry of every machine
//! ("node") that can host a game server, finds new nodes automatically, and keeps each node's
//! status, capabilities and load current.
//!
//! ## Overview
//!
//! Every machine runs the same binary. The machine that runs the dashboard registers itself as
//! the **master** node, then periodically scans its /24 subnet for other machines answering the
//! node info endpoint. Peers that answer are recorded (or refreshed) in the registry; nodes that
//! stop answering are swept to `offline` after a grace period. Operators can also add nodes by
//! hand, edit them, remove them, and ask a node to start a game server.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer. State
//! lives in memory, in a concurrent map behind the [`db::handlers::NodeStore`] trait.
//!
//! - **[`nodes`]**: the [`NodeRegistry`](nodes::registry::NodeRegistry) with its invariants, the
//!   change notifier, and the deploy client
//! - **[`discovery`]**: subnet scan, peer probing, local machine sampling and the discovery loop
//! - **[`api`]**: operator endpoints under `/api/nodes`, peer endpoints under `/api/node` and
//!   `/api/server`, and a Server-Sent Events stream of node changes
//! - **[`auth`]**: caller identity from trusted proxy headers and the role/capability table
//!
//! ### Background services
//!
//! The [`DiscoveryLoop`](discovery::DiscoveryLoop) runs as a background task next to the HTTP
//! server. It is stopped through a shared cancellation token when the server shuts down.
//!
//! ## Configuration
//!
//! Configuration is loaded from a YAML file (default `config.yaml`) and `ORIGINALS_`-prefixed
//! environment variables. See [`config`] for the full set of options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod discovery;
pub mod errors;
pub mod nodes;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::handlers::{events, nodes as node_handlers, peer},
    config::CorsOrigin,
    db::handlers::Nodes,
    discovery::{DiscoveryLoop, HttpProber, LocalNode, TcpConnectScanner},
    nodes::{
        deploy::{DeployClient, UnconfiguredLauncher},
        notifier::ChangeNotifier,
        registry::NodeRegistry,
    },
    openapi::ApiDoc,
};
use axum::{
    Json, Router, http,
    http::HeaderValue,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

/// Application state shared across all request handlers.
///
/// - `config`: Application configuration loaded from environment/files
/// - `registry`: The node registry, shared with the discovery loop
/// - `deploy_client`: HTTP client for deploy calls to peers
/// - `local_node`: This machine, as described to peers
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .registry(registry)
///     .deploy_client(DeployClient::new(Duration::from_secs(30)))
///     .local_node(Arc::new(local_node))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub registry: NodeRegistry,
    pub deploy_client: DeployClient,
    pub local_node: Arc<LocalNode>,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.cors;
    // tower-http refuses `*` inside an origin list
    let allow_origin = if cors_config
        .allowed_origins
        .iter()
        .any(|origin| matches!(origin, CorsOrigin::Wildcard))
    {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// This function constructs the complete Axum router with:
/// - Operator routes for the node registry (`/api/nodes/*`)
/// - Peer routes (`/api/node/info`, `/api/server/deploy`)
/// - OpenAPI JSON and the Scalar docs page
/// - Optional Prometheus metrics
/// - CORS configuration
/// - Tracing middleware
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let node_routes = Router::new()
        .route(
            "/nodes",
            get(node_handlers::list_nodes).post(node_handlers::create_node),
        )
        .route("/nodes/available", get(node_handlers::list_available_nodes))
        .route("/nodes/events", get(events::node_events))
        .route(
            "/nodes/{id}",
            get(node_handlers::get_node)
                .patch(node_handlers::update_node)
                .delete(node_handlers::delete_node),
        )
        .route("/nodes/{id}/deploy", post(node_handlers::deploy_node));

    // Called by other nodes, not by operators
    let peer_routes = Router::new()
        .route("/node/info", get(peer::node_info))
        .route("/server/deploy", post(peer::accept_deploy));

    let api_routes = node_routes.merge(peer_routes).with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    // Discovery counters and gauges land in the same recorder, so one endpoint serves both
    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Container for background services and their lifecycle management.
///
/// Currently this is the node discovery loop, when enabled.
///
/// # Graceful Shutdown
///
/// [`shutdown`](BackgroundServices::shutdown) cancels the shared token and waits for every task.
/// When dropped, the `drop_guard` cancels the token, so tasks never outlive their owner.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Start the discovery loop if it is enabled
fn setup_background_services(state: &AppState, shutdown_token: CancellationToken) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();
    let discovery_config = state.config.discovery.clone();

    if discovery_config.enabled {
        let discovery = DiscoveryLoop::new(
            state.registry.clone(),
            state.local_node.clone(),
            Arc::new(HttpProber::new(discovery_config.probe_timeout)),
            Arc::new(TcpConnectScanner::new(
                discovery_config.connect_timeout,
                discovery_config.max_concurrent_connects,
            )),
            discovery_config,
        );
        background_tasks.push(tokio::spawn(discovery.run(shutdown_token.clone())));
        info!("Node discovery enabled");
    } else {
        info!("Node discovery disabled; only manually added nodes will be tracked");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Main application struct that owns all resources and manages the application lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] builds the registry, the local node description and the
///    router, and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, gracefully stops all services
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting originals with configuration: {:#?}", config);

        let registry = NodeRegistry::new(Arc::new(Nodes::new()), ChangeNotifier::new(config.notifier.capacity))
            .with_default_max_servers(config.local_node.max_servers);
        let local_node = Arc::new(LocalNode::from_config(&config, Arc::new(UnconfiguredLauncher)));

        let app_state = AppState::builder()
            .config(config.clone())
            .registry(registry)
            .deploy_client(DeployClient::new(config.deploy.timeout))
            .local_node(local_node)
            .build();

        let router = build_router(&app_state)?;

        let shutdown_token = CancellationToken::new();
        let bg_services = setup_background_services(&app_state, shutdown_token);

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "The Originals listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping background services...");
        self.bg_services.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_application_integration() {
        let app = Application::new(create_test_config()).await;
        assert!(app.is_ok(), "Application::new should succeed");

        let (server, _bg_services) = app.unwrap().into_test_server();

        let health_response = server.get("/healthz").await;
        assert_eq!(health_response.status_code().as_u16(), 200);
        assert_eq!(health_response.text(), "OK");

        let openapi_response = server.get("/api-docs/openapi.json").await;
        assert_eq!(openapi_response.status_code().as_u16(), 200);
        let doc: serde_json::Value = openapi_response.json();
        assert!(doc["paths"]["/api/nodes"].is_object());

        // Operator routes require identity headers
        let api_response = server.get("/api/nodes").await;
        assert_eq!(api_response.status_code().as_u16(), 401);

        // Peer routes do not
        let info_response = server.get("/api/node/info").await;
        assert_eq!(info_response.status_code().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_disabled() {
        let state = create_test_state();
        let router = build_router(&state).expect("Failed to build router");
        let server = axum_test::TestServer::new(router).expect("Failed to create test server");

        let metrics_response = server.get("/internal/metrics").await;
        assert_eq!(metrics_response.status_code().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_enabled() {
        let mut state = create_test_state();
        state.config.enable_metrics = true;
        let router = build_router(&state).expect("Failed to build router");
        let server = axum_test::TestServer::new(router).expect("Failed to create test server");

        let metrics_response = server.get("/internal/metrics").await;
        assert_eq!(metrics_response.status_code().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_shutdown_stops_discovery() {
        let mut config = create_test_config();
        config.discovery.enabled = true;
        config.discovery.advertise_address = Some("127.0.0.1".parse().unwrap());
        config.discovery.scan_ports = crate::config::PortRange { start: 1, end: 1 };
        config.discovery.connect_timeout = std::time::Duration::from_millis(10);

        let app = Application::new(config).await.unwrap();
        let (_server, bg_services) = app.into_test_server();
        assert_eq!(bg_services.background_tasks.len(), 1);

        tokio::time::timeout(std::time::Duration::from_secs(30), bg_services.shutdown())
            .await
            .expect("background services should stop after cancellation");
    }

    #[test]
    fn test_cors_layer_accepts_configured_origins() {
        let mut config = create_test_config();
        config.auth.cors.allowed_origins = vec![
            CorsOrigin::Url("http://192.168.1.10:8080".parse().unwrap()),
            CorsOrigin::Url("http://dashboard.lan".parse().unwrap()),
        ];
        config.auth.cors.allow_credentials = true;
        assert!(create_cors_layer(&config).is_ok());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_node_edits() {
        use tower::ServiceExt;

        let router = build_router(&create_test_state()).expect("Failed to build router");
        let request = axum::http::Request::builder()
            .method(http::Method::OPTIONS)
            .uri("/api/nodes/00000000-0000-0000-0000-000000000000")
            .header(http::header::ORIGIN, "http://dashboard.lan")
            .header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(response.headers()[http::header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let methods = response.headers()[http::header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
        assert!(methods.contains("PATCH"));
    }

    #[test]
    fn test_cors_layer_with_wildcard_default() {
        assert!(create_cors_layer(&create_test_config()).is_ok());
    }
}
