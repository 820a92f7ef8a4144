//! Test utilities: app and state builders, identity headers, and scripted discovery collaborators.

use crate::api::models::users::Role;
use crate::config::{Config, DiscoveryConfig, ProxyHeaderAuthConfig};
use crate::db::handlers::Nodes;
use crate::discovery::{HostScanner, LocalNode, PeerInfo, Prober};
use crate::nodes::deploy::{DeployClient, ServerLauncher, UnconfiguredLauncher};
use crate::nodes::notifier::ChangeNotifier;
use crate::nodes::registry::NodeRegistry;
use crate::AppState;
use async_trait::async_trait;
use axum_test::TestServer;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_HOSTNAME: &str = "test-master";

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 3000,
        discovery: DiscoveryConfig {
            enabled: false,
            ..Default::default()
        },
        enable_metrics: false,
        enable_otel_export: false,
        ..Default::default()
    }
}

pub fn create_test_state() -> AppState {
    create_test_state_with_launcher(Arc::new(UnconfiguredLauncher))
}

pub fn create_test_state_with_launcher(launcher: Arc<dyn ServerLauncher>) -> AppState {
    let config = create_test_config();
    let registry = NodeRegistry::new(Arc::new(Nodes::new()), ChangeNotifier::new(config.notifier.capacity))
        .with_default_max_servers(config.local_node.max_servers);
    let local_node = LocalNode::new(TEST_HOSTNAME, config.port, launcher)
        .with_advertise_address(Some("127.0.0.1".parse().expect("valid address")));

    AppState::builder()
        .config(config)
        .registry(registry)
        .deploy_client(DeployClient::new(Duration::from_secs(2)))
        .local_node(Arc::new(local_node))
        .build()
}

pub fn create_test_app() -> (TestServer, AppState) {
    create_test_app_with_launcher(Arc::new(UnconfiguredLauncher))
}

pub fn create_test_app_with_launcher(launcher: Arc<dyn ServerLauncher>) -> (TestServer, AppState) {
    let state = create_test_state_with_launcher(launcher);
    let router = crate::build_router(&state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, state)
}

/// Identity headers as the trusted proxy would set them
pub fn add_auth_headers(username: &str, role: Role) -> Vec<(String, String)> {
    let config = ProxyHeaderAuthConfig::default();
    let role = match role {
        Role::Admin => "admin",
        Role::Moderator => "moderator",
        Role::User => "user",
    };
    vec![
        (config.header_name, username.to_string()),
        (config.role_header_name, role.to_string()),
    ]
}

/// Scanner that reports a fixed candidate list regardless of the hosts asked for
#[derive(Debug, Default)]
pub struct StaticScanner {
    open: Mutex<Vec<SocketAddr>>,
}

impl StaticScanner {
    pub fn new(open: Vec<SocketAddr>) -> Self {
        Self { open: Mutex::new(open) }
    }

    /// Replace the candidates reported by later scans
    pub fn set(&self, open: Vec<SocketAddr>) {
        *self.open.lock().unwrap() = open;
    }
}

#[async_trait]
impl HostScanner for StaticScanner {
    async fn scan(&self, _hosts: Vec<IpAddr>, _ports: Vec<u16>) -> Vec<SocketAddr> {
        self.open.lock().unwrap().clone()
    }
}

/// Prober with canned answers per address. Unknown addresses are not peers.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    answers: HashMap<SocketAddr, PeerInfo>,
    panics: HashSet<SocketAddr>,
    probed: Mutex<Vec<SocketAddr>>,
}

impl ScriptedProber {
    pub fn answers(mut self, addr: SocketAddr, info: PeerInfo) -> Self {
        self.answers.insert(addr, info);
        self
    }

    pub fn panics_on(mut self, addr: SocketAddr) -> Self {
        self.panics.insert(addr);
        self
    }

    /// Every address probed so far, in call order
    pub fn probed(&self) -> Vec<SocketAddr> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, ip: IpAddr, port: u16) -> Option<PeerInfo> {
        let addr = SocketAddr::new(ip, port);
        self.probed.lock().unwrap().push(addr);
        if self.panics.contains(&addr) {
            panic!("scripted probe failure for {addr}");
        }
        self.answers.get(&addr).cloned()
    }
}

/// Launcher that accepts everything and remembers what it was asked to start
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<serde_json::Value>>,
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<serde_json::Value> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServerLauncher for RecordingLauncher {
    async fn launch(&self, server_config: serde_json::Value) -> anyhow::Result<String> {
        let name = server_config["name"].as_str().unwrap_or("server").to_string();
        self.launched.lock().unwrap().push(server_config);
        Ok(format!("Started {name}"))
    }

    fn running_servers(&self) -> u32 {
        self.launched.lock().unwrap().len() as u32
    }
}
