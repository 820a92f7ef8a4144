//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `ORIGINALS_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `ORIGINALS_` override YAML values
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `ORIGINALS_DISCOVERY__INTERVAL=10s` sets the `discovery.interval` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use originals::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! See the crate's `config.yaml` for a complete example. Key sections include:
//!
//! - **Server**: `host`, `port` - HTTP server binding configuration
//! - **Authentication**: `auth.proxy_header`, `auth.cors` - Trusted identity headers and CORS
//! - **Discovery**: `discovery.*` - LAN scan cadence, port range and timeouts
//! - **Deploy**: `deploy.timeout` - Outbound deploy call timeout
//! - **Local node**: `local_node.max_servers` - Capacity advertised by this machine
//! - **Features**: `enable_metrics`, `enable_otel_export` - Optional feature toggles
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! ORIGINALS_PORT=8080
//!
//! # Scan a narrower port range
//! ORIGINALS_DISCOVERY__SCAN_PORTS__END=3002
//!
//! # Disable discovery entirely
//! ORIGINALS_DISCOVERY__ENABLED=false
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{net::IpAddr, time::Duration};
use url::Url;

use crate::api::models::users::Role;
use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "ORIGINALS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to. Also the control port this node advertises to peers.
    pub port: u16,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// LAN discovery configuration
    pub discovery: DiscoveryConfig,
    /// Outbound deploy configuration
    pub deploy: DeployConfig,
    /// Change notification configuration
    pub notifier: NotifierConfig,
    /// Settings describing this machine as a node
    pub local_node: LocalNodeConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Trusted proxy header authentication
    pub proxy_header: ProxyHeaderAuthConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

/// Proxy header authentication configuration.
///
/// The reverse proxy in front of the dashboard authenticates users and forwards their identity
/// in trusted headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyHeaderAuthConfig {
    /// Header carrying the authenticated username
    pub header_name: String,
    /// Header carrying the user's role (`admin`, `moderator` or `user`)
    pub role_header_name: String,
    /// Role assumed when the role header is absent
    pub default_role: Role,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// LAN discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Run the discovery loop at all
    pub enabled: bool,
    /// Sleep between successful cycles
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Sleep after a failed cycle
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
    /// Timeout for a single peer info probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Timeout for a single TCP connect during the port scan
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Upper bound on simultaneous TCP connects during the port scan
    pub max_concurrent_connects: usize,
    /// Inclusive port range scanned on every host of the local subnet
    pub scan_ports: PortRange,
    /// Non-master nodes not seen for this long are marked offline
    #[serde(with = "humantime_serde")]
    pub offline_after: Duration,
    /// Address to register this machine under, skipping detection
    pub advertise_address: Option<IpAddr>,
}

/// Inclusive TCP port range.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn ports(&self) -> impl Iterator<Item = u16> + Clone + use<> {
        self.start..=self.end
    }
}

/// Outbound deploy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Timeout for the deploy call to a peer
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Change notification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotifierConfig {
    /// Events buffered per subscriber before the slowest subscriber starts missing events
    pub capacity: usize,
}

/// Settings describing this machine as a node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalNodeConfig {
    /// Maximum game servers this machine accepts
    pub max_servers: u32,
    /// Hostname override; detected from the OS when unset
    pub hostname: Option<String>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            auth: AuthConfig::default(),
            discovery: DiscoveryConfig::default(),
            deploy: DeployConfig::default(),
            notifier: NotifierConfig::default(),
            local_node: LocalNodeConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            header_name: "x-originals-user".to_string(),
            role_header_name: "x-originals-role".to_string(),
            default_role: Role::User,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_millis(500),
            max_concurrent_connects: 256,
            scan_ports: PortRange { start: 3000, end: 3010 },
            offline_after: Duration::from_secs(90),
            advertise_address: None,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl Default for LocalNodeConfig {
    fn default() -> Self {
        Self {
            max_servers: 5,
            hostname: None,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.port == 0 {
            return Err(Error::Internal {
                operation: "Config validation: port must be between 1 and 65535".to_string(),
            });
        }

        let discovery = &self.discovery;
        if discovery.scan_ports.start == 0 || discovery.scan_ports.start > discovery.scan_ports.end {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: invalid discovery.scan_ports range {}-{}",
                    discovery.scan_ports.start, discovery.scan_ports.end
                ),
            });
        }

        for (name, value) in [
            ("interval", discovery.interval),
            ("error_backoff", discovery.error_backoff),
            ("probe_timeout", discovery.probe_timeout),
            ("connect_timeout", discovery.connect_timeout),
            ("offline_after", discovery.offline_after),
        ] {
            if value.is_zero() {
                return Err(Error::Internal {
                    operation: format!("Config validation: discovery.{name} must be greater than zero"),
                });
            }
        }

        if discovery.max_concurrent_connects == 0 {
            return Err(Error::Internal {
                operation: "Config validation: discovery.max_concurrent_connects must be at least 1".to_string(),
            });
        }

        if let Some(addr) = discovery.advertise_address
            && (addr.is_unspecified() || addr.is_multicast())
        {
            return Err(Error::Internal {
                operation: format!("Config validation: discovery.advertise_address {addr} is not a unicast address"),
            });
        }

        if self.deploy.timeout.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: deploy.timeout must be greater than zero".to_string(),
            });
        }

        if self.notifier.capacity == 0 {
            return Err(Error::Internal {
                operation: "Config validation: notifier.capacity must be at least 1".to_string(),
            });
        }

        if self.auth.proxy_header.header_name.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: auth.proxy_header.header_name cannot be empty".to_string(),
            });
        }

        if self.auth.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        // Validate that wildcard is not used with credentials
        let has_wildcard = self
            .auth
            .cors
            .allowed_origins
            .iter()
            .any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.auth.cors.allow_credentials {
            return Err(Error::Internal {
                operation: "Config validation: CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins."
                    .to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values. ORIGINALS_CONFIG names the
            // file itself and is not a config key.
            .merge(Env::prefixed("ORIGINALS_").ignore(&["CONFIG"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
