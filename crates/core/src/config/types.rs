use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    /// External systems that submit tickets and receive outcome callbacks.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    14801
}

/// Message broker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Comma separated bootstrap servers.
    pub brokers: String,
    /// Topic the backends reply on.
    #[serde(default = "default_inbound_topic")]
    pub inbound_topic: String,
    /// Topic requests are produced to.
    #[serde(default = "default_outbound_topic")]
    pub outbound_topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    /// SASL PLAIN credentials, used when both are set.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Produce delivery timeout in seconds (default: 10)
    #[serde(default = "default_broker_timeout")]
    pub timeout_secs: u64,
}

fn default_inbound_topic() -> String {
    "b2b-TT_OUT".to_string()
}

fn default_outbound_topic() -> String {
    "b2b-TT_IN".to_string()
}

fn default_group_id() -> String {
    "TicketSystemController".to_string()
}

fn default_broker_timeout() -> u64 {
    10
}

/// Schema registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Base URL; the schema id is appended verbatim.
    pub url: String,
    #[serde(default = "default_inbound_schema_id")]
    pub inbound_schema_id: u32,
    #[serde(default = "default_outbound_schema_id")]
    pub outbound_schema_id: u32,
    /// Request timeout in seconds (default: 15)
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

fn default_inbound_schema_id() -> u32 {
    71
}

fn default_outbound_schema_id() -> u32 {
    92
}

fn default_registry_timeout() -> u64 {
    15
}

/// Available state store backends
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Redis,
    Sqlite,
}

/// State store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    /// Record retention in seconds, reset on every write (default: 3 days)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Keys requested per scan batch (default: 10000)
    #[serde(default = "default_scan_batch")]
    pub scan_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            sqlite_path: default_sqlite_path(),
            ttl_secs: default_ttl_secs(),
            scan_batch: default_scan_batch(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1/0".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("ticketgate.db")
}

fn default_ttl_secs() -> u64 {
    crate::store::DEFAULT_TTL_SECS
}

fn default_scan_batch() -> usize {
    crate::store::DEFAULT_SCAN_BATCH
}

/// Reconciler worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    5
}

/// Expiry sweeper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweeperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps (default: 60)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Age after which a pending record is flagged (default: 30 minutes)
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    60
}

fn default_stale_after_secs() -> u64 {
    1800
}

/// A registered source and its callback URL
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub broker: SanitizedBrokerConfig,
    pub registry: RegistryConfig,
    pub store: SanitizedStoreConfig,
    pub reconciler: ReconcilerConfig,
    pub sweeper: SweeperConfig,
    pub sources: Vec<SourceConfig>,
}

/// Sanitized broker config (password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBrokerConfig {
    pub brokers: String,
    pub inbound_topic: String,
    pub outbound_topic: String,
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub password_configured: bool,
    pub timeout_secs: u64,
}

/// Sanitized store config (credentials in the Redis URL hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub sqlite_path: PathBuf,
    pub ttl_secs: u64,
    pub scan_batch: usize,
}

/// Replace any `user:password@` part of a URL with `***@`.
fn redact_url_credentials(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let broker = &config.broker;
        Self {
            server: config.server.clone(),
            broker: SanitizedBrokerConfig {
                brokers: broker.brokers.clone(),
                inbound_topic: broker.inbound_topic.clone(),
                outbound_topic: broker.outbound_topic.clone(),
                group_id: broker.group_id.clone(),
                username: broker.username.clone(),
                password_configured: broker.password.as_deref().is_some_and(|p| !p.is_empty()),
                timeout_secs: broker.timeout_secs,
            },
            registry: config.registry.clone(),
            store: SanitizedStoreConfig {
                backend: config.store.backend,
                redis_url: redact_url_credentials(&config.store.redis_url),
                sqlite_path: config.store.sqlite_path.clone(),
                ttl_secs: config.store.ttl_secs,
                scan_batch: config.store.scan_batch,
            },
            reconciler: config.reconciler.clone(),
            sweeper: config.sweeper.clone(),
            sources: config.sources.clone(),
        }
    }
}
