//! Configuration types for etcd-autobind.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Zone file synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// etcd watch settings.
    #[serde(default)]
    pub etcd: EtcdConfig,

    /// Nameserver control commands.
    #[serde(default)]
    pub named: NamedConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Paths, templates and timing for the synchronizer and its helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Main nameserver configuration that receives `include` lines.
    #[serde(default = "default_main_conf")]
    pub main_conf: PathBuf,

    /// Directory holding the per-zone configuration fragments.
    #[serde(default = "default_conf_dir")]
    pub conf_dir: PathBuf,

    /// Directory holding the zone files. Also the git work tree.
    #[serde(default = "default_zone_dir")]
    pub zone_dir: PathBuf,

    /// Process singleton marker.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Zone the nameserver hostnames (`ns1` .. `nsN`) live in.
    #[serde(default = "default_ns_zone")]
    pub ns_zone: String,

    /// Nameservers written into every new zone header.
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<NameServerEntry>,

    /// SOA values written into every new zone header.
    #[serde(default)]
    pub soa: SoaConfig,

    /// Quiet period after the last mutation before the nameserver is reloaded.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Capacity of the event queue between the watcher and the dispatcher.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Commit touched zone files to the git repository in `zone_dir`.
    #[serde(default = "default_true")]
    pub commit_changes: bool,
}

impl SyncConfig {
    /// Debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    /// Build a config rooted in a scratch directory.
    ///
    /// Fragments go to `<root>/named`, zone files to `<root>/zones` and the
    /// main configuration to `<root>/named.conf`.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            main_conf: root.join("named.conf"),
            conf_dir: root.join("named"),
            zone_dir: root.join("zones"),
            pid_file: root.join("autobind.pid"),
            commit_changes: false,
            ..Default::default()
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            main_conf: default_main_conf(),
            conf_dir: default_conf_dir(),
            zone_dir: default_zone_dir(),
            pid_file: default_pid_file(),
            ns_zone: default_ns_zone(),
            nameservers: default_nameservers(),
            soa: SoaConfig::default(),
            debounce_secs: default_debounce_secs(),
            queue_capacity: default_queue_capacity(),
            commit_changes: true,
        }
    }
}

/// One nameserver listed in zone headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameServerEntry {
    /// Label inside `ns_zone` (e.g. "ns1").
    pub label: String,

    /// IPv4 address of the nameserver.
    pub address: Ipv4Addr,
}

/// SOA (Start of Authority) values for generated zone headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Primary nameserver written as the SOA MNAME.
    #[serde(default = "default_mname")]
    pub mname: String,

    /// Default TTL (`$TTL`) in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Serial number.
    #[serde(default = "default_serial")]
    pub serial: u32,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: default_mname(),
            ttl: default_ttl(),
            serial: default_serial(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}

/// etcd v2 watch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// Client URLs, tried in order (e.g. "http://10.0.0.1:2379").
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Key prefix watched recursively.
    ///
    /// Must be a single path segment such as `/dns/`: record keys are decoded
    /// as `/<root>/<domain>/<hostname>/<ip>`. Deeper prefixes are refused at
    /// startup.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Upper bound on a single long-poll watch request, in seconds.
    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u64,
}

impl EtcdConfig {
    /// Watch timeout as a [`Duration`].
    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            prefix: default_prefix(),
            watch_timeout_secs: default_watch_timeout_secs(),
        }
    }
}

/// Commands used to validate and reload the nameserver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedConfig {
    /// Configuration check command and its arguments.
    #[serde(default = "default_check_command")]
    pub check_command: Vec<String>,

    /// Reload command and its arguments.
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,
}

impl Default for NamedConfig {
    fn default() -> Self {
        Self {
            check_command: default_check_command(),
            reload_command: default_reload_command(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "etcd_autobind=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "etcd-autobind".to_string()
}

fn default_main_conf() -> PathBuf {
    PathBuf::from("/etc/named.conf")
}

fn default_conf_dir() -> PathBuf {
    PathBuf::from("/etc/named")
}

fn default_zone_dir() -> PathBuf {
    PathBuf::from("/var/named")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/tmp/autoBind.pid")
}

fn default_ns_zone() -> String {
    "pro".to_string()
}

fn default_nameservers() -> Vec<NameServerEntry> {
    (1..=4)
        .map(|n| NameServerEntry {
            label: format!("ns{n}"),
            address: Ipv4Addr::new(10, 0, 0, n),
        })
        .collect()
}

fn default_debounce_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_mname() -> String {
    "localhost.".to_string()
}

fn default_ttl() -> u32 {
    86400
}

fn default_serial() -> u32 {
    2014112511
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    1800
}

fn default_expire() -> u32 {
    604800
}

fn default_minimum() -> u32 {
    86400
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_prefix() -> String {
    "/dns/".to_string()
}

fn default_watch_timeout_secs() -> u64 {
    1800
}

fn default_check_command() -> Vec<String> {
    vec!["named-checkconf".to_string()]
}

fn default_reload_command() -> Vec<String> {
    vec![
        "systemctl".to_string(),
        "reload".to_string(),
        "named".to_string(),
    ]
}
