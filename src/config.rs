use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration consumed by the poller, parser and synapse renderer
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Location of the HAProxy config written by synapse
    #[serde(default)]
    pub haproxy: HaproxyConfig,

    /// Health polling defaults
    #[serde(default)]
    pub poll: PollConfig,

    /// External service control commands
    #[serde(default)]
    pub control: ControlConfig,

    /// ZooKeeper install and cluster
    #[serde(default)]
    pub zookeeper: ZooKeeperConfig,

    /// Synapse config assembly
    #[serde(default)]
    pub synapse: SynapseConfig,

    /// Service catalog keyed by service name
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HaproxyConfig {
    #[serde(default = "default_haproxy_config_path")]
    pub config_file_path: PathBuf,
}

impl Default for HaproxyConfig {
    fn default() -> Self {
        Self {
            config_file_path: default_haproxy_config_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    /// Total wall-clock budget for a transition, in seconds
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// Delay between health probes, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Timeout for a single health probe, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Host the health endpoint is reached on
    #[serde(default = "default_health_host")]
    pub health_host: String,

    /// Health endpoint path
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl PollConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_wait_secs: default_max_wait(),
            poll_interval_ms: default_poll_interval(),
            request_timeout_ms: default_request_timeout(),
            health_host: default_health_host(),
            health_path: default_health_path(),
        }
    }
}

/// Command templates; `{service}` is replaced by the service name
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_stop_command")]
    pub stop: String,

    #[serde(default = "default_start_command")]
    pub start: String,

    /// Upper bound on how long a control command may run
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

impl ControlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            stop: default_stop_command(),
            start: default_start_command(),
            timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ZooKeeperConfig {
    /// Directory holding `zookeeper-<version>/`
    #[serde(default = "default_zk_home")]
    pub home: PathBuf,

    #[serde(default = "default_zk_version")]
    pub version: String,

    /// `host:port` pairs of the SmartStack ZooKeeper cluster
    #[serde(default)]
    pub smartstack_cluster: Vec<String>,
}

impl ZooKeeperConfig {
    /// Path of the `zkCli.sh` script for the configured install
    pub fn cli_script(&self) -> PathBuf {
        self.home
            .join(format!("zookeeper-{}", self.version))
            .join("bin")
            .join("zkCli.sh")
    }
}

impl Default for ZooKeeperConfig {
    fn default() -> Self {
        Self {
            home: default_zk_home(),
            version: default_zk_version(),
            smartstack_cluster: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynapseConfig {
    /// Where the rendered JSON is written
    #[serde(default = "default_synapse_config_file")]
    pub config_file: PathBuf,

    /// Services to add to the synapse config, in order
    #[serde(default)]
    pub enabled_services: Vec<String>,

    /// Base document the service entries are merged into
    #[serde(default = "default_synapse_base")]
    pub base: serde_json::Value,
}

impl Default for SynapseConfig {
    fn default() -> Self {
        Self {
            config_file: default_synapse_config_file(),
            enabled_services: Vec::new(),
            base: default_synapse_base(),
        }
    }
}

/// A single entry of the service catalog
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Port the service's health endpoint listens on
    pub port: u16,

    /// Local HAProxy port the service is exposed on
    pub local_port: Option<u16>,

    /// ZooKeeper path nerve registers instances under
    pub zk_path: Option<String>,

    /// Raw synapse section for this service
    pub synapse: Option<serde_json::Value>,
}

impl ServiceConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            local_port: None,
            zk_path: None,
            synapse: None,
        }
    }

    /// Validate the service configuration
    pub fn validate(&self, name: &str) -> std::result::Result<(), String> {
        if self.port == 0 {
            return Err(format!("Service '{}': 'port' must be greater than 0", name));
        }
        if self.local_port == Some(0) {
            return Err(format!(
                "Service '{}': 'local_port' must be greater than 0",
                name
            ));
        }
        if let Some(ref synapse) = self.synapse {
            if !synapse.is_object() {
                return Err(format!("Service '{}': 'synapse' must be a table", name));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_haproxy_config_path() -> PathBuf {
    PathBuf::from("/etc/haproxy/haproxy.cfg")
}

fn default_max_wait() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    200
}

fn default_request_timeout() -> u64 {
    2000
}

fn default_health_host() -> String {
    "localhost".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_stop_command() -> String {
    "sv down {service}".to_string()
}

fn default_start_command() -> String {
    "sv up {service}".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_zk_home() -> PathBuf {
    PathBuf::from("/opt/smartstack/zookeeper")
}

fn default_zk_version() -> String {
    "3.4.5".to_string()
}

fn default_synapse_config_file() -> PathBuf {
    PathBuf::from("/opt/smartstack/synapse/config.json")
}

fn default_synapse_base() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.poll.max_wait_secs == 0 {
            errors.push("poll: 'max_wait_secs' must be greater than 0".to_string());
        }
        if self.poll.poll_interval_ms == 0 {
            errors.push("poll: 'poll_interval_ms' must be greater than 0".to_string());
        }
        if !self.poll.health_path.starts_with('/') {
            errors.push("poll: 'health_path' must start with '/'".to_string());
        }

        for (key, template) in [("stop", &self.control.stop), ("start", &self.control.start)] {
            match shell_words::split(template) {
                Ok(words) if words.is_empty() => {
                    errors.push(format!("control: '{}' command is empty", key));
                }
                Ok(_) => {}
                Err(e) => errors.push(format!("control: '{}' command is invalid: {}", key, e)),
            }
        }

        if !self.synapse.base.is_object() {
            errors.push("synapse: 'base' must be a table".to_string());
        }

        let mut names: Vec<_> = self.services.keys().collect();
        names.sort();
        for name in names {
            if let Err(e) = self.services[name].validate(name) {
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            return Err(Error::Config(format!(
                "Configuration errors:\n  - {}",
                errors.join("\n  - ")
            )));
        }

        Ok(())
    }

    pub fn service(&self, name: &str) -> Result<&ServiceConfig> {
        self.services
            .get(name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))
    }
}
