//! Configuration loading for the BnB node
//!
//! Every field has a default, so a partial TOML file (or none at all) yields
//! a working router configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub transceiver: TransceiverConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub appserver: AppServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node identity
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeSection {
    /// Banner printed at boot
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Numeric node id, also used as the radio short address by `init`
    #[serde(default = "default_node_id")]
    pub id: u16,
}

/// Mailbox sizing and blocking deadlines
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MessagingConfig {
    /// Maximum number of live mailboxes (platform message-queue pool)
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Relay inbox capacity
    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,

    /// Application server inbox capacity
    #[serde(default = "default_appserver_capacity")]
    pub appserver_capacity: usize,

    /// Transceiver owner inbox capacity
    #[serde(default = "default_transceiver_capacity")]
    pub transceiver_capacity: usize,

    /// Longest a blocking send waits on a full mailbox (ms)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Longest a request waits for its reply (ms)
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,
}

/// Radio transceiver settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransceiverConfig {
    /// Channel applied when the relay starts
    #[serde(default = "default_channel")]
    pub default_channel: i32,

    /// Lowest channel the radio accepts
    #[serde(default = "default_channel_min")]
    pub channel_min: i32,

    /// Highest channel the radio accepts
    #[serde(default = "default_channel_max")]
    pub channel_max: i32,

    /// Short address the radio powers up with
    #[serde(default = "default_initial_address")]
    pub initial_address: u16,

    /// How often the owner thread polls the radio for frames (ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Forwarding relay settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Initial content store size (entries)
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,

    /// Largest content returned to an interest (bytes)
    #[serde(default = "default_max_content_len")]
    pub max_content_len: usize,

    /// Name requested by `interest` without an argument
    #[serde(default = "default_interest")]
    pub default_interest: String,

    /// Pause before an interest leaves the shell, so the Waiting LED shows (ms)
    #[serde(default)]
    pub interest_delay_ms: u64,
}

/// Application server settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppServerConfig {
    /// Name prefix the application server answers for
    #[serde(default = "default_appserver_prefix")]
    pub prefix: String,

    /// Content served before any UDP payload arrived
    #[serde(default = "default_appserver_content")]
    pub default_content: String,
}

/// UDP transport bridge settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Listening address for the receive loop
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port used for outbound datagrams
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Datagram buffer size (bytes)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Address whose last 16 bits are replaced by the peer id
    #[serde(default = "default_peer_prefix")]
    pub peer_prefix: String,

    /// Socket read timeout used to observe shutdown (ms)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// LED indicator timing
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IndicatorConfig {
    /// Half-period of the Idle/Waiting blink (ms)
    #[serde(default = "default_fast_ms")]
    pub fast_ms: u64,

    /// Half-period of the Ready blink (ms)
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,

    /// Ready cycles before the indicator falls back to Idle
    #[serde(default = "default_ready_cycles")]
    pub ready_cycles: u32,
}

/// What `Node::boot` brings up
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StartupConfig {
    #[serde(default = "default_true")]
    pub relay: bool,
    #[serde(default = "default_true")]
    pub appserver: bool,
    #[serde(default = "default_true")]
    pub udp_server: bool,
    #[serde(default = "default_true")]
    pub indicator: bool,

    /// Neighbour cache entries added at boot (ids 0..n)
    #[serde(default = "default_neighbors")]
    pub neighbors: u16,

    /// Radio address applied at boot (client nodes use 3)
    #[serde(default)]
    pub address: Option<u16>,

    /// Peers ignored at boot
    #[serde(default)]
    pub ignore: Vec<u16>,
}

/// Logging configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_node_name() -> String {
    "IETF90 - BnB - CCN-RPL router".to_string()
}
fn default_node_id() -> u16 {
    2
}
fn default_pool_size() -> usize {
    8
}
fn default_relay_capacity() -> usize {
    16
}
fn default_appserver_capacity() -> usize {
    8
}
fn default_transceiver_capacity() -> usize {
    8
}
fn default_send_timeout() -> u64 {
    2000
}
fn default_reply_timeout() -> u64 {
    5000
}
fn default_channel() -> i32 {
    10
}
fn default_channel_min() -> i32 {
    0
}
fn default_channel_max() -> i32 {
    24
}
fn default_initial_address() -> u16 {
    1
}
fn default_poll_interval() -> u64 {
    10
}
fn default_cache_entries() -> usize {
    20
}
fn default_max_content_len() -> usize {
    3 * 1024
}
fn default_interest() -> String {
    "/ccnx/0.7.1/doc/technical/CanonicalOrder.txt".to_string()
}
fn default_appserver_prefix() -> String {
    "/riot/appserver".to_string()
}
fn default_appserver_content() -> String {
    "RIOT is friendly".to_string()
}
fn default_bind_address() -> String {
    "[::]:65281".to_string()
}
fn default_server_port() -> u16 {
    0xFF01
}
fn default_buffer_size() -> usize {
    128
}
fn default_peer_prefix() -> String {
    "fe80::ff:fe00:0".to_string()
}
fn default_read_timeout() -> u64 {
    100
}
fn default_fast_ms() -> u64 {
    100
}
fn default_slow_ms() -> u64 {
    600
}
fn default_ready_cycles() -> u32 {
    10
}
fn default_neighbors() -> u16 {
    5
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            id: default_node_id(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            relay_capacity: default_relay_capacity(),
            appserver_capacity: default_appserver_capacity(),
            transceiver_capacity: default_transceiver_capacity(),
            send_timeout_ms: default_send_timeout(),
            reply_timeout_ms: default_reply_timeout(),
        }
    }
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            default_channel: default_channel(),
            channel_min: default_channel_min(),
            channel_max: default_channel_max(),
            initial_address: default_initial_address(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            cache_entries: default_cache_entries(),
            max_content_len: default_max_content_len(),
            default_interest: default_interest(),
            interest_delay_ms: 0,
        }
    }
}

impl Default for AppServerConfig {
    fn default() -> Self {
        Self {
            prefix: default_appserver_prefix(),
            default_content: default_appserver_content(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_server_port(),
            buffer_size: default_buffer_size(),
            peer_prefix: default_peer_prefix(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            fast_ms: default_fast_ms(),
            slow_ms: default_slow_ms(),
            ready_cycles: default_ready_cycles(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            relay: true,
            appserver: true,
            udp_server: true,
            indicator: true,
            neighbors: default_neighbors(),
            address: None,
            ignore: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the workers cannot run with
    pub fn validate(&self) -> Result<()> {
        let m = &self.messaging;
        if m.relay_capacity == 0 || m.appserver_capacity == 0 || m.transceiver_capacity == 0 {
            return Err(Error::Config("mailbox capacities must be non-zero".into()));
        }
        if self.transceiver.channel_min > self.transceiver.channel_max {
            return Err(Error::Config(format!(
                "channel_min {} exceeds channel_max {}",
                self.transceiver.channel_min, self.transceiver.channel_max
            )));
        }
        if self.bridge.buffer_size < 2 {
            return Err(Error::Config("bridge buffer_size must be at least 2".into()));
        }
        Ok(())
    }

    /// Configuration with every blocking delay shortened, for tests and demos
    /// that drive the node without real hardware
    pub fn fast() -> Self {
        let mut config = Self::default();
        config.messaging.send_timeout_ms = 500;
        config.messaging.reply_timeout_ms = 1000;
        config.transceiver.poll_interval_ms = 2;
        config.bridge.bind_address = "127.0.0.1:0".to_string();
        config.bridge.read_timeout_ms = 20;
        config.indicator.fast_ms = 1;
        config.indicator.slow_ms = 1;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_router_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.bridge.port, 65281);
        assert_eq!(config.bridge.buffer_size, 128);
        assert_eq!(config.transceiver.default_channel, 10);
        assert_eq!(config.indicator.ready_cycles, 10);
        assert_eq!(config.relay.max_content_len, 3072);
        assert_eq!(config.startup.neighbors, 5);
        assert!(config.startup.address.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_content = r#"
[node]
id = 7

[startup]
address = 3
ignore = [1]
udp_server = false
"#;
        let config: NodeConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.node.id, 7);
        assert_eq!(config.startup.address, Some(3));
        assert_eq!(config.startup.ignore, vec![1]);
        assert!(!config.startup.udp_server);
        assert!(config.startup.relay);
        assert_eq!(config.messaging.pool_size, 8);
        assert_eq!(config.appserver.prefix, "/riot/appserver");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[indicator]\nslow_ms = 250\n\n[logging]\nlevel = \"debug\"").unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.indicator.slow_ms, 250);
        assert_eq!(config.indicator.fast_ms, 100);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_rejects_bad_channel_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[transceiver]\nchannel_min = 20\nchannel_max = 3").unwrap();

        assert!(matches!(
            NodeConfig::load(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = NodeConfig::load(Path::new("/nonexistent/bnb.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
