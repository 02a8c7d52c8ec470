//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a node can start with zero configuration
//! for local development.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use libp2p::Multiaddr;

use concord_core::DeliveryPolicy;
use concord_net::{parse_multiaddrs, SwarmConfig};
use concord_shared::constants::{DEFAULT_QUIC_PORT, KDF_CONTEXT_NETWORK_SECRET};

/// Node configuration.
#[derive(Clone)]
pub struct NodeConfig {
    /// Directory holding the database and, by default, the key file.
    /// Env: `CONCORD_DATA_DIR`
    /// Default: the platform data directory.
    pub data_dir: PathBuf,

    /// JSON file with the identity key and installation id.
    /// Env: `CONCORD_KEY_FILE`
    /// Default: `<data_dir>/identity.json`
    pub key_file: PathBuf,

    /// QUIC listen port.
    /// Env: `LISTEN_PORT`
    /// Default: `4101`
    pub listen_port: u16,

    /// Comma separated multiaddrs dialed at startup.
    /// Env: `BOOTSTRAP_PEERS`
    pub bootstrap_peers: Vec<Multiaddr>,

    /// File with one bootstrap multiaddr per line.
    /// Env: `BOOTSTRAP_PEERS_FILE`
    pub bootstrap_peers_file: Option<PathBuf>,

    /// Seconds between delivery sweeps.
    /// Env: `RESEND_INTERVAL_SECS`
    /// Default: `5`
    pub resend_interval: Duration,

    /// Env: `RESEND_BACKOFF_INITIAL_MS`
    /// Default: `1000`
    pub resend_backoff_initial_ms: u64,

    /// Env: `RESEND_BACKOFF_MAX_MS`
    /// Default: `300000`
    pub resend_backoff_max_ms: u64,

    /// Env: `INSTALLATION_NAME`
    /// Default: `"concord-node"`
    pub installation_name: String,

    /// Env: `DEVICE_TYPE`
    /// Default: the target OS.
    pub device_type: String,

    /// Secret every node of the network shares for topic encryption
    /// (hex-encoded, 64 chars).
    /// Env: `CONCORD_NETWORK_SECRET`
    /// Default: a fixed public value (development only).
    pub network_secret: [u8; 32],
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("org", "concord", "concord")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./concord-data"));
        let policy = DeliveryPolicy::default();

        Self {
            key_file: data_dir.join("identity.json"),
            data_dir,
            listen_port: DEFAULT_QUIC_PORT,
            bootstrap_peers: Vec::new(),
            bootstrap_peers_file: None,
            resend_interval: policy.sweep_interval,
            resend_backoff_initial_ms: policy.backoff_initial_ms,
            resend_backoff_max_ms: policy.backoff_max_ms,
            installation_name: "concord-node".to_string(),
            device_type: std::env::consts::OS.to_string(),
            network_secret: blake3::derive_key(KDF_CONTEXT_NETWORK_SECRET, b"public"),
        }
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("data_dir", &self.data_dir)
            .field("key_file", &self.key_file)
            .field("listen_port", &self.listen_port)
            .field("bootstrap_peers", &self.bootstrap_peers.len())
            .field("bootstrap_peers_file", &self.bootstrap_peers_file)
            .field("resend_interval", &self.resend_interval)
            .field("resend_backoff_initial_ms", &self.resend_backoff_initial_ms)
            .field("resend_backoff_max_ms", &self.resend_backoff_max_ms)
            .field("installation_name", &self.installation_name)
            .field("device_type", &self.device_type)
            .finish_non_exhaustive()
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("CONCORD_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.key_file = config.data_dir.join("identity.json");
        }

        if let Some(path) = lookup("CONCORD_KEY_FILE") {
            config.key_file = PathBuf::from(path);
        }

        if let Some(val) = lookup("LISTEN_PORT") {
            match val.parse::<u16>() {
                Ok(port) => config.listen_port = port,
                Err(_) => tracing::warn!(value = %val, "Invalid LISTEN_PORT, using default"),
            }
        }

        if let Some(val) = lookup("BOOTSTRAP_PEERS") {
            config.bootstrap_peers = parse_multiaddrs(&val);
        }

        if let Some(path) = lookup("BOOTSTRAP_PEERS_FILE") {
            config.bootstrap_peers_file = Some(PathBuf::from(path));
        }

        if let Some(secs) = lookup("RESEND_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            if secs > 0 {
                config.resend_interval = Duration::from_secs(secs);
            }
        }

        if let Some(ms) = lookup("RESEND_BACKOFF_INITIAL_MS").and_then(|v| v.parse().ok()) {
            config.resend_backoff_initial_ms = ms;
        }

        if let Some(ms) = lookup("RESEND_BACKOFF_MAX_MS").and_then(|v| v.parse().ok()) {
            config.resend_backoff_max_ms = ms;
        }

        if let Some(name) = lookup("INSTALLATION_NAME").filter(|n| !n.is_empty()) {
            config.installation_name = name;
        }

        if let Some(device) = lookup("DEVICE_TYPE").filter(|d| !d.is_empty()) {
            config.device_type = device;
        }

        if let Some(hex_secret) = lookup("CONCORD_NETWORK_SECRET") {
            match parse_secret(&hex_secret) {
                Ok(secret) => config.network_secret = secret,
                Err(e) => tracing::warn!(error = %e, "Invalid CONCORD_NETWORK_SECRET, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("concord.db")
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            backoff_initial_ms: self.resend_backoff_initial_ms,
            backoff_max_ms: self.resend_backoff_max_ms.max(self.resend_backoff_initial_ms),
            sweep_interval: self.resend_interval,
            ..DeliveryPolicy::default()
        }
    }

    pub fn swarm_config(&self) -> SwarmConfig {
        SwarmConfig {
            bootstrap_peers_path: self.bootstrap_peers_file.clone(),
            listen_port: self.listen_port,
            extra_dials: self.bootstrap_peers.clone(),
        }
    }
}

/// Parse a 64-character hex string into a 32-byte secret.
fn parse_secret(hex_secret: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(hex_secret.trim()).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> NodeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]);
        assert_eq!(config.listen_port, DEFAULT_QUIC_PORT);
        assert_eq!(config.key_file, config.data_dir.join("identity.json"));
        assert_eq!(config.delivery_policy().backoff_initial_ms, 1_000);
        assert!(config.bootstrap_peers.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CONCORD_DATA_DIR", "/tmp/node-a"),
            ("LISTEN_PORT", "5000"),
            ("RESEND_INTERVAL_SECS", "2"),
            ("RESEND_BACKOFF_INITIAL_MS", "250"),
            ("RESEND_BACKOFF_MAX_MS", "4000"),
            ("INSTALLATION_NAME", "laptop"),
            ("BOOTSTRAP_PEERS", "/ip4/127.0.0.1/udp/4101/quic-v1, garbage"),
        ]);

        assert_eq!(config.key_file, PathBuf::from("/tmp/node-a/identity.json"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/node-a/concord.db"));
        assert_eq!(config.listen_port, 5000);
        assert_eq!(config.installation_name, "laptop");
        assert_eq!(config.bootstrap_peers.len(), 1);

        let policy = config.delivery_policy();
        assert_eq!(policy.sweep_interval, Duration::from_secs(2));
        assert_eq!(policy.backoff(1), 250);
        assert_eq!(policy.backoff(10), 4_000);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("LISTEN_PORT", "not-a-port"),
            ("RESEND_INTERVAL_SECS", "0"),
            ("CONCORD_NETWORK_SECRET", "abcd"),
        ]);
        let defaults = NodeConfig::default();
        assert_eq!(config.listen_port, defaults.listen_port);
        assert_eq!(config.resend_interval, defaults.resend_interval);
        assert_eq!(config.network_secret, defaults.network_secret);
    }

    #[test]
    fn test_parse_secret() {
        assert_eq!(parse_secret(&"ab".repeat(32)).unwrap(), [0xab; 32]);
        assert!(parse_secret("abcd").is_err());
        assert!(parse_secret(&"zz".repeat(32)).is_err());
    }
}
