//! Client configuration (figment-deserialized from defaults /
//! driftchat.toml / env vars).
//!
//! Two equivalent ways to configure:
//!
//!   driftchat.toml:  [socket]
//!                    reconnect_max_attempts = 5
//!
//!   env var:         DRIFTCHAT_SOCKET__RECONNECT_MAX_ATTEMPTS=5
//!                    (double underscore = section nesting)
//!
//! Retry defaults mirror the backend's published socket options:
//! 5 attempts, 1s base delay, 5s delay cap, 20s connect timeout.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub socket: SocketConfig,
}

/// REST collaborator tunables (lives under `[api]` in driftchat.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_secs: default_api_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Realtime channel tunables (lives under `[socket]` in driftchat.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: default_socket_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

impl SocketConfig {
    /// The bounded retry budget driven by the transport.
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.reconnect_max_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// Bounded reconnection budget: a fixed maximum attempt count with
/// capped exponential backoff between attempts.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl RetryPolicy {
    /// Backoff before `attempt` (1-based): base × 2^(attempt-1),
    /// clamped to the configured maximum.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:5001/api".to_string()
}
fn default_api_timeout_secs() -> u64 {
    30
}
fn default_socket_url() -> String {
    "ws://127.0.0.1:5001/socket".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    20
}
fn default_reconnect_max_attempts() -> u32 {
    5
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    5000
}

impl ClientConfig {
    /// Layer defaults → `driftchat.toml` in `dir` → `DRIFTCHAT_*` env
    /// vars, and extract the merged configuration.
    pub fn load(dir: &Path) -> figment::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        Figment::from(Serialized::defaults(ClientConfig::default()))
            .merge(Toml::file(dir.join("driftchat.toml")))
            .merge(Env::prefixed("DRIFTCHAT_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_socket_options() {
        let config = ClientConfig::default();
        assert_eq!(config.socket.reconnect_max_attempts, 5);
        assert_eq!(config.socket.reconnect_base_delay_ms, 1000);
        assert_eq!(config.socket.reconnect_max_delay_ms, 5000);
        assert_eq!(config.socket.connect_timeout_secs, 20);
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let retry = SocketConfig::default().retry();
        assert_eq!(retry.delay_for(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for(3), Duration::from_millis(4000));
        // Capped from here on
        assert_eq!(retry.delay_for(4), Duration::from_millis(5000));
        assert_eq!(retry.delay_for(50), Duration::from_millis(5000));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("driftchat.toml"),
            "[api]\nbase_url = \"https://chat.example.com/api\"\n\n[socket]\nreconnect_max_attempts = 9\n",
        )
        .unwrap();

        let config = ClientConfig::load(tmp.path()).unwrap();
        assert_eq!(config.api.base_url, "https://chat.example.com/api");
        assert_eq!(config.socket.reconnect_max_attempts, 9);
        // Untouched keys keep their defaults
        assert_eq!(config.socket.reconnect_base_delay_ms, 1000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(tmp.path()).unwrap();
        assert_eq!(config.api.base_url, default_api_base_url());
    }
}
