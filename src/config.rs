use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{DaemonError, Result};

/// Boot-time configuration for the daemon.
///
/// Resolution order per field: environment variable, then the value baked
/// in by `Default`. The auth token additionally resolves through the OS
/// keychain before falling back to config, via `store_auth_token`/
/// `load_auth_token` below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub device_id: String,
    pub restaurant_id: String,
    pub restaurant_name: String,

    pub cloud_base_url: String,
    pub cloud_anon_key: String,
    pub cloud_auth_token: Option<String>,

    pub ingress_bind: String,
    pub notifier_bind: String,

    pub claim_ttl_seconds: u64,
    pub subscribe_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub poll_overlap_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub staleness_sweep_seconds: u64,
    pub staleness_threshold_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            restaurant_id: String::new(),
            restaurant_name: String::new(),
            cloud_base_url: "https://example.supabase.co".to_string(),
            cloud_anon_key: "replace-with-anon-key".to_string(),
            cloud_auth_token: None,
            ingress_bind: "0.0.0.0:3333".to_string(),
            notifier_bind: "0.0.0.0:3334".to_string(),
            claim_ttl_seconds: 30,
            subscribe_timeout_seconds: 15,
            poll_interval_seconds: 3,
            poll_overlap_seconds: 5,
            heartbeat_interval_seconds: 60,
            staleness_sweep_seconds: 60,
            staleness_threshold_seconds: 90,
        }
    }
}

impl DaemonConfig {
    /// Load from environment variables, falling back to defaults. This is
    /// the daemon's only supported boot path — parsing a config *file* is
    /// an external collaborator's job per the scope note in §1.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DAEMON_DEVICE_ID") {
            config.device_id = v;
        }
        config.restaurant_id = std::env::var("RESTAURANT_ID")
            .map_err(|_| DaemonError::Config("RESTAURANT_ID is required".into()))?;
        if let Ok(v) = std::env::var("RESTAURANT_NAME") {
            config.restaurant_name = v;
        }
        if let Ok(v) = std::env::var("CLOUD_BASE_URL") {
            config.cloud_base_url = v;
        }
        if let Ok(v) = std::env::var("CLOUD_ANON_KEY") {
            config.cloud_anon_key = v;
        }
        config.cloud_auth_token = load_auth_token().or_else(|| std::env::var("CLOUD_AUTH_TOKEN").ok());
        if let Ok(v) = std::env::var("INGRESS_BIND") {
            config.ingress_bind = v;
        }
        if let Ok(v) = std::env::var("NOTIFIER_BIND") {
            config.notifier_bind = v;
        }

        if config.restaurant_id.trim().is_empty() {
            return Err(DaemonError::Config("RESTAURANT_ID must not be empty".into()));
        }

        Ok(config)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_seconds)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.subscribe_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn poll_overlap(&self) -> Duration {
        Duration::from_secs(self.poll_overlap_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn store_path(&self) -> PathBuf {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .map(|p| p.join("Library/Application Support/hearth-bridge-daemon"))
                .unwrap_or_else(|| PathBuf::from("."))
        } else if cfg!(target_os = "windows") {
            dirs::config_dir()
                .map(|p| p.join("Hearth Bridge Daemon"))
                .unwrap_or_else(|| PathBuf::from("."))
        } else {
            dirs::config_dir()
                .map(|p| p.join("hearth-bridge-daemon"))
                .unwrap_or_else(|| PathBuf::from("."))
        };

        config_dir.join("daemon-store.db")
    }
}

const KEYRING_SERVICE: &str = "hearth-bridge-daemon";
const KEYRING_USER: &str = "cloud-auth-token";

pub fn store_auth_token(token: &str) -> std::result::Result<(), String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| format!("keyring init failed: {e}"))?;
    entry.set_password(token).map_err(|e| format!("keyring store failed: {e}"))
}

pub fn load_auth_token() -> Option<String> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()?;
    entry.get_password().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn missing_restaurant_id_is_fatal() {
        std::env::remove_var("RESTAURANT_ID");
        let result = DaemonConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn loads_overrides_from_env() {
        std::env::set_var("RESTAURANT_ID", "rest_1");
        std::env::set_var("INGRESS_BIND", "127.0.0.1:9999");
        let config = DaemonConfig::from_env().unwrap();
        assert_eq!(config.restaurant_id, "rest_1");
        assert_eq!(config.ingress_bind, "127.0.0.1:9999");
        std::env::remove_var("RESTAURANT_ID");
        std::env::remove_var("INGRESS_BIND");
    }
}
