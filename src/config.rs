//! Configuration.
//!
//! `ConfigStore` is the persisted key-value provider shared with the external
//! settings API (`get`/`set`/`save`). Defaults come from `config.toml`, baked
//! in at compile time by `build.rs`. `BridgeConfig` is the typed, read-only
//! snapshot the bridge actually runs on.

use crate::device::resolve_device_id;
use crate::error::BridgeError;
use anyhow::Context;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

pub const WS_URL: &str = "WS_URL";
pub const OTA_VERSION_URL: &str = "OTA_VERSION_URL";
pub const TOKEN_ENABLE: &str = "TOKEN_ENABLE";
pub const DEVICE_TOKEN: &str = "DEVICE_TOKEN";
pub const PROXY_HOST: &str = "PROXY_HOST";
pub const PROXY_PORT: &str = "PROXY_PORT";
pub const BACKEND_HOST: &str = "BACKEND_HOST";
pub const BACKEND_PORT: &str = "BACKEND_PORT";
pub const DEVICE_ID: &str = "DEVICE_ID";
pub const CLIENT_ID: &str = "CLIENT_ID";

/// Compile-time defaults, without identity.
fn defaults() -> Map<String, Value> {
    let pairs = [
        (OTA_VERSION_URL, env!("DEFAULT_OTA_VERSION_URL")),
        (WS_URL, env!("DEFAULT_WS_URL")),
        (TOKEN_ENABLE, env!("DEFAULT_TOKEN_ENABLE")),
        (DEVICE_TOKEN, env!("DEFAULT_DEVICE_TOKEN")),
        (PROXY_HOST, env!("DEFAULT_PROXY_HOST")),
        (PROXY_PORT, env!("DEFAULT_PROXY_PORT")),
        (BACKEND_HOST, env!("DEFAULT_BACKEND_HOST")),
        (BACKEND_PORT, env!("DEFAULT_BACKEND_PORT")),
    ];
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

fn defaults_with_identity() -> Map<String, Value> {
    let mut values = defaults();
    values.insert(CLIENT_ID.into(), Value::String(Uuid::new_v4().to_string()));
    values.insert(DEVICE_ID.into(), Value::String(resolve_device_id()));
    values
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl ConfigStore {
    /// Load the JSON config file at `path`.
    ///
    /// A missing file is created from defaults with a fresh identity; a file
    /// that does not parse as a JSON object is reset the same way.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            log::info!("Config file not found, creating: {}", path.display());
            let store = Self {
                path,
                values: defaults_with_identity(),
            };
            store.save()?;
            return Ok(store);
        }

        log::info!("Loading config file: {}", path.display());
        let content =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;

        match serde_json::from_str::<Map<String, Value>>(&content) {
            Ok(values) => Ok(Self { path, values }),
            Err(e) => {
                log::warn!("Config file is malformed ({}), resetting to defaults", e);
                let store = Self {
                    path,
                    values: defaults_with_identity(),
                };
                store.save()?;
                Ok(store)
            }
        }
    }

    /// In-memory store over defaults; `save` still writes to `path`.
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: defaults(),
        }
    }

    /// Value for `key` rendered as a string. Numbers and booleans written by
    /// other tools are accepted; `null` counts as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, json).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

/// Settings one bridge process runs with. Built once at startup and shared
/// read-only by every session.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub ws_url: String,
    pub ota_version_url: String,
    pub token_enable: bool,
    pub device_token: String,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub device_id: String,
    pub client_id: String,
}

impl BridgeConfig {
    pub fn from_store(store: &ConfigStore) -> Result<Self, BridgeError> {
        let required = |key: &str| {
            store
                .get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| BridgeError::Config(format!("{} is not set", key)))
        };

        let proxy_port = required(PROXY_PORT)?;
        let proxy_port = proxy_port
            .parse()
            .map_err(|_| BridgeError::Config(format!("{} is not a port: {}", PROXY_PORT, proxy_port)))?;

        let device_id = match store.get(DEVICE_ID).filter(|v| !v.is_empty()) {
            Some(id) => id,
            None => resolve_device_id(),
        };
        if device_id.is_empty() {
            log::warn!("Device id is empty, upstream may reject this device");
        }

        let client_id = store
            .get(CLIENT_ID)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            ws_url: required(WS_URL)?,
            ota_version_url: required(OTA_VERSION_URL)?,
            token_enable: store.get(TOKEN_ENABLE).is_some_and(|v| parse_flag(&v)),
            device_token: store.get(DEVICE_TOKEN).unwrap_or_default(),
            proxy_host: required(PROXY_HOST)?,
            proxy_port,
            device_id,
            client_id,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }

    /// Bearer token to present upstream, if token use is enabled.
    pub fn bearer_token(&self) -> Option<&str> {
        self.token_enable.then_some(self.device_token.as_str())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("xiaozhi_bridge_{}_{}", name, Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn missing_file_is_created_with_identity() {
        let path = temp_path("create");
        let store = ConfigStore::load(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.get(WS_URL).as_deref(), Some(env!("DEFAULT_WS_URL")));
        let client_id = store.get(CLIENT_ID).unwrap();
        assert!(Uuid::parse_str(&client_id).is_ok());

        // Reloading keeps the same identity.
        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.get(CLIENT_ID), Some(client_id));
    }

    #[test]
    fn malformed_file_is_reset() {
        let path = temp_path("malformed");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::load(&path).unwrap();
        assert_eq!(store.get(PROXY_PORT).as_deref(), Some(env!("DEFAULT_PROXY_PORT")));
        assert!(serde_json::from_str::<Value>(&fs::read_to_string(&path).unwrap()).is_ok());
    }

    #[test]
    fn set_and_save_round_trip_with_non_string_values() {
        let path = temp_path("save");
        let mut store = ConfigStore::with_defaults(&path);
        store.set(PROXY_PORT, 6000);
        store.set(TOKEN_ENABLE, false);
        store.set(WS_URL, "ws://127.0.0.1:9000/xiaozhi/v1/");
        store.save().unwrap();

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(reloaded.get(PROXY_PORT).as_deref(), Some("6000"));
        assert_eq!(reloaded.get(TOKEN_ENABLE).as_deref(), Some("false"));

        let config = BridgeConfig::from_store(&reloaded).unwrap();
        assert_eq!(config.proxy_port, 6000);
        assert!(!config.token_enable);
        assert_eq!(config.bearer_token(), None);
        assert_eq!(config.ws_url, "ws://127.0.0.1:9000/xiaozhi/v1/");
    }

    #[test]
    fn bridge_config_fills_missing_identity() {
        let mut store = ConfigStore::with_defaults(temp_path("identity"));
        store.set(DEVICE_ID, "aa:bb:cc:dd:ee:ff");
        store.set(TOKEN_ENABLE, "TRUE");
        store.set(DEVICE_TOKEN, "secret");

        let config = BridgeConfig::from_store(&store).unwrap();
        assert_eq!(config.device_id, "aa:bb:cc:dd:ee:ff");
        assert!(Uuid::parse_str(&config.client_id).is_ok());
        assert_eq!(config.bearer_token(), Some("secret"));
    }

    #[test]
    fn bad_port_is_a_config_error() {
        let mut store = ConfigStore::with_defaults(temp_path("port"));
        store.set(PROXY_PORT, "not-a-port");
        assert!(matches!(BridgeConfig::from_store(&store), Err(BridgeError::Config(_))));
    }

    #[test]
    fn flags() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" True "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
