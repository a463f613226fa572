use crate::device::resolve_local_ip;
use crate::error::OtaError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const OTA_TIMEOUT: Duration = Duration::from_secs(10);

/// Registers this bridge as a device before a session is allowed to open.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, device_id: &str, client_id: &str) -> Result<OtaResponse, OtaError>;
}

// ======================== Device descriptor ========================

#[derive(Serialize, Debug, Clone)]
pub struct ChipInfo {
    pub model: u32,
    pub cores: u32,
    pub revision: u32,
    pub features: u32,
}

#[derive(Serialize, Debug, Clone)]
pub struct ApplicationInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub idf_version: &'static str,
}

#[derive(Serialize, Debug, Clone)]
pub struct OtaPartition {
    pub label: &'static str,
}

#[derive(Serialize, Debug, Clone)]
pub struct BoardInfo {
    #[serde(rename = "type")]
    pub board_type: &'static str,
    pub ip: String,
    pub mac: String,
}

/// What the OTA endpoint is told about this device. The hardware fields
/// describe a stock ESP32-S3 board so the server treats the bridge like one.
#[derive(Serialize, Debug, Clone)]
pub struct DeviceDescriptor {
    pub version: u32,
    pub flash_size: u64,
    pub psram_size: u64,
    pub minimum_free_heap_size: u64,
    pub mac_address: String,
    pub uuid: String,
    pub chip_model_name: &'static str,
    pub chip_info: ChipInfo,
    pub application: ApplicationInfo,
    pub partition_table: Vec<Value>,
    pub ota: OtaPartition,
    pub board: BoardInfo,
}

impl DeviceDescriptor {
    pub fn new(device_id: &str, client_id: &str, local_ip: String) -> Self {
        Self {
            version: 2,
            flash_size: 16 * 1024 * 1024,
            psram_size: 0,
            minimum_free_heap_size: 8_318_916,
            mac_address: device_id.to_string(),
            uuid: client_id.to_string(),
            chip_model_name: env!("BOARD_CHIP_MODEL"),
            chip_info: ChipInfo {
                model: 9,
                cores: 2,
                revision: 2,
                features: 18,
            },
            application: ApplicationInfo {
                name: env!("APP_NAME"),
                version: env!("APP_VERSION"),
                idf_version: env!("APP_IDF_VERSION"),
            },
            partition_table: Vec::new(),
            ota: OtaPartition { label: "factory" },
            board: BoardInfo {
                board_type: env!("BOARD_TYPE"),
                ip: local_ip,
                mac: device_id.to_string(),
            },
        }
    }
}

// ======================== Response ========================

#[derive(Debug, Deserialize, Default)]
pub struct OtaResponse {
    pub activation: Option<ActivationInfo>,
    pub websocket: Option<Value>,
    pub mqtt: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ActivationInfo {
    pub code: Option<String>,
    pub message: Option<String>,
}

// ======================== HTTP registrar ========================

pub struct OtaClient {
    client: Client,
    ota_url: String,
}

impl OtaClient {
    pub fn new(ota_url: impl Into<String>) -> Result<Self, OtaError> {
        Self::with_timeout(ota_url, OTA_TIMEOUT)
    }

    pub fn with_timeout(ota_url: impl Into<String>, timeout: Duration) -> Result<Self, OtaError> {
        // The OTA server is contacted directly, never through an env-configured proxy.
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            client,
            ota_url: ota_url.into(),
        })
    }
}

#[async_trait]
impl Registrar for OtaClient {
    async fn register(&self, device_id: &str, client_id: &str) -> Result<OtaResponse, OtaError> {
        let local_ip = resolve_local_ip().await;
        let descriptor = DeviceDescriptor::new(device_id, client_id, local_ip.to_string());

        log::info!("Registering device {} with OTA server: {}", device_id, self.ota_url);

        let resp = self
            .client
            .post(&self.ota_url)
            .header("Device-Id", device_id)
            .header("Content-Type", "application/json")
            .json(&descriptor)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            log::error!("OTA server error: HTTP {}", status);
            return Err(OtaError::Status(status.as_u16()));
        }

        // Only the status decides success; the body is informational.
        let body = match resp.json::<Value>().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(OtaError::Timeout),
            Err(e) => {
                log::warn!("OTA response is not valid JSON: {}", e);
                return Ok(OtaResponse::default());
            }
        };
        log::debug!("OTA server returned: {}", body);

        let response: OtaResponse = serde_json::from_value(body).unwrap_or_else(|e| {
            log::warn!("Unexpected OTA response shape: {}", e);
            OtaResponse::default()
        });

        if let Some(activation) = &response.activation {
            if let Some(code) = activation.code.as_deref() {
                log::warn!(
                    "Device is not activated yet, activation code: {} ({})",
                    code,
                    activation.message.as_deref().unwrap_or("no message")
                );
            }
        }
        if let Some(websocket) = &response.websocket {
            log::debug!("OTA provided WebSocket settings (unused): {}", websocket);
        }
        if let Some(mqtt) = &response.mqtt {
            log::debug!("OTA provided MQTT settings (unused): {}", mqtt);
        }

        Ok(response)
    }
}
