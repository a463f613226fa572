use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use xiaozhi_bridge::config::{self, BridgeConfig, ConfigStore};
use xiaozhi_bridge::{BridgeServer, OtaClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info 级别，可用 RUST_LOG 覆盖
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 加载配置，第一个命令行参数可指定配置文件路径
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let mut store = ConfigStore::load(&config_path).context("loading configuration")?;

    // 旧版本配置文件可能缺少设备标识，补全后写回，保持重启间身份一致
    let bridge_config = BridgeConfig::from_store(&store)?;
    if store.get(config::DEVICE_ID).is_none_or(|v| v.is_empty()) && !bridge_config.device_id.is_empty() {
        store.set(config::DEVICE_ID, bridge_config.device_id.as_str());
        store.save()?;
    }
    if store.get(config::CLIENT_ID).is_none_or(|v| v.is_empty()) {
        store.set(config::CLIENT_ID, bridge_config.client_id.as_str());
        store.save()?;
    }

    log::info!("Proxy address: {}", bridge_config.listen_addr());
    log::info!("Device ID: {}", bridge_config.device_id);
    log::info!("Client ID: {}", bridge_config.client_id);
    log::info!("WebSocket URL: {}", bridge_config.ws_url);
    log::info!("OTA URL: {}", bridge_config.ota_version_url);

    let registrar = Arc::new(OtaClient::new(bridge_config.ota_version_url.clone())?);
    let server = BridgeServer::new(Arc::new(bridge_config), registrar);

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
        }
    }
    Ok(())
}
