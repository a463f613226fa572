use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    application: Application,
    board: Board,
    network: Network,
    proxy: Endpoint,
    backend: Endpoint,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
    idf_version: String,
}

#[derive(Deserialize)]
struct Board {
    #[serde(rename = "type")]
    type_: String,
    chip_model: String,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    ota_version_url: String,
    token_enable: bool,
    device_token: String,
}

#[derive(Deserialize)]
struct Endpoint {
    host: String,
    port: u16,
}

// 在编译时读取 config.toml 并设置环境变量，作为运行时配置文件的默认值
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 设备描述信息（OTA 注册使用）
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);
    println!("cargo:rustc-env=APP_IDF_VERSION={}", config.application.idf_version);
    println!("cargo:rustc-env=BOARD_TYPE={}", config.board.type_);
    println!("cargo:rustc-env=BOARD_CHIP_MODEL={}", config.board.chip_model);

    // 网络配置
    println!("cargo:rustc-env=DEFAULT_WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=DEFAULT_OTA_VERSION_URL={}", config.network.ota_version_url);
    println!("cargo:rustc-env=DEFAULT_TOKEN_ENABLE={}", config.network.token_enable);
    println!("cargo:rustc-env=DEFAULT_DEVICE_TOKEN={}", config.network.device_token);

    // 代理与后端监听地址
    println!("cargo:rustc-env=DEFAULT_PROXY_HOST={}", config.proxy.host);
    println!("cargo:rustc-env=DEFAULT_PROXY_PORT={}", config.proxy.port);
    println!("cargo:rustc-env=DEFAULT_BACKEND_HOST={}", config.backend.host);
    println!("cargo:rustc-env=DEFAULT_BACKEND_PORT={}", config.backend.port);
}
