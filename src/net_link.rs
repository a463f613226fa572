//! Connection to the upstream device-protocol WebSocket server.

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::{generate_key, Request};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const PROTOCOL_VERSION: &str = "1";

/// Build the upgrade request carrying the device identity headers.
pub fn upstream_request(config: &BridgeConfig) -> Result<Request, BridgeError> {
    let url = Url::parse(&config.ws_url)?;
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(BridgeError::Config(format!("upstream url has no host: {}", url))),
    };

    let mut builder = Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header("Sec-WebSocket-Key", generate_key())
        .header("Device-Id", &config.device_id)
        .header("Client-Id", &config.client_id)
        .header("Protocol-Version", PROTOCOL_VERSION);

    if let Some(token) = config.bearer_token() {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    Ok(builder.body(())?)
}

pub async fn connect_upstream(config: &BridgeConfig) -> Result<UpstreamStream, BridgeError> {
    let request = upstream_request(config)?;

    log::info!("Connecting to {}...", config.ws_url);
    log::debug!("Upstream headers: {:?}", request.headers());

    let (ws_stream, response) = connect_async(request)
        .await
        .map_err(BridgeError::UpstreamConnect)?;
    log::info!("Connected to upstream (HTTP {})", response.status());

    Ok(ws_stream)
}
