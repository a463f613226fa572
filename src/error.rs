use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Why device registration with the OTA endpoint failed.
#[derive(Debug, Error)]
pub enum OtaError {
    #[error("OTA server returned HTTP {0}")]
    Status(u16),

    #[error("OTA request timed out")]
    Timeout,

    #[error("cannot reach OTA server: {0}")]
    Connect(#[source] reqwest::Error),
}

impl From<reqwest::Error> for OtaError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            OtaError::Timeout
        } else {
            OtaError::Connect(e)
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("device registration failed: {0}")]
    Registration(#[from] OtaError),

    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("cannot build upstream request: {0}")]
    Request(#[from] tungstenite::http::Error),

    #[error("upstream connect failed: {0}")]
    UpstreamConnect(#[source] tungstenite::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("codec setup failed: {0}")]
    Codec(String),
}

impl BridgeError {
    /// Setup errors keep a session from ever reaching the bridging state.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            BridgeError::Registration(_)
                | BridgeError::InvalidUrl(_)
                | BridgeError::Request(_)
                | BridgeError::UpstreamConnect(_)
                | BridgeError::InvalidAddress(_)
                | BridgeError::Config(_)
                | BridgeError::Codec(_)
        )
    }
}
