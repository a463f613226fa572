use crate::bridge::ConnectionBridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::ota::Registrar;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts browser WebSocket connections and runs one `ConnectionBridge` per
/// connection. Sessions share nothing but the read-only config.
pub struct BridgeServer {
    config: Arc<BridgeConfig>,
    registrar: Arc<dyn Registrar>,
}

impl BridgeServer {
    pub fn new(config: Arc<BridgeConfig>, registrar: Arc<dyn Registrar>) -> Self {
        Self { config, registrar }
    }

    pub async fn bind(&self) -> Result<TcpListener, BridgeError> {
        let addr = self.config.listen_addr();
        let invalid = |e: std::io::Error| BridgeError::InvalidAddress(format!("{}: {}", addr, e));
        let listener = TcpListener::bind(&addr).await.map_err(invalid)?;
        let local = listener.local_addr().map_err(invalid)?;
        log::info!("Bridge listening on ws://{}", local);
        Ok(listener)
    }

    pub async fn run(&self) -> Result<(), BridgeError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept forever. Only a listener failure ends the loop early.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BridgeError> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    // Errors like EMFILE persist; back off instead of spinning.
                    log::error!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            let config = self.config.clone();
            let registrar = self.registrar.clone();
            tokio::spawn(async move {
                handle_connection(stream, peer, config, registrar).await;
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<BridgeConfig>,
    registrar: Arc<dyn Registrar>,
) {
    log::info!("New client connection: {}", peer);

    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let mut session = ConnectionBridge::new(config, registrar);
    match session.run(ws).await {
        Ok(exit) => log::info!("Client {} session closed ({:?})", peer, exit),
        Err(e) if e.is_setup() => log::error!("Client {} session never started: {}", peer, e),
        Err(e) => log::warn!("Client {} session failed: {}", peer, e),
    }
}
