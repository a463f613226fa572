//! WebSocket bridge between a browser client speaking raw float32 PCM and a
//! xiaozhi device-protocol server speaking Opus.

pub mod audio;
pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod net_link;
pub mod ota;
pub mod protocol;
pub mod server;

pub use bridge::{ConnectionBridge, PumpExit, SessionState};
pub use config::{BridgeConfig, ConfigStore};
pub use error::{BridgeError, OtaError};
pub use ota::{OtaClient, Registrar};
pub use server::BridgeServer;
