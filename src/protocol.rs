//! Inspection of JSON text frames flowing through the bridge.
//!
//! Classification only: the pumps decide what to do with the result. Server
//! frames are always forwarded to the client; client frames are forwarded
//! unless they are a local `reset` directive.

use crate::audio::StreamBoundary;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    Forward,
    /// Consumed locally: clear the uplink buffer, do not forward.
    Reset,
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn str_field<'a>(msg: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    msg.get(key).and_then(Value::as_str)
}

/// Detect a TTS stream boundary in a server frame.
pub fn server_boundary(text: &str) -> Option<StreamBoundary> {
    let msg = parse_object(text)?;
    if str_field(&msg, "type") != Some("tts") {
        return None;
    }
    match str_field(&msg, "state") {
        Some("start") => Some(StreamBoundary::Start),
        Some("stop") => Some(StreamBoundary::Stop),
        _ => None,
    }
}

/// Decide whether a client frame goes upstream.
///
/// JSON arrays and anything that is not JSON are forwarded untouched.
pub fn client_action(text: &str) -> ClientAction {
    match parse_object(text) {
        Some(msg) if str_field(&msg, "type") == Some("reset") => ClientAction::Reset,
        _ => ClientAction::Forward,
    }
}
