//! One browser session relayed to the upstream server.
//!
//! `Registering → Connecting → Bridging → Closing → Closed`
//!
//! While bridging, two pumps run concurrently: the uplink pump reads the
//! client and writes upstream, the downlink pump reads upstream and writes the
//! client. Whichever finishes first ends the session; the other is dropped
//! mid-flight and any partially buffered audio is discarded.

use crate::audio::{DownlinkTranscoder, UplinkEncoder};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::net_link::{UpstreamStream, connect_upstream};
use crate::ota::Registrar;
use crate::protocol::{self, ClientAction};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registering,
    Connecting,
    Bridging,
    Closing,
    Closed,
}

/// Which side ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    ClientClosed,
    UpstreamClosed,
}

pub struct ConnectionBridge {
    config: Arc<BridgeConfig>,
    registrar: Arc<dyn Registrar>,
    state: SessionState,
}

impl ConnectionBridge {
    pub fn new(config: Arc<BridgeConfig>, registrar: Arc<dyn Registrar>) -> Self {
        Self {
            config,
            registrar,
            state: SessionState::Registering,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Drive the session to completion. Always ends in `Closed`.
    ///
    /// Setup failures (registration, upstream connect, codec init) are
    /// returned as errors and no bridging happens.
    pub async fn run<S>(&mut self, mut client: WebSocketStream<S>) -> Result<PumpExit, BridgeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.setup().await {
            Ok((upstream, uplink, downlink)) => {
                self.transition(SessionState::Bridging);
                let result = self.bridge(client, upstream, uplink, downlink).await;
                self.transition(SessionState::Closed);
                result
            }
            Err(e) => {
                log::error!("Session setup failed: {}", e);
                let frame = CloseFrame {
                    code: CloseCode::Error,
                    reason: "upstream session setup failed".into(),
                };
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, client.close(Some(frame))).await;
                self.transition(SessionState::Closed);
                Err(e)
            }
        }
    }

    async fn setup(&mut self) -> Result<(UpstreamStream, UplinkEncoder, DownlinkTranscoder), BridgeError> {
        self.registrar
            .register(&self.config.device_id, &self.config.client_id)
            .await?;
        log::info!("Device {} registered", self.config.device_id);

        self.transition(SessionState::Connecting);
        let uplink = UplinkEncoder::new().map_err(|e| BridgeError::Codec(e.to_string()))?;
        let downlink = DownlinkTranscoder::new().map_err(|e| BridgeError::Codec(e.to_string()))?;
        let upstream = connect_upstream(&self.config).await?;

        Ok((upstream, uplink, downlink))
    }

    /// Run both pumps until one finishes, then close both sockets.
    async fn bridge<C, U>(
        &mut self,
        client: WebSocketStream<C>,
        upstream: WebSocketStream<U>,
        mut uplink: UplinkEncoder,
        downlink: DownlinkTranscoder,
    ) -> Result<PumpExit, BridgeError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
        U: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_tx, mut client_rx) = client.split();
        let (mut upstream_tx, mut upstream_rx) = upstream.split();

        let result = tokio::select! {
            r = uplink_pump(&mut client_rx, &mut upstream_tx, &mut uplink) => r.map(|_| PumpExit::ClientClosed),
            r = downlink_pump(&mut upstream_rx, &mut client_tx, &downlink) => r.map(|_| PumpExit::UpstreamClosed),
        };

        self.transition(SessionState::Closing);
        match &result {
            Ok(exit) => log::info!("Session ending: {:?}", exit),
            Err(e) => log::warn!("Session ending on error: {}", e),
        }

        // A dead peer must not keep the session alive.
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, upstream_tx.close()).await;
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, client_tx.close()).await;

        result.map_err(BridgeError::from)
    }
}

/// Client → upstream. Returns when the client goes away.
pub async fn uplink_pump<R, W>(
    client_rx: &mut R,
    upstream_tx: &mut W,
    uplink: &mut UplinkEncoder,
) -> Result<(), WsError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(msg) = client_rx.next().await {
        match msg? {
            Message::Binary(data) => {
                for packet in uplink.on_pcm_chunk(&data) {
                    upstream_tx.send(Message::Binary(packet.into())).await?;
                }
            }
            Message::Text(text) => match protocol::client_action(text.as_str()) {
                ClientAction::Reset => {
                    log::info!("Client requested reset, clearing uplink buffer");
                    uplink.reset();
                }
                ClientAction::Forward => {
                    log::debug!("Client text: {}", text.as_str());
                    upstream_tx.send(Message::Text(text)).await?;
                }
            },
            Message::Close(frame) => {
                log::info!("Client closed connection: {:?}", frame);
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}

/// Upstream → client. Returns when the upstream server goes away.
pub async fn downlink_pump<R, W>(
    upstream_rx: &mut R,
    client_tx: &mut W,
    downlink: &DownlinkTranscoder,
) -> Result<(), WsError>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(msg) = upstream_rx.next().await {
        match msg? {
            Message::Binary(data) => {
                downlink.on_opus_frame(&data, client_tx).await?;
            }
            Message::Text(text) => {
                log::debug!("Upstream text: {}", text.as_str());
                if let Some(boundary) = protocol::server_boundary(text.as_str()) {
                    downlink.on_stream_boundary(boundary, client_tx).await?;
                }
                client_tx.send(Message::Text(text)).await?;
            }
            Message::Close(frame) => {
                log::info!("Server closed connection: {:?}", frame);
                return Ok(());
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{FRAME_SIZE, OpusEncoder};
    use futures_util::stream;
    use std::convert::Infallible;

    type Frames = Vec<Result<Message, WsError>>;

    fn floats(count: usize) -> Message {
        let raw: Vec<u8> = std::iter::repeat_n(0.2f32, count).flat_map(f32::to_le_bytes).collect();
        Message::Binary(raw.into())
    }

    /// Collects everything sent, typed like a websocket sink.
    fn collector() -> futures_util::sink::SinkMapErr<Vec<Message>, fn(Infallible) -> WsError> {
        let never: fn(Infallible) -> WsError = |e| match e {};
        Vec::new().sink_map_err(never)
    }

    #[tokio::test]
    async fn uplink_encodes_forwards_and_consumes_reset() {
        let input: Frames = vec![
            Ok(floats(959)),
            Ok(floats(1)),
            Ok(Message::Text(r#"{"type":"listen","state":"start"}"#.into())),
            Ok(floats(500)),
            Ok(Message::Text(r#"{"type":"reset"}"#.into())),
            Ok(floats(500)),
            Ok(Message::Text("[1,2]".into())),
        ];
        let mut client_rx = stream::iter(input);
        let mut upstream_tx = collector();
        let mut uplink = UplinkEncoder::new().unwrap();

        uplink_pump(&mut client_rx, &mut upstream_tx, &mut uplink).await.unwrap();
        let sent = upstream_tx.into_inner();

        assert_eq!(sent.len(), 3);
        assert!(matches!(&sent[0], Message::Binary(_)));
        assert_eq!(sent[1], Message::Text(r#"{"type":"listen","state":"start"}"#.into()));
        // The reset was swallowed and the pre-reset 500 samples never reached a frame.
        assert_eq!(sent[2], Message::Text("[1,2]".into()));
        assert_eq!(uplink.pending_samples(), 500);
    }

    #[tokio::test]
    async fn uplink_stops_at_close_frame() {
        let input: Frames = vec![Ok(Message::Close(None)), Ok(floats(1920))];
        let mut client_rx = stream::iter(input);
        let mut upstream_tx = collector();
        let mut uplink = UplinkEncoder::new().unwrap();

        uplink_pump(&mut client_rx, &mut upstream_tx, &mut uplink).await.unwrap();
        assert_eq!(uplink.pending_samples(), 0);
    }

    #[tokio::test]
    async fn uplink_propagates_read_errors() {
        let input: Frames = vec![Err(WsError::ConnectionClosed)];
        let mut client_rx = stream::iter(input);
        let mut upstream_tx = collector();
        let mut uplink = UplinkEncoder::new().unwrap();

        assert!(uplink_pump(&mut client_rx, &mut upstream_tx, &mut uplink).await.is_err());
    }

    #[tokio::test]
    async fn downlink_flushes_on_tts_start_before_forwarding() {
        let mut encoder = OpusEncoder::new().unwrap();
        let mut input: Frames = Vec::new();
        for _ in 0..2 {
            let packet = encoder.encode(&[0i16; FRAME_SIZE]).unwrap();
            input.push(Ok(Message::Binary(packet.into())));
        }
        let start = r#"{"type":"tts","state":"start","session_id":"s1"}"#;
        input.push(Ok(Message::Text(start.into())));
        input.push(Ok(Message::Text("plain text".into())));

        let mut upstream_rx = stream::iter(input);
        let mut client_tx = collector();
        let downlink = DownlinkTranscoder::new().unwrap();

        downlink_pump(&mut upstream_rx, &mut client_tx, &downlink).await.unwrap();
        let sent = client_tx.into_inner();

        assert_eq!(sent.len(), 3);
        match &sent[0] {
            Message::Binary(wav) => assert_eq!(wav.len(), 44 + 2 * FRAME_SIZE * 2),
            other => panic!("expected WAV first, got {other:?}"),
        }
        assert_eq!(sent[1], Message::Text(start.into()));
        assert_eq!(sent[2], Message::Text("plain text".into()));
        assert_eq!(downlink.buffered_len().await, 0);
    }

    #[tokio::test]
    async fn downlink_drops_undecodable_packets() {
        let input: Frames = vec![
            Ok(Message::Binary(vec![0xffu8, 0xff].into())),
            Ok(Message::Text(r#"{"type":"tts","state":"stop"}"#.into())),
        ];
        let mut upstream_rx = stream::iter(input);
        let mut client_tx = collector();
        let downlink = DownlinkTranscoder::new().unwrap();

        downlink_pump(&mut upstream_rx, &mut client_tx, &downlink).await.unwrap();

        // Only the stop marker arrives, no empty WAV.
        let sent = client_tx.into_inner();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Message::Text(_)));
    }
}
