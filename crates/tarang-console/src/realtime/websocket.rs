use super::{finish_session, forward_message, socket_io_endpoint, SessionEnd, Transport, TransportError};
use crate::dispatch::ChannelEvent;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tarang_core::engineio::{
    EnginePacket, OpenHandshake, SocketPacket, DEFAULT_PING_TIMEOUT_MS,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) async fn run_session(
    base: &Url,
    tx: &mpsc::Sender<ChannelEvent>,
    upgraded: &AtomicBool,
) -> Result<SessionEnd, TransportError> {
    let url = socket_io_endpoint(base, Transport::WebSocket, None)?;
    let (mut ws, _) = connect_async(url.as_str()).await?;

    let handshake = match read_open(&mut ws).await {
        Ok(handshake) => handshake,
        Err(err) => {
            let _ = ws.close(None).await;
            return Err(err);
        }
    };
    info!(
        "realtime_open: transport=websocket sid={} ping_interval_ms={}",
        handshake.sid, handshake.ping_interval
    );

    let mut connected = false;
    let result = match send_packet(&mut ws, &EnginePacket::socket(&SocketPacket::connect_default())).await {
        Ok(()) => drive(&mut ws, &handshake, tx, upgraded, &mut connected).await,
        Err(err) => Err(err),
    };
    let _ = ws.close(None).await;
    finish_session(result, connected)
}

async fn read_open(ws: &mut WsStream) -> Result<OpenHandshake, TransportError> {
    let wait = Duration::from_millis(DEFAULT_PING_TIMEOUT_MS);
    let text = timeout(wait, next_text(ws))
        .await
        .map_err(|_| TransportError::Handshake("no open packet".to_string()))??
        .ok_or_else(|| TransportError::Closed("closed during handshake".to_string()))?;
    match EnginePacket::decode(&text)? {
        EnginePacket::Open(handshake) => Ok(handshake),
        other => Err(TransportError::Handshake(format!(
            "expected open packet, got {}",
            other.encode()
        ))),
    }
}

/// Next text frame, skipping control frames. `None` once the peer closes.
pub(crate) async fn next_text(ws: &mut WsStream) -> Result<Option<String>, TransportError> {
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => return Ok(Some(text)),
            Message::Close(_) => return Ok(None),
            Message::Binary(_) => {
                return Err(tarang_core::engineio::ProtocolError::Binary.into());
            }
            _ => {}
        }
    }
    Ok(None)
}

pub(crate) async fn send_packet(ws: &mut WsStream, packet: &EnginePacket) -> Result<(), TransportError> {
    ws.send(Message::Text(packet.encode())).await?;
    Ok(())
}

/// Pumps an open websocket until the server goes away or stops answering.
/// `upgraded` is set once the namespace connect has been accepted.
pub(crate) async fn drive(
    ws: &mut WsStream,
    handshake: &OpenHandshake,
    tx: &mpsc::Sender<ChannelEvent>,
    upgraded: &AtomicBool,
    connected: &mut bool,
) -> Result<(), TransportError> {
    let deadline = handshake.heartbeat_deadline();
    loop {
        let text = match timeout(deadline, next_text(ws)).await {
            Err(_) => return Err(TransportError::HeartbeatTimeout(deadline)),
            Ok(frame) => match frame? {
                Some(text) => text,
                None => return Ok(()),
            },
        };
        let packet = match EnginePacket::decode(&text) {
            Ok(packet) => packet,
            Err(err) => {
                warn!("realtime_packet_invalid: {err}");
                continue;
            }
        };
        match packet {
            EnginePacket::Ping(body) => send_packet(ws, &EnginePacket::Pong(body)).await?,
            EnginePacket::Message(body) => {
                forward_message(&body, tx, connected).await?;
                if *connected && !upgraded.swap(true, Ordering::SeqCst) {
                    debug!("realtime_websocket_remembered");
                }
            }
            EnginePacket::Close => return Ok(()),
            EnginePacket::Open(_) => debug!("realtime_unexpected_open"),
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
        }
    }
}
