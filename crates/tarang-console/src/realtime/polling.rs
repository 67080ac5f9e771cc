use super::websocket::{self, WsStream};
use super::{
    finish_session, forward_message, socket_io_endpoint, ConnectionOptions, SessionEnd, Transport,
    TransportError,
};
use crate::dispatch::ChannelEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tarang_core::engineio::{
    decode_payload, encode_payload, EnginePacket, OpenHandshake, SocketPacket, PROBE,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn run_session(
    base: &Url,
    options: &ConnectionOptions,
    http: &reqwest::Client,
    tx: &mpsc::Sender<ChannelEvent>,
    upgraded: &AtomicBool,
) -> Result<SessionEnd, TransportError> {
    let handshake = open(base, http).await?;
    info!(
        "realtime_open: transport=polling sid={} upgrades={:?}",
        handshake.sid, handshake.upgrades
    );
    let url = socket_io_endpoint(base, Transport::Polling, Some(&handshake.sid))?;
    post_packets(
        http,
        &url,
        &[EnginePacket::socket(&SocketPacket::connect_default())],
    )
    .await?;

    let mut connected = false;
    let result = drive(base, options, http, &url, &handshake, tx, upgraded, &mut connected).await;
    finish_session(result, connected)
}

async fn open(base: &Url, http: &reqwest::Client) -> Result<OpenHandshake, TransportError> {
    let url = socket_io_endpoint(base, Transport::Polling, None)?;
    let body = http.get(url).send().await?.error_for_status()?.text().await?;
    let report = decode_payload(&body);
    report
        .frames
        .into_iter()
        .find_map(|packet| match packet {
            EnginePacket::Open(handshake) => Some(handshake),
            _ => None,
        })
        .ok_or_else(|| TransportError::Handshake("missing open packet".to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    base: &Url,
    options: &ConnectionOptions,
    http: &reqwest::Client,
    url: &Url,
    handshake: &OpenHandshake,
    tx: &mpsc::Sender<ChannelEvent>,
    upgraded: &AtomicBool,
    connected: &mut bool,
) -> Result<(), TransportError> {
    while !*connected {
        if poll_once(http, url, handshake, tx, connected).await? {
            return Ok(());
        }
    }

    if options.upgrade && handshake.allows_upgrade_to(Transport::WebSocket.as_str()) {
        match upgrade(base, &handshake.sid).await {
            Ok(mut ws) => {
                upgraded.store(true, Ordering::SeqCst);
                info!("realtime_upgraded: sid={}", handshake.sid);
                let result = websocket::drive(&mut ws, handshake, tx, upgraded, connected).await;
                let _ = ws.close(None).await;
                return result;
            }
            Err(err) => warn!("realtime_upgrade_failed: {err}"),
        }
    }

    loop {
        if poll_once(http, url, handshake, tx, connected).await? {
            return Ok(());
        }
    }
}

/// One long-poll round trip. Returns `true` when the server closed the
/// session.
async fn poll_once(
    http: &reqwest::Client,
    url: &Url,
    handshake: &OpenHandshake,
    tx: &mpsc::Sender<ChannelEvent>,
    connected: &mut bool,
) -> Result<bool, TransportError> {
    let deadline = handshake.heartbeat_deadline();
    let response = http
        .get(url.clone())
        .timeout(deadline)
        .send()
        .await
        .map_err(|err| {
            if err.is_timeout() {
                TransportError::HeartbeatTimeout(deadline)
            } else {
                TransportError::Http(err)
            }
        })?;
    let body = response.error_for_status()?.text().await?;

    let report = decode_payload(&body);
    for err in report.errors {
        warn!("realtime_packet_invalid: {err}");
    }
    for packet in report.frames {
        match packet {
            EnginePacket::Ping(body) => {
                post_packets(http, url, &[EnginePacket::Pong(body)]).await?;
            }
            EnginePacket::Message(body) => forward_message(&body, tx, connected).await?,
            EnginePacket::Close => return Ok(true),
            EnginePacket::Open(_)
            | EnginePacket::Pong(_)
            | EnginePacket::Upgrade
            | EnginePacket::Noop => {}
        }
    }
    Ok(false)
}

async fn post_packets(
    http: &reqwest::Client,
    url: &Url,
    packets: &[EnginePacket],
) -> Result<(), TransportError> {
    http.post(url.clone())
        .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(encode_payload(packets))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Probes a websocket for the existing session and switches to it.
async fn upgrade(base: &Url, sid: &str) -> Result<WsStream, TransportError> {
    let url = socket_io_endpoint(base, Transport::WebSocket, Some(sid))?;
    let (mut ws, _) = connect_async(url.as_str()).await?;
    websocket::send_packet(&mut ws, &EnginePacket::Ping(PROBE.to_string())).await?;

    let reply = timeout(PROBE_TIMEOUT, websocket::next_text(&mut ws))
        .await
        .map_err(|_| TransportError::Handshake("probe timed out".to_string()))??;
    match reply.as_deref().map(EnginePacket::decode) {
        Some(Ok(EnginePacket::Pong(body))) if body == PROBE => {}
        _ => {
            let _ = ws.close(None).await;
            return Err(TransportError::Handshake("probe not answered".to_string()));
        }
    }

    websocket::send_packet(&mut ws, &EnginePacket::Upgrade).await?;
    Ok(ws)
}
