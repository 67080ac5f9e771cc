//! Socket.IO client over Engine.IO v4.
//!
//! A background task owns the transport and reconnects with backoff; the
//! controller only sees an ordered stream of [`ChannelEvent`]s.

mod polling;
mod websocket;

use crate::dispatch::ChannelEvent;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tarang_core::engineio::{ProtocolError, SocketPacket, DEFAULT_NAMESPACE, ENGINE_IO_VERSION};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    WebSocket,
    Polling,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::WebSocket => "websocket",
            Transport::Polling => "polling",
        }
    }

    /// Parses a comma separated preference list, skipping unknown names
    /// and duplicates.
    pub fn parse_list(raw: &str) -> Vec<Transport> {
        let mut out = Vec::new();
        for item in raw.split(',') {
            match item.parse::<Transport>() {
                Ok(transport) if !out.contains(&transport) => out.push(transport),
                Ok(_) => {}
                Err(_) => {
                    if !item.trim().is_empty() {
                        warn!("realtime_transport_unknown: {}", item.trim());
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Transport::WebSocket),
            "polling" | "long-polling" => Ok(Transport::Polling),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub transports: Vec<Transport>,
    pub upgrade: bool,
    pub remember_upgrade: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            transports: vec![Transport::WebSocket, Transport::Polling],
            upgrade: true,
            remember_upgrade: true,
        }
    }
}

impl ConnectionOptions {
    /// Transports to try for the next session, in order.
    pub fn attempt_order(&self, upgraded_before: bool) -> Vec<Transport> {
        let mut order = self.transports.clone();
        if order.is_empty() {
            order = ConnectionOptions::default().transports;
        }
        if self.remember_upgrade && upgraded_before {
            order.retain(|transport| *transport != Transport::WebSocket);
            order.insert(0, Transport::WebSocket);
        }
        order
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("handshake: {0}")]
    Handshake(String),
    #[error("no heartbeat within {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("closed: {0}")]
    Closed(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("namespace connect refused: {0}")]
    ConnectRefused(String),
    #[error("event receiver dropped")]
    ChannelClosed,
}

/// How a session that reached the connected state came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionEnd {
    pub reason: String,
}

/// Sessions that never connected report their error so the next transport
/// can be tried; connected ones always end with a [`SessionEnd`].
pub(crate) fn finish_session(
    result: Result<(), TransportError>,
    connected: bool,
) -> Result<SessionEnd, TransportError> {
    match (result, connected) {
        (Ok(()), true) => Ok(SessionEnd {
            reason: "transport close".to_string(),
        }),
        (Err(err), true) => Ok(SessionEnd {
            reason: err.to_string(),
        }),
        (Ok(()), false) => Err(TransportError::Closed(
            "closed before namespace connect".to_string(),
        )),
        (Err(err), false) => Err(err),
    }
}

pub fn socket_io_endpoint(
    base: &Url,
    transport: Transport,
    sid: Option<&str>,
) -> Result<Url, TransportError> {
    let mut url = base.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    let mut url = url
        .join("socket.io/")
        .map_err(|err| TransportError::Endpoint(err.to_string()))?;
    if transport == Transport::WebSocket {
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(TransportError::Endpoint(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::Endpoint(format!("cannot switch to {scheme}")))?;
    }
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("EIO", &ENGINE_IO_VERSION.to_string());
        query.append_pair("transport", transport.as_str());
        if let Some(sid) = sid {
            query.append_pair("sid", sid);
        }
    }
    Ok(url)
}

/// Decodes one Socket.IO packet and forwards what the controller cares
/// about. Only the default namespace is handled.
pub(crate) async fn forward_message(
    body: &str,
    tx: &mpsc::Sender<ChannelEvent>,
    connected: &mut bool,
) -> Result<(), TransportError> {
    let packet = match SocketPacket::decode(body) {
        Ok(packet) => packet,
        Err(err) => {
            warn!("realtime_packet_invalid: {err}");
            return Ok(());
        }
    };
    if packet.namespace() != DEFAULT_NAMESPACE {
        debug!("realtime_namespace_ignored: {}", packet.namespace());
        return Ok(());
    }
    let event = match &packet {
        SocketPacket::Connect { .. } => {
            if *connected {
                return Ok(());
            }
            *connected = true;
            ChannelEvent::Connected
        }
        SocketPacket::ConnectError { data, .. } => {
            let reason = data.as_ref().map(|value| value.to_string()).unwrap_or_default();
            return Err(TransportError::ConnectRefused(reason));
        }
        SocketPacket::Disconnect { .. } => {
            return Err(TransportError::Closed("io server disconnect".to_string()));
        }
        SocketPacket::Event { name, .. } => ChannelEvent::Message {
            name: name.clone(),
            data: packet.first_arg().cloned().unwrap_or(Value::Null),
        },
        SocketPacket::Ack { .. } => return Ok(()),
    };
    tx.send(event).await.map_err(|_| TransportError::ChannelClosed)
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}

async fn connection_loop(
    base: Url,
    options: ConnectionOptions,
    http: reqwest::Client,
    tx: mpsc::Sender<ChannelEvent>,
    upgraded: Arc<AtomicBool>,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let mut ended = None;
        for transport in options.attempt_order(upgraded.load(Ordering::SeqCst)) {
            let result = match transport {
                Transport::WebSocket => websocket::run_session(&base, &tx, &upgraded).await,
                Transport::Polling => {
                    polling::run_session(&base, &options, &http, &tx, &upgraded).await
                }
            };
            match result {
                Ok(end) => {
                    ended = Some(end);
                    break;
                }
                Err(TransportError::ChannelClosed) => return,
                Err(err) => warn!("realtime_connect_error: transport={transport} {err}"),
            }
        }

        if let Some(end) = ended {
            info!("realtime_disconnected: {}", end.reason);
            backoff = Duration::from_secs(1);
            let event = ChannelEvent::Disconnected { reason: end.reason };
            if tx.send(event).await.is_err() {
                return;
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

/// Handle to the background transport task. Dropping it stops the task.
#[derive(Debug)]
pub struct RealtimeClient {
    events: mpsc::Receiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
    upgraded: Arc<AtomicBool>,
}

impl RealtimeClient {
    pub fn spawn(base: Url, options: ConnectionOptions, http: reqwest::Client) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let upgraded = Arc::new(AtomicBool::new(false));
        info!(
            "realtime_client_start: url={base} transports={:?} upgrade={} remember_upgrade={}",
            options.transports, options.upgrade, options.remember_upgrade
        );
        let task = tokio::spawn(connection_loop(base, options, http, tx, upgraded.clone()));
        Self {
            events: rx,
            task: Some(task),
            upgraded,
        }
    }

    /// Wraps an existing event stream without a transport task.
    pub fn from_receiver(events: mpsc::Receiver<ChannelEvent>) -> Self {
        Self {
            events,
            task: None,
            upgraded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Whether a websocket session has been established at least once.
    pub fn upgraded(&self) -> bool {
        self.upgraded.load(Ordering::SeqCst)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
