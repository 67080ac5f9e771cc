use crate::dispatch::{ChannelEvent, Dispatcher, EventKind};
use crate::realtime::{ConnectionOptions, RealtimeClient};
use crate::state::ConsoleState;
use url::Url;

/// Builds the realtime client. Split out so tests can hand in a scripted
/// event stream.
pub trait Connector {
    fn connect(&self) -> RealtimeClient;
}

#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    base: Url,
    options: ConnectionOptions,
    http: reqwest::Client,
}

impl SocketIoConnector {
    pub fn new(base: Url, options: ConnectionOptions, http: reqwest::Client) -> Self {
        Self {
            base,
            options,
            http,
        }
    }
}

impl Connector for SocketIoConnector {
    fn connect(&self) -> RealtimeClient {
        RealtimeClient::spawn(self.base.clone(), self.options.clone(), self.http.clone())
    }
}

/// Owns the single realtime client of a controller.
#[derive(Debug)]
pub struct ConnectionManager<C> {
    connector: C,
    client: Option<RealtimeClient>,
    connects: u32,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            client: None,
            connects: 0,
        }
    }

    /// Returns the shared client, creating it on first use only.
    pub fn ensure_connection(&mut self) -> &mut RealtimeClient {
        let connector = &self.connector;
        let connects = &mut self.connects;
        self.client.get_or_insert_with(|| {
            *connects += 1;
            tracing::info!("realtime_connection_created");
            connector.connect()
        })
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Whether the client has held a websocket session.
    pub fn upgraded(&self) -> bool {
        self.client
            .as_ref()
            .map(RealtimeClient::upgraded)
            .unwrap_or(false)
    }

    /// How many clients were ever created.
    pub fn connect_count(&self) -> u32 {
        self.connects
    }

    /// Next event from the client. Pends forever while there is no client
    /// or once its stream has ended.
    pub async fn next_event(&mut self) -> ChannelEvent {
        let Some(client) = self.client.as_mut() else {
            return std::future::pending().await;
        };
        match client.next_event().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }
}

/// Registers the connect/disconnect and simulation handlers.
pub fn bind_handlers(dispatcher: &mut Dispatcher<ConsoleState>) {
    dispatcher.on(EventKind::Connect, |state, _| {
        tracing::info!("realtime_connected");
        state.set_connected(true);
    });
    dispatcher.on(EventKind::Disconnect, |state, event| {
        if let ChannelEvent::Disconnected { reason } = event {
            tracing::info!("realtime_disconnect: {reason}");
        }
        state.set_connected(false);
    });
    for kind in [
        EventKind::SimulationOutput,
        EventKind::SimulationComplete,
        EventKind::SimulationError,
    ] {
        dispatcher.on(kind, |state, event| {
            state.on_simulation_event(event);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::sync::mpsc;

    struct CountingConnector {
        calls: Cell<u32>,
    }

    impl Connector for CountingConnector {
        fn connect(&self) -> RealtimeClient {
            self.calls.set(self.calls.get() + 1);
            let (_tx, rx) = mpsc::channel(1);
            RealtimeClient::from_receiver(rx)
        }
    }

    #[test]
    fn connection_is_created_once() {
        let mut manager = ConnectionManager::new(CountingConnector {
            calls: Cell::new(0),
        });
        assert!(!manager.is_connected());
        manager.ensure_connection();
        manager.ensure_connection();
        manager.ensure_connection();
        assert_eq!(manager.connector.calls.get(), 1);
        assert_eq!(manager.connect_count(), 1);
        assert!(manager.is_connected());
    }

    #[test]
    fn every_event_kind_is_bound() {
        let mut dispatcher = Dispatcher::new();
        bind_handlers(&mut dispatcher);
        for kind in [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::SimulationOutput,
            EventKind::SimulationComplete,
            EventKind::SimulationError,
        ] {
            assert!(dispatcher.has_handlers(kind), "{kind} unbound");
        }
    }
}
