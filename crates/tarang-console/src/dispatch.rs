use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tarang_core::{EVENT_SIMULATION_COMPLETE, EVENT_SIMULATION_ERROR, EVENT_SIMULATION_OUTPUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    SimulationOutput,
    SimulationComplete,
    SimulationError,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "connect" => Some(EventKind::Connect),
            "disconnect" => Some(EventKind::Disconnect),
            EVENT_SIMULATION_OUTPUT => Some(EventKind::SimulationOutput),
            EVENT_SIMULATION_COMPLETE => Some(EventKind::SimulationComplete),
            EVENT_SIMULATION_ERROR => Some(EventKind::SimulationError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::SimulationOutput => EVENT_SIMULATION_OUTPUT,
            EventKind::SimulationComplete => EVENT_SIMULATION_COMPLETE,
            EventKind::SimulationError => EVENT_SIMULATION_ERROR,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the realtime transport hands to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Message { name: String, data: Value },
}

impl ChannelEvent {
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            ChannelEvent::Connected => Some(EventKind::Connect),
            ChannelEvent::Disconnected { .. } => Some(EventKind::Disconnect),
            ChannelEvent::Message { name, .. } => EventKind::from_name(name),
        }
    }
}

pub type Handler<S> = Box<dyn FnMut(&mut S, &ChannelEvent) + Send>;

/// Routes channel events to the handlers registered for their kind, in
/// registration order.
pub struct Dispatcher<S> {
    handlers: HashMap<EventKind, Vec<Handler<S>>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> Dispatcher<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&mut S, &ChannelEvent) + Send + 'static,
    {
        self.handlers.entry(kind).or_default().push(Box::new(handler));
    }

    pub fn has_handlers(&self, kind: EventKind) -> bool {
        self.handlers
            .get(&kind)
            .map(|handlers| !handlers.is_empty())
            .unwrap_or(false)
    }

    /// Returns how many handlers ran.
    pub fn dispatch(&mut self, state: &mut S, event: &ChannelEvent) -> usize {
        let Some(kind) = event.kind() else {
            if let ChannelEvent::Message { name, .. } = event {
                tracing::debug!("dispatch_unknown_event: name={name}");
            }
            return 0;
        };
        let Some(handlers) = self.handlers.get_mut(&kind) else {
            return 0;
        };
        for handler in handlers.iter_mut() {
            handler(state, event);
        }
        handlers.len()
    }
}

impl<S> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| (kind.as_str(), handlers.len()))
            .collect();
        kinds.sort();
        f.debug_struct("Dispatcher").field("handlers", &kinds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handlers_run_in_registration_order() {
        let mut dispatcher: Dispatcher<Vec<&'static str>> = Dispatcher::new();
        dispatcher.on(EventKind::Connect, |log, _| log.push("first"));
        dispatcher.on(EventKind::Connect, |log, _| log.push("second"));
        let mut log = Vec::new();
        assert_eq!(dispatcher.dispatch(&mut log, &ChannelEvent::Connected), 2);
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn unknown_event_names_are_dropped() {
        let mut dispatcher: Dispatcher<u32> = Dispatcher::new();
        dispatcher.on(EventKind::SimulationOutput, |count, _| *count += 1);
        let mut count = 0;
        let event = ChannelEvent::Message {
            name: "telemetry".to_string(),
            data: json!({}),
        };
        assert_eq!(dispatcher.dispatch(&mut count, &event), 0);
        assert_eq!(count, 0);
    }

    #[test]
    fn message_kind_follows_event_name() {
        let event = ChannelEvent::Message {
            name: "simulation_complete".to_string(),
            data: json!({"process_id": 1}),
        };
        assert_eq!(event.kind(), Some(EventKind::SimulationComplete));
        assert_eq!(
            ChannelEvent::Disconnected {
                reason: "transport close".to_string()
            }
            .kind(),
            Some(EventKind::Disconnect)
        );
    }
}
