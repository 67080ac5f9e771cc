//! The request controller: owns the console state, issues HTTP requests as
//! background tasks and folds their outcomes and realtime events back in.

use crate::api::{ApiError, SimulationApi};
use crate::batcher::DEFAULT_FLUSH_INTERVAL;
use crate::bootstrap::{self, SubmitOutcome, FRAME};
use crate::connection::{bind_handlers, ConnectionManager, Connector};
use crate::dispatch::{ChannelEvent, Dispatcher};
use crate::page::{Page, RUN_CONFIG_FORM_ID};
use crate::state::ConsoleState;
use crate::ui::NOTIFICATION_TTL;
use futures_util::future::{AbortHandle, Abortable};
use std::collections::HashMap;
use std::time::Duration;
use tarang_core::grid::GridDimension;
use tarang_core::{KillProcessResponse, ProcessId, ProcessStatus, StartSimulationResponse};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub enum RequestOutcome {
    Started {
        seq: u64,
        result: Result<StartSimulationResponse, ApiError>,
    },
    Stopped {
        process_id: ProcessId,
        result: Result<KillProcessResponse, ApiError>,
    },
    Status {
        process_id: ProcessId,
        result: Result<ProcessStatus, ApiError>,
    },
    ConfigSubmitted(Result<(), ApiError>),
}

#[derive(Debug)]
pub enum ControllerInput {
    Outcome(RequestOutcome),
    Channel(ChannelEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub flush_interval: Duration,
    pub notification_ttl: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            notification_ttl: NOTIFICATION_TTL,
        }
    }
}

pub struct Controller<A, C> {
    state: ConsoleState,
    dispatcher: Dispatcher<ConsoleState>,
    connection: ConnectionManager<C>,
    api: A,
    outcomes_tx: mpsc::UnboundedSender<RequestOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<RequestOutcome>,
    start_aborts: HashMap<u64, AbortHandle>,
    next_start_seq: u64,
    bootstrap_at: Option<Instant>,
}

impl<A, C> Controller<A, C>
where
    A: SimulationApi,
    C: Connector,
{
    pub fn new(api: A, connector: C, page: Page, settings: ControllerSettings) -> Self {
        let mut dispatcher = Dispatcher::new();
        bind_handlers(&mut dispatcher);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let state = ConsoleState::new(page, settings.flush_interval, settings.notification_ttl);
        let bootstrap_at = Some(state.now() + FRAME);
        Self {
            state,
            dispatcher,
            connection: ConnectionManager::new(connector),
            api,
            outcomes_tx,
            outcomes_rx,
            start_aborts: HashMap::new(),
            next_start_seq: 0,
            bootstrap_at,
        }
    }

    pub fn state(&self) -> &ConsoleState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConsoleState {
        &mut self.state
    }

    pub fn page(&self) -> &Page {
        &self.state.page
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrap_at.is_none()
    }

    pub fn start_in_flight(&self) -> bool {
        !self.start_aborts.is_empty()
    }

    /// Makes sure the realtime channel exists, then posts the start request.
    /// The request stays abortable until its answer arrives.
    pub fn start_simulation(&mut self) {
        self.connection.ensure_connection();

        self.next_start_seq += 1;
        let seq = self.next_start_seq;
        let (handle, registration) = AbortHandle::new_pair();
        let api = self.api.clone();
        let tx = self.outcomes_tx.clone();
        tokio::spawn(async move {
            match Abortable::new(api.start_simulation(), registration).await {
                Ok(result) => {
                    let _ = tx.send(RequestOutcome::Started { seq, result });
                }
                Err(_) => debug!("start_simulation_aborted: seq={seq}"),
            }
        });
        self.start_aborts.insert(seq, handle);
        info!(
            "start_simulation_requested: seq={seq} in_flight={}",
            self.start_aborts.len()
        );
    }

    /// Returns `false` without touching the network when no run is tracked.
    pub fn stop_simulation(&mut self) -> bool {
        let Some(process_id) = self.state.session.current().cloned() else {
            debug!("stop_simulation_skipped: no current process");
            return false;
        };
        let api = self.api.clone();
        let tx = self.outcomes_tx.clone();
        info!("stop_simulation_requested: process_id={process_id}");
        tokio::spawn(async move {
            let result = api.kill_process(&process_id).await;
            let _ = tx.send(RequestOutcome::Stopped { process_id, result });
        });
        true
    }

    /// Queries the current run, or the last finished one.
    pub fn refresh_process_status(&mut self) -> bool {
        let process_id = self
            .state
            .session
            .current()
            .or(self.state.session.last_finished())
            .cloned();
        let Some(process_id) = process_id else {
            return false;
        };
        let api = self.api.clone();
        let tx = self.outcomes_tx.clone();
        tokio::spawn(async move {
            let result = api.process_status(&process_id).await;
            let _ = tx.send(RequestOutcome::Status { process_id, result });
        });
        true
    }

    pub fn submit_run_config(&mut self) -> SubmitOutcome {
        let outcome = bootstrap::submit_form(&mut self.state.page, RUN_CONFIG_FORM_ID);
        if let SubmitOutcome::Submitted { fields } = &outcome {
            let api = self.api.clone();
            let tx = self.outcomes_tx.clone();
            let fields = fields.clone();
            tokio::spawn(async move {
                let result = api.submit_run_config(&fields).await;
                let _ = tx.send(RequestOutcome::ConfigSubmitted(result));
            });
        }
        outcome
    }

    pub fn change_dimension(&mut self, value: &str) -> bool {
        bootstrap::on_dimension_change(&mut self.state.page, value)
    }

    pub fn cycle_dimension(&mut self, forward: bool) -> Option<GridDimension> {
        bootstrap::cycle_dimension(&mut self.state.page, forward)
    }

    pub fn browse_files(&mut self, field_id: &str, answer: Option<&str>) -> bool {
        bootstrap::browse_files(&mut self.state.page, field_id, answer)
    }

    /// Waits for the next request outcome or realtime event.
    pub async fn next_input(&mut self) -> ControllerInput {
        tokio::select! {
            Some(outcome) = self.outcomes_rx.recv() => ControllerInput::Outcome(outcome),
            event = self.connection.next_event() => ControllerInput::Channel(event),
        }
    }

    pub fn handle_input(&mut self, input: ControllerInput, now: Instant) {
        match input {
            ControllerInput::Outcome(outcome) => self.handle_outcome(outcome, now),
            ControllerInput::Channel(event) => {
                self.handle_channel_event(&event, now);
            }
        }
    }

    pub fn handle_outcome(&mut self, outcome: RequestOutcome, now: Instant) {
        self.state.set_now(now);
        match outcome {
            RequestOutcome::Started { seq, result } => {
                if self.start_aborts.remove(&seq).is_none() {
                    debug!("start_simulation_outcome_dropped: seq={seq}");
                    return;
                }
                self.state.apply_start_response(result);
            }
            RequestOutcome::Stopped { process_id, result } => {
                self.state.apply_stop_response(&process_id, result);
            }
            RequestOutcome::Status { process_id, result } => {
                self.state.apply_process_status(&process_id, result);
            }
            RequestOutcome::ConfigSubmitted(result) => {
                self.state.apply_config_submission(result);
            }
        }
    }

    pub fn handle_channel_event(&mut self, event: &ChannelEvent, now: Instant) -> usize {
        self.state.set_now(now);
        self.dispatcher.dispatch(&mut self.state, event)
    }

    /// Runs whatever timers are due: deferred bootstrap, batch flush and
    /// notification expiry.
    pub fn tick(&mut self, now: Instant) {
        if let Some(at) = self.bootstrap_at {
            if now >= at {
                self.bootstrap_at = None;
                bootstrap::initialize_page_elements(&mut self.state.page);
            }
        }
        self.state.tick(now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.bootstrap_at, self.state.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Aborts every start request still waiting for an answer. Used on
    /// shutdown.
    pub fn cancel_start(&mut self) {
        for (_, handle) in self.start_aborts.drain() {
            handle.abort();
        }
    }
}

impl<A, C> Drop for Controller<A, C> {
    fn drop(&mut self) {
        for (_, handle) in self.start_aborts.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RealtimeClient;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeApi {
        calls: Arc<Mutex<Vec<String>>>,
        start_delay: Duration,
        start_response: Option<StartSimulationResponse>,
        start_script: Arc<Mutex<VecDeque<(Duration, StartSimulationResponse)>>>,
    }

    impl FakeApi {
        fn record(&self, call: String) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }

        /// Queues per-call answers, used before `start_delay`/`start_response`.
        fn script_start(&self, delay: Duration, response: StartSimulationResponse) {
            if let Ok(mut script) = self.start_script.lock() {
                script.push_back((delay, response));
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    impl SimulationApi for FakeApi {
        fn start_simulation(
            &self,
        ) -> impl Future<Output = Result<StartSimulationResponse, ApiError>> + Send {
            let this = self.clone();
            let scripted = this
                .start_script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front());
            async move {
                this.record("start".to_string());
                let (delay, response) = match scripted {
                    Some((delay, response)) => (delay, Some(response)),
                    None => (this.start_delay, this.start_response.clone()),
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                response.ok_or(ApiError::Status(500))
            }
        }

        fn kill_process(
            &self,
            process_id: &ProcessId,
        ) -> impl Future<Output = Result<KillProcessResponse, ApiError>> + Send {
            let this = self.clone();
            let call = format!("kill {process_id}");
            async move {
                this.record(call);
                Ok(KillProcessResponse::killed())
            }
        }

        fn process_status(
            &self,
            process_id: &ProcessId,
        ) -> impl Future<Output = Result<ProcessStatus, ApiError>> + Send {
            let this = self.clone();
            let call = format!("status {process_id}");
            async move {
                this.record(call);
                Ok(ProcessStatus::Running)
            }
        }

        fn submit_run_config(
            &self,
            fields: &[(String, String)],
        ) -> impl Future<Output = Result<(), ApiError>> + Send {
            let this = self.clone();
            let call = format!("config {}", fields.len());
            async move {
                this.record(call);
                Ok(())
            }
        }
    }

    struct ScriptedConnector {
        events: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    }

    impl ScriptedConnector {
        fn new() -> (Self, mpsc::Sender<ChannelEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Self {
                    events: Mutex::new(Some(rx)),
                },
                tx,
            )
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(&self) -> RealtimeClient {
            let rx = self
                .events
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .unwrap_or_else(|| mpsc::channel(1).1);
            RealtimeClient::from_receiver(rx)
        }
    }

    fn controller(api: FakeApi) -> (Controller<FakeApi, ScriptedConnector>, mpsc::Sender<ChannelEvent>) {
        let (connector, tx) = ScriptedConnector::new();
        (
            Controller::new(api, connector, Page::simulation(), ControllerSettings::default()),
            tx,
        )
    }

    async fn pump(controller: &mut Controller<FakeApi, ScriptedConnector>) {
        let input = controller.next_input().await;
        controller.handle_input(input, Instant::now());
    }

    fn settle(controller: &mut Controller<FakeApi, ScriptedConnector>) {
        controller.tick(Instant::now() + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_waits_one_frame() {
        let (mut controller, _tx) = controller(FakeApi::default());
        let created = controller.state().now();
        controller.tick(created);
        assert!(!controller.is_bootstrapped());
        assert!(!controller.page().dimension_listener);
        assert_eq!(controller.next_deadline(), Some(created + FRAME));

        controller.tick(created + FRAME);
        assert!(controller.is_bootstrapped());
        assert!(controller.page().dimension_listener);
    }

    #[tokio::test(start_paused = true)]
    async fn start_connects_once_and_renders_banner() {
        let api = FakeApi {
            start_response: Some(StartSimulationResponse::started(7u64)),
            ..FakeApi::default()
        };
        let (mut controller, _tx) = controller(api.clone());
        controller.start_simulation();
        assert!(controller.start_in_flight());
        pump(&mut controller).await;
        assert!(!controller.start_in_flight());
        settle(&mut controller);

        controller.start_simulation();
        pump(&mut controller).await;
        assert_eq!(controller.connection().connect_count(), 1);
        assert_eq!(api.calls(), vec!["start", "start"]);

        settle(&mut controller);
        let page = controller.page();
        assert_eq!(
            page.output.as_ref().map(|o| o.lines().to_vec()),
            Some(vec!["Starting simulation with Process ID: 7".to_string()])
        );
        assert_eq!(page.status.as_ref().map(|s| s.class.as_str()), Some("status-running"));
        assert_eq!(page.start_btn.as_ref().map(|b| b.disabled), Some(true));
        assert_eq!(page.stop_btn.as_ref().map(|b| b.disabled), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_process_makes_no_request() {
        let api = FakeApi::default();
        let (mut controller, _tx) = controller(api.clone());
        assert!(!controller.stop_simulation());
        assert!(!controller.refresh_process_status());
        tokio::task::yield_now().await;
        assert!(api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_targets_current_process() {
        let api = FakeApi {
            start_response: Some(StartSimulationResponse::started("11")),
            ..FakeApi::default()
        };
        let (mut controller, _tx) = controller(api.clone());
        controller.start_simulation();
        pump(&mut controller).await;

        assert!(controller.stop_simulation());
        pump(&mut controller).await;
        assert_eq!(api.calls(), vec!["start", "kill 11"]);
        assert_eq!(
            controller.page().status.as_ref().map(|s| s.text.as_str()),
            Some("Simulation stopped by user")
        );

        assert!(controller.refresh_process_status());
        pump(&mut controller).await;
        assert_eq!(api.calls().last().map(String::as_str), Some("status 11"));
    }

    #[tokio::test(start_paused = true)]
    async fn realtime_events_flow_through_dispatcher() {
        let api = FakeApi {
            start_response: Some(StartSimulationResponse::started(3u64)),
            ..FakeApi::default()
        };
        let (mut controller, tx) = controller(api);
        controller.start_simulation();
        pump(&mut controller).await;

        for event in [
            ChannelEvent::Connected,
            ChannelEvent::Message {
                name: "simulation_output".to_string(),
                data: json!({"process_id": 99, "output": "foreign"}),
            },
            ChannelEvent::Message {
                name: "simulation_output".to_string(),
                data: json!({"process_id": 3, "output": "t=1"}),
            },
            ChannelEvent::Message {
                name: "simulation_complete".to_string(),
                data: json!({"process_id": 3}),
            },
        ] {
            tx.send(event).await.expect("send");
            pump(&mut controller).await;
        }
        settle(&mut controller);

        let page = controller.page();
        assert_eq!(
            page.connection_status.as_ref().map(|s| s.text.as_str()),
            Some("Connected")
        );
        assert_eq!(
            page.output.as_ref().map(|o| o.lines().to_vec()),
            Some(vec![
                "Starting simulation with Process ID: 3".to_string(),
                "t=1".to_string()
            ])
        );
        assert_eq!(
            page.status.as_ref().map(|s| s.class.as_str()),
            Some("status-completed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_start_is_silent() {
        let api = FakeApi {
            start_delay: Duration::from_secs(2),
            start_response: Some(StartSimulationResponse::started(1u64)),
            ..FakeApi::default()
        };
        let (mut controller, _tx) = controller(api);
        controller.start_simulation();
        controller.cancel_start();

        let waited = tokio::time::timeout(Duration::from_secs(5), controller.next_input()).await;
        assert!(waited.is_err());
        assert_eq!(
            controller.page().status.as_ref().map(|s| s.class.as_str()),
            Some("status-idle")
        );
        assert!(controller.page().notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_starts_are_not_cancelled() {
        let api = FakeApi {
            start_delay: Duration::from_millis(200),
            start_response: Some(StartSimulationResponse::started(5u64)),
            ..FakeApi::default()
        };
        let (mut controller, _tx) = controller(api.clone());
        controller.start_simulation();
        controller.start_simulation();

        pump(&mut controller).await;
        assert!(controller.start_in_flight());
        pump(&mut controller).await;
        assert!(!controller.start_in_flight());
        assert_eq!(api.calls(), vec!["start", "start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_out_of_order_answer_aborts_the_slow_start() {
        let api = FakeApi::default();
        api.script_start(Duration::from_secs(2), StartSimulationResponse::started("slow"));
        api.script_start(Duration::ZERO, StartSimulationResponse::started("fast"));
        let (mut controller, _tx) = controller(api.clone());
        controller.start_simulation();
        controller.start_simulation();

        pump(&mut controller).await;
        assert_eq!(
            controller.state().session.current(),
            Some(&ProcessId::from("fast"))
        );
        assert!(controller.start_in_flight());

        controller.cancel_start();
        assert!(!controller.start_in_flight());
        let waited = tokio::time::timeout(Duration::from_secs(5), controller.next_input()).await;
        assert!(waited.is_err(), "aborted start still answered");
        assert_eq!(
            controller.state().session.current(),
            Some(&ProcessId::from("fast"))
        );
        assert_eq!(api.calls(), vec!["start", "start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_run_config_is_not_sent() {
        let api = FakeApi::default();
        let (mut controller, _tx) = controller(api.clone());
        controller.tick(controller.state().now() + FRAME);

        assert!(matches!(
            controller.submit_run_config(),
            SubmitOutcome::Blocked { .. }
        ));
        assert!(controller.browse_files(crate::page::OUTPUT_PATH_ID, Some("")));
        assert!(matches!(
            controller.submit_run_config(),
            SubmitOutcome::Submitted { .. }
        ));
        pump(&mut controller).await;
        assert_eq!(api.calls(), vec!["config 9"]);
        assert_eq!(
            controller.page().notifications().last().map(|n| n.message.as_str()),
            Some("Run configuration saved")
        );
    }
}
