use crate::api::ApiError;
use crate::batcher::OutputBatcher;
use crate::dispatch::ChannelEvent;
use crate::page::Page;
use crate::session::SessionContext;
use crate::ui;
use chrono::Utc;
use std::time::Duration;
use tarang_core::{
    KillProcessResponse, ProcessId, ProcessStatus, RunState, Severity, SimulationEvent,
    StartOutcome, StartSimulationResponse,
};
use tokio::time::Instant;

/// Everything the UI loop owns: the page, the run session and the
/// transcript batcher. Handlers receive it by `&mut`.
#[derive(Debug)]
pub struct ConsoleState {
    pub page: Page,
    pub session: SessionContext,
    pub batcher: OutputBatcher,
    pub notification_ttl: Duration,
    now: Instant,
}

impl ConsoleState {
    pub fn new(page: Page, flush_interval: Duration, notification_ttl: Duration) -> Self {
        Self {
            page,
            session: SessionContext::new(),
            batcher: OutputBatcher::new(flush_interval),
            notification_ttl,
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn set_now(&mut self, now: Instant) {
        self.now = now;
    }

    pub fn notify(&mut self, message: impl Into<String>, severity: Severity) -> u64 {
        ui::show_notification(&mut self.page, message, severity, self.now, self.notification_ttl)
    }

    pub fn append_output(&mut self, line: impl Into<String>) {
        self.batcher.append(line, self.now);
    }

    pub fn set_connected(&mut self, connected: bool) {
        ui::update_connection_status(&mut self.page, connected);
    }

    /// Flushes a due batch and drops expired notifications.
    pub fn tick(&mut self, now: Instant) {
        self.now = now;
        self.batcher.flush_if_due(&mut self.page, now);
        ui::expire_notifications(&mut self.page, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let expiry = ui::next_notification_expiry(&self.page);
        match (self.batcher.deadline(), expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn apply_start_response(&mut self, result: Result<StartSimulationResponse, ApiError>) {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("start_simulation_failed: {err}");
                self.mark_start_failed();
                ui::update_status(&mut self.page, RunState::Error, &format!("Error: {err}"));
                self.notify(format!("Network error: {err}"), Severity::Error);
                return;
            }
        };

        match response.outcome() {
            StartOutcome::Started {
                process_id,
                para_file,
            } => {
                if let Err(err) = self.session.begin_run(process_id.clone(), Utc::now()) {
                    tracing::warn!("start_simulation_transition_rejected: {err}");
                    return;
                }
                tracing::info!(
                    "simulation_started: process_id={process_id} para_file={}",
                    para_file.as_deref().unwrap_or("-")
                );
                ui::update_status(&mut self.page, RunState::Running, "Simulation started...");
                ui::clear_output(&mut self.page);
                self.batcher.discard();
                self.append_output(format!("Starting simulation with Process ID: {process_id}"));
                ui::disable_start_button(&mut self.page);
                ui::update_progress(&mut self.page, 0.0);
                self.notify("Simulation started successfully!", Severity::Success);
            }
            StartOutcome::Rejected { reason } => {
                tracing::warn!("start_simulation_rejected: {reason}");
                self.mark_start_failed();
                let message = format!("Failed to start simulation: {reason}");
                ui::update_status(&mut self.page, RunState::Error, &message);
                self.notify(message, Severity::Error);
            }
        }
    }

    fn mark_start_failed(&mut self) {
        if let Err(err) = self.session.fail_start() {
            tracing::debug!("start_failure_transition_rejected: {err}");
        }
    }

    /// Responses for a run that is no longer current are dropped.
    pub fn apply_stop_response(
        &mut self,
        process_id: &ProcessId,
        result: Result<KillProcessResponse, ApiError>,
    ) {
        if !self.session.is_current(process_id) {
            tracing::debug!("stop_response_stale: process_id={process_id}");
            return;
        }
        match result {
            Ok(response) if response.success => {
                if let Err(err) = self.session.finish(RunState::Stopped) {
                    tracing::warn!("stop_transition_rejected: {err}");
                    return;
                }
                tracing::info!("simulation_stopped: process_id={process_id}");
                ui::update_status(&mut self.page, RunState::Stopped, "Simulation stopped by user");
                ui::enable_start_button(&mut self.page);
                self.notify("Simulation stopped successfully", Severity::Info);
            }
            Ok(response) => {
                let reason = response.reason();
                tracing::warn!("stop_simulation_rejected: process_id={process_id} reason={reason}");
                self.notify(format!("Failed to stop simulation: {reason}"), Severity::Error);
            }
            Err(err) => {
                tracing::warn!("stop_simulation_failed: process_id={process_id} error={err}");
                self.notify(
                    "Connection error while stopping simulation. Please try again.",
                    Severity::Error,
                );
            }
        }
    }

    pub fn apply_process_status(
        &mut self,
        process_id: &ProcessId,
        result: Result<ProcessStatus, ApiError>,
    ) {
        match result {
            Ok(status) => {
                tracing::debug!("process_status: process_id={process_id} status={status}");
                self.notify(format!("Process {process_id}: {status}"), Severity::Info);
            }
            Err(err) => {
                tracing::warn!("process_status_failed: process_id={process_id} error={err}");
                self.notify(format!("Failed to fetch process status: {err}"), Severity::Error);
            }
        }
    }

    pub fn apply_config_submission(&mut self, result: Result<(), ApiError>) {
        match result {
            Ok(()) => {
                self.notify("Run configuration saved", Severity::Info);
            }
            Err(err) => {
                tracing::warn!("run_config_failed: {err}");
                self.notify(format!("Failed to save run configuration: {err}"), Severity::Error);
            }
        }
    }

    /// Applies a realtime simulation event if it belongs to the current
    /// run. Returns whether anything changed.
    pub fn on_simulation_event(&mut self, event: &ChannelEvent) -> bool {
        let ChannelEvent::Message { name, data } = event else {
            return false;
        };
        let event = match SimulationEvent::from_event(name, data.clone()) {
            Ok(Some(event)) => event,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!("realtime_payload_invalid: {err}");
                return false;
            }
        };
        if !self.session.is_current(event.process_id()) {
            tracing::debug!(
                "realtime_event_stale: event={} process_id={}",
                event.name(),
                event.process_id()
            );
            return false;
        }

        match event {
            SimulationEvent::Output(payload) => {
                self.append_output(payload.output);
            }
            SimulationEvent::Complete(payload) => {
                if let Err(err) = self.session.finish(RunState::Completed) {
                    tracing::warn!("complete_transition_rejected: {err}");
                    return false;
                }
                tracing::info!(
                    "simulation_completed: process_id={} status={}",
                    payload.process_id,
                    payload.status.as_deref().unwrap_or("-")
                );
                ui::update_status(
                    &mut self.page,
                    RunState::Completed,
                    "Simulation completed successfully!",
                );
                ui::enable_start_button(&mut self.page);
                ui::update_progress(&mut self.page, 100.0);
                self.notify("Simulation completed!", Severity::Success);
            }
            SimulationEvent::Error(payload) => {
                if let Err(err) = self.session.finish(RunState::Error) {
                    tracing::warn!("error_transition_rejected: {err}");
                    return false;
                }
                tracing::warn!(
                    "simulation_error: process_id={} error={}",
                    payload.process_id,
                    payload.error
                );
                let message = format!("Simulation error: {}", payload.error);
                ui::update_status(&mut self.page, RunState::Error, &message);
                ui::enable_start_button(&mut self.page);
                self.notify(message, Severity::Error);
            }
        }
        true
    }
}
