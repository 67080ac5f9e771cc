pub mod engineio;
pub mod grid;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const EVENT_SIMULATION_OUTPUT: &str = "simulation_output";
pub const EVENT_SIMULATION_COMPLETE: &str = "simulation_complete";
pub const EVENT_SIMULATION_ERROR: &str = "simulation_error";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("invalid {event} payload: {reason}")]
    InvalidPayload { event: String, reason: String },
    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },
    #[error("unknown run state: {0}")]
    UnknownRunState(String),
}

/// Opaque token correlating one simulation run.
///
/// The server hands out integer counters; the client never interprets them
/// and keeps the textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<u64> for ProcessId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = Value::deserialize(deserializer)?;
        match val {
            Value::String(s) => Ok(ProcessId(s)),
            Value::Number(n) => Ok(ProcessId(n.to_string())),
            _ => Err(serde::de::Error::custom(
                "expected string or number for process_id",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Error,
    Stopped,
}

impl Default for RunState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Error => "error",
            RunState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Error | RunState::Stopped
        )
    }

    /// A start re-arms from any state and a failed start may land in
    /// `Error` from anywhere; completion and stop require a live run.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (_, RunState::Running) | (_, RunState::Error) => true,
            (RunState::Running, RunState::Completed) | (RunState::Running, RunState::Stopped) => {
                true
            }
            _ => false,
        }
    }

    pub fn transition(self, next: RunState) -> Result<RunState, ContractError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ContractError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "idle" => Ok(RunState::Idle),
            "running" => Ok(RunState::Running),
            "completed" | "complete" => Ok(RunState::Completed),
            "error" => Ok(RunState::Error),
            "stopped" | "killed" => Ok(RunState::Stopped),
            other => Err(ContractError::UnknownRunState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Info,
}

impl Default for Severity {
    fn default() -> Self {
        Self::Info
    }
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Error => "error",
            Severity::Info => "info",
        }
    }

    pub fn alert_class(&self) -> &'static str {
        match self {
            Severity::Success => "alert-success",
            Severity::Error => "alert-danger",
            Severity::Info => "alert-info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartSimulationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub para_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started {
        process_id: ProcessId,
        para_file: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

impl StartSimulationResponse {
    pub fn started(process_id: impl Into<ProcessId>) -> Self {
        Self {
            success: true,
            process_id: Some(process_id.into()),
            error: None,
            message: Some("Simulation started successfully".to_string()),
            para_file: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            process_id: None,
            error: Some(reason.into()),
            message: None,
            para_file: None,
        }
    }

    /// A success flag without a process id counts as a rejection.
    pub fn outcome(self) -> StartOutcome {
        match (self.success, self.process_id) {
            (true, Some(process_id)) => StartOutcome::Started {
                process_id,
                para_file: self.para_file,
            },
            (true, None) => StartOutcome::Rejected {
                reason: "server did not return a process id".to_string(),
            },
            (false, _) => StartOutcome::Rejected {
                reason: reason_or_unknown(self.error),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KillProcessResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl KillProcessResponse {
    pub fn killed() -> Self {
        Self {
            success: true,
            error: None,
            message: Some("Process killed successfully".to_string()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            message: None,
        }
    }

    pub fn reason(&self) -> String {
        reason_or_unknown(self.error.clone())
    }
}

fn reason_or_unknown(reason: Option<String>) -> String {
    reason
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Answer of `GET /process_status/{id}`: a bare JSON string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Completed,
    Error,
    Killed,
    NotFound,
    Other(String),
}

impl ProcessStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Error => "error",
            ProcessStatus::Killed => "killed",
            ProcessStatus::NotFound => "not_found",
            ProcessStatus::Other(value) => value,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ProcessStatus {
    fn from(value: &str) -> Self {
        match value.trim() {
            "running" => ProcessStatus::Running,
            "completed" => ProcessStatus::Completed,
            "error" => ProcessStatus::Error,
            "killed" => ProcessStatus::Killed,
            "not_found" => ProcessStatus::NotFound,
            other => ProcessStatus::Other(other.to_string()),
        }
    }
}

impl Serialize for ProcessStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(ProcessStatus::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputPayload {
    pub process_id: ProcessId,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletePayload {
    pub process_id: ProcessId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub process_id: ProcessId,
    #[serde(default)]
    pub error: String,
}

/// Domain events streamed over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationEvent {
    Output(OutputPayload),
    Complete(CompletePayload),
    Error(ErrorPayload),
}

impl SimulationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SimulationEvent::Output(_) => EVENT_SIMULATION_OUTPUT,
            SimulationEvent::Complete(_) => EVENT_SIMULATION_COMPLETE,
            SimulationEvent::Error(_) => EVENT_SIMULATION_ERROR,
        }
    }

    pub fn process_id(&self) -> &ProcessId {
        match self {
            SimulationEvent::Output(payload) => &payload.process_id,
            SimulationEvent::Complete(payload) => &payload.process_id,
            SimulationEvent::Error(payload) => &payload.process_id,
        }
    }

    /// Returns `Ok(None)` for event names that are not simulation events.
    pub fn from_event(name: &str, data: Value) -> Result<Option<Self>, ContractError> {
        let invalid = |err: serde_json::Error| ContractError::InvalidPayload {
            event: name.to_string(),
            reason: err.to_string(),
        };
        let event = match name {
            EVENT_SIMULATION_OUTPUT => {
                SimulationEvent::Output(serde_json::from_value(data).map_err(invalid)?)
            }
            EVENT_SIMULATION_COMPLETE => {
                SimulationEvent::Complete(serde_json::from_value(data).map_err(invalid)?)
            }
            EVENT_SIMULATION_ERROR => {
                SimulationEvent::Error(serde_json::from_value(data).map_err(invalid)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn process_id_accepts_numbers_and_strings() {
        let numeric: ProcessId = serde_json::from_value(json!(7)).expect("numeric id");
        let textual: ProcessId = serde_json::from_value(json!("7")).expect("string id");
        assert_eq!(numeric, textual);
        assert_eq!(numeric.as_str(), "7");
        assert!(serde_json::from_value::<ProcessId>(json!({"id": 7})).is_err());
    }

    #[test]
    fn start_response_outcomes() {
        let body = json!({
            "success": true,
            "process_id": 3,
            "message": "Simulation started successfully",
            "para_file": "/runs/para_3.py"
        });
        let parsed: StartSimulationResponse = serde_json::from_value(body).expect("parse");
        assert_eq!(
            parsed.outcome(),
            StartOutcome::Started {
                process_id: ProcessId::new("3"),
                para_file: Some("/runs/para_3.py".to_string()),
            }
        );

        let rejected: StartSimulationResponse =
            serde_json::from_value(json!({"success": false, "error": "no para file"}))
                .expect("parse");
        assert_eq!(
            rejected.outcome(),
            StartOutcome::Rejected {
                reason: "no para file".to_string()
            }
        );

        let missing_id: StartSimulationResponse =
            serde_json::from_value(json!({"success": true})).expect("parse");
        assert!(matches!(missing_id.outcome(), StartOutcome::Rejected { .. }));
    }

    #[test]
    fn kill_response_reason_defaults() {
        let failed: KillProcessResponse =
            serde_json::from_value(json!({"success": false})).expect("parse");
        assert_eq!(failed.reason(), "unknown error");
        assert_eq!(
            KillProcessResponse::failed("Process not found").reason(),
            "Process not found"
        );
    }

    #[test]
    fn process_status_parses_bare_strings() {
        let status: ProcessStatus = serde_json::from_value(json!("not_found")).expect("parse");
        assert_eq!(status, ProcessStatus::NotFound);
        let other: ProcessStatus = serde_json::from_value(json!("queued")).expect("parse");
        assert_eq!(other, ProcessStatus::Other("queued".to_string()));
        assert_eq!(serde_json::to_value(&ProcessStatus::Killed).unwrap(), json!("killed"));
    }

    #[test]
    fn simulation_events_parse_by_name() {
        let output = SimulationEvent::from_event(
            EVENT_SIMULATION_OUTPUT,
            json!({"process_id": 1, "output": "step 1"}),
        )
        .expect("valid")
        .expect("known");
        assert_eq!(output.process_id().as_str(), "1");
        assert_eq!(output.name(), EVENT_SIMULATION_OUTPUT);

        let complete = SimulationEvent::from_event(
            EVENT_SIMULATION_COMPLETE,
            json!({"process_id": 1, "status": "completed"}),
        )
        .expect("valid")
        .expect("known");
        assert!(matches!(complete, SimulationEvent::Complete(ref p) if p.status.as_deref() == Some("completed")));

        assert!(SimulationEvent::from_event("connect", json!({}))
            .expect("ignored")
            .is_none());
        let err = SimulationEvent::from_event(EVENT_SIMULATION_ERROR, json!({"error": "boom"}))
            .expect_err("missing process id");
        assert!(matches!(err, ContractError::InvalidPayload { .. }));
    }

    #[test]
    fn run_state_transitions() {
        assert_eq!(
            RunState::Idle.transition(RunState::Running),
            Ok(RunState::Running)
        );
        assert_eq!(
            RunState::Running.transition(RunState::Stopped),
            Ok(RunState::Stopped)
        );
        assert_eq!(
            RunState::Completed.transition(RunState::Running),
            Ok(RunState::Running)
        );
        assert_eq!(RunState::Idle.transition(RunState::Error), Ok(RunState::Error));
        assert!(RunState::Idle.transition(RunState::Completed).is_err());
        assert!(RunState::Stopped.transition(RunState::Stopped).is_err());
        assert!(RunState::Completed.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert_eq!("killed".parse::<RunState>(), Ok(RunState::Stopped));
    }

    #[test]
    fn severity_maps_to_alert_classes() {
        assert_eq!(Severity::Success.alert_class(), "alert-success");
        assert_eq!(Severity::Error.alert_class(), "alert-danger");
        assert_eq!(Severity::Info.alert_class(), "alert-info");
    }
}
