use chrono::{DateTime, Utc};
use tarang_core::{ContractError, ProcessId, RunState};

/// Per-controller run bookkeeping: which process is current and where its
/// lifecycle stands.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    current: Option<ProcessId>,
    state: RunState,
    started_at: Option<DateTime<Utc>>,
    last_finished: Option<ProcessId>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&ProcessId> {
        self.current.as_ref()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn last_finished(&self) -> Option<&ProcessId> {
        self.last_finished.as_ref()
    }

    pub fn is_current(&self, process_id: &ProcessId) -> bool {
        self.current.as_ref() == Some(process_id)
    }

    pub fn begin_run(
        &mut self,
        process_id: ProcessId,
        now: DateTime<Utc>,
    ) -> Result<(), ContractError> {
        self.state = self.state.transition(RunState::Running)?;
        self.current = Some(process_id);
        self.started_at = Some(now);
        Ok(())
    }

    /// A rejected start only marks the session as errored when no run is
    /// live; a still-running process keeps its identity.
    pub fn fail_start(&mut self) -> Result<(), ContractError> {
        if self.state == RunState::Running {
            return Ok(());
        }
        self.state = self.state.transition(RunState::Error)?;
        Ok(())
    }

    /// Moves the current run into a terminal state and stops tracking its
    /// id, so late traffic from it is treated as stale.
    pub fn finish(&mut self, terminal: RunState) -> Result<Option<ProcessId>, ContractError> {
        if !terminal.is_terminal() {
            return Err(ContractError::InvalidTransition {
                from: self.state,
                to: terminal,
            });
        }
        self.state = self.state.transition(terminal)?;
        let finished = self.current.take();
        if finished.is_some() {
            self.last_finished = finished.clone();
        }
        self.started_at = None;
        Ok(finished)
    }
}
