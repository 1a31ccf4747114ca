//! Workflow-level state machine, grounded on the teacher's
//! `agent_lifecycle/state_machine.rs::AgentStateMachine` — same
//! `#[state_machine]`/`Outcome` shape, re-purposed for the workflow
//! states in spec.md §4.E (`pending → running → {completed, failed,
//! cancelled, stopped}`, `running ↔ paused`). Step-level sequencing is
//! not modeled here: a running workflow's step list is a richer
//! structure than `statig` states comfortably express, so `WorkflowEngine`
//! mutates `Step`s directly and only asks this machine to validate and
//! apply workflow-level transitions.

use statig::prelude::*;

use super::types::WorkflowState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    Start,
    Pause,
    Resume,
    CompleteStep,
    Fail,
    Cancel,
    Stop,
}

#[derive(Default)]
pub struct WorkflowRunner {
    // Mirrors the active `statig` state. Queried directly rather than
    // through the generated `State` type, same workaround the teacher's
    // `AgentStateMachine` uses pending a clearer view of that API.
    current: Option<WorkflowState>,
}

impl WorkflowRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_state(&self) -> WorkflowState {
        self.current.unwrap_or(WorkflowState::Pending)
    }
}

#[state_machine(initial = "State::pending()")]
impl WorkflowRunner {
    #[state]
    fn pending(&mut self, event: &WorkflowEvent) -> Outcome<State> {
        match event {
            WorkflowEvent::Start => {
                self.current = Some(WorkflowState::Running);
                Transition(State::running())
            }
            WorkflowEvent::Cancel => {
                self.current = Some(WorkflowState::Cancelled);
                Transition(State::cancelled())
            }
            _ => Handled,
        }
    }

    #[state]
    fn running(&mut self, event: &WorkflowEvent) -> Outcome<State> {
        match event {
            WorkflowEvent::Pause => {
                self.current = Some(WorkflowState::Paused);
                Transition(State::paused())
            }
            WorkflowEvent::CompleteStep => {
                self.current = Some(WorkflowState::Completed);
                Transition(State::completed())
            }
            WorkflowEvent::Fail => {
                self.current = Some(WorkflowState::Failed);
                Transition(State::failed())
            }
            WorkflowEvent::Stop => {
                self.current = Some(WorkflowState::Stopped);
                Transition(State::stopped())
            }
            WorkflowEvent::Cancel => {
                self.current = Some(WorkflowState::Cancelled);
                Transition(State::cancelled())
            }
            _ => Handled,
        }
    }

    #[state]
    fn paused(&mut self, event: &WorkflowEvent) -> Outcome<State> {
        match event {
            WorkflowEvent::Resume => {
                self.current = Some(WorkflowState::Running);
                Transition(State::running())
            }
            WorkflowEvent::Stop => {
                self.current = Some(WorkflowState::Stopped);
                Transition(State::stopped())
            }
            WorkflowEvent::Cancel => {
                self.current = Some(WorkflowState::Cancelled);
                Transition(State::cancelled())
            }
            _ => Handled,
        }
    }

    #[state]
    fn completed(&mut self, _event: &WorkflowEvent) -> Outcome<State> {
        Handled
    }

    #[state]
    fn failed(&mut self, _event: &WorkflowEvent) -> Outcome<State> {
        Handled
    }

    #[state]
    fn cancelled(&mut self, _event: &WorkflowEvent) -> Outcome<State> {
        Handled
    }

    #[state]
    fn stopped(&mut self, _event: &WorkflowEvent) -> Outcome<State> {
        Handled
    }
}

/// Validates a workflow-level transition without running the full
/// `statig` machine per call — the engine persists `WorkflowState`
/// directly, so transitions are checked against the same graph this
/// machine encodes.
pub fn apply(current: WorkflowState, event: &WorkflowEvent) -> Option<WorkflowState> {
    use WorkflowEvent::*;
    use WorkflowState::*;

    match (current, event) {
        (Pending, Start) => Some(Running),
        (Pending, Cancel) => Some(Cancelled),
        (Running, Pause) => Some(Paused),
        (Running, CompleteStep) => Some(Completed),
        (Running, Fail) => Some(Failed),
        (Running, Stop) => Some(Stopped),
        (Running, Cancel) => Some(Cancelled),
        (Paused, Resume) => Some(Running),
        (Paused, Stop) => Some(Stopped),
        (Paused, Cancel) => Some(Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_starts_into_running() {
        let mut sm = WorkflowRunner::new().state_machine();
        sm.handle(&WorkflowEvent::Start);
        assert_eq!(sm.context().current_state(), WorkflowState::Running);
    }

    #[test]
    fn running_pauses_and_resumes() {
        let mut sm = WorkflowRunner::new().state_machine();
        sm.handle(&WorkflowEvent::Start);
        sm.handle(&WorkflowEvent::Pause);
        assert_eq!(sm.context().current_state(), WorkflowState::Paused);
        sm.handle(&WorkflowEvent::Resume);
        assert_eq!(sm.context().current_state(), WorkflowState::Running);
    }

    #[test]
    fn apply_rejects_transitions_from_terminal_states() {
        assert_eq!(apply(WorkflowState::Completed, &WorkflowEvent::Start), None);
        assert_eq!(apply(WorkflowState::Pending, &WorkflowEvent::Start), Some(WorkflowState::Running));
    }
}
