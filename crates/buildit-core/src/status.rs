//! Build task status and the lifecycle state machine.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// What the coordinator is doing with a task right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    #[display("NEW")]
    New,
    #[display("CREATE_REPOSITORY")]
    CreateRepository,
    #[display("BUILD")]
    Build,
    #[display("COLLECT_RESULTS")]
    CollectResults,
    #[display("UPDATE")]
    Update,
}

/// Lifecycle state of a task.
///
/// `New → WaitingForDependencies (optional) → Running → {Completed, Failed, SystemError}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[display("NEW")]
    New,
    #[display("WAITING_FOR_DEPENDENCIES")]
    WaitingForDependencies,
    #[display("RUNNING")]
    Running,
    #[display("COMPLETED")]
    Completed,
    #[display("FAILED")]
    Failed,
    #[display("SYSTEM_ERROR")]
    SystemError,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Failed | State::SystemError)
    }

    fn rank(&self) -> u8 {
        match self {
            State::New => 0,
            State::WaitingForDependencies => 1,
            State::Running => 2,
            State::Completed | State::Failed | State::SystemError => 3,
        }
    }

    /// Whether a task in this state may move to `next`.
    ///
    /// Transitions only go forward. Staying in the same non-terminal state is
    /// allowed so the operation can change; nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: State) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

/// Immutable snapshot of a task's operation and state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{operation}/{state}")]
pub struct TaskStatus {
    pub operation: Operation,
    pub state: State,
}

impl TaskStatus {
    pub fn new(operation: Operation, state: State) -> Self {
        Self { operation, state }
    }

    /// Status every task starts with.
    pub fn initial() -> Self {
        Self::new(Operation::New, State::New)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_success(&self) -> bool {
        self.state == State::Completed
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::initial()
    }
}
