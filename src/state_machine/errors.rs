use crate::state_machine::states::EventState;
use crate::storage::StorageError;

/// Errors raised by follow-up event state transitions
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("Command {command} is not allowed from state {from}")]
    InvalidTransition {
        from: EventState,
        command: &'static str,
    },

    #[error("Event {event_id} is {actual}; operation requires {requirement}")]
    InvalidState {
        event_id: i64,
        actual: EventState,
        requirement: &'static str,
    },

    #[error("Event {0} has no content to send")]
    ContentMissing(i64),

    #[error("Content must not be empty")]
    EmptyContent,

    #[error("Follow-up event not found: {0}")]
    EventNotFound(i64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
