use std::fmt;

#[derive(Debug)]
pub enum CoreError {
    StorageError(String),
    StateTransitionError(String),
    MaterializationError(String),
    ProgressionError(String),
    DispatchError(String),
    ValidationError(String),
    ConfigurationError(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::StorageError(msg) => write!(f, "Storage error: {msg}"),
            CoreError::StateTransitionError(msg) => write!(f, "State transition error: {msg}"),
            CoreError::MaterializationError(msg) => write!(f, "Materialization error: {msg}"),
            CoreError::ProgressionError(msg) => write!(f, "Progression error: {msg}"),
            CoreError::DispatchError(msg) => write!(f, "Dispatch error: {msg}"),
            CoreError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            CoreError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<crate::storage::StorageError> for CoreError {
    fn from(e: crate::storage::StorageError) -> Self {
        CoreError::StorageError(e.to_string())
    }
}

impl From<crate::state_machine::StateMachineError> for CoreError {
    fn from(e: crate::state_machine::StateMachineError) -> Self {
        CoreError::StateTransitionError(e.to_string())
    }
}

impl From<crate::orchestration::MaterializeError> for CoreError {
    fn from(e: crate::orchestration::MaterializeError) -> Self {
        CoreError::MaterializationError(e.to_string())
    }
}

impl From<crate::orchestration::ProgressionError> for CoreError {
    fn from(e: crate::orchestration::ProgressionError) -> Self {
        CoreError::ProgressionError(e.to_string())
    }
}

impl From<crate::orchestration::SequenceAdminError> for CoreError {
    fn from(e: crate::orchestration::SequenceAdminError) -> Self {
        match e {
            crate::orchestration::SequenceAdminError::InvalidSteps(msg) => {
                CoreError::ValidationError(msg)
            }
            other => CoreError::StorageError(other.to_string()),
        }
    }
}

impl From<crate::dispatch::DispatchError> for CoreError {
    fn from(e: crate::dispatch::DispatchError) -> Self {
        CoreError::DispatchError(e.to_string())
    }
}

impl From<crate::orchestration::EngineError> for CoreError {
    fn from(e: crate::orchestration::EngineError) -> Self {
        use crate::orchestration::EngineError;
        match e {
            EngineError::Materialize(e) => e.into(),
            EngineError::StateMachine(e) => e.into(),
            EngineError::Progression(e) => e.into(),
            EngineError::Admin(e) => e.into(),
            EngineError::Dispatch(e) => e.into(),
            EngineError::Storage(e) => e.into(),
            other => CoreError::ValidationError(other.to_string()),
        }
    }
}
