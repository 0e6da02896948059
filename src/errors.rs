use crate::types::AfState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AfError {
    /// The handle was released (or never configured with the collaborator it needs).
    #[error("Wrong handle: autofocus session has been released")]
    WrongHandle,
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Wrong state: {operation} is not allowed while {state:?}")]
    WrongState {
        operation: &'static str,
        state: AfState,
    },
    #[error("Wrong configuration: {0}")]
    WrongConfig(String),
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
    #[error("Busy: {0}")]
    Busy(String),
    #[error("Lens actuator error: {0}")]
    Actuator(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AfError {
    pub fn wrong_state(operation: &'static str, state: AfState) -> Self {
        Self::WrongState { operation, state }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }

    pub fn actuator(message: impl Into<String>) -> Self {
        Self::Actuator(message.into())
    }

    /// Recoverable user errors the caller is expected to retry logically.
    pub fn is_wrong_state(&self) -> bool {
        matches!(self, Self::WrongState { .. })
    }
}
