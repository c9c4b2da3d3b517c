use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    InvalidConfig,
    PluginNotFound,
    Validation,
    Connection,
    Cancelled,
    RunnerFailure,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidInput, message)
    }

    pub fn plugin_not_found(kind: &str, name: &str) -> Self {
        Self::new(
            CoreErrorKind::PluginNotFound,
            format!("there is no {kind} plugin with name '{name}'"),
        )
    }

    pub fn runner_failure(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::RunnerFailure, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::StorageFailure, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal, message)
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for CoreError {}
