//! Session error types
//!
//! Errors surfaced by the [`Facade`](crate::Facade). Lower layers keep their
//! own error types (`LoadError`, `RegistryError`, `NetworkError`); this enum
//! wraps them at the session boundary.

use thiserror::Error;

use crate::graph::{DescriptionError, GraphError};
use crate::network::NetworkError;
use crate::plugin::RegistryError;

/// Result type for session operations
pub type FacadeResult<T> = Result<T, FacadeError>;

/// Error type for session operations
#[derive(Error, Debug)]
pub enum FacadeError {
    // ─────────────────────────────────────────────────────────────────────────────
    // Dataflow Loading
    // ─────────────────────────────────────────────────────────────────────────────
    /// No registered module provides the pattern
    #[error("Trying to instantiate unknown pattern: {0}")]
    UnknownPattern(String),

    /// The pattern is known but building or configuring its component failed
    #[error("Exception while trying to instantiate pattern {pattern}: {reason}")]
    PatternInstantiation { pattern: String, reason: String },

    /// Two nodes share an instance id
    #[error("Duplicate instance id: {0}")]
    DuplicateInstance(String),

    /// A connection references an unknown instance or port
    #[error("Invalid connection {connection}: {reason}")]
    InvalidConnection { connection: String, reason: String },

    /// The dataflow file could not be read or parsed
    #[error(transparent)]
    Description(#[from] DescriptionError),

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────
    /// `start` without a loaded dataflow
    #[error("No dataflow loaded")]
    NoDataflow,

    /// The operation requires a stopped network
    #[error("Network is running")]
    Running,

    /// A registered data type could not be instantiated for the network
    #[error("Failed to instantiate datatype {name}: {reason}")]
    Datatype { name: String, reason: String },

    /// Network construction, start or stop failed
    #[error(transparent)]
    Network(#[from] NetworkError),

    // ─────────────────────────────────────────────────────────────────────────────
    // Component Access
    // ─────────────────────────────────────────────────────────────────────────────
    /// No component with this instance id in the active graph
    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    /// The component exists but is not of the requested type
    #[error("Component {id} is not a {expected}")]
    ComponentType { id: String, expected: &'static str },
}

impl FacadeError {
    /// Create a pattern instantiation error
    pub fn pattern_instantiation(pattern: impl Into<String>, reason: impl ToString) -> Self {
        Self::PatternInstantiation {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }

    /// Map a registry failure for `pattern` to the session error
    pub fn from_registry(pattern: &str, error: RegistryError) -> Self {
        if error.is_not_found() {
            Self::UnknownPattern(pattern.to_string())
        } else {
            Self::pattern_instantiation(pattern, error)
        }
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownPattern(_) | Self::UnknownComponent(_))
    }

    /// Check if this error was raised while loading a dataflow
    pub fn is_dataflow_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPattern(_)
                | Self::PatternInstantiation { .. }
                | Self::DuplicateInstance(_)
                | Self::InvalidConnection { .. }
                | Self::Description(_)
        )
    }
}

impl From<GraphError> for FacadeError {
    fn from(error: GraphError) -> Self {
        match error {
            GraphError::DuplicateInstance(id) => Self::DuplicateInstance(id),
            GraphError::InvalidConnection { connection, reason } => {
                Self::InvalidConnection { connection, reason }
            }
        }
    }
}
