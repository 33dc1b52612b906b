//! Network contract
//!
//! The execution engine that schedules a [`ComponentGraph`] is pluggable: the
//! session builds it through a [`NetworkFactory`] and drives it through the
//! [`Network`] trait. [`LocalNetwork`] is the in-process implementation used
//! by default.

use std::collections::HashMap;

use thiserror::Error;

use crate::graph::ComponentGraph;
use crate::plugin::DataTypeRef;

mod gate;
mod local;

pub use local::{DEFAULT_MAX_IN_FLIGHT, LocalNetwork, LocalNetworkFactory};

/// One prototype per registered data-type name
pub type Prototypes = HashMap<String, DataTypeRef>;

/// Error type for network construction and lifecycle
#[derive(Error, Debug)]
pub enum NetworkError {
    // ─────────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────────
    /// Connection references an instance that is not in the graph
    #[error("Unknown node ID: {0}")]
    UnknownNode(String),

    /// Connection references a port the pattern does not declare
    #[error("Node '{instance_id}' has no {direction} port '{port}'")]
    UnknownPort {
        instance_id: String,
        port: String,
        direction: &'static str,
    },

    /// Producer and consumer carry different data types
    #[error("Data type mismatch on {connection}: {produced} -> {consumed}")]
    TypeMismatch {
        connection: String,
        produced: String,
        consumed: String,
    },

    /// A consumer port is fed by more than one producer
    #[error("Consumer port {0} has more than one producer")]
    PortAlreadyConnected(String),

    /// No prototype for a data type used by a port
    #[error("No prototype for data type '{0}'")]
    MissingPrototype(String),

    /// The wiring contains a cycle
    #[error("Cycle detected in graph at node: {0}")]
    CycleDetected(String),

    // ─────────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────────
    /// `start` on a running network
    #[error("Network is already running")]
    AlreadyRunning,

    /// A component refused to start
    #[error("Component '{0}' failed to start")]
    ComponentStart(String),

    /// The dispatcher thread could not be spawned
    #[error("Failed to spawn dispatcher: {0}")]
    Spawn(#[from] std::io::Error),

    /// Any other engine failure
    #[error("Network error: {0}")]
    Other(String),
}

impl NetworkError {
    /// Check if this error was raised while building the network
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownNode(_)
                | Self::UnknownPort { .. }
                | Self::TypeMismatch { .. }
                | Self::PortAlreadyConnected(_)
                | Self::MissingPrototype(_)
                | Self::CycleDetected(_)
        )
    }
}

/// A running (or runnable) execution engine for one component graph
pub trait Network: Send {
    /// Begin scheduling. Binds source gates and starts components.
    fn start(&mut self) -> Result<(), NetworkError>;

    /// Stop scheduling and release gates. Stopping a stopped network is a
    /// no-op.
    fn stop(&mut self) -> Result<(), NetworkError>;

    /// Check if the network is running
    fn is_running(&self) -> bool;
}

/// Builds a [`Network`] for a component graph
pub trait NetworkFactory: Send + Sync {
    /// Build a stopped network from the data-type prototypes and the graph
    fn build(
        &self,
        prototypes: Prototypes,
        graph: &ComponentGraph,
    ) -> Result<Box<dyn Network>, NetworkError>;
}
