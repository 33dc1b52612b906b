//! Graph description and component graph
//!
//! [`GraphDescription`] is the declarative document (JSON) naming the nodes
//! to instantiate and how their ports are wired. [`ComponentGraph`] is the
//! live counterpart built from it: one component and one pattern per node.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tickflow_plugin_api::Pattern;

use crate::plugin::ComponentRef;

/// Declarative dataflow document.
///
/// ```json
/// {
///   "name": "demo",
///   "nodes": [
///     {"instance_id": "src", "pattern": "ApplicationAsyncSource_f64"},
///     {"instance_id": "sink", "pattern": "ApplicationSyncSink_f64"}
///   ],
///   "connections": [
///     {"from": {"instance_id": "src", "port": "output"},
///      "to":   {"instance_id": "sink", "port": "input"}}
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDescription {
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeDescription>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// One node to instantiate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub instance_id: String,
    pub pattern: String,
    /// Merged over the pattern's default parameters
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
}

/// Port of a named instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub instance_id: String,
    pub port: String,
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.instance_id, self.port)
    }
}

/// Producer port -> consumer port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Failure reading a graph description from disk
#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    #[error("Failed to read dataflow file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse dataflow file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl GraphDescription {
    /// Empty description with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a node
    pub fn with_node(mut self, instance_id: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.nodes.push(NodeDescription {
            instance_id: instance_id.into(),
            pattern: pattern.into(),
            parameters: serde_json::Value::Null,
        });
        self
    }

    /// Add a node with parameters
    pub fn with_configured_node(
        mut self,
        instance_id: impl Into<String>,
        pattern: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        self.nodes.push(NodeDescription {
            instance_id: instance_id.into(),
            pattern: pattern.into(),
            parameters,
        });
        self
    }

    /// Wire `from.from_port` to `to.to_port`
    pub fn with_connection(
        mut self,
        from: impl Into<String>,
        from_port: impl Into<String>,
        to: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        self.connections.push(Connection {
            from: PortRef {
                instance_id: from.into(),
                port: from_port.into(),
            },
            to: PortRef {
                instance_id: to.into(),
                port: to_port.into(),
            },
        });
        self
    }

    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read and parse a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DescriptionError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| DescriptionError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| DescriptionError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Structural problem found while assembling a [`ComponentGraph`]
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate instance id: {0}")]
    DuplicateInstance(String),

    #[error("Invalid connection {connection}: {reason}")]
    InvalidConnection { connection: String, reason: String },
}

/// One live node
pub struct GraphNode {
    pub instance_id: String,
    pub component: ComponentRef,
    pub pattern: Pattern,
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("instance_id", &self.instance_id)
            .field("pattern", &self.pattern.name)
            .finish_non_exhaustive()
    }
}

/// Live components plus their wiring
#[derive(Debug, Default)]
pub struct ComponentGraph {
    name: String,
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    connections: Vec<Connection>,
}

impl ComponentGraph {
    /// Empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Graph name, from the description
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a node; instance ids must be unique
    pub fn insert(&mut self, node: GraphNode) -> Result<(), GraphError> {
        if self.index.contains_key(&node.instance_id) {
            return Err(GraphError::DuplicateInstance(node.instance_id));
        }
        self.index.insert(node.instance_id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Add a connection between two existing ports.
    ///
    /// The source must name a producer port and the target a consumer port of
    /// the respective node's pattern.
    pub fn connect(&mut self, connection: Connection) -> Result<(), GraphError> {
        let invalid = |reason: String| GraphError::InvalidConnection {
            connection: connection.to_string(),
            reason,
        };

        let from = self
            .get(&connection.from.instance_id)
            .ok_or_else(|| invalid(format!("unknown instance '{}'", connection.from.instance_id)))?;
        if from.pattern.producer_index(&connection.from.port).is_none() {
            return Err(invalid(format!(
                "'{}' has no producer port '{}'",
                from.pattern.name, connection.from.port
            )));
        }

        let to = self
            .get(&connection.to.instance_id)
            .ok_or_else(|| invalid(format!("unknown instance '{}'", connection.to.instance_id)))?;
        if to.pattern.consumer_index(&connection.to.port).is_none() {
            return Err(invalid(format!(
                "'{}' has no consumer port '{}'",
                to.pattern.name, connection.to.port
            )));
        }

        self.connections.push(connection);
        Ok(())
    }

    /// Node by instance id
    pub fn get(&self, instance_id: &str) -> Option<&GraphNode> {
        self.index.get(instance_id).map(|&i| &self.nodes[i])
    }

    /// Component by instance id
    pub fn component(&self, instance_id: &str) -> Option<ComponentRef> {
        self.get(instance_id).map(|n| n.component.clone())
    }

    /// Nodes in description order
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Connections in description order
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
