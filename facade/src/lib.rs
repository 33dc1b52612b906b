pub mod config;
pub mod error;
pub mod facade;
pub mod graph;
pub mod lifecycle;
pub mod network;
pub mod plugin;

// Re-export commonly used items for convenience
pub use config::{ConfigError, FacadeConfig};
pub use error::{FacadeError, FacadeResult};
pub use facade::Facade;
pub use graph::{ComponentGraph, Connection, GraphDescription, NodeDescription, PortRef};
pub use lifecycle::SessionState;
pub use network::{LocalNetworkFactory, Network, NetworkError, NetworkFactory, Prototypes};
pub use plugin::{ComponentRef, LoadError, ModuleInfo, ModuleRef, PluginRegistry, RegistryError};

pub use tickflow_plugin_api;
