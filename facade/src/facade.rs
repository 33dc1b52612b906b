//! Session orchestrator
//!
//! [`Facade`] owns the plugin registry, the active component graph and the
//! network built from it. It drives the whole session: module discovery,
//! graph instantiation, start/stop, and ordered teardown.
//!
//! ```text
//! FacadeConfig ──▶ discover modules ──▶ load_dataflow ──▶ start ──▶ stop
//!                   (PluginRegistry)    (ComponentGraph)  (Network)
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use tickflow_plugin_api::{ComponentError, Pattern};
use tracing::{debug, error, info, warn};

use crate::config::FacadeConfig;
use crate::error::{FacadeError, FacadeResult};
use crate::graph::{ComponentGraph, GraphDescription, GraphNode};
use crate::lifecycle::SessionState;
use crate::network::{LocalNetworkFactory, Network, NetworkFactory, Prototypes};
use crate::plugin::{
    BUILTIN_MODULE, BUILTIN_MODULE_KEY, ComponentRef, LIBRARY_EXTENSION, ModuleRef, PluginRegistry,
    call_plugin_preserving_error,
};

/// One dataflow session
///
/// Fields are declared in teardown order: the network goes first, then the
/// component graph and its description, and the registry (which releases the
/// modules) last. Handles returned by [`get_component`](Self::get_component)
/// and [`component`](Self::component) keep their module mapped, so they stay
/// usable after the session is dropped.
pub struct Facade {
    network: Option<Box<dyn Network>>,
    component_graph: Option<ComponentGraph>,
    graph_description: Option<GraphDescription>,
    network_factory: Arc<dyn NetworkFactory>,
    registry: PluginRegistry,
    state: SessionState,
}

impl Facade {
    /// Create a session, registering every module found on the configured
    /// search path
    pub fn new(config: &FacadeConfig) -> Self {
        let factory = Arc::new(LocalNetworkFactory::new(config.max_in_flight));
        Self::with_network_factory(config, factory)
    }

    /// Create a session that builds its networks with `factory`
    pub fn with_network_factory(config: &FacadeConfig, factory: Arc<dyn NetworkFactory>) -> Self {
        let registry = PluginRegistry::new();

        if config.include_builtin {
            if let Err(e) = registry.add_static(BUILTIN_MODULE_KEY, &BUILTIN_MODULE) {
                error!(error = %e, "Failed to register built-in module");
            }
        }

        for directory in config.plugin_directories() {
            scan_directory(&registry, &directory);
        }

        info!(
            modules = registry.module_count(),
            datatypes = registry.datatype_names().len(),
            patterns = registry.pattern_names().len(),
            "Plugin discovery complete"
        );

        Self {
            network: None,
            component_graph: None,
            graph_description: None,
            network_factory: factory,
            registry,
            state: SessionState::Idle,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dataflow loading
    // ─────────────────────────────────────────────────────────────────────────

    /// Instantiate every node of `description` and install the resulting
    /// graph.
    ///
    /// Nothing is installed unless every node and connection succeeds; the
    /// previous graph stays active on failure.
    pub fn load_dataflow(&mut self, description: GraphDescription) -> FacadeResult<()> {
        if !self.state.can_load() {
            return Err(FacadeError::Running);
        }

        info!(
            graph = %description.name,
            nodes = description.nodes.len(),
            connections = description.connections.len(),
            "Loading dataflow"
        );

        let mut graph = ComponentGraph::new(description.name.clone());
        for node in &description.nodes {
            let pattern_name = node.pattern.as_str();
            let component = self
                .registry
                .instantiate_component(pattern_name, &node.instance_id)
                .map_err(|e| FacadeError::from_registry(pattern_name, e))?;
            let pattern = self
                .registry
                .instantiate_pattern(pattern_name)
                .map_err(|e| FacadeError::from_registry(pattern_name, e))?;

            let parameters = merge_parameters(&pattern.parameters, &node.parameters);
            call_plugin_preserving_error(
                AssertUnwindSafe(|| component.configure(&parameters)),
                |msg| ComponentError::Failed(format!("panicked: {msg}")),
            )
            .map_err(|e| FacadeError::pattern_instantiation(pattern_name, e))?;

            debug!(instance_id = %node.instance_id, pattern = %pattern_name, "Instantiated node");
            graph.insert(GraphNode {
                instance_id: node.instance_id.clone(),
                component,
                pattern,
            })?;
        }

        for connection in &description.connections {
            graph.connect(connection.clone())?;
        }

        self.component_graph = Some(graph);
        self.graph_description = Some(description);
        self.state.transition(SessionState::Loaded);
        info!("Dataflow loaded");
        Ok(())
    }

    /// Read a JSON graph description and load it
    pub fn load_dataflow_file(&mut self, path: impl AsRef<Path>) -> FacadeResult<()> {
        let description = GraphDescription::from_file(path)?;
        self.load_dataflow(description)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Network lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a network for the loaded graph and start it
    pub fn start(&mut self) -> FacadeResult<()> {
        if !self.state.can_start() {
            return Err(match self.state {
                SessionState::Running => FacadeError::Running,
                _ => FacadeError::NoDataflow,
            });
        }
        let graph = self.component_graph.as_ref().ok_or(FacadeError::NoDataflow)?;

        let mut prototypes = Prototypes::new();
        for name in self.registry.datatype_names() {
            let prototype = self
                .registry
                .instantiate_datatype(&name)
                .map_err(|e| FacadeError::Datatype {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            prototypes.insert(name, prototype);
        }

        let mut network = self.network_factory.build(prototypes, graph)?;
        network.start()?;

        self.network = Some(network);
        self.state.transition(SessionState::Running);
        info!(graph = %graph.name(), "Network running");
        Ok(())
    }

    /// Stop and release the network. A no-op without one.
    pub fn stop(&mut self) -> FacadeResult<()> {
        let Some(mut network) = self.network.take() else {
            return Ok(());
        };

        let result = network.stop();
        drop(network);
        if self.state.is_running() {
            self.state.transition(SessionState::Stopped);
        }
        result?;

        info!("Network stopped");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────────────────

    /// Live component of the active graph
    pub fn get_component(&self, instance_id: &str) -> FacadeResult<ComponentRef> {
        self.component_graph
            .as_ref()
            .and_then(|graph| graph.component(instance_id))
            .ok_or_else(|| FacadeError::UnknownComponent(instance_id.to_string()))
    }

    /// Live component of the active graph, downcast to its concrete type
    ///
    /// ```rust,ignore
    /// let camera = facade.component::<ApplicationAsyncSource<ImageHeader>>("cam0")?;
    /// camera.new_value(Timestamp::now(), frame)?;
    /// ```
    pub fn component<T: Any + Send + Sync>(&self, instance_id: &str) -> FacadeResult<ModuleRef<T>> {
        self.get_component(instance_id)?
            .downcast::<T>()
            .map_err(|_| FacadeError::ComponentType {
                id: instance_id.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Instantiate a pattern by name, outside any graph
    pub fn instantiate_pattern(&self, name: &str) -> FacadeResult<Pattern> {
        self.registry
            .instantiate_pattern(name)
            .map_err(|e| FacadeError::pattern_instantiation(name, e))
    }

    /// Lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Plugin registry
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Active component graph
    pub fn graph(&self) -> Option<&ComponentGraph> {
        self.component_graph.as_ref()
    }

    /// Description the active graph was built from
    pub fn description(&self) -> Option<&GraphDescription> {
        self.graph_description.as_ref()
    }
}

impl Drop for Facade {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to stop network during teardown");
        }
        self.network = None;
        self.component_graph = None;
        self.graph_description = None;
        debug!("Session released; releasing modules");
    }
}

impl std::fmt::Debug for Facade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facade")
            .field("state", &self.state)
            .field("graph", &self.component_graph.as_ref().map(|g| g.name()))
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Register every library directly inside `directory`, in name order
fn scan_directory(registry: &PluginRegistry, directory: &Path) {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %directory.display(), error = %e, "Skipping plugin directory");
            return;
        }
    };

    let mut libraries: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == LIBRARY_EXTENSION))
        .collect();
    libraries.sort();

    debug!(path = %directory.display(), candidates = libraries.len(), "Scanning plugin directory");
    for library in libraries {
        registry.add_library(&library);
    }
}

/// Shallow merge of node parameters over pattern defaults
fn merge_parameters(
    defaults: &serde_json::Value,
    overrides: &serde_json::Value,
) -> serde_json::Value {
    match (defaults, overrides) {
        (_, serde_json::Value::Null) => defaults.clone(),
        (serde_json::Value::Object(base), serde_json::Value::Object(extra)) => {
            let mut merged = base.clone();
            merged.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            serde_json::Value::Object(merged)
        }
        _ => overrides.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builtin_only() -> FacadeConfig {
        FacadeConfig::default()
    }

    #[test]
    fn test_merge_parameters() {
        let defaults = json!({"rate": 30, "mode": "rgb"});
        assert_eq!(merge_parameters(&defaults, &serde_json::Value::Null), defaults);
        assert_eq!(
            merge_parameters(&defaults, &json!({"rate": 60})),
            json!({"rate": 60, "mode": "rgb"})
        );
        assert_eq!(merge_parameters(&serde_json::Value::Null, &json!(5)), json!(5));
    }

    #[test]
    fn test_new_registers_builtin() {
        let facade = Facade::new(&builtin_only());
        assert_eq!(facade.state(), SessionState::Idle);
        assert!(facade.registry().has_pattern("ApplicationAsyncSource_f64"));
        assert!(facade.registry().has_datatype("Json"));
    }

    #[test]
    fn test_new_without_builtin() {
        let config = FacadeConfig {
            include_builtin: false,
            ..Default::default()
        };
        let facade = Facade::new(&config);
        assert_eq!(facade.registry().module_count(), 0);
    }

    #[test]
    fn test_missing_search_directory_is_skipped() {
        let facade = Facade::new(&FacadeConfig::with_search_path("/nonexistent/tickflow::"));
        assert_eq!(facade.registry().module_count(), 1);
    }

    #[test]
    fn test_start_without_dataflow() {
        let mut facade = Facade::new(&builtin_only());
        assert!(matches!(facade.start(), Err(FacadeError::NoDataflow)));
        facade.stop().unwrap();
        assert_eq!(facade.state(), SessionState::Idle);
    }

    #[test]
    fn test_restart_after_stop() {
        let mut facade = Facade::new(&builtin_only());
        let description = GraphDescription::new("restart")
            .with_node("src", "ApplicationAsyncSource_f64")
            .with_node("sink", "ApplicationSyncSink_f64")
            .with_connection("src", "output", "sink", "input");
        facade.load_dataflow(description).unwrap();

        facade.start().unwrap();
        assert!(matches!(facade.start(), Err(FacadeError::Running)));
        facade.stop().unwrap();
        assert_eq!(facade.state(), SessionState::Stopped);

        facade.start().unwrap();
        assert_eq!(facade.state(), SessionState::Running);
        facade.stop().unwrap();
    }

    #[test]
    fn test_instantiate_pattern() {
        let facade = Facade::new(&builtin_only());
        let pattern = facade.instantiate_pattern("ApplicationSyncSink_String").unwrap();
        assert_eq!(pattern.consumer_index("input"), Some(0));

        let err = facade.instantiate_pattern("Nope").unwrap_err();
        assert!(matches!(
            err,
            FacadeError::PatternInstantiation { ref pattern, .. } if pattern == "Nope"
        ));
    }

    #[test]
    fn test_unknown_component() {
        let facade = Facade::new(&builtin_only());
        assert!(matches!(
            facade.get_component("src"),
            Err(FacadeError::UnknownComponent(_))
        ));
    }
}
