//! Plugin Registry
//!
//! Central owner of every loaded module and the single entry point for name
//! resolution. Data-type and pattern names are indexed to the key of the
//! module that exports them; instantiation is delegated to that module.
//!
//! # Architecture
//!
//! Mutation (adding modules) takes the write side of one `parking_lot`
//! `RwLock`; instantiation holds the read side. A module whose names
//! collide with an already registered module is rejected as a whole, so the
//! first registration of a name wins.
//!
//! # Usage
//!
//! ```ignore
//! let registry = PluginRegistry::new();
//! registry.add_library("/opt/tickflow/plugins/libcamera.so");
//! let camera = registry.instantiate_component("Camera", "cam0")?;
//! ```

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use tickflow_plugin_api::{NameKind, Pattern, PluginError, PluginModule};

use super::handle::{ComponentRef, DataTypeRef};
use super::loader::{LoadError, ModuleInfo, ModuleLoader};

/// Errors returned by registry-level name resolution
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown datatype: {0}")]
    UnknownDatatype(String),

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Component built from '{pattern}' reports id '{actual}', expected '{expected}'")]
    IdMismatch {
        pattern: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl RegistryError {
    /// Check if the name was not found anywhere
    pub fn is_not_found(&self) -> bool {
        match self {
            RegistryError::UnknownDatatype(_) | RegistryError::UnknownPattern(_) => true,
            RegistryError::Plugin(e) => e.is_not_found(),
            RegistryError::IdMismatch { .. } => false,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    /// Modules in registration order
    modules: Vec<ModuleLoader>,
    /// Data-type name -> module key
    datatypes: HashMap<String, String>,
    /// Pattern name -> module key
    patterns: HashMap<String, String>,
}

impl RegistryInner {
    fn module(&self, key: &str) -> Option<&ModuleLoader> {
        self.modules.iter().find(|m| m.key() == key)
    }

    fn owner_of(&self, kind: NameKind, name: &str) -> Option<&ModuleLoader> {
        let index = match kind {
            NameKind::Datatype => &self.datatypes,
            NameKind::Pattern | NameKind::Component => &self.patterns,
        };
        index.get(name).and_then(|key| self.module(key))
    }

    fn check_collisions(&self, loader: &ModuleLoader) -> Result<(), LoadError> {
        let collision = |kind: NameKind, name: &String, owner: &String| LoadError::NameCollision {
            module: loader.key().to_string(),
            kind,
            name: name.clone(),
            owner: owner.clone(),
        };

        for name in loader.datatype_names() {
            if let Some(owner) = self.datatypes.get(name) {
                return Err(collision(NameKind::Datatype, name, owner));
            }
        }
        for name in loader.pattern_names() {
            if let Some(owner) = self.patterns.get(name) {
                return Err(collision(NameKind::Pattern, name, owner));
            }
        }
        Ok(())
    }
}

/// Registry of loaded capability modules
pub struct PluginRegistry {
    inner: RwLock<RegistryInner>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Load the shared library at `path` and index its names.
    ///
    /// Failures are logged and reported as `false`; the registry is left
    /// unchanged.
    pub fn add_library(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.try_add_library(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load module");
                false
            }
        }
    }

    /// Like [`add_library`](Self::add_library), returning the typed error
    pub fn try_add_library(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        self.register(ModuleLoader::library(path.as_ref()))
    }

    /// Register an in-process module under `name`
    pub fn add_static(&self, name: &str, module: &'static PluginModule) -> Result<(), LoadError> {
        self.register(ModuleLoader::from_static(name, module))
    }

    /// Removing modules at runtime is not supported; always returns `false`.
    pub fn remove_library(&self, path: impl AsRef<Path>) -> bool {
        tracing::warn!(
            path = %path.as_ref().display(),
            "Removing modules is not supported, ignoring"
        );
        false
    }

    fn register(&self, mut loader: ModuleLoader) -> Result<(), LoadError> {
        let mut inner = self.inner.write();

        if inner.module(loader.key()).is_some() {
            return Err(LoadError::AlreadyLoaded(loader.key().to_string()));
        }

        loader.load()?;
        inner.check_collisions(&loader)?;

        let key = loader.key().to_string();
        for name in loader.datatype_names() {
            inner.datatypes.insert(name.clone(), key.clone());
        }
        for name in loader.pattern_names() {
            inner.patterns.insert(name.clone(), key.clone());
        }

        tracing::info!(
            module = %key,
            datatypes = loader.datatype_names().len(),
            patterns = loader.pattern_names().len(),
            "Registered module"
        );
        inner.modules.push(loader);
        Ok(())
    }

    /// All registered data-type names, sorted
    pub fn datatype_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().datatypes.keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered pattern names, sorted
    pub fn pattern_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().patterns.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a data type is registered
    pub fn has_datatype(&self, name: &str) -> bool {
        self.inner.read().datatypes.contains_key(name)
    }

    /// Check if a pattern is registered
    pub fn has_pattern(&self, name: &str) -> bool {
        self.inner.read().patterns.contains_key(name)
    }

    /// Number of loaded modules
    pub fn module_count(&self) -> usize {
        self.inner.read().modules.len()
    }

    /// Summaries of the loaded modules, in registration order
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.inner.read().modules.iter().map(ModuleLoader::info).collect()
    }

    /// Instantiate a data type prototype
    pub fn instantiate_datatype(&self, name: &str) -> Result<DataTypeRef, RegistryError> {
        let inner = self.inner.read();
        let module = inner
            .owner_of(NameKind::Datatype, name)
            .ok_or_else(|| RegistryError::UnknownDatatype(name.to_string()))?;
        Ok(module.instantiate_datatype(name)?)
    }

    /// Instantiate a pattern description
    pub fn instantiate_pattern(&self, name: &str) -> Result<Pattern, RegistryError> {
        let inner = self.inner.read();
        let module = inner
            .owner_of(NameKind::Pattern, name)
            .ok_or_else(|| RegistryError::UnknownPattern(name.to_string()))?;
        Ok(module.instantiate_pattern(name)?)
    }

    /// Instantiate a component from `pattern`, bound to `instance_id`
    pub fn instantiate_component(
        &self,
        pattern: &str,
        instance_id: &str,
    ) -> Result<ComponentRef, RegistryError> {
        let inner = self.inner.read();
        let module = inner
            .owner_of(NameKind::Pattern, pattern)
            .ok_or_else(|| RegistryError::UnknownPattern(pattern.to_string()))?;

        let component = module.instantiate_component(pattern, instance_id)?;
        if component.id() != instance_id {
            return Err(RegistryError::IdMismatch {
                pattern: pattern.to_string(),
                expected: instance_id.to_string(),
                actual: component.id().to_string(),
            });
        }

        tracing::debug!(pattern = %pattern, instance_id = %instance_id, "Instantiated component");
        Ok(component)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PluginRegistry")
            .field("modules", &inner.modules)
            .field("datatypes", &inner.datatypes.len())
            .field("patterns", &inner.patterns.len())
            .finish()
    }
}
