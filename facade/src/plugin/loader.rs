//! Module Loader
//!
//! Load/unload lifecycle of one capability module and one-time discovery of
//! the plugin implementations it exports.
//!
//! # Architecture
//!
//! A module is either a shared library (.so on Linux, .dll on Windows,
//! .dylib on macOS) or a registration table compiled into the host. Both
//! expose a [`PluginModule`] table; for libraries it is read from the
//! `TICKFLOW_PLUGIN_MODULE` symbol.
//!
//! Loading:
//! 1. Opens the library (dynamic modules only)
//! 2. Checks the module's plugin-API version against the host's
//! 3. Constructs every exported plugin implementation
//! 4. Caches the data-type and pattern names each implementation reports
//!
//! # Safety
//!
//! Plugin loading executes foreign code. Every call into the module is
//! wrapped in panic isolation. Instances handed out by the loader are
//! [`ModuleRef`]s sharing the library, which is closed only once the loader
//! and every instance it created are gone.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use tickflow_plugin_api::{
    Component, DataType, NameKind, PLUGIN_API_VERSION, PLUGIN_MODULE_SYMBOL, Pattern, Plugin,
    PluginError, PluginModule,
};

use super::handle::{ComponentRef, DataTypeRef, ModuleGuard, ModuleRef};
use super::isolation::{call_plugin_preserving_error, call_plugin_value};

/// Errors that can occur while loading a module
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to open library {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Library {path} does not export the registration table: {reason}")]
    MissingEntryPoint { path: PathBuf, reason: String },

    #[error("Module {module} was built against plugin API {found}, host provides {host}")]
    IncompatibleApi {
        module: String,
        found: String,
        host: String,
    },

    #[error("Module {module}: plugin type {type_name} has no default constructor")]
    MissingConstructor { module: String, type_name: String },

    #[error("Module {module}: discovery of plugin type {type_name} failed: {reason}")]
    Discovery {
        module: String,
        type_name: String,
        reason: String,
    },

    #[error("Module {module} exports {kind} '{name}' more than once")]
    DuplicateName {
        module: String,
        kind: NameKind,
        name: String,
    },

    #[error("Module {module} exports {kind} '{name}' already registered by {owner}")]
    NameCollision {
        module: String,
        kind: NameKind,
        name: String,
        owner: String,
    },

    #[error("Module {0} is already loaded")]
    AlreadyLoaded(String),
}

/// Where a module comes from
#[derive(Debug, Clone)]
pub enum ModuleSource {
    /// Shared library on disk
    Library(PathBuf),
    /// Registration table linked into the host
    Static(&'static PluginModule),
}

impl ModuleSource {
    /// Short label for tooling ("library" or "static")
    pub fn label(&self) -> &'static str {
        match self {
            ModuleSource::Library(_) => "library",
            ModuleSource::Static(_) => "static",
        }
    }
}

/// Summary of a loaded module
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ModuleInfo {
    /// Registry key (path or static name)
    pub key: String,
    /// "library" or "static"
    pub source: &'static str,
    /// Plugin-API version the module was built against
    pub api_version: String,
    /// Type names of the plugin implementations
    pub plugin_types: Vec<String>,
    /// Data types in discovery order
    pub datatypes: Vec<String>,
    /// Patterns in discovery order
    pub patterns: Vec<String>,
}

/// Everything read from a module's registration table
#[derive(Default)]
struct Discovered {
    api_version: String,
    plugin_types: Vec<String>,
    datatype_names: Vec<String>,
    pattern_names: Vec<String>,
    datatypes: HashMap<String, Arc<dyn Plugin>>,
    patterns: HashMap<String, Arc<dyn Plugin>>,
}

/// Load/unload lifecycle of one capability module
pub struct ModuleLoader {
    key: String,
    source: ModuleSource,
    discovered: Option<Discovered>,
    // Shared with every instance created from this module.
    library: Option<Arc<Library>>,
}

impl ModuleLoader {
    /// Loader for a shared library. Nothing is opened until [`load`](Self::load).
    pub fn library(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            key: path.display().to_string(),
            source: ModuleSource::Library(path),
            discovered: None,
            library: None,
        }
    }

    /// Loader for an in-process registration table.
    pub fn from_static(name: impl Into<String>, module: &'static PluginModule) -> Self {
        Self {
            key: name.into(),
            source: ModuleSource::Static(module),
            discovered: None,
            library: None,
        }
    }

    /// Registry key of this module
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Where the module comes from
    pub fn source(&self) -> &ModuleSource {
        &self.source
    }

    /// Check if discovery completed
    pub fn is_loaded(&self) -> bool {
        self.discovered.is_some()
    }

    /// Open the module and discover its plugin implementations.
    ///
    /// Does nothing when the module is already loaded.
    pub fn load(&mut self) -> Result<(), LoadError> {
        if self.is_loaded() {
            return Ok(());
        }

        match &self.source {
            ModuleSource::Static(module) => {
                tracing::info!(module = %self.key, "Loading static module");
                self.discovered = Some(discover(&self.key, module)?);
            }
            ModuleSource::Library(path) => {
                tracing::info!(path = %path.display(), "Loading module");
                let library = Arc::new(open_library(path)?);
                let module = read_registration_table(&library, path)?;
                let discovered = discover(&self.key, module)?;
                self.discovered = Some(discovered);
                self.library = Some(library);
            }
        }

        tracing::info!(
            module = %self.key,
            datatypes = self.datatype_names().len(),
            patterns = self.pattern_names().len(),
            "Successfully loaded module"
        );
        Ok(())
    }

    /// Drop every implementation handle, then release the library.
    ///
    /// The library is unloaded here when no instance created from it is
    /// still alive; otherwise the last [`ModuleRef`] to go unloads it.
    pub fn teardown(&mut self) {
        if let Some(discovered) = self.discovered.take() {
            tracing::debug!(
                module = %self.key,
                plugins = ?discovered.plugin_types,
                "Releasing plugin implementations"
            );
            drop(discovered);
        }
        if let Some(library) = self.library.take() {
            match Arc::try_unwrap(library) {
                Ok(library) => {
                    tracing::debug!(module = %self.key, "Unloading library");
                    if let Err(e) = library.close() {
                        tracing::warn!(module = %self.key, error = %e, "Failed to unload library");
                    }
                }
                Err(shared) => {
                    tracing::debug!(
                        module = %self.key,
                        instances = Arc::strong_count(&shared) - 1,
                        "Library still in use, unloading when the last instance is dropped"
                    );
                }
            }
        }
    }

    /// Data types exported by this module, in discovery order
    pub fn datatype_names(&self) -> &[String] {
        self.discovered
            .as_ref()
            .map(|d| d.datatype_names.as_slice())
            .unwrap_or_default()
    }

    /// Patterns exported by this module, in discovery order
    pub fn pattern_names(&self) -> &[String] {
        self.discovered
            .as_ref()
            .map(|d| d.pattern_names.as_slice())
            .unwrap_or_default()
    }

    /// Summary for tooling
    pub fn info(&self) -> ModuleInfo {
        let discovered = self.discovered.as_ref();
        ModuleInfo {
            key: self.key.clone(),
            source: self.source.label(),
            api_version: discovered.map(|d| d.api_version.clone()).unwrap_or_default(),
            plugin_types: discovered
                .map(|d| d.plugin_types.clone())
                .unwrap_or_default(),
            datatypes: self.datatype_names().to_vec(),
            patterns: self.pattern_names().to_vec(),
        }
    }

    /// Instantiate a data type prototype
    pub fn instantiate_datatype(&self, name: &str) -> Result<DataTypeRef, PluginError> {
        let plugin = self.owner(NameKind::Datatype, name)?;
        let datatype: Arc<dyn DataType> = call_plugin_preserving_error(
            AssertUnwindSafe(|| plugin.instantiate_datatype(name)),
            |msg| instantiation_panic(name, msg),
        )?;
        Ok(ModuleRef::new(datatype, self.guard()))
    }

    /// Instantiate a pattern description
    pub fn instantiate_pattern(&self, name: &str) -> Result<Pattern, PluginError> {
        let plugin = self.owner(NameKind::Pattern, name)?;
        call_plugin_preserving_error(
            AssertUnwindSafe(|| plugin.instantiate_pattern(name)),
            |msg| instantiation_panic(name, msg),
        )
    }

    /// Instantiate a component from `pattern`, bound to `instance_id`
    pub fn instantiate_component(
        &self,
        pattern: &str,
        instance_id: &str,
    ) -> Result<ComponentRef, PluginError> {
        let plugin = self.owner(NameKind::Pattern, pattern)?;
        let component: Arc<dyn Component> = call_plugin_preserving_error(
            AssertUnwindSafe(|| plugin.instantiate_component(pattern, instance_id)),
            |msg| instantiation_panic(pattern, msg),
        )?;
        Ok(ModuleRef::new(component, self.guard()))
    }

    fn guard(&self) -> ModuleGuard {
        ModuleGuard::new(self.library.clone())
    }

    fn owner(&self, kind: NameKind, name: &str) -> Result<&Arc<dyn Plugin>, PluginError> {
        let discovered = self
            .discovered
            .as_ref()
            .ok_or_else(|| PluginError::unknown(kind, name))?;
        let index = match kind {
            NameKind::Datatype => &discovered.datatypes,
            NameKind::Pattern | NameKind::Component => &discovered.patterns,
        };
        index.get(name).ok_or_else(|| PluginError::unknown(kind, name))
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("key", &self.key)
            .field("source", &self.source.label())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn instantiation_panic(name: &str, msg: String) -> PluginError {
    PluginError::Instantiation {
        name: name.to_string(),
        reason: format!("panicked: {msg}"),
    }
}

fn open_library(path: &Path) -> Result<Library, LoadError> {
    // SAFETY: loading a library runs its initialisers. Only modules from the
    // configured search path are loaded.
    unsafe { Library::new(path) }.map_err(|e| LoadError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_registration_table<'lib>(
    library: &'lib Library,
    path: &Path,
) -> Result<&'lib PluginModule, LoadError> {
    // SAFETY: the symbol is a `static PluginModule` emitted by
    // `declare_plugin_module!`; the reference does not outlive the library.
    unsafe {
        let symbol = library
            .get::<*const PluginModule>(PLUGIN_MODULE_SYMBOL)
            .map_err(|e| LoadError::MissingEntryPoint {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let table: *const PluginModule = *symbol;
        table.as_ref().ok_or_else(|| LoadError::MissingEntryPoint {
            path: path.to_path_buf(),
            reason: "registration table is null".to_string(),
        })
    }
}

/// Check that a module built against `found` can run on this host.
///
/// Caret semantics: the host version must satisfy `^found`.
pub(crate) fn check_api_version(module: &str, found: &str) -> Result<(), LoadError> {
    let incompatible = || LoadError::IncompatibleApi {
        module: module.to_string(),
        found: found.to_string(),
        host: PLUGIN_API_VERSION.to_string(),
    };

    let host = semver::Version::parse(PLUGIN_API_VERSION).map_err(|_| incompatible())?;
    let required = semver::VersionReq::parse(&format!("^{found}")).map_err(|_| incompatible())?;

    if required.matches(&host) {
        Ok(())
    } else {
        Err(incompatible())
    }
}

fn discover(key: &str, module: &PluginModule) -> Result<Discovered, LoadError> {
    check_api_version(key, module.api_version)?;

    let mut discovered = Discovered {
        api_version: module.api_version.to_string(),
        ..Default::default()
    };

    for entry in module.entries {
        let type_name = entry.type_name.to_string();
        let discovery_error = |reason: String| LoadError::Discovery {
            module: key.to_string(),
            type_name: type_name.clone(),
            reason,
        };

        let constructor = entry.constructor.ok_or_else(|| LoadError::MissingConstructor {
            module: key.to_string(),
            type_name: type_name.clone(),
        })?;

        tracing::info!(module = %key, plugin = %type_name, "Found plugin type");

        let plugin: Arc<dyn Plugin> = call_plugin_value(constructor)
            .map(Arc::from)
            .map_err(|e| discovery_error(e.to_string()))?;

        let datatypes = call_plugin_value(AssertUnwindSafe(|| plugin.datatype_names()))
            .map_err(|e| discovery_error(e.to_string()))?;
        let patterns = call_plugin_value(AssertUnwindSafe(|| plugin.pattern_names()))
            .map_err(|e| discovery_error(e.to_string()))?;

        for name in datatypes {
            if discovered.datatypes.contains_key(&name) {
                return Err(duplicate(key, NameKind::Datatype, name));
            }
            tracing::debug!(
                module = %key,
                plugin = %type_name,
                datatype = %name,
                "Registered datatype"
            );
            discovered.datatypes.insert(name.clone(), plugin.clone());
            discovered.datatype_names.push(name);
        }

        for name in patterns {
            if discovered.patterns.contains_key(&name) {
                return Err(duplicate(key, NameKind::Pattern, name));
            }
            tracing::debug!(
                module = %key,
                plugin = %type_name,
                pattern = %name,
                "Registered pattern"
            );
            discovered.patterns.insert(name.clone(), plugin.clone());
            discovered.pattern_names.push(name);
        }

        discovered.plugin_types.push(type_name);
    }

    Ok(discovered)
}

fn duplicate(module: &str, kind: NameKind, name: String) -> LoadError {
    LoadError::DuplicateName {
        module: module.to_string(),
        kind,
        name,
    }
}
