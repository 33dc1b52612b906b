//! Plugin System
//!
//! Discovery and instantiation of the data types, patterns and components
//! contributed by capability modules.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Module Registration                        │
//! │  shared library / static table ──▶ ModuleLoader ──▶ Registry   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ## Writing a Module
//!
//! ```ignore
//! use tickflow_plugin_api::*;
//!
//! #[derive(Default)]
//! pub struct CameraPlugin;
//!
//! impl Plugin for CameraPlugin {
//!     // enumerate and instantiate "Image" and "Camera"
//! }
//!
//! declare_plugin_module!(CameraPlugin);
//! ```
//!
//! ## Using the Registry
//!
//! ```ignore
//! let registry = PluginRegistry::new();
//! registry.add_library("plugins/libcamera.so");
//! let camera = registry.instantiate_component("Camera", "cam0")?;
//! ```

pub mod builtin;
pub mod handle;
pub mod isolation;
pub mod loader;
pub mod registry;

pub use builtin::{BUILTIN_MODULE, BUILTIN_MODULE_KEY, BuiltinPlugin};
pub use handle::{ComponentRef, DataTypeRef, ModuleGuard, ModuleRef};
pub use isolation::{PluginPanic, call_plugin_preserving_error, call_plugin_value};
pub use loader::{LoadError, ModuleInfo, ModuleLoader, ModuleSource};
pub use registry::{PluginRegistry, RegistryError};

/// Platform extension of dynamic libraries (without the dot)
pub const LIBRARY_EXTENSION: &str = std::env::consts::DLL_EXTENSION;
