//! Built-in Module
//!
//! In-process capability module registered before any library from the
//! search path. It provides the primitive data types and, for each of them,
//! the generic application source and sink patterns.
//!
//! # Data Types
//!
//! | Name     | Native type         |
//! |----------|---------------------|
//! | `f64`    | `f64`               |
//! | `i64`    | `i64`               |
//! | `String` | `String`            |
//! | `Json`   | `serde_json::Value` |
//!
//! # Patterns
//!
//! - `ApplicationAsyncSource_<type>`: fed by application threads
//! - `ApplicationSyncSink_<type>`: hands values to an application callback

use std::sync::Arc;

use tickflow_plugin_api::{
    ApplicationAsyncSource, ApplicationSyncSink, Component, DataType, DataTypeHeader,
    HeaderDataType, NameKind, PLUGIN_API_VERSION, Pattern, Plugin, PluginEntry, PluginError,
    PluginModule,
};

/// Registry key of the built-in module
pub const BUILTIN_MODULE_KEY: &str = "builtin";

/// Registration table of the built-in module
pub static BUILTIN_MODULE: PluginModule = PluginModule {
    api_version: PLUGIN_API_VERSION,
    entries: &[PluginEntry::new::<BuiltinPlugin>("BuiltinPlugin")],
};

// ============================================================================
// Data Type Headers
// ============================================================================

/// `f64` samples
pub struct F64Header;

impl DataTypeHeader for F64Header {
    type Native = f64;
    const NAME: &'static str = "f64";
}

/// `i64` counters and identifiers
pub struct I64Header;

impl DataTypeHeader for I64Header {
    type Native = i64;
    const NAME: &'static str = "i64";
}

/// UTF-8 text
pub struct StringHeader;

impl DataTypeHeader for StringHeader {
    type Native = String;
    const NAME: &'static str = "String";
}

/// Arbitrary JSON documents
pub struct JsonHeader;

impl DataTypeHeader for JsonHeader {
    type Native = serde_json::Value;
    const NAME: &'static str = "Json";
}

// ============================================================================
// Plugin Implementation
// ============================================================================

struct BuiltinType {
    name: &'static str,
    source_pattern: String,
    sink_pattern: String,
    datatype: fn() -> Arc<dyn DataType>,
    source: fn() -> Pattern,
    sink: fn() -> Pattern,
    new_source: fn(&str) -> Arc<dyn Component>,
    new_sink: fn(&str) -> Arc<dyn Component>,
}

impl BuiltinType {
    fn of<H: DataTypeHeader>() -> Self {
        Self {
            name: H::NAME,
            source_pattern: ApplicationAsyncSource::<H>::pattern_name(),
            sink_pattern: ApplicationSyncSink::<H>::pattern_name(),
            datatype: HeaderDataType::<H>::shared,
            source: ApplicationAsyncSource::<H>::pattern,
            sink: ApplicationSyncSink::<H>::pattern,
            new_source: new_source::<H>,
            new_sink: new_sink::<H>,
        }
    }
}

fn new_source<H: DataTypeHeader>(instance_id: &str) -> Arc<dyn Component> {
    Arc::new(ApplicationAsyncSource::<H>::new(instance_id))
}

fn new_sink<H: DataTypeHeader>(instance_id: &str) -> Arc<dyn Component> {
    Arc::new(ApplicationSyncSink::<H>::new(instance_id))
}

/// Plugin implementation behind [`BUILTIN_MODULE`]
pub struct BuiltinPlugin {
    types: Vec<BuiltinType>,
}

impl Default for BuiltinPlugin {
    fn default() -> Self {
        Self {
            types: vec![
                BuiltinType::of::<F64Header>(),
                BuiltinType::of::<I64Header>(),
                BuiltinType::of::<StringHeader>(),
                BuiltinType::of::<JsonHeader>(),
            ],
        }
    }
}

impl BuiltinPlugin {
    fn by_pattern(&self, pattern: &str) -> Option<(&BuiltinType, bool)> {
        self.types.iter().find_map(|t| {
            if t.source_pattern == pattern {
                Some((t, true))
            } else if t.sink_pattern == pattern {
                Some((t, false))
            } else {
                None
            }
        })
    }
}

impl Plugin for BuiltinPlugin {
    fn datatype_names(&self) -> Vec<String> {
        self.types.iter().map(|t| t.name.to_string()).collect()
    }

    fn pattern_names(&self) -> Vec<String> {
        self.types
            .iter()
            .flat_map(|t| [t.source_pattern.clone(), t.sink_pattern.clone()])
            .collect()
    }

    fn instantiate_datatype(&self, name: &str) -> Result<Arc<dyn DataType>, PluginError> {
        self.types
            .iter()
            .find(|t| t.name == name)
            .map(|t| (t.datatype)())
            .ok_or_else(|| PluginError::unknown(NameKind::Datatype, name))
    }

    fn instantiate_pattern(&self, name: &str) -> Result<Pattern, PluginError> {
        match self.by_pattern(name) {
            Some((t, true)) => Ok((t.source)()),
            Some((t, false)) => Ok((t.sink)()),
            None => Err(PluginError::unknown(NameKind::Pattern, name)),
        }
    }

    fn instantiate_component(
        &self,
        pattern: &str,
        instance_id: &str,
    ) -> Result<Arc<dyn Component>, PluginError> {
        match self.by_pattern(pattern) {
            Some((t, true)) => Ok((t.new_source)(instance_id)),
            Some((t, false)) => Ok((t.new_sink)(instance_id)),
            None => Err(PluginError::unknown(NameKind::Pattern, pattern)),
        }
    }
}
