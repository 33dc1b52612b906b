//! Fixture modules shared by the integration tests
//!
//! - `CAMERA_MODULE`: data type "Image", pattern "Camera" (async source)
//! - `SHIFT_MODULE`: pattern "Shift" (f64 -> f64 with an offset) plus two
//!   patterns that always fail to instantiate
//! - `RIVAL_MODULE`: also exports "Image"

#![allow(dead_code)]

use std::any::Any;
use std::sync::{Arc, Mutex};

use tickflow::tickflow_plugin_api::{
    ApplicationAsyncSource, Component, ComponentError, ComponentKind, DataType, DataTypeHeader,
    HeaderDataType, NameKind, PLUGIN_API_VERSION, Pattern, Plugin, PluginEntry, PluginError,
    PluginModule, PortInputs, PortOutputs, Timestamp,
};

/// Lifecycle events recorded by fixtures, in order
pub static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

pub fn record(event: impl Into<String>) {
    EVENTS.lock().unwrap().push(event.into());
}

/// Position of `event` in the log
pub fn event_position(event: &str) -> Option<usize> {
    EVENTS.lock().unwrap().iter().position(|e| e == event)
}

// =============================================================================
// Camera
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub struct ImageHeader;

impl DataTypeHeader for ImageHeader {
    type Native = Image;
    const NAME: &'static str = "Image";
}

pub type Camera = ApplicationAsyncSource<ImageHeader>;

#[derive(Default)]
pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn datatype_names(&self) -> Vec<String> {
        vec!["Image".to_string()]
    }

    fn pattern_names(&self) -> Vec<String> {
        vec!["Camera".to_string()]
    }

    fn instantiate_datatype(&self, name: &str) -> Result<Arc<dyn DataType>, PluginError> {
        match name {
            "Image" => Ok(HeaderDataType::<ImageHeader>::shared()),
            _ => Err(PluginError::unknown(NameKind::Datatype, name)),
        }
    }

    fn instantiate_pattern(&self, name: &str) -> Result<Pattern, PluginError> {
        match name {
            "Camera" => Ok(Pattern::new("Camera", ComponentKind::AsyncSource)
                .with_producer_port("output", "Image")),
            _ => Err(PluginError::unknown(NameKind::Pattern, name)),
        }
    }

    fn instantiate_component(
        &self,
        pattern: &str,
        instance_id: &str,
    ) -> Result<Arc<dyn Component>, PluginError> {
        match pattern {
            "Camera" => Ok(Arc::new(Camera::new(instance_id))),
            _ => Err(PluginError::unknown(NameKind::Component, pattern)),
        }
    }
}

pub static CAMERA_MODULE: PluginModule = PluginModule {
    api_version: PLUGIN_API_VERSION,
    entries: &[PluginEntry::new::<CameraPlugin>("CameraPlugin")],
};

// =============================================================================
// Shift
// =============================================================================

/// Adds `offset` to every f64 it sees
pub struct Shift {
    id: String,
    offset: Mutex<f64>,
}

impl Component for Shift {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Functional
    }

    fn configure(&self, parameters: &serde_json::Value) -> Result<(), ComponentError> {
        match parameters.get("offset") {
            None => Ok(()),
            Some(value) => {
                let offset = value.as_f64().ok_or_else(|| ComponentError::InvalidParameter {
                    name: "offset".into(),
                    reason: format!("expected a number, got {value}"),
                })?;
                *self.offset.lock().unwrap() = offset;
                Ok(())
            }
        }
    }

    fn start(&self) -> bool {
        record(format!("start:{}", self.id));
        true
    }

    fn stop(&self) -> bool {
        record(format!("stop:{}", self.id));
        true
    }

    fn process(
        &self,
        _ts: Timestamp,
        inputs: &PortInputs,
        outputs: &mut PortOutputs,
    ) -> Result<(), ComponentError> {
        let value = inputs.get::<f64>(0).ok_or(ComponentError::MissingInput(0))?;
        outputs.set(0, value + *self.offset.lock().unwrap())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for Shift {
    fn drop(&mut self) {
        record(format!("drop:{}", self.id));
    }
}

#[derive(Default)]
pub struct ShiftPlugin;

impl Plugin for ShiftPlugin {
    fn datatype_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn pattern_names(&self) -> Vec<String> {
        vec!["Shift".into(), "Broken".into(), "Panicky".into()]
    }

    fn instantiate_datatype(&self, name: &str) -> Result<Arc<dyn DataType>, PluginError> {
        Err(PluginError::unknown(NameKind::Datatype, name))
    }

    fn instantiate_pattern(&self, name: &str) -> Result<Pattern, PluginError> {
        match name {
            "Shift" => Ok(Pattern::new("Shift", ComponentKind::Functional)
                .with_consumer_port("in", "f64")
                .with_producer_port("out", "f64")
                .with_parameters(serde_json::json!({"offset": 0.0}))),
            "Broken" | "Panicky" => Ok(Pattern::new(name, ComponentKind::Functional)),
            _ => Err(PluginError::unknown(NameKind::Pattern, name)),
        }
    }

    fn instantiate_component(
        &self,
        pattern: &str,
        instance_id: &str,
    ) -> Result<Arc<dyn Component>, PluginError> {
        match pattern {
            "Shift" => Ok(Arc::new(Shift {
                id: instance_id.to_string(),
                offset: Mutex::new(0.0),
            })),
            "Broken" => Err(PluginError::Instantiation {
                name: pattern.to_string(),
                reason: "device unavailable".to_string(),
            }),
            "Panicky" => panic!("Panicky cannot be built"),
            _ => Err(PluginError::unknown(NameKind::Component, pattern)),
        }
    }
}

pub static SHIFT_MODULE: PluginModule = PluginModule {
    api_version: PLUGIN_API_VERSION,
    entries: &[PluginEntry::new::<ShiftPlugin>("ShiftPlugin")],
};

// =============================================================================
// Rival
// =============================================================================

/// Exports a second "Image"
#[derive(Default)]
pub struct RivalPlugin;

impl Plugin for RivalPlugin {
    fn datatype_names(&self) -> Vec<String> {
        vec!["Image".into(), "Depth".into()]
    }

    fn pattern_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn instantiate_datatype(&self, name: &str) -> Result<Arc<dyn DataType>, PluginError> {
        Err(PluginError::unknown(NameKind::Datatype, name))
    }

    fn instantiate_pattern(&self, name: &str) -> Result<Pattern, PluginError> {
        Err(PluginError::unknown(NameKind::Pattern, name))
    }

    fn instantiate_component(
        &self,
        pattern: &str,
        _instance_id: &str,
    ) -> Result<Arc<dyn Component>, PluginError> {
        Err(PluginError::unknown(NameKind::Component, pattern))
    }
}

pub static RIVAL_MODULE: PluginModule = PluginModule {
    api_version: PLUGIN_API_VERSION,
    entries: &[PluginEntry::new::<RivalPlugin>("RivalPlugin")],
};
