//! Demo Capability Module for tickflow
//!
//! This module demonstrates how to export data types, patterns and
//! components that the host loads at runtime.
//!
//! - data type `Image`
//! - pattern `Camera`: asynchronous source of `Image`s fed by the application
//! - pattern `FlatImage`: uniform `Image` of the gray level it receives as `i64`
//! - pattern `ImageStats`: mean brightness of each `Image` as an `f64`
//!
//! # Building
//!
//! ```bash
//! cargo build --release -p tickflow-demo-plugin
//! ```
//!
//! The resulting `.so`/`.dll`/`.dylib` file will be in `target/release/`:
//! - Linux: `libtickflow_demo_plugin.so`
//! - macOS: `libtickflow_demo_plugin.dylib`
//! - Windows: `tickflow_demo_plugin.dll`
//!
//! # Installation
//!
//! 1. Create a plugin directory: `mkdir -p /opt/tickflow/plugins`
//! 2. Copy the module: `cp target/release/libtickflow_demo_plugin.so /opt/tickflow/plugins/`
//! 3. Point the host at it:
//!    ```yaml
//!    plugins:
//!      search_path: /opt/tickflow/plugins
//!    ```
//!
//! `FlatImage` consumes `i64` and `ImageStats` produces `f64`, both provided by
//! the host's built-in module.
//!
//! `demos/pipeline.json` wires
//! `ApplicationAsyncSource_i64 -> FlatImage -> ImageStats -> ApplicationSyncSink_f64`:
//!
//! ```bash
//! tickflow -c tickflow.yaml run demos/pipeline.json
//! ```

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tickflow_plugin_api::serde_json::{self, json};
use tickflow_plugin_api::{
    ApplicationAsyncSource, Component, ComponentError, ComponentKind, DataType, DataTypeHeader,
    HeaderDataType, NameKind, Pattern, Plugin, PluginError, PortInputs, PortOutputs, Timestamp,
    declare_plugin_module,
};

/// 8-bit grayscale frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Image {
    /// Mean pixel value, 0.0 for an empty frame
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&p| u64::from(p)).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

pub struct ImageHeader;

impl DataTypeHeader for ImageHeader {
    type Native = Image;
    const NAME: &'static str = "Image";
}

pub type Camera = ApplicationAsyncSource<ImageHeader>;

// =============================================================================
// Camera
// =============================================================================

#[derive(Default)]
pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn datatype_names(&self) -> Vec<String> {
        vec![ImageHeader::NAME.to_string()]
    }

    fn pattern_names(&self) -> Vec<String> {
        vec!["Camera".to_string(), "FlatImage".to_string()]
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
                .with_producer_port("output", ImageHeader::NAME)),
            "FlatImage" => Ok(Pattern::new("FlatImage", ComponentKind::Functional)
                .with_consumer_port("level", "i64")
                .with_producer_port("image", ImageHeader::NAME)
                .with_parameters(json!({"width": 4, "height": 4}))),
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
            "FlatImage" => Ok(Arc::new(FlatImage::new(instance_id))),
            _ => Err(PluginError::unknown(NameKind::Component, pattern)),
        }
    }
}

// =============================================================================
// FlatImage
// =============================================================================

/// Fills a `width` x `height` frame with one gray level, clamped to 0..=255
pub struct FlatImage {
    id: String,
    width: AtomicU32,
    height: AtomicU32,
}

impl FlatImage {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            width: AtomicU32::new(4),
            height: AtomicU32::new(4),
        }
    }
}

impl Component for FlatImage {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Functional
    }

    fn configure(&self, parameters: &serde_json::Value) -> Result<(), ComponentError> {
        for (key, target) in [("width", &self.width), ("height", &self.height)] {
            let Some(value) = parameters.get(key) else {
                continue;
            };
            let size = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| ComponentError::Failed(format!("'{key}' must be a frame size")))?;
            target.store(size, Ordering::Relaxed);
        }
        Ok(())
    }

    fn process(
        &self,
        _ts: Timestamp,
        inputs: &PortInputs,
        outputs: &mut PortOutputs,
    ) -> Result<(), ComponentError> {
        let level = inputs.get::<i64>(0).ok_or(ComponentError::MissingInput(0))?;
        let width = self.width.load(Ordering::Relaxed);
        let height = self.height.load(Ordering::Relaxed);
        let gray = (*level).clamp(0, 255) as u8;
        outputs.set(
            0,
            Image {
                width,
                height,
                pixels: vec![gray; width as usize * height as usize],
            },
        )
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// =============================================================================
// ImageStats
// =============================================================================

/// Emits the mean brightness of every frame
pub struct ImageStats {
    id: String,
}

impl Component for ImageStats {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Functional
    }

    fn process(
        &self,
        _ts: Timestamp,
        inputs: &PortInputs,
        outputs: &mut PortOutputs,
    ) -> Result<(), ComponentError> {
        let image = inputs.get::<Image>(0).ok_or(ComponentError::MissingInput(0))?;
        outputs.set(0, image.mean())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Default)]
pub struct StatsPlugin;

impl Plugin for StatsPlugin {
    fn datatype_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn pattern_names(&self) -> Vec<String> {
        vec!["ImageStats".to_string()]
    }

    fn instantiate_datatype(&self, name: &str) -> Result<Arc<dyn DataType>, PluginError> {
        Err(PluginError::unknown(NameKind::Datatype, name))
    }

    fn instantiate_pattern(&self, name: &str) -> Result<Pattern, PluginError> {
        match name {
            "ImageStats" => Ok(Pattern::new("ImageStats", ComponentKind::Functional)
                .with_consumer_port("image", ImageHeader::NAME)
                .with_producer_port("brightness", "f64")),
            _ => Err(PluginError::unknown(NameKind::Pattern, name)),
        }
    }

    fn instantiate_component(
        &self,
        pattern: &str,
        instance_id: &str,
    ) -> Result<Arc<dyn Component>, PluginError> {
        match pattern {
            "ImageStats" => Ok(Arc::new(ImageStats {
                id: instance_id.to_string(),
            })),
            _ => Err(PluginError::unknown(NameKind::Component, pattern)),
        }
    }
}

declare_plugin_module!(CameraPlugin, StatsPlugin);

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_plugin_api::{CellValue, downcast_cell};

    #[test]
    fn test_registration_table() {
        assert_eq!(TICKFLOW_PLUGIN_MODULE.entries.len(), 2);
        assert_eq!(TICKFLOW_PLUGIN_MODULE.entries[0].type_name, "CameraPlugin");
        assert!(TICKFLOW_PLUGIN_MODULE.entries.iter().all(|e| e.constructor.is_some()));
    }

    #[test]
    fn test_image_mean() {
        let image = Image {
            width: 2,
            height: 2,
            pixels: vec![0, 100, 200, 100],
        };
        assert_eq!(image.mean(), 100.0);
        assert_eq!(Image::default().mean(), 0.0);
    }

    #[test]
    fn test_flat_image_component() {
        let flat = CameraPlugin.instantiate_component("FlatImage", "flat0").unwrap();
        flat.configure(&json!({"width": 3, "height": 1})).unwrap();
        assert!(flat.configure(&json!({"width": -1})).is_err());

        let inputs = PortInputs::new(vec![Arc::new(Box::new(300_i64) as CellValue)]);
        let mut outputs = PortOutputs::new(vec![Box::new(Image::default()) as CellValue]);
        flat.process(Timestamp::from_nanos(1), &inputs, &mut outputs).unwrap();

        let cells = outputs.into_cells();
        let image = downcast_cell::<Image>(&cells[0]).unwrap();
        assert_eq!((image.width, image.height), (3, 1));
        assert_eq!(image.pixels, vec![255; 3]);
    }

    #[test]
    fn test_stats_component() {
        let stats = StatsPlugin
            .instantiate_component("ImageStats", "stats0")
            .unwrap();
        assert_eq!(stats.id(), "stats0");

        let image = Image {
            width: 1,
            height: 2,
            pixels: vec![10, 30],
        };
        let inputs = PortInputs::new(vec![Arc::new(Box::new(image) as CellValue)]);
        let mut outputs = PortOutputs::new(vec![Box::new(0.0_f64) as CellValue]);
        stats.process(Timestamp::from_nanos(1), &inputs, &mut outputs).unwrap();
        assert_eq!(
            downcast_cell::<f64>(&outputs.into_cells()[0]),
            Some(&20.0)
        );
    }
}
