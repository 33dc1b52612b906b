//! # tickflow Plugin API
//!
//! This crate defines the capability interface shared by the tickflow host and
//! the plugin modules it loads at runtime. A plugin module contributes named
//! data types, named patterns (component blueprints) and the components
//! instantiated from those patterns.
//!
//! # Architecture
//!
//! A module exports exactly one well-known static, the registration table
//! (`TICKFLOW_PLUGIN_MODULE`), listing the plugin implementations it contains
//! together with their default constructors. The host reads the table once
//! after loading the library, constructs every implementation and asks it for
//! the names it supports.
//!
//! # ABI
//!
//! Trait objects cross the library boundary, so the host and every module
//! must be built with the same toolchain and against a semver-compatible
//! version of this crate. The host checks [`PLUGIN_API_VERSION`] before
//! touching anything else in the table.
//!
//! # Example Plugin
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tickflow_plugin_api::*;
//!
//! #[derive(Default)]
//! pub struct MyPlugin;
//!
//! impl Plugin for MyPlugin {
//!     fn datatype_names(&self) -> Vec<String> { vec!["Image".into()] }
//!     fn pattern_names(&self) -> Vec<String> { vec!["Camera".into()] }
//!     // ...
//! }
//!
//! declare_plugin_module!(MyPlugin);
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

mod components;

pub use components::{ApplicationAsyncSource, ApplicationSyncSink, SinkCallback, SourceError};

// Re-exported so plugin crates do not need a direct dependency.
pub use serde_json;

// =============================================================================
// Versioning
// =============================================================================

/// Version of the capability interface a module was compiled against.
pub const PLUGIN_API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Symbol name of the registration table every module exports.
pub const PLUGIN_MODULE_SYMBOL: &[u8] = b"TICKFLOW_PLUGIN_MODULE\0";

// =============================================================================
// Timestamps
// =============================================================================

/// One tick of data through the graph.
///
/// Nanoseconds since the Unix epoch. Timestamps are totally ordered and are
/// the correlation key between a producer and the buffer cell the network
/// reserves for it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from nanoseconds since the epoch.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Nanoseconds since the epoch.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Self::from)
            .unwrap_or_default()
    }
}

impl From<Duration> for Timestamp {
    fn from(since_epoch: Duration) -> Self {
        Self(u64::try_from(since_epoch.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

// =============================================================================
// Data Types and Buffer Cells
// =============================================================================

/// Type-erased value stored in one buffer cell.
pub type CellValue = Box<dyn Any + Send + Sync>;

/// Prototype of a named data type.
///
/// The network asks each prototype for fresh cells when it reserves buffer
/// space for a timestamp.
pub trait DataType: Send + Sync {
    /// Registered name of the data type (e.g. "Image")
    fn name(&self) -> &str;

    /// Allocate a default-initialised cell of this type
    fn create_cell(&self) -> CellValue;
}

/// Compile-time description of a data type: its native Rust type and its name.
///
/// Generic components such as [`ApplicationAsyncSource`] are parameterised by
/// a header.
pub trait DataTypeHeader: Send + Sync + 'static {
    /// Native value stored in cells of this type
    type Native: Default + Clone + Send + Sync + 'static;

    /// Registered data type name
    const NAME: &'static str;
}

/// [`DataType`] prototype derived from a [`DataTypeHeader`].
pub struct HeaderDataType<H>(PhantomData<fn() -> H>);

impl<H: DataTypeHeader> HeaderDataType<H> {
    /// Create the prototype.
    pub fn new() -> Self {
        Self(PhantomData)
    }

    /// Create the prototype as a shared handle.
    pub fn shared() -> Arc<dyn DataType> {
        Arc::new(Self::new())
    }
}

impl<H: DataTypeHeader> Default for HeaderDataType<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: DataTypeHeader> DataType for HeaderDataType<H> {
    fn name(&self) -> &str {
        H::NAME
    }

    fn create_cell(&self) -> CellValue {
        Box::new(H::Native::default())
    }
}

/// Borrow the value of a cell as `T`.
pub fn downcast_cell<T: Any>(cell: &CellValue) -> Option<&T> {
    let value: &(dyn Any + Send + Sync) = &**cell;
    value.downcast_ref::<T>()
}

/// Writable handle to a buffer cell reserved for one timestamp.
///
/// Handed out by [`SourceGate::acquire`]. Clones refer to the same cell.
#[derive(Clone)]
pub struct CellHandle {
    datatype: Arc<str>,
    cell: Arc<Mutex<CellValue>>,
}

impl CellHandle {
    /// Wrap a freshly allocated cell.
    pub fn new(datatype: impl Into<Arc<str>>, value: CellValue) -> Self {
        Self {
            datatype: datatype.into(),
            cell: Arc::new(Mutex::new(value)),
        }
    }

    /// Data type name of the cell
    pub fn datatype(&self) -> &str {
        &self.datatype
    }

    /// Store `value` into the cell.
    ///
    /// Fails if the cell was allocated for a different native type.
    pub fn write<T: Any + Send + Sync>(&self, value: T) -> Result<(), GateError> {
        let mut cell = self.cell.lock();
        let slot: &mut (dyn Any + Send + Sync) = &mut **cell;
        match slot.downcast_mut::<T>() {
            Some(target) => {
                *target = value;
                Ok(())
            }
            None => Err(GateError::TypeMismatch {
                datatype: self.datatype.to_string(),
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Clone the current value out of the cell.
    pub fn read<T: Any + Clone>(&self) -> Option<T> {
        let cell = self.cell.lock();
        downcast_cell::<T>(&cell).cloned()
    }

    /// Take the value out of the cell.
    ///
    /// Returns the handle back if other clones are still alive.
    pub fn into_value(self) -> Result<CellValue, Self> {
        match Arc::try_unwrap(self.cell) {
            Ok(mutex) => Ok(mutex.into_inner()),
            Err(cell) => Err(Self {
                datatype: self.datatype,
                cell,
            }),
        }
    }
}

impl fmt::Debug for CellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellHandle")
            .field("datatype", &self.datatype)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Patterns
// =============================================================================

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// The component writes this port
    Producer,
    /// The component reads this port
    Consumer,
}

/// One port of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port name, unique within the pattern
    pub name: String,
    /// Data type name carried by the port
    pub datatype: String,
    /// Producer or consumer
    pub direction: PortDirection,
}

/// How the network drives a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Fed from outside the graph through a [`SourceGate`]
    AsyncSource,
    /// Reads its consumer ports and writes its producer ports per timestamp
    Functional,
    /// Reads its consumer ports per timestamp, produces nothing
    SyncSink,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::AsyncSource => write!(f, "async_source"),
            ComponentKind::Functional => write!(f, "functional"),
            ComponentKind::SyncSink => write!(f, "sync_sink"),
        }
    }
}

/// Named blueprint of a component, including its port signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Pattern name as registered
    pub name: String,
    /// Scheduling kind of the components built from this pattern
    pub kind: ComponentKind,
    /// Ports in declaration order
    pub ports: Vec<PortSpec>,
    /// Default parameters
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl Pattern {
    /// Create a pattern without ports.
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ports: Vec::new(),
            parameters: serde_json::Value::Null,
        }
    }

    /// Add a producer (output) port.
    pub fn with_producer_port(
        mut self,
        name: impl Into<String>,
        datatype: impl Into<String>,
    ) -> Self {
        self.ports.push(PortSpec {
            name: name.into(),
            datatype: datatype.into(),
            direction: PortDirection::Producer,
        });
        self
    }

    /// Add a consumer (input) port.
    pub fn with_consumer_port(
        mut self,
        name: impl Into<String>,
        datatype: impl Into<String>,
    ) -> Self {
        self.ports.push(PortSpec {
            name: name.into(),
            datatype: datatype.into(),
            direction: PortDirection::Consumer,
        });
        self
    }

    /// Set the default parameters.
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Producer ports in index order
    pub fn producer_ports(&self) -> impl Iterator<Item = &PortSpec> {
        self.ports
            .iter()
            .filter(|p| p.direction == PortDirection::Producer)
    }

    /// Consumer ports in index order
    pub fn consumer_ports(&self) -> impl Iterator<Item = &PortSpec> {
        self.ports
            .iter()
            .filter(|p| p.direction == PortDirection::Consumer)
    }

    /// Index of a producer port among the producer ports
    pub fn producer_index(&self, port: &str) -> Option<usize> {
        self.producer_ports().position(|p| p.name == port)
    }

    /// Index of a consumer port among the consumer ports
    pub fn consumer_index(&self, port: &str) -> Option<usize> {
        self.consumer_ports().position(|p| p.name == port)
    }
}

// =============================================================================
// Asynchronous Source Gate
// =============================================================================

/// Why the network refused a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The network is not accepting new work (not started or shutting down)
    NotRunning,
    /// Timestamp is older than one already admitted for this source
    OutOfOrder,
    /// Timestamp was already admitted for this source
    Duplicate,
    /// Too many timestamps in flight for this source
    Backpressure,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotRunning => write!(f, "not running"),
            RejectReason::OutOfOrder => write!(f, "out of order"),
            RejectReason::Duplicate => write!(f, "duplicate"),
            RejectReason::Backpressure => write!(f, "backpressure"),
        }
    }
}

/// Outcome of [`SourceGate::request`]. A rejection is routine backpressure,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was reserved for the timestamp
    Admitted,
    /// The timestamp was refused
    Rejected(RejectReason),
}

impl Admission {
    /// Check if the timestamp was admitted
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Failure after a timestamp was admitted.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// acquire/commit for a timestamp that holds no slot
    #[error("timestamp {0} holds no admitted slot")]
    NotAdmitted(Timestamp),

    /// Value type does not match the cell's data type
    #[error("cell of data type '{datatype}' cannot hold a {expected}")]
    TypeMismatch {
        datatype: String,
        expected: &'static str,
    },

    /// The network closed the gate
    #[error("gate is closed")]
    Closed,

    /// Any other network-side failure
    #[error("{0}")]
    Other(String),
}

/// Network-side half of the asynchronous source protocol.
///
/// Implementations must tolerate concurrent calls from any number of producer
/// threads; `acquire` may block until a cell is available.
pub trait SourceGate: Send + Sync {
    /// Ask the network to admit a new unit of work for `ts`.
    fn request(&self, ts: Timestamp) -> Admission;

    /// Exclusive write access to the cell reserved for `ts` on output port 0.
    fn acquire(&self, ts: Timestamp) -> Result<CellHandle, GateError>;

    /// The cell for `ts` is complete and ready for downstream scheduling.
    fn commit(&self, ts: Timestamp) -> Result<(), GateError>;

    /// Release the slot admitted for `ts` without publishing it.
    fn abort(&self, ts: Timestamp);
}

// =============================================================================
// Components
// =============================================================================

/// Values present on a component's consumer ports for one timestamp.
pub struct PortInputs {
    values: Vec<Arc<CellValue>>,
}

impl PortInputs {
    /// Wrap the values, indexed by consumer port.
    pub fn new(values: Vec<Arc<CellValue>>) -> Self {
        Self { values }
    }

    /// Number of inputs
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if there are no inputs
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow input `index` as `T`.
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.values.get(index).and_then(|cell| downcast_cell::<T>(cell))
    }
}

/// Cells for a component's producer ports for one timestamp.
pub struct PortOutputs {
    cells: Vec<CellValue>,
}

impl PortOutputs {
    /// Wrap freshly allocated cells, indexed by producer port.
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self { cells }
    }

    /// Number of outputs
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if there are no outputs
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Store `value` on output `index`.
    pub fn set<T: Any + Send + Sync>(
        &mut self,
        index: usize,
        value: T,
    ) -> Result<(), ComponentError> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(ComponentError::NoSuchOutput(index))?;
        let slot: &mut (dyn Any + Send + Sync) = &mut **cell;
        match slot.downcast_mut::<T>() {
            Some(target) => {
                *target = value;
                Ok(())
            }
            None => Err(ComponentError::OutputType {
                index,
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Consume into the raw cells.
    pub fn into_cells(self) -> Vec<CellValue> {
        self.cells
    }
}

/// Errors raised by component logic.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// Parameter could not be applied
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Consumer port carries no value of the expected type
    #[error("missing input on consumer port {0}")]
    MissingInput(usize),

    /// Producer port index out of range
    #[error("no producer port {0}")]
    NoSuchOutput(usize),

    /// Producer port cannot hold the value
    #[error("producer port {index} cannot hold a {expected}")]
    OutputType { index: usize, expected: &'static str },

    /// Component logic failed
    #[error("{0}")]
    Failed(String),
}

/// A live graph node.
///
/// Components are shared between the session (for external access) and the
/// network (for scheduling), so every method takes `&self`.
pub trait Component: Any + Send + Sync {
    /// Instance id the component was created with
    fn id(&self) -> &str;

    /// Scheduling kind
    fn kind(&self) -> ComponentKind;

    /// Apply parameters from the graph description.
    fn configure(&self, parameters: &serde_json::Value) -> Result<(), ComponentError> {
        let _ = parameters;
        Ok(())
    }

    /// Called when the network starts.
    fn start(&self) -> bool {
        true
    }

    /// Called when the network stops.
    fn stop(&self) -> bool {
        true
    }

    /// Bind (or with `None`, unbind) the network's gate. Only meaningful for
    /// [`ComponentKind::AsyncSource`].
    fn bind_gate(&self, gate: Option<Arc<dyn SourceGate>>) {
        let _ = gate;
    }

    /// Per-timestamp work for functional components and sinks.
    fn process(
        &self,
        ts: Timestamp,
        inputs: &PortInputs,
        outputs: &mut PortOutputs,
    ) -> Result<(), ComponentError> {
        let _ = (ts, inputs, outputs);
        Ok(())
    }

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Downcast support for shared handles
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

// =============================================================================
// Plugin Implementations
// =============================================================================

/// Category of a name looked up in a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Datatype,
    Pattern,
    Component,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Datatype => write!(f, "datatype"),
            NameKind::Pattern => write!(f, "pattern"),
            NameKind::Component => write!(f, "component"),
        }
    }
}

/// Errors returned by plugin implementations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The name is not provided by this plugin
    #[error("unknown {kind}: {name}")]
    UnknownName { kind: NameKind, name: String },

    /// The name is known but instantiation failed
    #[error("failed to instantiate '{name}': {reason}")]
    Instantiation { name: String, reason: String },
}

impl PluginError {
    /// Create an unknown-name error
    pub fn unknown(kind: NameKind, name: impl Into<String>) -> Self {
        Self::UnknownName {
            kind,
            name: name.into(),
        }
    }

    /// Check if this is an unknown-name error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownName { .. })
    }
}

/// Capability interface implemented by every plugin.
pub trait Plugin: Send + Sync {
    /// Names of the data types this plugin provides
    fn datatype_names(&self) -> Vec<String>;

    /// Names of the patterns this plugin provides
    fn pattern_names(&self) -> Vec<String>;

    /// Create a data type prototype
    fn instantiate_datatype(&self, name: &str) -> Result<Arc<dyn DataType>, PluginError>;

    /// Create a pattern description
    fn instantiate_pattern(&self, name: &str) -> Result<Pattern, PluginError>;

    /// Create a component from a pattern, bound to `instance_id`
    fn instantiate_component(
        &self,
        pattern: &str,
        instance_id: &str,
    ) -> Result<Arc<dyn Component>, PluginError>;
}

// =============================================================================
// Registration Table
// =============================================================================

/// Default constructor of a plugin implementation.
pub type PluginConstructor = fn() -> Box<dyn Plugin>;

/// One plugin implementation exported by a module.
#[derive(Clone, Copy)]
pub struct PluginEntry {
    /// Type name, used in diagnostics
    pub type_name: &'static str,
    /// Default constructor; `None` makes discovery fail for the module
    pub constructor: Option<PluginConstructor>,
}

impl PluginEntry {
    /// Entry for a default-constructible plugin.
    pub const fn new<P: Plugin + Default + 'static>(type_name: &'static str) -> Self {
        Self {
            type_name,
            constructor: Some(construct::<P>),
        }
    }

    /// Entry that cannot be constructed.
    pub const fn without_constructor(type_name: &'static str) -> Self {
        Self {
            type_name,
            constructor: None,
        }
    }
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("type_name", &self.type_name)
            .field("has_constructor", &self.constructor.is_some())
            .finish()
    }
}

#[doc(hidden)]
pub fn construct<P: Plugin + Default + 'static>() -> Box<dyn Plugin> {
    Box::new(P::default())
}

/// Registration table exported by a module.
#[derive(Debug)]
pub struct PluginModule {
    /// [`PLUGIN_API_VERSION`] the module was compiled against
    pub api_version: &'static str,
    /// Exported plugin implementations
    pub entries: &'static [PluginEntry],
}

/// Export the registration table of a plugin module.
///
/// Every listed type must implement [`Plugin`] and [`Default`].
///
/// ```rust,ignore
/// declare_plugin_module!(CameraPlugin, FilterPlugin);
/// ```
#[macro_export]
macro_rules! declare_plugin_module {
    ($($plugin:ty),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub static TICKFLOW_PLUGIN_MODULE: $crate::PluginModule = $crate::PluginModule {
            api_version: $crate::PLUGIN_API_VERSION,
            entries: &[$($crate::PluginEntry::new::<$plugin>(stringify!($plugin))),+],
        };
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FloatHeader;

    impl DataTypeHeader for FloatHeader {
        type Native = f64;
        const NAME: &'static str = "f64";
    }

    #[test]
    fn test_timestamp_ordering_and_display() {
        let a = Timestamp::from_nanos(10);
        let b = Timestamp::from(Duration::from_nanos(20));
        assert!(a < b);
        assert_eq!(b.as_nanos(), 20);
        assert_eq!(a.to_string(), "10ns");
    }

    #[test]
    fn test_header_datatype_creates_default_cell() {
        let prototype = HeaderDataType::<FloatHeader>::shared();
        assert_eq!(prototype.name(), "f64");
        let cell = prototype.create_cell();
        assert_eq!(downcast_cell::<f64>(&cell), Some(&0.0));
    }

    #[test]
    fn test_cell_handle_write_and_read() {
        let handle = CellHandle::new("f64", HeaderDataType::<FloatHeader>::new().create_cell());
        handle.write(4.5_f64).unwrap();
        assert_eq!(handle.read::<f64>(), Some(4.5));

        let err = handle.write("wrong".to_string()).unwrap_err();
        assert!(matches!(err, GateError::TypeMismatch { .. }));
        assert_eq!(handle.read::<f64>(), Some(4.5));
    }

    #[test]
    fn test_cell_handle_into_value_requires_unique() {
        let handle = CellHandle::new("f64", Box::new(1.0_f64));
        let clone = handle.clone();
        let handle = handle.into_value().unwrap_err();
        drop(clone);
        let value = handle.into_value().unwrap();
        assert_eq!(downcast_cell::<f64>(&value), Some(&1.0));
    }

    #[test]
    fn test_pattern_port_indices() {
        let pattern = Pattern::new("Blend", ComponentKind::Functional)
            .with_consumer_port("a", "f64")
            .with_producer_port("out", "f64")
            .with_consumer_port("b", "f64");

        assert_eq!(pattern.consumer_index("a"), Some(0));
        assert_eq!(pattern.consumer_index("b"), Some(1));
        assert_eq!(pattern.producer_index("out"), Some(0));
        assert_eq!(pattern.producer_index("a"), None);
    }

    #[test]
    fn test_pattern_serialization() {
        let pattern = Pattern::new("Camera", ComponentKind::AsyncSource)
            .with_producer_port("output", "Image");
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["kind"], "async_source");
        assert_eq!(json["ports"][0]["direction"], "producer");
    }

    #[test]
    fn test_port_outputs_type_checked() {
        let mut outputs = PortOutputs::new(vec![Box::new(0.0_f64) as CellValue]);
        outputs.set(0, 2.0_f64).unwrap();
        assert!(matches!(
            outputs.set(0, 1_i64),
            Err(ComponentError::OutputType { index: 0, .. })
        ));
        assert!(matches!(
            outputs.set(3, 1.0_f64),
            Err(ComponentError::NoSuchOutput(3))
        ));
        let cells = outputs.into_cells();
        assert_eq!(downcast_cell::<f64>(&cells[0]), Some(&2.0));
    }

    #[test]
    fn test_plugin_error_not_found() {
        assert!(PluginError::unknown(NameKind::Pattern, "x").is_not_found());
        let err = PluginError::Instantiation {
            name: "x".into(),
            reason: "boom".into(),
        };
        assert!(!err.is_not_found());
        assert_eq!(
            PluginError::unknown(NameKind::Datatype, "Image").to_string(),
            "unknown datatype: Image"
        );
    }
}
