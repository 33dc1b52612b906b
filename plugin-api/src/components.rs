//! Generic application-facing components.
//!
//! [`ApplicationAsyncSource`] lets application threads push values into a
//! running graph; [`ApplicationSyncSink`] hands values leaving the graph back
//! to the application. Both are parameterised by a [`DataTypeHeader`] so one
//! implementation serves every data type.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info, trace, warn};

use crate::{
    Admission, Component, ComponentError, ComponentKind, DataTypeHeader, GateError, Pattern,
    PortInputs, PortOutputs, SourceGate, Timestamp,
};

/// A value could not be delivered after its timestamp was admitted.
///
/// The admitted slot has already been released with [`SourceGate::abort`].
#[derive(Debug, thiserror::Error)]
#[error("source '{component}' failed to deliver {timestamp}: {source}")]
pub struct SourceError {
    /// Instance id of the source
    pub component: String,
    /// Timestamp of the failed delivery
    pub timestamp: Timestamp,
    /// Gate-level cause
    #[source]
    pub source: GateError,
}

// =============================================================================
// Asynchronous Source
// =============================================================================

/// Source component fed by application threads through [`new_value`].
///
/// [`new_value`]: ApplicationAsyncSource::new_value
pub struct ApplicationAsyncSource<H: DataTypeHeader> {
    id: String,
    gate: ArcSwapOption<Arc<dyn SourceGate>>,
    _header: PhantomData<fn() -> H>,
}

impl<H: DataTypeHeader> ApplicationAsyncSource<H> {
    /// Create an unbound source.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gate: ArcSwapOption::empty(),
            _header: PhantomData,
        }
    }

    /// `ApplicationAsyncSource_<data type name>`
    pub fn pattern_name() -> String {
        format!("ApplicationAsyncSource_{}", H::NAME)
    }

    /// Pattern with one producer port named `output`.
    pub fn pattern() -> Pattern {
        Pattern::new(Self::pattern_name(), ComponentKind::AsyncSource)
            .with_producer_port("output", H::NAME)
    }

    /// Check if a gate is currently bound
    pub fn is_bound(&self) -> bool {
        self.gate.load().is_some()
    }

    /// Push `value` for timestamp `ts` into the graph.
    ///
    /// Returns `Ok(false)` when the network refuses the timestamp (or no
    /// network is running); nothing is written in that case. Returns
    /// `Ok(true)` once the value is committed.
    pub fn new_value(&self, ts: Timestamp, value: H::Native) -> Result<bool, SourceError> {
        let Some(gate) = self.gate.load_full() else {
            debug!(component = %self.id, timestamp = %ts, "No gate bound, value dropped");
            return Ok(false);
        };

        if let Admission::Rejected(reason) = gate.request(ts) {
            trace!(component = %self.id, timestamp = %ts, %reason, "Timestamp rejected");
            return Ok(false);
        }

        match Self::deliver(&**gate, ts, value) {
            Ok(()) => Ok(true),
            Err(e) => {
                gate.abort(ts);
                warn!(
                    component = %self.id,
                    timestamp = %ts,
                    error = %e,
                    "Delivery failed, slot released"
                );
                Err(SourceError {
                    component: self.id.clone(),
                    timestamp: ts,
                    source: e,
                })
            }
        }
    }

    fn deliver(gate: &dyn SourceGate, ts: Timestamp, value: H::Native) -> Result<(), GateError> {
        let cell = gate.acquire(ts)?;
        cell.write(value)?;
        drop(cell);
        gate.commit(ts)
    }
}

impl<H: DataTypeHeader> Component for ApplicationAsyncSource<H> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::AsyncSource
    }

    fn start(&self) -> bool {
        info!(component = %self.id, "Got start signal");
        true
    }

    fn stop(&self) -> bool {
        info!(component = %self.id, "Got stop signal");
        true
    }

    fn bind_gate(&self, gate: Option<Arc<dyn SourceGate>>) {
        self.gate.store(gate.map(Arc::new));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// =============================================================================
// Synchronous Sink
// =============================================================================

/// Callback invoked by [`ApplicationSyncSink`] for every value it receives.
pub type SinkCallback<T> = Box<dyn Fn(Timestamp, &T) + Send + Sync>;

/// Sink component handing each received value to an application callback.
pub struct ApplicationSyncSink<H: DataTypeHeader> {
    id: String,
    callback: ArcSwapOption<SinkCallback<H::Native>>,
}

impl<H: DataTypeHeader> ApplicationSyncSink<H> {
    /// Create a sink without a callback.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            callback: ArcSwapOption::empty(),
        }
    }

    /// `ApplicationSyncSink_<data type name>`
    pub fn pattern_name() -> String {
        format!("ApplicationSyncSink_{}", H::NAME)
    }

    /// Pattern with one consumer port named `input`.
    pub fn pattern() -> Pattern {
        Pattern::new(Self::pattern_name(), ComponentKind::SyncSink)
            .with_consumer_port("input", H::NAME)
    }

    /// Install the callback, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(Timestamp, &H::Native) + Send + Sync + 'static,
    {
        let callback: SinkCallback<H::Native> = Box::new(callback);
        self.callback.store(Some(Arc::new(callback)));
    }

    /// Remove the callback.
    pub fn clear_callback(&self) {
        self.callback.store(None);
    }
}

impl<H: DataTypeHeader> Component for ApplicationSyncSink<H> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::SyncSink
    }

    fn process(
        &self,
        ts: Timestamp,
        inputs: &PortInputs,
        _outputs: &mut PortOutputs,
    ) -> Result<(), ComponentError> {
        let value = inputs
            .get::<H::Native>(0)
            .ok_or(ComponentError::MissingInput(0))?;

        match self.callback.load_full() {
            Some(callback) => (**callback)(ts, value),
            None => debug!(component = %self.id, timestamp = %ts, "No callback set, value dropped"),
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
