//! Per-source admission gate of the local network
//!
//! Each asynchronous source owns one gate. Admitted timestamps hold a slot
//! until they are committed or aborted; committed slots are published to the
//! dispatcher strictly in timestamp order, so a slow producer for an early
//! timestamp holds back later ones until it commits or aborts.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tickflow_plugin_api::{
    Admission, CellHandle, CellValue, GateError, RejectReason, SourceGate, Timestamp,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::plugin::DataTypeRef;

/// A committed source value on its way to the dispatcher
pub(super) struct Publish {
    pub node: usize,
    pub ts: Timestamp,
    pub value: CellValue,
}

enum Slot {
    Pending(CellHandle),
    Committed(CellValue),
}

struct GateState {
    last_admitted: Option<Timestamp>,
    slots: BTreeMap<Timestamp, Slot>,
    /// `None` once the gate is closed
    sender: Option<UnboundedSender<Publish>>,
}

impl GateState {
    /// Publish the committed prefix of the slot table.
    fn flush(&mut self, node: usize) -> Result<(), GateError> {
        while matches!(self.slots.first_key_value(), Some((_, Slot::Committed(_)))) {
            let Some((ts, Slot::Committed(value))) = self.slots.pop_first() else {
                break;
            };
            let sender = self.sender.as_ref().ok_or(GateError::Closed)?;
            sender
                .send(Publish { node, ts, value })
                .map_err(|_| GateError::Closed)?;
        }
        Ok(())
    }
}

/// [`SourceGate`] bound to one asynchronous source node
pub(super) struct LocalGate {
    node: usize,
    instance_id: String,
    datatype_name: Arc<str>,
    datatype: DataTypeRef,
    max_in_flight: usize,
    state: Mutex<GateState>,
}

impl LocalGate {
    pub(super) fn new(
        node: usize,
        instance_id: impl Into<String>,
        datatype: DataTypeRef,
        max_in_flight: usize,
        sender: UnboundedSender<Publish>,
    ) -> Self {
        Self {
            node,
            instance_id: instance_id.into(),
            datatype_name: Arc::from(datatype.name()),
            datatype,
            max_in_flight: max_in_flight.max(1),
            state: Mutex::new(GateState {
                last_admitted: None,
                slots: BTreeMap::new(),
                sender: Some(sender),
            }),
        }
    }

    /// Node index of the source
    pub(super) fn node(&self) -> usize {
        self.node
    }

    /// Refuse new work and drop every pending slot.
    ///
    /// Returns the number of slots dropped.
    pub(super) fn close(&self) -> usize {
        let mut state = self.state.lock();
        state.sender = None;
        let dropped = state.slots.len();
        state.slots.clear();
        if dropped > 0 {
            tracing::debug!(
                source = %self.instance_id,
                dropped,
                "Dropped in-flight slots on close"
            );
        }
        dropped
    }

    /// Number of admitted, unpublished timestamps
    #[cfg(test)]
    pub(super) fn in_flight(&self) -> usize {
        self.state.lock().slots.len()
    }
}

impl SourceGate for LocalGate {
    fn request(&self, ts: Timestamp) -> Admission {
        let mut state = self.state.lock();

        if state.sender.is_none() {
            return Admission::Rejected(RejectReason::NotRunning);
        }
        if let Some(last) = state.last_admitted {
            if ts == last {
                return Admission::Rejected(RejectReason::Duplicate);
            }
            if ts < last {
                return Admission::Rejected(RejectReason::OutOfOrder);
            }
        }
        if state.slots.len() >= self.max_in_flight {
            return Admission::Rejected(RejectReason::Backpressure);
        }

        let cell = CellHandle::new(self.datatype_name.clone(), self.datatype.create_cell());
        state.slots.insert(ts, Slot::Pending(cell));
        state.last_admitted = Some(ts);
        tracing::trace!(source = %self.instance_id, timestamp = %ts, "Admitted");
        Admission::Admitted
    }

    fn acquire(&self, ts: Timestamp) -> Result<CellHandle, GateError> {
        let state = self.state.lock();
        match state.slots.get(&ts) {
            Some(Slot::Pending(cell)) => Ok(cell.clone()),
            _ if state.sender.is_none() => Err(GateError::Closed),
            _ => Err(GateError::NotAdmitted(ts)),
        }
    }

    fn commit(&self, ts: Timestamp) -> Result<(), GateError> {
        let mut state = self.state.lock();
        if state.sender.is_none() {
            return Err(GateError::Closed);
        }

        let cell = match state.slots.remove(&ts) {
            Some(Slot::Pending(cell)) => cell,
            Some(committed) => {
                state.slots.insert(ts, committed);
                return Err(GateError::NotAdmitted(ts));
            }
            None => return Err(GateError::NotAdmitted(ts)),
        };

        match cell.into_value() {
            Ok(value) => {
                state.slots.insert(ts, Slot::Committed(value));
            }
            Err(cell) => {
                state.slots.insert(ts, Slot::Pending(cell));
                return Err(GateError::Other(format!(
                    "cell for {ts} is still held by the producer"
                )));
            }
        }

        state.flush(self.node)
    }

    fn abort(&self, ts: Timestamp) {
        let mut state = self.state.lock();
        if state.slots.remove(&ts).is_some() {
            tracing::debug!(source = %self.instance_id, timestamp = %ts, "Slot released");
        }
        if let Err(e) = state.flush(self.node) {
            tracing::debug!(source = %self.instance_id, error = %e, "Flush after abort failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickflow_plugin_api::{DataTypeHeader, HeaderDataType, downcast_cell};
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    struct FloatHeader;

    impl DataTypeHeader for FloatHeader {
        type Native = f64;
        const NAME: &'static str = "f64";
    }

    fn gate(max_in_flight: usize) -> (LocalGate, UnboundedReceiver<Publish>) {
        let (tx, rx) = unbounded_channel();
        let datatype = DataTypeRef::unguarded(HeaderDataType::<FloatHeader>::shared());
        let gate = LocalGate::new(3, "src", datatype, max_in_flight, tx);
        (gate, rx)
    }

    fn ts(n: u64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    fn deliver(gate: &LocalGate, n: u64, value: f64) {
        gate.acquire(ts(n)).unwrap().write(value).unwrap();
        gate.commit(ts(n)).unwrap();
    }

    fn drain(rx: &mut UnboundedReceiver<Publish>) -> Vec<(u64, f64)> {
        let mut out = Vec::new();
        while let Ok(publish) = rx.try_recv() {
            assert_eq!(publish.node, 3);
            let value = *downcast_cell::<f64>(&publish.value).unwrap();
            out.push((publish.ts.as_nanos(), value));
        }
        out
    }

    #[test]
    fn test_rejects_duplicate_and_out_of_order() {
        let (gate, _rx) = gate(8);
        assert_eq!(gate.request(ts(10)), Admission::Admitted);
        assert_eq!(gate.request(ts(10)), Admission::Rejected(RejectReason::Duplicate));
        assert_eq!(gate.request(ts(5)), Admission::Rejected(RejectReason::OutOfOrder));
        assert_eq!(gate.request(ts(11)), Admission::Admitted);
    }

    #[test]
    fn test_backpressure() {
        let (gate, mut rx) = gate(2);
        assert!(gate.request(ts(1)).is_admitted());
        assert!(gate.request(ts(2)).is_admitted());
        assert_eq!(gate.request(ts(3)), Admission::Rejected(RejectReason::Backpressure));

        deliver(&gate, 1, 1.0);
        assert!(gate.request(ts(3)).is_admitted());
        assert_eq!(drain(&mut rx), vec![(1, 1.0)]);
    }

    #[test]
    fn test_publishes_in_timestamp_order() {
        let (gate, mut rx) = gate(8);
        gate.request(ts(1));
        gate.request(ts(2));

        deliver(&gate, 2, 2.0);
        assert!(drain(&mut rx).is_empty());

        deliver(&gate, 1, 1.0);
        assert_eq!(drain(&mut rx), vec![(1, 1.0), (2, 2.0)]);
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_abort_releases_later_commits() {
        let (gate, mut rx) = gate(8);
        gate.request(ts(1));
        gate.request(ts(2));
        deliver(&gate, 2, 2.0);

        gate.abort(ts(1));
        assert_eq!(drain(&mut rx), vec![(2, 2.0)]);
        assert_eq!(gate.request(ts(1)), Admission::Rejected(RejectReason::OutOfOrder));
    }

    #[test]
    fn test_commit_without_request() {
        let (gate, _rx) = gate(8);
        assert!(matches!(gate.acquire(ts(1)), Err(GateError::NotAdmitted(_))));
        assert!(matches!(gate.commit(ts(1)), Err(GateError::NotAdmitted(_))));
    }

    #[test]
    fn test_commit_while_cell_borrowed() {
        let (gate, mut rx) = gate(8);
        gate.request(ts(1));
        let cell = gate.acquire(ts(1)).unwrap();
        cell.write(4.0_f64).unwrap();

        assert!(matches!(gate.commit(ts(1)), Err(GateError::Other(_))));
        drop(cell);
        gate.commit(ts(1)).unwrap();
        assert_eq!(drain(&mut rx), vec![(1, 4.0)]);
    }

    #[test]
    fn test_closed_gate() {
        let (gate, _rx) = gate(8);
        gate.request(ts(1));
        assert_eq!(gate.close(), 1);

        assert_eq!(gate.request(ts(2)), Admission::Rejected(RejectReason::NotRunning));
        assert!(matches!(gate.acquire(ts(1)), Err(GateError::Closed)));
        assert!(matches!(gate.commit(ts(1)), Err(GateError::Closed)));
    }
}
