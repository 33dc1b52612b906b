//! In-process network
//!
//! Nodes are scheduled on a single dispatcher thread. Asynchronous sources
//! feed it through their [`LocalGate`]s over an unbounded channel; the
//! dispatcher collects the values of each timestamp in a frame and fires a
//! downstream component as soon as every one of its consumer ports holds a
//! value for that timestamp.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tickflow_plugin_api::{
    CellValue, ComponentError, ComponentKind, PortDirection, PortInputs, PortOutputs, SourceGate,
    Timestamp,
};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, error, info, warn};

use super::gate::{LocalGate, Publish};
use super::{Network, NetworkError, NetworkFactory, Prototypes};
use crate::graph::{ComponentGraph, GraphNode, PortRef};
use crate::plugin::{ComponentRef, DataTypeRef, call_plugin_preserving_error, call_plugin_value};

/// Default number of admitted, unpublished timestamps per source
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Incomplete frames kept by the dispatcher before the oldest is dropped
const MAX_OPEN_FRAMES: usize = 1024;

// =============================================================================
// Topology
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Route {
    node: usize,
    port: usize,
}

struct Node {
    instance_id: String,
    component: ComponentRef,
    kind: ComponentKind,
    inputs: usize,
    /// Prototype per producer port
    outputs: Vec<DataTypeRef>,
    /// Consumers per producer port
    routes: Vec<Vec<Route>>,
    /// Position in topological order
    rank: usize,
}

/// Resolved wiring of a component graph
struct Topology {
    nodes: Vec<Node>,
    order: Vec<usize>,
}

fn port_datatype<'a>(node: &'a GraphNode, port: &str, direction: PortDirection) -> Option<&'a str> {
    node.pattern
        .ports
        .iter()
        .find(|p| p.name == port && p.direction == direction)
        .map(|p| p.datatype.as_str())
}

impl Topology {
    fn build(prototypes: &Prototypes, graph: &ComponentGraph) -> Result<Self, NetworkError> {
        let prototype = |datatype: &str| {
            prototypes
                .get(datatype)
                .cloned()
                .ok_or_else(|| NetworkError::MissingPrototype(datatype.to_string()))
        };

        let mut nodes = Vec::with_capacity(graph.len());
        for node in graph.nodes() {
            let outputs = node
                .pattern
                .producer_ports()
                .map(|port| prototype(&port.datatype))
                .collect::<Result<Vec<_>, _>>()?;
            for port in node.pattern.consumer_ports() {
                prototype(&port.datatype)?;
            }

            nodes.push(Node {
                instance_id: node.instance_id.clone(),
                component: node.component.clone(),
                kind: node.pattern.kind,
                inputs: node.pattern.consumer_ports().count(),
                routes: vec![Vec::new(); outputs.len()],
                outputs,
                rank: 0,
            });
        }

        let index: HashMap<&str, usize> = graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| (node.instance_id.as_str(), i))
            .collect();

        let mut dag = DiGraph::<usize, ()>::with_capacity(nodes.len(), graph.connections().len());
        let ids: Vec<_> = (0..nodes.len()).map(|i| dag.add_node(i)).collect();
        let mut fed = HashSet::new();

        for connection in graph.connections() {
            let lookup = |instance_id: &str| {
                index
                    .get(instance_id)
                    .copied()
                    .ok_or_else(|| NetworkError::UnknownNode(instance_id.to_string()))
            };
            let from = lookup(&connection.from.instance_id)?;
            let to = lookup(&connection.to.instance_id)?;
            let from_node = &graph.nodes()[from];
            let to_node = &graph.nodes()[to];

            let unknown_port = |port: &PortRef, direction: &'static str| {
                NetworkError::UnknownPort {
                    instance_id: port.instance_id.clone(),
                    port: port.port.clone(),
                    direction,
                }
            };
            let from_port = from_node
                .pattern
                .producer_index(&connection.from.port)
                .ok_or_else(|| unknown_port(&connection.from, "producer"))?;
            let to_port = to_node
                .pattern
                .consumer_index(&connection.to.port)
                .ok_or_else(|| unknown_port(&connection.to, "consumer"))?;

            let produced = port_datatype(from_node, &connection.from.port, PortDirection::Producer)
                .unwrap_or_default();
            let consumed = port_datatype(to_node, &connection.to.port, PortDirection::Consumer)
                .unwrap_or_default();
            if produced != consumed {
                return Err(NetworkError::TypeMismatch {
                    connection: connection.to_string(),
                    produced: produced.to_string(),
                    consumed: consumed.to_string(),
                });
            }

            if !fed.insert((to, to_port)) {
                return Err(NetworkError::PortAlreadyConnected(connection.to.to_string()));
            }

            nodes[from].routes[from_port].push(Route { node: to, port: to_port });
            dag.add_edge(ids[from], ids[to], ());
        }

        let order: Vec<usize> = toposort(&dag, None)
            .map_err(|cycle| {
                NetworkError::CycleDetected(nodes[dag[cycle.node_id()]].instance_id.clone())
            })?
            .into_iter()
            .map(|ix| dag[ix])
            .collect();
        for (rank, &i) in order.iter().enumerate() {
            nodes[i].rank = rank;
        }

        for (i, node) in nodes.iter().enumerate() {
            for port in (0..node.inputs).filter(|&port| !fed.contains(&(i, port))) {
                warn!(
                    node = %node.instance_id,
                    port,
                    "Consumer port is not connected; node will never fire"
                );
            }
            if node.kind == ComponentKind::AsyncSource && node.outputs.is_empty() {
                warn!(
                    node = %node.instance_id,
                    "Async source has no producer port; no gate will be bound"
                );
            }
        }

        Ok(Self { nodes, order })
    }

    fn sources(&self) -> impl Iterator<Item = (usize, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.kind == ComponentKind::AsyncSource && !node.outputs.is_empty())
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds [`LocalNetwork`]s
#[derive(Debug, Clone, Copy)]
pub struct LocalNetworkFactory {
    max_in_flight: usize,
}

impl LocalNetworkFactory {
    /// Factory whose networks admit at most `max_in_flight` pending
    /// timestamps per source
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
        }
    }
}

impl Default for LocalNetworkFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl NetworkFactory for LocalNetworkFactory {
    fn build(
        &self,
        prototypes: Prototypes,
        graph: &ComponentGraph,
    ) -> Result<Box<dyn Network>, NetworkError> {
        let topology = Topology::build(&prototypes, graph)?;
        info!(
            graph = %graph.name(),
            nodes = topology.nodes.len(),
            connections = graph.connections().len(),
            "Network built"
        );
        Ok(Box::new(LocalNetwork {
            topology: Arc::new(topology),
            max_in_flight: self.max_in_flight,
            gates: Vec::new(),
            dispatcher: None,
        }))
    }
}

// =============================================================================
// Network
// =============================================================================

/// Single-dispatcher, in-process [`Network`]
pub struct LocalNetwork {
    topology: Arc<Topology>,
    max_in_flight: usize,
    gates: Vec<Arc<LocalGate>>,
    dispatcher: Option<JoinHandle<u64>>,
}

impl LocalNetwork {
    /// Close every gate and wait for the dispatcher to drain.
    fn halt_dispatcher(&mut self) -> Result<u64, NetworkError> {
        for gate in &self.gates {
            gate.close();
        }
        match self.dispatcher.take() {
            Some(dispatcher) => dispatcher
                .join()
                .map_err(|_| NetworkError::Other("dispatcher thread panicked".to_string())),
            None => Ok(0),
        }
    }

    fn stop_components(&self, nodes: &[usize]) {
        for &i in nodes.iter().rev() {
            let node = &self.topology.nodes[i];
            let stopped =
                call_plugin_value(AssertUnwindSafe(|| node.component.stop())).unwrap_or(false);
            if !stopped {
                warn!(node = %node.instance_id, "Component failed to stop");
            }
        }
    }

    fn unbind_gates(&mut self) {
        for gate in self.gates.drain(..) {
            self.topology.nodes[gate.node()].component.bind_gate(None);
        }
    }
}

impl Network for LocalNetwork {
    fn start(&mut self) -> Result<(), NetworkError> {
        if self.is_running() {
            return Err(NetworkError::AlreadyRunning);
        }

        let (tx, rx) = unbounded_channel();
        let topology = self.topology.clone();
        let dispatcher = thread::Builder::new()
            .name("tickflow-dispatch".to_string())
            .spawn(move || Dispatcher::new(topology).run(rx))?;
        self.dispatcher = Some(dispatcher);

        self.gates = self
            .topology
            .sources()
            .map(|(i, node)| {
                Arc::new(LocalGate::new(
                    i,
                    node.instance_id.as_str(),
                    node.outputs[0].clone(),
                    self.max_in_flight,
                    tx.clone(),
                ))
            })
            .collect();
        drop(tx);

        let topology = self.topology.clone();
        let mut started = Vec::with_capacity(topology.order.len());
        for &i in &topology.order {
            let node = &topology.nodes[i];
            let ok =
                call_plugin_value(AssertUnwindSafe(|| node.component.start())).unwrap_or(false);
            if !ok {
                error!(node = %node.instance_id, "Component failed to start; rolling back");
                self.stop_components(&started);
                if let Err(e) = self.halt_dispatcher() {
                    warn!(error = %e, "Dispatcher did not shut down cleanly");
                }
                self.gates.clear();
                return Err(NetworkError::ComponentStart(node.instance_id.clone()));
            }
            started.push(i);
        }

        for gate in &self.gates {
            let gate_handle: Arc<dyn SourceGate> = gate.clone();
            self.topology.nodes[gate.node()]
                .component
                .bind_gate(Some(gate_handle));
        }

        info!(
            nodes = self.topology.nodes.len(),
            sources = self.gates.len(),
            max_in_flight = self.max_in_flight,
            "Network started"
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), NetworkError> {
        if !self.is_running() {
            return Ok(());
        }

        let drained = self.halt_dispatcher();
        self.stop_components(&self.topology.order);
        self.unbind_gates();

        let fired = drained?;
        info!(fired, "Network stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.dispatcher.is_some()
    }
}

impl Drop for LocalNetwork {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "Failed to stop network on drop");
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Values collected for one timestamp, per node and consumer port
struct Frame {
    inputs: Vec<Vec<Option<Arc<CellValue>>>>,
}

impl Frame {
    fn new(topology: &Topology) -> Self {
        Self {
            inputs: topology.nodes.iter().map(|n| vec![None; n.inputs]).collect(),
        }
    }

    fn is_empty(&self) -> bool {
        self.inputs.iter().flatten().all(Option::is_none)
    }

    /// Take the inputs of `node` if all of them are present
    fn take_ready(&mut self, node: usize) -> Option<Vec<Arc<CellValue>>> {
        let slots = &mut self.inputs[node];
        if slots.iter().any(Option::is_none) {
            return None;
        }
        slots.iter_mut().map(Option::take).collect()
    }
}

struct Dispatcher {
    topology: Arc<Topology>,
    frames: BTreeMap<Timestamp, Frame>,
    fired: u64,
}

impl Dispatcher {
    fn new(topology: Arc<Topology>) -> Self {
        Self {
            topology,
            frames: BTreeMap::new(),
            fired: 0,
        }
    }

    /// Dispatch until every gate has closed. Returns the number of
    /// components fired.
    fn run(mut self, mut rx: UnboundedReceiver<Publish>) -> u64 {
        debug!("Dispatcher running");
        while let Some(publish) = rx.blocking_recv() {
            self.dispatch(publish);
        }
        if !self.frames.is_empty() {
            debug!(frames = self.frames.len(), "Discarding incomplete frames");
        }
        self.fired
    }

    fn dispatch(&mut self, Publish { node, ts, value }: Publish) {
        let topology = self.topology.clone();
        let frame = self.frames.entry(ts).or_insert_with(|| Frame::new(&topology));

        // (rank, node): pops in topological order
        let mut ready = BTreeSet::new();
        route(&topology, frame, node, 0, Arc::new(value), &mut ready);

        while let Some((_, target)) = ready.pop_first() {
            let Some(inputs) = frame.take_ready(target) else {
                continue;
            };
            let node = &topology.nodes[target];
            self.fired += 1;
            let Some(outputs) = fire(node, ts, inputs) else {
                continue;
            };
            for (port, cell) in outputs.into_iter().enumerate() {
                route(&topology, frame, target, port, Arc::new(cell), &mut ready);
            }
        }

        if frame.is_empty() {
            self.frames.remove(&ts);
        }
        while self.frames.len() > MAX_OPEN_FRAMES {
            if let Some((dropped, _)) = self.frames.pop_first() {
                warn!(timestamp = %dropped, "Dropping incomplete frame");
            }
        }
    }
}

fn route(
    topology: &Topology,
    frame: &mut Frame,
    from: usize,
    port: usize,
    value: Arc<CellValue>,
    ready: &mut BTreeSet<(usize, usize)>,
) {
    let Some(routes) = topology.nodes[from].routes.get(port) else {
        return;
    };
    for &Route { node, port } in routes {
        frame.inputs[node][port] = Some(value.clone());
        if frame.inputs[node].iter().all(Option::is_some) {
            ready.insert((topology.nodes[node].rank, node));
        }
    }
}

/// Run one component for one timestamp. Failures are logged and swallowed.
fn fire(node: &Node, ts: Timestamp, inputs: Vec<Arc<CellValue>>) -> Option<Vec<CellValue>> {
    let inputs = PortInputs::new(inputs);
    let result = call_plugin_preserving_error(
        AssertUnwindSafe(|| {
            let cells = node.outputs.iter().map(|p| p.create_cell()).collect();
            let mut outputs = PortOutputs::new(cells);
            node.component.process(ts, &inputs, &mut outputs)?;
            Ok(outputs.into_cells())
        }),
        |msg| ComponentError::Failed(format!("panicked: {msg}")),
    );

    match result {
        Ok(cells) => Some(cells),
        Err(e) => {
            warn!(node = %node.instance_id, timestamp = %ts, error = %e, "Component failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;
    use tickflow_plugin_api::{
        ApplicationAsyncSource, ApplicationSyncSink, Component, HeaderDataType, Pattern,
    };

    use crate::graph::GraphDescription;
    use crate::plugin::builtin::{F64Header, I64Header};

    struct Doubler {
        id: String,
        refuse_start: bool,
        stopped: AtomicBool,
    }

    impl Doubler {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                refuse_start: false,
                stopped: AtomicBool::new(false),
            }
        }

        fn pattern() -> Pattern {
            Pattern::new("Doubler", ComponentKind::Functional)
                .with_consumer_port("in", "f64")
                .with_producer_port("out", "f64")
        }
    }

    impl Component for Doubler {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> ComponentKind {
            ComponentKind::Functional
        }

        fn start(&self) -> bool {
            !self.refuse_start
        }

        fn stop(&self) -> bool {
            self.stopped.store(true, Ordering::SeqCst);
            true
        }

        fn process(
            &self,
            _ts: Timestamp,
            inputs: &PortInputs,
            outputs: &mut PortOutputs,
        ) -> Result<(), ComponentError> {
            let value = inputs.get::<f64>(0).ok_or(ComponentError::MissingInput(0))?;
            if *value < 0.0 {
                return Err(ComponentError::Failed("negative".into()));
            }
            outputs.set(0, value * 2.0)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    type Source = ApplicationAsyncSource<F64Header>;
    type Sink = ApplicationSyncSink<F64Header>;

    fn prototypes() -> Prototypes {
        let mut prototypes = Prototypes::new();
        for datatype in [
            HeaderDataType::<F64Header>::shared(),
            HeaderDataType::<I64Header>::shared(),
        ] {
            prototypes.insert(datatype.name().to_string(), DataTypeRef::unguarded(datatype));
        }
        prototypes
    }

    fn insert(graph: &mut ComponentGraph, component: Arc<dyn Component>, pattern: Pattern) {
        graph
            .insert(GraphNode {
                instance_id: component.id().to_string(),
                component: ComponentRef::unguarded(component),
                pattern,
            })
            .unwrap();
    }

    fn wire(graph: &mut ComponentGraph, links: &[(&str, &str, &str, &str)]) {
        let description = links
            .iter()
            .fold(GraphDescription::new("test"), |d, &(from, fp, to, tp)| {
                d.with_connection(from, fp, to, tp)
            });
        for connection in description.connections {
            graph.connect(connection).unwrap();
        }
    }

    struct Pipeline {
        graph: ComponentGraph,
        source: Arc<Source>,
        doubler: Arc<Doubler>,
        received: Arc<Mutex<Vec<(u64, f64)>>>,
    }

    fn pipeline() -> Pipeline {
        let source = Arc::new(Source::new("src"));
        let doubler = Arc::new(Doubler::new("double"));
        let sink = Arc::new(Sink::new("sink"));
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        sink.set_callback(move |ts: Timestamp, value: &f64| {
            log.lock().push((ts.as_nanos(), *value))
        });

        let mut graph = ComponentGraph::new("pipeline");
        // Insert out of topological order on purpose
        insert(&mut graph, sink, Sink::pattern());
        insert(&mut graph, doubler.clone(), Doubler::pattern());
        insert(&mut graph, source.clone(), Source::pattern());
        wire(
            &mut graph,
            &[("src", "output", "double", "in"), ("double", "out", "sink", "input")],
        );

        Pipeline {
            graph,
            source,
            doubler,
            received,
        }
    }

    fn ts(n: u64) -> Timestamp {
        Timestamp::from_nanos(n)
    }

    #[test]
    fn test_delivers_in_timestamp_order() {
        let p = pipeline();
        let mut network = LocalNetworkFactory::default().build(prototypes(), &p.graph).unwrap();

        assert!(!p.source.new_value(ts(1), 1.0).unwrap());
        network.start().unwrap();
        assert!(network.is_running());
        assert!(p.source.is_bound());

        assert!(p.source.new_value(ts(1), 1.0).unwrap());
        assert!(p.source.new_value(ts(2), 2.0).unwrap());
        assert!(!p.source.new_value(ts(2), 9.0).unwrap());
        assert!(!p.source.new_value(ts(1), 9.0).unwrap());
        assert!(p.source.new_value(ts(3), -1.0).unwrap());
        assert!(p.source.new_value(ts(4), 4.0).unwrap());

        network.stop().unwrap();
        assert!(!network.is_running());
        assert!(!p.source.is_bound());
        assert!(p.doubler.stopped.load(Ordering::SeqCst));

        // ts 3 failed in the doubler and never reached the sink
        assert_eq!(*p.received.lock(), vec![(1, 2.0), (2, 4.0), (4, 8.0)]);
        assert!(!p.source.new_value(ts(5), 5.0).unwrap());
    }

    #[test]
    fn test_start_stop_idempotence() {
        let p = pipeline();
        let mut network = LocalNetworkFactory::new(4).build(prototypes(), &p.graph).unwrap();

        network.stop().unwrap();
        network.start().unwrap();
        assert!(matches!(network.start(), Err(NetworkError::AlreadyRunning)));
        network.stop().unwrap();
        network.stop().unwrap();

        // Restart with fresh gates
        network.start().unwrap();
        assert!(p.source.new_value(ts(1), 3.0).unwrap());
        network.stop().unwrap();
        assert_eq!(*p.received.lock(), vec![(1, 6.0)]);
    }

    #[test]
    fn test_component_refusing_start_rolls_back() {
        let source = Arc::new(Source::new("src"));
        let mut doubler = Doubler::new("double");
        doubler.refuse_start = true;

        let mut graph = ComponentGraph::new("g");
        insert(&mut graph, source.clone(), Source::pattern());
        insert(&mut graph, Arc::new(doubler), Doubler::pattern());
        wire(&mut graph, &[("src", "output", "double", "in")]);

        let mut network = LocalNetworkFactory::default().build(prototypes(), &graph).unwrap();
        let err = network.start().unwrap_err();
        assert!(matches!(err, NetworkError::ComponentStart(ref id) if id == "double"));
        assert!(!network.is_running());
        assert!(!source.is_bound());
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let mut graph = ComponentGraph::new("g");
        insert(&mut graph, Arc::new(Source::new("src")), Source::pattern());
        insert(
            &mut graph,
            Arc::new(ApplicationSyncSink::<I64Header>::new("sink")),
            ApplicationSyncSink::<I64Header>::pattern(),
        );
        wire(&mut graph, &[("src", "output", "sink", "input")]);

        let err = LocalNetworkFactory::default().build(prototypes(), &graph).err().unwrap();
        assert!(matches!(err, NetworkError::TypeMismatch { ref produced, ref consumed, .. }
            if produced == "f64" && consumed == "i64"));
        assert!(err.is_construction_error());
    }

    #[test]
    fn test_rejects_cycle() {
        let mut graph = ComponentGraph::new("g");
        insert(&mut graph, Arc::new(Doubler::new("a")), Doubler::pattern());
        insert(&mut graph, Arc::new(Doubler::new("b")), Doubler::pattern());
        wire(&mut graph, &[("a", "out", "b", "in"), ("b", "out", "a", "in")]);

        let err = LocalNetworkFactory::default().build(prototypes(), &graph).err().unwrap();
        assert!(matches!(err, NetworkError::CycleDetected(_)));
    }

    #[test]
    fn test_rejects_second_producer_on_port() {
        let mut graph = ComponentGraph::new("g");
        insert(&mut graph, Arc::new(Source::new("a")), Source::pattern());
        insert(&mut graph, Arc::new(Source::new("b")), Source::pattern());
        insert(&mut graph, Arc::new(Sink::new("sink")), Sink::pattern());
        wire(
            &mut graph,
            &[("a", "output", "sink", "input"), ("b", "output", "sink", "input")],
        );

        let err = LocalNetworkFactory::default().build(prototypes(), &graph).err().unwrap();
        assert!(matches!(
            err,
            NetworkError::PortAlreadyConnected(ref port) if port == "sink.input"
        ));
    }

    #[test]
    fn test_rejects_missing_prototype() {
        let mut graph = ComponentGraph::new("g");
        insert(&mut graph, Arc::new(Source::new("src")), Source::pattern());

        let err = LocalNetworkFactory::default()
            .build(Prototypes::new(), &graph)
            .err()
            .unwrap();
        assert!(matches!(err, NetworkError::MissingPrototype(ref name) if name == "f64"));
    }
}
