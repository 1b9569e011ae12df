//! The patch: modules and the audio and data connections between them.

use crossbeam_channel::Sender;
use patchwire_graph::{
    Endpoint, Error as GraphError, GraphResult, NodeId,
    graph::{AbstractGraph, Graph},
    handle::{GraphHandle, WeakGraphHandle},
};
use rustc_hash::FxHashMap;

use crate::{
    engine::EngineRequest,
    module::{Module, ModuleId, ModuleState, RemoteId},
    snapshot::{AudioRecord, DataRecord, ModuleRecord, PatchSnapshot, PortRecord},
};

/// A module and one of its port ids: one end of a connection.
pub type Ioid = Endpoint;

pub type CanvasHandle = GraphHandle<Canvas>;
pub type WeakCanvas = WeakGraphHandle<Canvas>;

/// How a data connection applies values to its destination.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataMode {
    /// The destination takes the value as is.
    #[default]
    Absolute,
    /// The value is applied relative to the destination's own setting.
    Relative,
}

/// Owns every placed module and the two connection sets between them.
///
/// Audio and data connections are tracked separately. In each set an inlet
/// has at most one producer, and the module-level view stays acyclic.
/// Connections can only be made between modules that are
/// [ready](ModuleState::Ready).
///
/// Port ids are not checked against the modules' templates: any id names a
/// port. Callers that need declared ports only must check them first.
#[derive(Default)]
pub struct Canvas {
    graph: Graph<Canvas>,
    teardown: Option<Sender<EngineRequest>>,
}

impl AbstractGraph for Canvas {
    type Node = Module;
    type DataMode = DataMode;

    fn graph(&self) -> &Graph<Self> {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut Graph<Self> {
        &mut self.graph
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a canvas that frees the remote instances of removed modules
    /// by sending requests through `teardown`.
    pub fn with_teardown(teardown: Sender<EngineRequest>) -> Self {
        Self {
            graph: Graph::new(),
            teardown: Some(teardown),
        }
    }

    pub fn into_handle(self) -> CanvasHandle {
        GraphHandle::from_inner(self)
    }

    /// Takes ownership of a module.
    ///
    /// The module normally is ready already. A pending module is stored but
    /// cannot be connected until it is [marked ready](Canvas::mark_ready).
    pub fn insert_module(&mut self, module: Module) -> ModuleId {
        let template = module.template().id().clone();
        let id = self.graph.add_node(module);
        log::debug!("Inserted module {id} ({template})");
        id
    }

    /// Removes a module after purging every connection that touches it.
    ///
    /// The module's remote instance, if any, is freed and its native
    /// instance is handed back to its library. Removing a module that is not
    /// on the canvas does nothing and returns `false`.
    pub fn remove_module(&mut self, id: ModuleId) -> bool {
        let Some(removed) = self.graph.remove_node(id) else {
            return false;
        };

        let mut module = removed.node;
        module.advance(ModuleState::Removed);
        log::debug!(
            "Removed module {id} ({}) and {} connection(s)",
            module.template().id(),
            removed.audio.len() + removed.data.len()
        );
        if let Some(remote_id) = module.remote_id() {
            self.free_remote(remote_id);
        }
        true
    }

    /// Removes every module. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let ids: Vec<_> = self.graph.node_ids().collect();
        ids.into_iter().filter(|id| self.remove_module(*id)).count()
    }

    pub fn mark_ready(&mut self, id: ModuleId) -> bool {
        self.graph
            .node_mut(id)
            .is_some_and(|module| module.mark_ready())
    }

    /// Binds a remote instance to a module.
    ///
    /// If the module is gone already, the remote instance is freed instead.
    pub fn bind_remote(&mut self, id: ModuleId, remote_id: RemoteId) -> bool {
        match self.graph.node_mut(id) {
            Some(module) => module.bind_remote(remote_id),
            None => {
                log::debug!("Module {id} is gone, freeing {remote_id}");
                self.free_remote(remote_id);
                false
            }
        }
    }

    /// Drops every module's remote id without freeing it. For use after the
    /// remote engine restarted and its instances are gone.
    ///
    /// Returns how many ids were dropped.
    pub fn forget_remote_ids(&mut self) -> usize {
        self.graph
            .nodes_mut()
            .map(|(_, module)| module.forget_remote())
            .filter(|forgot| *forgot)
            .count()
    }

    fn free_remote(&self, remote_id: RemoteId) {
        if let Some(teardown) = &self.teardown {
            if teardown
                .send(EngineRequest::FreeInstance { remote_id })
                .is_err()
            {
                log::debug!("Remote engine is gone, not freeing {remote_id}");
            }
        }
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.graph.node(id)
    }

    pub fn module_mut(&mut self, id: ModuleId) -> Option<&mut Module> {
        self.graph.node_mut(id)
    }

    pub fn contains_module(&self, id: ModuleId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn module_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Iterates over the modules in creation order.
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.graph.nodes()
    }

    /// Connects an audio outlet to an audio inlet.
    pub fn connect(&mut self, from: &Ioid, to: &Ioid) -> GraphResult<()> {
        self.graph
            .connect_audio(from, to)
            .map(|_| ())
            .inspect_err(|e| log::debug!("Rejected audio connection: {e}"))
    }

    /// Removes an audio connection. Returns whether it existed.
    pub fn disconnect(&mut self, from: &Ioid, to: &Ioid) -> bool {
        self.graph.disconnect_audio(from, to)
    }

    /// Connects a data outlet to a data inlet.
    ///
    /// A connection between the same two ports already exists regardless of
    /// its mode: connecting them again fails with
    /// [`DoubleConnection`](GraphError::DoubleConnection).
    pub fn connect_data(&mut self, from: &Ioid, to: &Ioid, mode: DataMode) -> GraphResult<()> {
        self.graph
            .connect_data(from, to, mode)
            .map(|_| ())
            .inspect_err(|e| log::debug!("Rejected data connection: {e}"))
    }

    /// Removes a data connection. Returns whether it existed.
    pub fn disconnect_data(&mut self, from: &Ioid, to: &Ioid) -> bool {
        self.graph.disconnect_data(from, to).is_some()
    }

    pub fn audio_connection_exists(&self, from: &Ioid, to: &Ioid) -> bool {
        self.graph.audio().contains(from, to)
    }

    pub fn data_connection_exists(&self, from: &Ioid, to: &Ioid) -> bool {
        self.graph.data().contains(from, to)
    }

    pub fn data_connection_mode(&self, from: &Ioid, to: &Ioid) -> Option<DataMode> {
        self.graph.data().get(from, to).copied()
    }

    /// Destinations of an audio outlet, in connection order.
    pub fn audio_targets<'a>(&'a self, from: &Ioid) -> impl Iterator<Item = &'a Ioid> {
        self.graph
            .audio()
            .targets(from)
            .iter()
            .map(|target| &target.endpoint)
    }

    /// Destinations of a data outlet and their modes, in connection order.
    pub fn data_targets<'a>(&'a self, from: &Ioid) -> impl Iterator<Item = (&'a Ioid, DataMode)> {
        self.graph
            .data()
            .targets(from)
            .iter()
            .map(|target| (&target.endpoint, target.weight))
    }

    /// Iterates over all audio connections, grouped by source.
    pub fn audio_connections(&self) -> impl Iterator<Item = (&Ioid, &Ioid)> {
        self.graph
            .audio()
            .iter()
            .map(|(from, target)| (from, &target.endpoint))
    }

    /// Iterates over all data connections, grouped by source.
    pub fn data_connections(&self) -> impl Iterator<Item = (&Ioid, &Ioid, DataMode)> {
        self.graph
            .data()
            .iter()
            .map(|(from, target)| (from, &target.endpoint, target.weight))
    }

    pub fn snapshot(&self) -> PatchSnapshot {
        let port = |ioid: &Ioid| PortRecord::new(ioid.node.raw(), ioid.port.clone());
        PatchSnapshot {
            modules: self
                .modules()
                .map(|(id, module)| ModuleRecord {
                    key: id.raw(),
                    template: module.template().id().to_string(),
                })
                .collect(),
            audio: self
                .audio_connections()
                .map(|(from, to)| AudioRecord {
                    from: port(from),
                    to: port(to),
                })
                .collect(),
            data: self
                .data_connections()
                .map(|(from, to, mode)| DataRecord {
                    from: port(from),
                    to: port(to),
                    mode,
                })
                .collect(),
        }
    }

    /// Makes the connections of `snapshot`, with its module keys mapped to
    /// modules of this canvas through `ids`.
    ///
    /// Stops at the first connection that fails. A key missing from `ids`
    /// is reported as an invalid endpoint under the saved key.
    pub fn replay(
        &mut self,
        snapshot: &PatchSnapshot,
        ids: &FxHashMap<u64, ModuleId>,
    ) -> GraphResult<()> {
        let ioid = |record: &PortRecord| -> GraphResult<Ioid> {
            match ids.get(&record.module) {
                Some(id) => Ok(Ioid::new(*id, record.port.clone())),
                None => Err(GraphError::InvalidEndpoint {
                    endpoint: Ioid::new(NodeId::from_raw(record.module), record.port.clone()),
                }),
            }
        };

        for record in &snapshot.audio {
            self.connect(&ioid(&record.from)?, &ioid(&record.to)?)?;
        }
        for record in &snapshot.data {
            self.connect_data(&ioid(&record.from)?, &ioid(&record.to)?, record.mode)?;
        }
        Ok(())
    }

    /// Writes the canvas as a Graphviz digraph.
    pub fn write_dot<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut node_names = FxHashMap::default();
        let mut graph = dot_graph::Graph::new("Canvas", dot_graph::Kind::Digraph);
        for (id, module) in self.modules() {
            let node_name = format!("_{}", id.raw());
            let label = format!("{id} {}", module.template().name());
            graph.add_node(dot_graph::Node::new(&node_name).label(&label));
            node_names.insert(id, node_name);
        }

        for (from, to) in self.audio_connections() {
            let edge_name = format!("{}->{}", from.port, to.port);
            let edge =
                dot_graph::Edge::new(&node_names[&from.node], &node_names[&to.node], &edge_name)
                    .end_arrow(dot_graph::Arrow::normal());
            graph.add_edge(edge);
        }
        for (from, to, mode) in self.data_connections() {
            let edge_name = format!("{}->{} ({mode:?})", from.port, to.port);
            let edge =
                dot_graph::Edge::new(&node_names[&from.node], &node_names[&to.node], &edge_name)
                    .end_arrow(dot_graph::Arrow::normal());
            graph.add_edge(edge);
        }

        write!(writer, "{}", graph.to_dot_string()?)
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        let remote_ids: Vec<_> = self
            .modules()
            .filter_map(|(_, module)| module.remote_id())
            .collect();
        for remote_id in remote_ids {
            self.free_remote(remote_id);
        }
    }
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("modules", &self.graph.node_count())
            .field("audio", self.graph.audio())
            .field("data", self.graph.data())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        factory::{NativeInstance, NativeModule},
        testing::{place, registry},
    };

    fn sine_and_gain() -> (Canvas, ModuleId, ModuleId) {
        let registry = registry();
        let mut canvas = Canvas::new();
        let m1 = place(&mut canvas, &registry, "gen/sine");
        let m2 = place(&mut canvas, &registry, "fx/gain");
        (canvas, m1, m2)
    }

    #[test]
    fn test_sine_into_gain() {
        let (mut canvas, m1, m2) = sine_and_gain();

        canvas
            .connect(&Ioid::new(m1, "out"), &Ioid::new(m2, "in"))
            .unwrap();
        assert_eq!(
            canvas.connect(&Ioid::new(m2, "out"), &Ioid::new(m1, "in")),
            Err(GraphError::ConnectionLoop {
                from: Ioid::new(m2, "out"),
                to: Ioid::new(m1, "in"),
            })
        );
        assert!(canvas.audio_connection_exists(&Ioid::new(m1, "out"), &Ioid::new(m2, "in")));

        assert!(canvas.remove_module(m1));
        assert!(!canvas.audio_connection_exists(&Ioid::new(m1, "out"), &Ioid::new(m2, "in")));
        assert_eq!(canvas.module(m2).unwrap().state(), ModuleState::Ready);
        assert!(!canvas.remove_module(m1));
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let (mut canvas, _, m2) = sine_and_gain();
        assert!(matches!(
            canvas.connect(&Ioid::new(m2, "out"), &Ioid::new(m2, "in")),
            Err(GraphError::ConnectionLoop { .. })
        ));
        assert!(matches!(
            canvas.connect_data(
                &Ioid::new(m2, "level"),
                &Ioid::new(m2, "amount"),
                DataMode::Absolute
            ),
            Err(GraphError::ConnectionLoop { .. })
        ));
        assert_eq!(canvas.audio_connections().count(), 0);
    }

    #[test]
    fn test_single_producer_per_inlet() {
        let registry = registry();
        let mut canvas = Canvas::new();
        let a = place(&mut canvas, &registry, "gen/sine");
        let b = place(&mut canvas, &registry, "gen/sine");
        let gain = place(&mut canvas, &registry, "fx/gain");
        let inlet = Ioid::new(gain, "in");

        canvas.connect(&Ioid::new(a, "out"), &inlet).unwrap();
        let before = canvas.graph().audio().clone();

        assert_eq!(
            canvas.connect(&Ioid::new(b, "out"), &inlet),
            Err(GraphError::MultipleConnections {
                existing: Ioid::new(a, "out"),
                target: inlet.clone(),
            })
        );
        assert_eq!(
            canvas.connect(&Ioid::new(a, "out"), &inlet),
            Err(GraphError::DoubleConnection {
                from: Ioid::new(a, "out"),
                to: inlet.clone(),
            })
        );
        assert_eq!(canvas.graph().audio(), &before);
    }

    #[test]
    fn test_connect_then_disconnect_restores_edges() {
        let (mut canvas, m1, m2) = sine_and_gain();
        let before = canvas.graph().audio().clone();
        canvas
            .connect(&Ioid::new(m1, "out"), &Ioid::new(m2, "in"))
            .unwrap();
        assert!(canvas.disconnect(&Ioid::new(m1, "out"), &Ioid::new(m2, "in")));
        assert_eq!(canvas.graph().audio(), &before);
        // absent edges disconnect silently
        assert!(!canvas.disconnect(&Ioid::new(m1, "out"), &Ioid::new(m2, "in")));
    }

    #[test]
    fn test_data_connections() {
        let (mut canvas, m1, m2) = sine_and_gain();
        let level = Ioid::new(m1, "level");
        let amount = Ioid::new(m2, "amount");

        canvas.connect_data(&level, &amount, DataMode::Relative).unwrap();
        assert!(canvas.data_connection_exists(&level, &amount));
        assert!(!canvas.audio_connection_exists(&level, &amount));
        assert_eq!(canvas.data_connection_mode(&level, &amount), Some(DataMode::Relative));

        // the mode does not make a second connection distinct
        assert_eq!(
            canvas.connect_data(&level, &amount, DataMode::Absolute),
            Err(GraphError::DoubleConnection {
                from: level.clone(),
                to: amount.clone(),
            })
        );

        // closes a loop with the connection above
        assert!(matches!(
            canvas.connect_data(
                &Ioid::new(m2, "level"),
                &Ioid::new(m1, "freq"),
                DataMode::Absolute
            ),
            Err(GraphError::ConnectionLoop { .. })
        ));

        // an audio path the other way does not matter
        assert!(canvas.disconnect_data(&level, &amount));
        canvas
            .connect(&Ioid::new(m1, "out"), &Ioid::new(m2, "in"))
            .unwrap();
        canvas
            .connect_data(&Ioid::new(m2, "level"), &Ioid::new(m1, "freq"), DataMode::Absolute)
            .unwrap();
    }

    #[test]
    fn test_targets_keep_connection_order() {
        let registry = registry();
        let mut canvas = Canvas::new();
        let sine = place(&mut canvas, &registry, "gen/sine");
        let gains: Vec<_> = (0..4)
            .map(|_| place(&mut canvas, &registry, "fx/gain"))
            .collect();

        let out = Ioid::new(sine, "out");
        for gain in gains.iter().rev() {
            canvas.connect(&out, &Ioid::new(*gain, "in")).unwrap();
        }
        let targets: Vec<_> = canvas.audio_targets(&out).map(|ioid| ioid.node).collect();
        assert_eq!(targets, gains.iter().rev().copied().collect::<Vec<_>>());
    }

    #[test]
    fn test_remove_purges_both_sets() {
        let registry = registry();
        let mut canvas = Canvas::new();
        let a = place(&mut canvas, &registry, "gen/sine");
        let b = place(&mut canvas, &registry, "fx/gain");
        let c = place(&mut canvas, &registry, "fx/gain");

        canvas.connect(&Ioid::new(a, "out"), &Ioid::new(b, "in")).unwrap();
        canvas.connect(&Ioid::new(b, "out"), &Ioid::new(c, "in")).unwrap();
        canvas
            .connect_data(&Ioid::new(c, "level"), &Ioid::new(b, "amount"), DataMode::Absolute)
            .unwrap();
        canvas
            .connect_data(&Ioid::new(a, "level"), &Ioid::new(c, "amount"), DataMode::Absolute)
            .unwrap();

        canvas.remove_module(b);
        assert!(canvas.audio_connections().all(|(f, t)| f.node != b && t.node != b));
        assert!(canvas.data_connections().all(|(f, t, _)| f.node != b && t.node != b));
        assert_eq!(canvas.audio_connections().count(), 0);
        assert_eq!(canvas.data_connections().count(), 1);
    }

    #[test]
    fn test_pending_module_cannot_connect() {
        let registry = registry();
        let mut canvas = Canvas::new();
        let sine = place(&mut canvas, &registry, "gen/sine");
        let pending = canvas.insert_module(Module::new(registry.resolve("fx/gain").unwrap()));

        assert_eq!(
            canvas.connect(&Ioid::new(sine, "out"), &Ioid::new(pending, "in")),
            Err(GraphError::InvalidEndpoint {
                endpoint: Ioid::new(pending, "in")
            })
        );
        assert!(canvas.mark_ready(pending));
        canvas
            .connect(&Ioid::new(sine, "out"), &Ioid::new(pending, "in"))
            .unwrap();
    }

    #[test]
    fn test_removal_frees_remote_and_native() {
        struct Voice;
        impl NativeModule for Voice {}

        let destroyed = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();
        let registry = registry();
        let mut canvas = Canvas::with_teardown(tx);

        let mut module = Module::new(registry.resolve("gen/sine").unwrap());
        let seen = destroyed.clone();
        module.attach_native(NativeInstance::new(Box::new(Voice), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        module.mark_ready();
        module.bind_remote(RemoteId(1000));
        let id = canvas.insert_module(module);

        canvas.remove_module(id);
        canvas.remove_module(id);
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            [EngineRequest::FreeInstance {
                remote_id: RemoteId(1000)
            }]
        );

        // a reply for a module that is gone frees the remote instance
        assert!(!canvas.bind_remote(id, RemoteId(1001)));
        assert_eq!(
            rx.try_recv().ok(),
            Some(EngineRequest::FreeInstance {
                remote_id: RemoteId(1001)
            })
        );
    }

    #[test]
    fn test_forgotten_remote_ids_are_not_freed() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let registry = registry();
        let mut canvas = Canvas::with_teardown(tx);
        let sine = place(&mut canvas, &registry, "gen/sine");
        let gain = place(&mut canvas, &registry, "fx/gain");
        canvas.bind_remote(sine, RemoteId(1000));

        assert_eq!(canvas.forget_remote_ids(), 1);
        assert_eq!(canvas.module(sine).unwrap().remote_id(), None);
        assert_eq!(canvas.forget_remote_ids(), 0);

        canvas.remove_module(sine);
        canvas.bind_remote(gain, RemoteId(1001));
        drop(canvas);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            [EngineRequest::FreeInstance {
                remote_id: RemoteId(1001)
            }]
        );
    }

    #[test]
    fn test_undeclared_ports_connect() {
        let (mut canvas, sine, gain) = sine_and_gain();
        // neither template declares these
        canvas
            .connect(&Ioid::new(sine, "side"), &Ioid::new(gain, "sidechain"))
            .unwrap();
        assert!(
            canvas.audio_connection_exists(&Ioid::new(sine, "side"), &Ioid::new(gain, "sidechain"))
        );
    }

    #[test]
    fn test_snapshot_and_replay() {
        let (mut canvas, m1, m2) = sine_and_gain();
        canvas.connect(&Ioid::new(m1, "out"), &Ioid::new(m2, "in")).unwrap();
        canvas
            .connect_data(&Ioid::new(m1, "level"), &Ioid::new(m2, "amount"), DataMode::Relative)
            .unwrap();
        let snapshot = canvas.snapshot();
        assert_eq!(snapshot.modules.len(), 2);
        assert_eq!(snapshot.modules[0].template, "gen/sine");

        let registry = registry();
        let mut copy = Canvas::new();
        let mut ids = FxHashMap::default();
        for record in &snapshot.modules {
            ids.insert(record.key, place(&mut copy, &registry, &record.template));
        }
        copy.replay(&snapshot, &ids).unwrap();

        assert_eq!(copy.graph().audio().len(), 1);
        assert_eq!(
            copy.data_connection_mode(
                &Ioid::new(ids[&m1.raw()], "level"),
                &Ioid::new(ids[&m2.raw()], "amount")
            ),
            Some(DataMode::Relative)
        );

        ids.remove(&m1.raw());
        let mut partial = Canvas::new();
        assert!(matches!(
            partial.replay(&snapshot, &ids),
            Err(GraphError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_write_dot() {
        let (mut canvas, m1, m2) = sine_and_gain();
        canvas.connect(&Ioid::new(m1, "out"), &Ioid::new(m2, "in")).unwrap();

        let mut out = Vec::new();
        canvas.write_dot(&mut out).unwrap();
        let dot = String::from_utf8(out).unwrap();
        assert!(dot.contains("digraph"));
        assert!(dot.contains("out->in"));
    }
}
