use std::{
    collections::BTreeMap,
    fmt::Debug,
    ops::{Index, IndexMut},
    str::FromStr,
};

use crate::{
    Endpoint, Error, GraphResult, NodeId,
    edges::{Connection, EdgeSet},
    node::AbstractNode,
};

/// What to do when connecting to an input that already has a producer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DuplicateConnectionMode {
    /// Replace the existing connection.
    Disconnect,
    /// Reject the new connection.
    #[default]
    Error,
}

impl FromStr for DuplicateConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim() {
            "disconnect" | "replace" => Ok(Self::Disconnect),
            "error" | "reject" => Ok(Self::Error),
            _ => Err(format!("unknown duplicate connection mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Audio,
    Data,
}

pub trait AbstractGraph {
    type Node: AbstractNode;
    type DataMode: Clone + Debug;

    fn duplicate_connection_mode() -> DuplicateConnectionMode {
        DuplicateConnectionMode::Error
    }

    fn graph(&self) -> &Graph<Self>;
    fn graph_mut(&mut self) -> &mut Graph<Self>;
}

/// A node taken out of the graph together with every edge that touched it.
#[derive(Debug)]
pub struct RemovedNode<N, D> {
    pub id: NodeId,
    pub node: N,
    pub audio: Vec<Connection<()>>,
    pub data: Vec<Connection<D>>,
}

pub struct Graph<G: AbstractGraph + ?Sized> {
    nodes: BTreeMap<NodeId, G::Node>,
    next_id: u64,

    audio: EdgeSet<()>,
    data: EdgeSet<G::DataMode>,
}

impl<G: AbstractGraph + ?Sized> Default for Graph<G> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_id: 0,
            audio: EdgeSet::new(),
            data: EdgeSet::new(),
        }
    }
}

impl<G: AbstractGraph + ?Sized> Graph<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&G::Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut G::Node> {
        self.nodes.get_mut(&id)
    }

    /// Iterates over the nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &G::Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = (NodeId, &mut G::Node)> {
        self.nodes.iter_mut().map(|(id, node)| (*id, node))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn audio(&self) -> &EdgeSet<()> {
        &self.audio
    }

    pub fn data(&self) -> &EdgeSet<G::DataMode> {
        &self.data
    }

    pub fn edges_touching(&self, id: NodeId, kind: EdgeKind) -> bool {
        match kind {
            EdgeKind::Audio => self.audio.touches(id),
            EdgeKind::Data => self.data.touches(id),
        }
    }

    pub fn add_node(&mut self, node: G::Node) -> NodeId {
        let id = NodeId::from_raw(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    /// Removes a node, purging all of its audio and data edges first.
    ///
    /// Returns `None` if the node is not in the graph.
    pub fn remove_node(&mut self, id: NodeId) -> Option<RemovedNode<G::Node, G::DataMode>> {
        if !self.nodes.contains_key(&id) {
            return None;
        }

        let audio = self.audio.purge_node(id);
        let data = self.data.purge_node(id);
        let node = self.nodes.remove(&id)?;

        Some(RemovedNode {
            id,
            node,
            audio,
            data,
        })
    }

    pub fn check_endpoint(&self, endpoint: &Endpoint) -> GraphResult<()> {
        match self.nodes.get(&endpoint.node) {
            Some(node) if node.is_connectable() => Ok(()),
            _ => Err(Error::InvalidEndpoint {
                endpoint: endpoint.clone(),
            }),
        }
    }

    pub fn connect_audio(
        &mut self,
        from: &Endpoint,
        to: &Endpoint,
    ) -> GraphResult<Option<Connection<()>>> {
        self.check_endpoint(from)?;
        self.check_endpoint(to)?;
        self.audio
            .connect(from, to, (), G::duplicate_connection_mode())
    }

    pub fn connect_data(
        &mut self,
        from: &Endpoint,
        to: &Endpoint,
        mode: G::DataMode,
    ) -> GraphResult<Option<Connection<G::DataMode>>> {
        self.check_endpoint(from)?;
        self.check_endpoint(to)?;
        self.data
            .connect(from, to, mode, G::duplicate_connection_mode())
    }

    /// Removes an audio edge. Returns whether it existed.
    pub fn disconnect_audio(&mut self, from: &Endpoint, to: &Endpoint) -> bool {
        self.audio.remove(from, to).is_some()
    }

    /// Removes a data edge, returning its mode if it existed.
    pub fn disconnect_data(&mut self, from: &Endpoint, to: &Endpoint) -> Option<G::DataMode> {
        self.data.remove(from, to)
    }
}

impl<G: AbstractGraph + ?Sized> Index<NodeId> for Graph<G> {
    type Output = G::Node;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[&index]
    }
}

impl<G: AbstractGraph + ?Sized> IndexMut<NodeId> for Graph<G> {
    fn index_mut(&mut self, index: NodeId) -> &mut Self::Output {
        self.nodes
            .get_mut(&index)
            .unwrap_or_else(|| panic!("no node {index} in graph"))
    }
}
