use std::fmt::{Debug, Display};

use thiserror::Error;

pub use petgraph;

pub mod edges;
pub mod graph;
pub mod handle;
pub mod node;

pub mod prelude {
    pub use crate::{
        Endpoint, Error, GraphResult, NodeId,
        edges::{Connection, EdgeSet, Target},
        graph::{AbstractGraph, DuplicateConnectionMode, EdgeKind, Graph},
        handle::{GraphHandle, WeakGraphHandle},
        node::AbstractNode,
    };
}

/// Stable identity of a node in a [`Graph`](graph::Graph).
///
/// Ids are never reused, so an [`Endpoint`] that outlives its node can
/// never refer to a different node inserted later.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One end of a connection: a node and the id of one of its ports.
///
/// Compared by value; holding an endpoint does not keep the node alive.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: String,
}

impl Endpoint {
    pub fn new(node: NodeId, port: impl Into<String>) -> Self {
        Self {
            node,
            port: port.into(),
        }
    }
}

impl Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Endpoint({}, {:?})", self.node, self.port)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Endpoint {endpoint} does not refer to a ready node")]
    InvalidEndpoint { endpoint: Endpoint },

    #[error("Input {target} already has an incoming connection from {existing}")]
    MultipleConnections { existing: Endpoint, target: Endpoint },

    #[error("Connecting {from} to {to} would create a loop")]
    ConnectionLoop { from: Endpoint, to: Endpoint },

    #[error("Connection from {from} to {to} already exists")]
    DoubleConnection { from: Endpoint, to: Endpoint },
}

pub type GraphResult<T> = Result<T, Error>;
