//! A set of directed port-to-port edges with a single producer per input
//! and an acyclic module-level projection.

use std::{collections::BTreeMap, fmt::Debug};

use petgraph::{Direction, algo, graphmap::DiGraphMap};
use rustc_hash::FxHashMap;

use crate::{Endpoint, Error, GraphResult, NodeId, graph::DuplicateConnectionMode};

/// The destination of an edge, as stored in its source's adjacency list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target<W> {
    pub endpoint: Endpoint,
    pub weight: W,
}

/// An owned edge, returned when edges are removed or replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection<W> {
    pub from: Endpoint,
    pub to: Endpoint,
    pub weight: W,
}

#[derive(Clone)]
pub struct EdgeSet<W> {
    // adjacency lists in connection order
    outgoing: BTreeMap<Endpoint, Vec<Target<W>>>,
    // input -> its single producer
    incoming: FxHashMap<Endpoint, Endpoint>,
    // module-level view, weighted by the number of port edges it stands for
    projection: DiGraphMap<NodeId, usize>,
}

impl<W> Default for EdgeSet<W> {
    fn default() -> Self {
        Self {
            outgoing: BTreeMap::new(),
            incoming: FxHashMap::default(),
            projection: DiGraphMap::new(),
        }
    }
}

impl<W> EdgeSet<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.incoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty()
    }

    pub fn contains(&self, from: &Endpoint, to: &Endpoint) -> bool {
        self.get(from, to).is_some()
    }

    pub fn get(&self, from: &Endpoint, to: &Endpoint) -> Option<&W> {
        self.outgoing
            .get(from)?
            .iter()
            .find(|target| &target.endpoint == to)
            .map(|target| &target.weight)
    }

    /// Returns the producer currently feeding `input`, if any.
    pub fn source_of(&self, input: &Endpoint) -> Option<&Endpoint> {
        self.incoming.get(input)
    }

    /// Returns the targets of `output` in the order they were connected.
    pub fn targets(&self, output: &Endpoint) -> &[Target<W>] {
        self.outgoing.get(output).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over all sources and their adjacency lists, sources in
    /// ascending order and targets in connection order.
    pub fn sources(&self) -> impl Iterator<Item = (&Endpoint, &[Target<W>])> {
        self.outgoing
            .iter()
            .map(|(source, targets)| (source, targets.as_slice()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, &Target<W>)> {
        self.outgoing
            .iter()
            .flat_map(|(source, targets)| targets.iter().map(move |target| (source, target)))
    }

    /// Returns whether `node` is the source or destination of any edge.
    pub fn touches(&self, node: NodeId) -> bool {
        self.projection.contains_node(node)
    }

    pub fn projection(&self) -> &DiGraphMap<NodeId, usize> {
        &self.projection
    }

    /// Returns whether adding an edge `from -> to` would close a cycle.
    ///
    /// Walks the module-level projection starting at `to`, visiting each
    /// node at most once.
    pub fn would_create_loop(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        if !self.projection.contains_node(from) || !self.projection.contains_node(to) {
            return false;
        }
        algo::has_path_connecting(&self.projection, to, from, None)
    }

    pub fn is_acyclic(&self) -> bool {
        !algo::is_cyclic_directed(&self.projection)
    }

    /// Validates and inserts the edge `from -> to`.
    ///
    /// Nothing is modified when an error is returned. In
    /// [`DuplicateConnectionMode::Disconnect`] an existing producer of `to`
    /// is replaced and returned.
    pub fn connect(
        &mut self,
        from: &Endpoint,
        to: &Endpoint,
        weight: W,
        mode: DuplicateConnectionMode,
    ) -> GraphResult<Option<Connection<W>>> {
        if from.node == to.node {
            return Err(Error::ConnectionLoop {
                from: from.clone(),
                to: to.clone(),
            });
        }

        if self.contains(from, to) {
            return Err(Error::DoubleConnection {
                from: from.clone(),
                to: to.clone(),
            });
        }

        let existing = self.incoming.get(to).cloned();
        if let Some(existing) = &existing {
            if mode == DuplicateConnectionMode::Error {
                return Err(Error::MultipleConnections {
                    existing: existing.clone(),
                    target: to.clone(),
                });
            }
        }

        // a path out of `to.node` never re-enters it, so the edge replaced
        // below cannot influence this check
        if self.would_create_loop(from.node, to.node) {
            return Err(Error::ConnectionLoop {
                from: from.clone(),
                to: to.clone(),
            });
        }

        let replaced = existing.and_then(|existing| {
            let weight = self.remove(&existing, to)?;
            Some(Connection {
                from: existing,
                to: to.clone(),
                weight,
            })
        });

        self.insert(from.clone(), to.clone(), weight);

        Ok(replaced)
    }

    fn insert(&mut self, from: Endpoint, to: Endpoint, weight: W) {
        if let Some(count) = self.projection.edge_weight_mut(from.node, to.node) {
            *count += 1;
        } else {
            self.projection.add_edge(from.node, to.node, 1);
        }

        self.incoming.insert(to.clone(), from.clone());
        self.outgoing.entry(from).or_default().push(Target {
            endpoint: to,
            weight,
        });
    }

    /// Removes the edge `from -> to`, returning its weight if it existed.
    pub fn remove(&mut self, from: &Endpoint, to: &Endpoint) -> Option<W> {
        let targets = self.outgoing.get_mut(from)?;
        let position = targets.iter().position(|target| &target.endpoint == to)?;
        let Target { weight, .. } = targets.remove(position);
        if targets.is_empty() {
            self.outgoing.remove(from);
        }

        self.incoming.remove(to);

        let remaining = match self.projection.edge_weight_mut(from.node, to.node) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.projection.remove_edge(from.node, to.node);
            self.forget_if_isolated(from.node);
            self.forget_if_isolated(to.node);
        }

        Some(weight)
    }

    /// Removes every edge that starts or ends at `node`.
    pub fn purge_node(&mut self, node: NodeId) -> Vec<Connection<W>> {
        if !self.touches(node) {
            return Vec::new();
        }

        let doomed: Vec<(Endpoint, Endpoint)> = self
            .iter()
            .filter(|(source, target)| source.node == node || target.endpoint.node == node)
            .map(|(source, target)| (source.clone(), target.endpoint.clone()))
            .collect();

        let mut purged = Vec::with_capacity(doomed.len());
        for (from, to) in doomed {
            if let Some(weight) = self.remove(&from, &to) {
                purged.push(Connection { from, to, weight });
            }
        }

        self.projection.remove_node(node);

        purged
    }

    fn forget_if_isolated(&mut self, node: NodeId) {
        let isolated = self
            .projection
            .neighbors_directed(node, Direction::Outgoing)
            .next()
            .is_none()
            && self
                .projection
                .neighbors_directed(node, Direction::Incoming)
                .next()
                .is_none();
        if isolated {
            self.projection.remove_node(node);
        }
    }
}

impl<W: PartialEq> PartialEq for EdgeSet<W> {
    fn eq(&self, other: &Self) -> bool {
        self.outgoing == other.outgoing
    }
}

impl<W: Debug> Debug for EdgeSet<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.outgoing.iter()).finish()
    }
}
