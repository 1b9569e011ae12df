use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::graph::AbstractGraph;

/// A shared, owning handle to a graph.
///
/// Deferred work that needs the graph later should hold a
/// [`WeakGraphHandle`] instead, so that dropping the last owner also
/// abandons that work.
pub struct GraphHandle<G: AbstractGraph> {
    inner: Arc<Mutex<G>>,
}

impl<G: AbstractGraph + Default> Default for GraphHandle<G> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(G::default())),
        }
    }
}

impl<G: AbstractGraph> Clone for GraphHandle<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: AbstractGraph> GraphHandle<G> {
    pub fn from_inner(inner: G) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn is_same_graph(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakGraphHandle<G> {
        WeakGraphHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn try_into_inner(self) -> Result<G, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Ok(inner.into_inner()),
            Err(arc) => Err(Self { inner: arc }),
        }
    }

    /// Runs `f` with exclusive access to the graph.
    ///
    /// The lock is not reentrant: `f` must not call back into this handle.
    pub fn with_inner<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut G) -> R,
    {
        let mut inner = self.inner.lock();
        f(&mut inner)
    }

    pub fn node_count(&self) -> usize {
        self.with_inner(|graph| graph.graph().node_count())
    }

    pub fn audio_edge_count(&self) -> usize {
        self.with_inner(|graph| graph.graph().audio().len())
    }

    pub fn data_edge_count(&self) -> usize {
        self.with_inner(|graph| graph.graph().data().len())
    }
}

pub struct WeakGraphHandle<G: AbstractGraph> {
    inner: Weak<Mutex<G>>,
}

impl<G: AbstractGraph> WeakGraphHandle<G> {
    pub fn upgrade(&self) -> Option<GraphHandle<G>> {
        self.inner.upgrade().map(|inner| GraphHandle { inner })
    }

    pub fn is_same_graph(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

impl<G: AbstractGraph> Clone for WeakGraphHandle<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}
