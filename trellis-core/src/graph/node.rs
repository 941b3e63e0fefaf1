//! Graph Nodes
//!
//! This module defines the per-node metadata that lives in the dependency
//! store. Records hold no values, only status, edges and status observers.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;

/// Unique identifier for a node in the dependency graph.
///
/// Identifiers come from a process-wide counter and are never reused,
/// even across universes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    /// A writable leaf (state). Its value comes from queued updates.
    Source,

    /// A computed node (selector). Its value comes from a getter.
    Derived,
}

/// Invalidation status of a node's cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Status {
    /// Never computed, or invalidated since the last computation.
    #[default]
    Stale,

    /// The cached value reflects the current values of every dependency.
    Fresh,
}

impl Status {
    pub fn is_stale(self) -> bool {
        self == Status::Stale
    }
}

/// Callback invoked when a node's status genuinely changes.
pub type StatusObserver = Rc<dyn Fn(Status)>;

/// Identifier of a status observer registration, unique per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusObserverId(pub(crate) u64);

/// A node's record in the dependency store.
#[derive(Default)]
pub(crate) struct NodeRecord {
    /// Current status. A record that was never marked is Stale.
    pub(crate) status: Status,

    /// Nodes this node read during its last computation.
    pub(crate) dependencies: SmallVec<[NodeId; 4]>,

    /// Nodes whose last computation read this node.
    /// Insertion ordered so propagation is deterministic.
    pub(crate) dependents: IndexSet<NodeId>,

    /// Status observers, in subscription order.
    pub(crate) observers: SmallVec<[(StatusObserverId, StatusObserver); 1]>,
}

impl NodeRecord {
    /// Whether the record carries anything beyond the defaults.
    pub(crate) fn is_vacant(&self) -> bool {
        self.status == Status::Stale
            && self.dependencies.is_empty()
            && self.dependents.is_empty()
            && self.observers.is_empty()
    }

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) -> bool {
        if self.dependencies.contains(&node_id) {
            return false;
        }
        self.dependencies.push(node_id);
        true
    }

    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.retain(|dep| *dep != node_id);
    }

    pub(crate) fn observers(&self) -> Vec<StatusObserver> {
        self.observers.iter().map(|(_, observer)| Rc::clone(observer)).collect()
    }
}

impl fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRecord")
            .field("status", &self.status)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("observer_count", &self.observers.len())
            .finish()
    }
}
