//! Dependency Graph
//!
//! This module implements the graph metadata that tracks relationships
//! between nodes: which node read which during its last computation, and
//! whether each node's cached value is still valid.
//!
//! # Overview
//!
//! - Nodes are states (sources) and selectors (derived values), addressed
//!   by a stable [`NodeId`].
//! - An edge `node -> dependency` is recorded for every read performed by
//!   the node's last successful computation. The inverse edges are kept
//!   alongside so invalidation can walk from a dependency to its readers.
//! - Every node is either [`Status::Stale`] or [`Status::Fresh`]. A node
//!   the store has never seen is Stale.
//!
//! # Design Decisions
//!
//! 1. The store is centralized per universe rather than distributed over
//!    the nodes, so propagation is a single worklist walk.
//!
//! 2. The store holds no values. Values live in the nodes themselves, which
//!    keeps the store free of type parameters.
//!
//! 3. Graphs may contain cycles at this level; the walk is a fixpoint and
//!    terminates regardless. Cycles are rejected when a node is read.

mod node;
mod store;

pub use node::{NodeId, NodeKind, Status, StatusObserver, StatusObserverId};
pub use store::{DependencyStore, GraphSnapshot, NodeSnapshot};
