//! Dependency Store
//!
//! The store owns graph metadata only: per-node status, directed edges
//! (node -> dependency, with the inverse kept alongside), and status
//! observers. It never holds values.
//!
//! # Propagation
//!
//! Marking a node Stale walks its dependents breadth-first:
//!
//! 1. A dependent that is already Stale is skipped and the walk does not
//!    continue past it. Everything beyond it was invalidated when it went
//!    Stale, so diamonds are visited once and cycles terminate.
//! 2. A Fresh dependent becomes Stale and the walk continues from it.
//!
//! Status observers run only after the walk completes and the internal
//! borrow is released, so an observer may freely call back into the store.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, trace};

use super::node::{NodeId, NodeRecord, Status, StatusObserver, StatusObserverId};

/// Graph of node status and dependency edges for one universe.
#[derive(Default)]
pub struct DependencyStore {
    /// Records indexed by node ID. Absent means Stale with no edges.
    nodes: RefCell<HashMap<NodeId, NodeRecord>>,

    /// Counter for status observer registrations.
    next_observer: Cell<u64>,
}

impl DependencyStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a node's status. Unknown nodes are Stale.
    pub fn status(&self, node: NodeId) -> Status {
        self.nodes
            .borrow()
            .get(&node)
            .map(|record| record.status)
            .unwrap_or_default()
    }

    /// Set a node's status and notify observers on a genuine change.
    ///
    /// Going Stale invalidates every transitive dependent that is still
    /// Fresh; each one's observers are notified exactly once.
    pub fn mark_status(&self, node: NodeId, status: Status) {
        let notifications = {
            let mut nodes = self.nodes.borrow_mut();
            let record = nodes.entry(node).or_default();
            if record.status == status {
                return;
            }
            record.status = status;

            let mut notifications = vec![record.observers()];
            if status.is_stale() {
                let mut queue: VecDeque<NodeId> = record.dependents.iter().copied().collect();

                while let Some(dependent_id) = queue.pop_front() {
                    let Some(dependent) = nodes.get_mut(&dependent_id) else {
                        continue;
                    };
                    if dependent.status.is_stale() {
                        continue;
                    }
                    dependent.status = Status::Stale;
                    notifications.push(dependent.observers());
                    queue.extend(dependent.dependents.iter().copied());
                }

                debug!(%node, invalidated = notifications.len(), "marked stale");
            } else {
                trace!(%node, ?status, "status changed");
            }
            notifications
        };

        for observer in notifications.into_iter().flatten() {
            observer(status);
        }
    }

    /// Record that `node` read `dependency` during its computation.
    pub fn add_dependency(&self, node: NodeId, dependency: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        if nodes.entry(node).or_default().add_dependency(dependency) {
            nodes.entry(dependency).or_default().dependents.insert(node);
        }
    }

    /// Remove a single edge.
    pub fn remove_dependency(&self, node: NodeId, dependency: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        Self::unlink(&mut nodes, node, dependency);
    }

    /// Remove every outgoing edge of `node`.
    pub fn remove_dependencies(&self, node: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        Self::unlink_all(&mut nodes, node);
    }

    /// Replace the outgoing edge set of `node` in one step.
    ///
    /// No reader can observe a state between the removal of the old edges
    /// and the insertion of the new ones.
    pub fn replace_dependencies<I>(&self, node: NodeId, dependencies: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut nodes = self.nodes.borrow_mut();
        Self::unlink_all(&mut nodes, node);
        for dependency in dependencies {
            if nodes.entry(node).or_default().add_dependency(dependency) {
                nodes.entry(dependency).or_default().dependents.insert(node);
            }
        }
    }

    /// Get the dependencies recorded by the node's last computation.
    pub fn dependencies(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .borrow()
            .get(&node)
            .map(|record| record.dependencies.to_vec())
            .unwrap_or_default()
    }

    /// Get the nodes whose last computation read `node`.
    pub fn dependents(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .borrow()
            .get(&node)
            .map(|record| record.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Subscribe to status changes of `node`.
    ///
    /// Returns a token for [`DependencyStore::unobserve_status`].
    pub fn observe_status(&self, node: NodeId, observer: StatusObserver) -> StatusObserverId {
        let id = StatusObserverId(self.next_observer.get());
        self.next_observer.set(id.0 + 1);

        self.nodes
            .borrow_mut()
            .entry(node)
            .or_default()
            .observers
            .push((id, observer));
        id
    }

    /// Remove a status observer. Unknown tokens are ignored.
    pub fn unobserve_status(&self, node: NodeId, id: StatusObserverId) {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(record) = nodes.get_mut(&node) {
            record.observers.retain(|(observer_id, _)| *observer_id != id);
            if record.is_vacant() {
                nodes.remove(&node);
            }
        }
    }

    /// Forget a node entirely: status, edges in both directions, observers.
    ///
    /// Former dependents are marked Stale since their cached values were
    /// computed from a node that no longer exists.
    pub fn remove_node(&self, node: NodeId) {
        let dependents: Vec<NodeId> = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(record) = nodes.remove(&node) else {
                return;
            };

            for dependency in &record.dependencies {
                if let Some(dep) = nodes.get_mut(dependency) {
                    dep.dependents.shift_remove(&node);
                }
            }
            for dependent in &record.dependents {
                if let Some(dependent_record) = nodes.get_mut(dependent) {
                    dependent_record.remove_dependency(node);
                }
            }
            record.dependents.into_iter().collect()
        };

        debug!(%node, dependents = dependents.len(), "removed node");
        for dependent in dependents {
            self.mark_status(dependent, Status::Stale);
        }
    }

    /// Get the number of nodes with a record.
    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Capture the current graph for inspection.
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self.nodes.borrow();
        let mut entries: Vec<NodeSnapshot> = nodes
            .iter()
            .map(|(id, record)| NodeSnapshot {
                id: *id,
                status: record.status,
                dependencies: record.dependencies.to_vec(),
                dependents: record.dependents.iter().copied().collect(),
            })
            .collect();
        entries.sort_by_key(|entry| entry.id);
        GraphSnapshot { nodes: entries }
    }

    fn unlink(nodes: &mut HashMap<NodeId, NodeRecord>, node: NodeId, dependency: NodeId) {
        if let Some(record) = nodes.get_mut(&node) {
            record.remove_dependency(dependency);
        }
        if let Some(dep) = nodes.get_mut(&dependency) {
            dep.dependents.shift_remove(&node);
            if dep.is_vacant() {
                nodes.remove(&dependency);
            }
        }
    }

    fn unlink_all(nodes: &mut HashMap<NodeId, NodeRecord>, node: NodeId) {
        let previous = match nodes.get_mut(&node) {
            Some(record) => std::mem::take(&mut record.dependencies),
            None => return,
        };
        for dependency in previous {
            Self::unlink(nodes, node, dependency);
        }
    }
}

/// Serializable view of the store, ordered by node ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
}

/// One node in a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub status: Status,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recorder(store: &DependencyStore, node: NodeId) -> Rc<RefCell<Vec<Status>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        store.observe_status(node, Rc::new(move |status| seen_clone.borrow_mut().push(status)));
        seen
    }

    #[test]
    fn unknown_nodes_are_stale() {
        let store = DependencyStore::new();
        assert_eq!(store.status(NodeId::new()), Status::Stale);
        assert!(store.dependencies(NodeId::new()).is_empty());
    }

    #[test]
    fn mark_status_is_noop_when_unchanged() {
        let store = DependencyStore::new();
        let node = NodeId::new();
        let seen = recorder(&store, node);

        store.mark_status(node, Status::Stale);
        assert!(seen.borrow().is_empty());

        store.mark_status(node, Status::Fresh);
        store.mark_status(node, Status::Fresh);
        assert_eq!(*seen.borrow(), vec![Status::Fresh]);
    }

    #[test]
    fn add_and_remove_edges() {
        let store = DependencyStore::new();
        let source = NodeId::new();
        let derived = NodeId::new();

        store.add_dependency(derived, source);
        assert_eq!(store.dependencies(derived), vec![source]);
        assert_eq!(store.dependents(source), vec![derived]);

        store.remove_dependency(derived, source);
        assert!(store.dependencies(derived).is_empty());
        assert!(store.dependents(source).is_empty());
    }

    #[test]
    fn replace_dependencies_drops_previous_edges() {
        let store = DependencyStore::new();
        let node = NodeId::new();
        let a = NodeId::new();
        let b = NodeId::new();

        store.replace_dependencies(node, [a]);
        store.replace_dependencies(node, [b, b]);

        assert_eq!(store.dependencies(node), vec![b]);
        assert!(store.dependents(a).is_empty());
        assert_eq!(store.dependents(b), vec![node]);
    }

    #[test]
    fn stale_propagates_along_chain() {
        let store = DependencyStore::new();
        let source = NodeId::new();
        let derived1 = NodeId::new();
        let derived2 = NodeId::new();

        store.add_dependency(derived1, source);
        store.add_dependency(derived2, derived1);
        for node in [source, derived1, derived2] {
            store.mark_status(node, Status::Fresh);
        }
        let seen = recorder(&store, derived2);

        store.mark_status(source, Status::Stale);

        assert_eq!(store.status(derived1), Status::Stale);
        assert_eq!(store.status(derived2), Status::Stale);
        assert_eq!(*seen.borrow(), vec![Status::Stale]);
    }

    #[test]
    fn diamond_notifies_join_once() {
        let store = DependencyStore::new();
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();
        let d = NodeId::new();

        store.add_dependency(b, a);
        store.add_dependency(c, a);
        store.add_dependency(d, b);
        store.add_dependency(d, c);
        for node in [a, b, c, d] {
            store.mark_status(node, Status::Fresh);
        }
        let seen = recorder(&store, d);

        store.mark_status(a, Status::Stale);

        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn propagation_stops_at_stale_nodes() {
        let store = DependencyStore::new();
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();

        store.add_dependency(b, a);
        store.add_dependency(c, b);
        store.mark_status(a, Status::Fresh);
        store.mark_status(c, Status::Fresh);

        // b never computed, so the walk must not reach c through it
        store.mark_status(a, Status::Stale);
        assert_eq!(store.status(c), Status::Fresh);
    }

    #[test]
    fn cyclic_edges_terminate() {
        let store = DependencyStore::new();
        let a = NodeId::new();
        let b = NodeId::new();

        store.add_dependency(a, b);
        store.add_dependency(b, a);
        store.mark_status(a, Status::Fresh);
        store.mark_status(b, Status::Fresh);

        store.mark_status(a, Status::Stale);
        assert_eq!(store.status(b), Status::Stale);
    }

    #[test]
    fn observer_may_reenter_store() {
        let store = Rc::new(DependencyStore::new());
        let node = NodeId::new();
        let seen = Rc::new(Cell::new(Status::Stale));

        let store_clone = Rc::clone(&store);
        let seen_clone = Rc::clone(&seen);
        store.observe_status(
            node,
            Rc::new(move |_| seen_clone.set(store_clone.status(node))),
        );

        store.mark_status(node, Status::Fresh);
        assert_eq!(seen.get(), Status::Fresh);
    }

    #[test]
    fn unobserve_status_stops_notifications() {
        let store = DependencyStore::new();
        let node = NodeId::new();
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        let id = store.observe_status(
            node,
            Rc::new(move |_| count_clone.set(count_clone.get() + 1)),
        );

        store.mark_status(node, Status::Fresh);
        store.unobserve_status(node, id);
        store.mark_status(node, Status::Stale);

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn remove_node_clears_edges_and_invalidates_dependents() {
        let store = DependencyStore::new();
        let source = NodeId::new();
        let derived = NodeId::new();

        store.add_dependency(derived, source);
        store.mark_status(source, Status::Fresh);
        store.mark_status(derived, Status::Fresh);

        store.remove_node(source);

        assert_eq!(store.status(derived), Status::Stale);
        assert!(store.dependencies(derived).is_empty());
        assert_eq!(store.status(source), Status::Stale);
    }

    #[test]
    fn snapshot_is_sorted_and_serializable() {
        let store = DependencyStore::new();
        let a = NodeId::new();
        let b = NodeId::new();
        store.add_dependency(b, a);
        store.mark_status(a, Status::Fresh);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[0].id, a);
        assert_eq!(snapshot.nodes[0].dependents, vec![b]);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["nodes"][0]["status"], "Fresh");
        assert_eq!(json["nodes"][1]["dependencies"][0], a.raw());
    }
}
