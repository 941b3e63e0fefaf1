//! Reactive Runtime
//!
//! The runtime pairs one [`DependencyStore`] with one [`Transactor`]. Every
//! node created through a [`Universe`] holds a reference to that pair, so
//! reads, writes and notifications of one universe share a single graph
//! and a single batch queue.
//!
//! # How It Works
//!
//! 1. `Action::dispatch` opens a transaction.
//!
//! 2. `State::set` queues the update and marks the state Stale; the store
//!    invalidates every Fresh dependent and notifies their status
//!    observers.
//!
//! 3. An observed selector reacts to going Stale by scheduling a job keyed
//!    by its own node ID, so repeated invalidation collapses to one job.
//!
//! 4. When the outermost transaction returns, each job recomputes its node
//!    (if still Stale) and notifies observers when the value changed.
//!
//! Reads never return stale values: a Stale node recomputes synchronously
//! on `get`, inside or outside a transaction.
//!
//! # Threading
//!
//! A universe is single-threaded. Nodes are `!Send`; reentrancy is plain
//! recursion on one call stack.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::action::{Action, ActionContext};
use super::context::GetterContext;
use super::effect::Cleanup;
use super::proxy::ProxyState;
use super::selector::{Selector, SelectorOptions};
use super::state::State;
use super::subscriber::{EffectHandle, ObserveOptions, Subscription};
use super::transactor::Transactor;
use crate::error::{Error, Result};
use crate::graph::{DependencyStore, GraphSnapshot, NodeId, NodeKind, Status};

/// Identifier of a universe. Nodes remember which universe created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniverseId(u64);

impl UniverseId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A node in the graph, as seen from the boundary.
pub trait Node {
    /// The node's identity in the dependency store.
    fn node_id(&self) -> NodeId;

    /// Whether this is a writable source or a derived node.
    fn kind(&self) -> NodeKind;

    /// The universe that created the node.
    fn universe_id(&self) -> UniverseId;
}

/// A node whose value can be read.
pub trait Readable: Node {
    type Value;

    /// Return the current value, recomputing first if the node is Stale.
    fn get(&self) -> Result<Self::Value>;
}

/// A node whose changes can be observed.
pub trait Observable: Readable {
    /// Register an observer called with `(new, old)` when the value changes.
    fn observe_with<F>(&self, observer: F, options: ObserveOptions) -> Result<Subscription>
    where
        F: Fn(&Self::Value, Option<&Self::Value>) + 'static;

    /// Register an effect tied to the node being observed.
    fn effect<F>(&self, effect: F) -> EffectHandle
    where
        F: Fn() -> Option<Cleanup> + 'static;

    /// [`Observable::observe_with`] with default options.
    fn observe<F>(&self, observer: F) -> Result<Subscription>
    where
        F: Fn(&Self::Value, Option<&Self::Value>) + 'static,
    {
        self.observe_with(observer, ObserveOptions::default())
    }
}

/// A node that accepts writes.
pub trait Writable: Readable {
    /// Replace the value.
    fn set(&self, value: Self::Value) -> Result<()>;

    /// Derive the next value from the previous one.
    fn update<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(Self::Value) -> Self::Value + 'static;
}

/// Shared graph and batch queue of one universe.
pub(crate) struct Runtime {
    id: UniverseId,
    pub(crate) store: DependencyStore,
    pub(crate) transactor: Transactor<NodeId>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            id: UniverseId::new(),
            store: DependencyStore::new(),
            transactor: Transactor::new(),
        }
    }

    pub(crate) fn id(&self) -> UniverseId {
        self.id
    }

    /// Reject nodes that were created by another universe.
    pub(crate) fn ensure_member<N>(&self, node: &N) -> Result<()>
    where
        N: Node + ?Sized,
    {
        if node.universe_id() == self.id {
            Ok(())
        } else {
            Err(Error::ForeignNode {
                node: node.node_id(),
            })
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("node_count", &self.store.node_count())
            .field("transactor", &self.transactor)
            .finish()
    }
}

/// Create a new universe: one dependency store and one transactor, plus
/// the constructors for nodes that share them.
pub fn bootstrap() -> Universe {
    let universe = Universe {
        runtime: Rc::new(Runtime::new()),
    };
    debug!(universe = ?universe.runtime.id(), "bootstrapped universe");
    universe
}

/// Handle to a universe. Cloning is cheap and shares the same graph.
///
/// Nodes from different universes must not be mixed; contexts reject
/// foreign nodes with [`Error::ForeignNode`].
#[derive(Clone, Debug)]
pub struct Universe {
    runtime: Rc<Runtime>,
}

impl Universe {
    /// Create a state holding `value`.
    pub fn state<T>(&self, value: T) -> State<T>
    where
        T: Clone + PartialEq + 'static,
    {
        State::new(Rc::clone(&self.runtime), move || value.clone())
    }

    /// Create a state whose initial value is computed on first read.
    pub fn state_with<T, F>(&self, initial: F) -> State<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        State::new(Rc::clone(&self.runtime), initial)
    }

    /// Create a lazily computed selector.
    pub fn selector<T, F>(&self, getter: F) -> Selector<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn(&GetterContext<'_>) -> Result<T> + 'static,
    {
        self.selector_with(getter, SelectorOptions::default())
    }

    /// Create a selector with custom equality or cleanup.
    pub fn selector_with<T, F>(&self, getter: F, options: SelectorOptions<T>) -> Selector<T>
    where
        T: Clone + 'static,
        F: Fn(&GetterContext<'_>) -> Result<T> + 'static,
    {
        Selector::new(Rc::clone(&self.runtime), NodeKind::Derived, Box::new(getter), options)
    }

    /// Create an action. Dispatching it runs `setter` in one transaction.
    pub fn action<P, F>(&self, setter: F) -> Action<P>
    where
        P: 'static,
        F: Fn(&ActionContext<'_>, P) -> Result<()> + 'static,
    {
        Action::new(Rc::clone(&self.runtime), Box::new(setter))
    }

    /// Create a writable node backed by a getter and an action setter.
    pub fn proxy_state<T, G, S>(&self, getter: G, setter: S) -> ProxyState<T>
    where
        T: Clone + PartialEq + 'static,
        G: Fn(&GetterContext<'_>) -> Result<T> + 'static,
        S: Fn(&ActionContext<'_>, T) -> Result<()> + 'static,
    {
        ProxyState::new(self.selector(getter), self.action(setter))
    }

    /// Run `operation` in a transaction without going through an action.
    pub fn transact<R>(&self, operation: impl FnOnce() -> R) -> R {
        self.runtime.transactor.transact(operation)
    }

    pub fn is_transacting(&self) -> bool {
        self.runtime.transactor.is_transacting()
    }

    /// Current status of a node. Foreign nodes report Stale.
    pub fn status<N>(&self, node: &N) -> Status
    where
        N: Node + ?Sized,
    {
        match self.runtime.ensure_member(node) {
            Ok(()) => self.runtime.store.status(node.node_id()),
            Err(_) => Status::Stale,
        }
    }

    /// Capture the dependency graph for debugging.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.runtime.store.snapshot()
    }

    /// Number of nodes with a record in the dependency store.
    pub fn node_count(&self) -> usize {
        self.runtime.store.node_count()
    }

    /// Whether `node` was created by this universe.
    pub fn owns<N>(&self, node: &N) -> bool
    where
        N: Node + ?Sized,
    {
        self.runtime.ensure_member(node).is_ok()
    }
}
