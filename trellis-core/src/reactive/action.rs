//! Actions
//!
//! An action is the entry point for writes. Dispatching runs the setter in
//! one transaction; states written by the setter, and by any action it
//! dispatches in turn, notify their observers once, after the outermost
//! dispatch returns.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug_span, trace};

use super::runtime::{Readable, Runtime, UniverseId, Writable};
use crate::error::{Error, Result};

/// Unique identifier for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(u64);

impl ActionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Mutator run by an action.
pub type Setter<P> = Box<dyn Fn(&ActionContext<'_>, P) -> Result<()>>;

/// Context handed to a setter for the duration of one dispatch.
pub struct ActionContext<'a> {
    runtime: &'a Runtime,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(runtime: &'a Runtime) -> Self {
        Self { runtime }
    }

    /// Read a node. Reads inside an action reflect every earlier write of
    /// the same dispatch.
    pub fn get<N>(&self, node: &N) -> Result<N::Value>
    where
        N: Readable + ?Sized,
    {
        self.runtime.ensure_member(node)?;
        node.get()
    }

    /// Queue a new value for `node`.
    pub fn set<N>(&self, node: &N, value: N::Value) -> Result<()>
    where
        N: Writable + ?Sized,
    {
        self.runtime.ensure_member(node)?;
        node.set(value)
    }

    /// Queue an update derived from the previous value of `node`.
    pub fn update<N, F>(&self, node: &N, updater: F) -> Result<()>
    where
        N: Writable + ?Sized,
        F: FnOnce(N::Value) -> N::Value + 'static,
    {
        self.runtime.ensure_member(node)?;
        node.update(updater)
    }

    /// Dispatch another action inside the current transaction.
    pub fn dispatch<Q>(&self, action: &Action<Q>, payload: Q) -> Result<()>
    where
        Q: 'static,
    {
        if action.universe_id() != self.runtime.id() {
            return Err(Error::ForeignAction { action: action.id() });
        }
        action.dispatch(payload)
    }

    pub fn is_transacting(&self) -> bool {
        self.runtime.transactor.is_transacting()
    }
}

impl fmt::Debug for ActionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("universe", &self.runtime.id())
            .finish()
    }
}

/// A write entry point taking a payload of type `P`.
///
/// Cloning is cheap; clones dispatch the same setter.
pub struct Action<P: 'static> {
    inner: Rc<ActionInner<P>>,
}

struct ActionInner<P: 'static> {
    id: ActionId,
    runtime: Rc<Runtime>,
    setter: Setter<P>,
}

impl<P> Action<P>
where
    P: 'static,
{
    pub(crate) fn new(runtime: Rc<Runtime>, setter: Setter<P>) -> Self {
        Self {
            inner: Rc::new(ActionInner {
                id: ActionId::new(),
                runtime,
                setter,
            }),
        }
    }

    pub fn id(&self) -> ActionId {
        self.inner.id
    }

    pub fn universe_id(&self) -> UniverseId {
        self.inner.runtime.id()
    }

    /// Run the setter with `payload` in a transaction.
    ///
    /// Nested dispatches join the enclosing transaction. Observers are
    /// notified when the outermost transaction returns, even if the setter
    /// failed.
    pub fn dispatch(&self, payload: P) -> Result<()> {
        let inner = &self.inner;
        let span = debug_span!("dispatch", action = %inner.id);
        let _enter = span.enter();

        let nested = inner.runtime.transactor.is_transacting();
        trace!(nested, "dispatching");
        inner.runtime.transactor.transact(|| {
            let cx = ActionContext::new(&inner.runtime);
            (inner.setter)(&cx, payload)
        })
    }
}

impl<P> Clone for Action<P>
where
    P: 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P> fmt::Debug for Action<P>
where
    P: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("id", &self.inner.id).finish()
    }
}
