//! State Implementation
//!
//! A state is the mutable leaf of the graph. It reuses the selector
//! machinery: its getter resolves a queue of pending updates.
//!
//! # How States Work
//!
//! 1. `set` and `update` append to the pending queue without applying
//!    anything, then mark the state Stale. The store cascades the
//!    invalidation to every Fresh dependent.
//!
//! 2. The next read folds the queue left to right. A literal value
//!    replaces whatever came before; an updater receives the result of
//!    everything before it. The result becomes the new base value.
//!
//! 3. Writes must happen inside a transaction, so that every write is
//!    attributable to an action and notifications are batched.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::mem;
use std::rc::Rc;

use tracing::trace;

use super::context::GetterContext;
use super::effect::Cleanup;
use super::runtime::{Node, Observable, Readable, Runtime, UniverseId, Writable};
use super::selector::{Getter, Selector, SelectorOptions};
use super::subscriber::{EffectHandle, ObserveOptions, Subscription};
use crate::error::{Error, Result};
use crate::graph::{NodeId, NodeKind, Status};

/// A queued write.
pub enum Update<T> {
    /// Replace the value.
    Value(T),
    /// Derive the value from the previous one.
    With(Box<dyn FnOnce(T) -> T>),
}

impl<T> Debug for Update<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Update::With(_) => f.write_str("With(..)"),
        }
    }
}

/// Base value plus the updates queued since it was resolved.
struct Pending<T> {
    base: Option<T>,
    queue: Vec<Update<T>>,
    initial: Rc<dyn Fn() -> T>,
}

impl<T> Pending<T> {
    /// Take what the fold needs, leaving the queue empty.
    fn take(&mut self) -> (Option<T>, Vec<Update<T>>) {
        (self.base.take(), mem::take(&mut self.queue))
    }
}

/// Apply `updates` oldest first. The base (or the initial thunk, if no
/// base exists yet) is only consulted when an updater needs a previous
/// value that no literal supplied.
fn resolve<T>(base: Option<T>, updates: Vec<Update<T>>, initial: &dyn Fn() -> T) -> T {
    let mut base = base;
    let mut acc: Option<T> = None;
    for update in updates {
        acc = Some(match update {
            Update::Value(value) => value,
            Update::With(updater) => {
                let previous = acc.take().or_else(|| base.take()).unwrap_or_else(initial);
                updater(previous)
            }
        });
    }
    acc.or(base).unwrap_or_else(initial)
}

/// A mutable node.
///
/// Cloning is cheap; clones share the same node.
pub struct State<T: 'static> {
    selector: Selector<T>,
    pending: Rc<RefCell<Pending<T>>>,
}

impl<T> State<T>
where
    T: Clone + PartialEq + 'static,
{
    pub(crate) fn new<F>(runtime: Rc<Runtime>, initial: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let pending = Rc::new(RefCell::new(Pending {
            base: None,
            queue: Vec::new(),
            initial: Rc::new(initial),
        }));

        let resolving = Rc::clone(&pending);
        let getter: Getter<T> = Box::new(move |_: &GetterContext<'_>| {
            let ((base, updates), initial) = {
                let mut pending = resolving.borrow_mut();
                (pending.take(), Rc::clone(&pending.initial))
            };
            let value = resolve(base, updates, &*initial);
            resolving.borrow_mut().base = Some(value.clone());
            Ok(value)
        });

        let selector = Selector::new(runtime, NodeKind::Source, getter, SelectorOptions::default());
        Self { selector, pending }
    }
}

impl<T> State<T>
where
    T: Clone + 'static,
{
    /// Get the node's unique ID.
    pub fn id(&self) -> NodeId {
        self.selector.id()
    }

    /// Get the current value, resolving pending updates first.
    pub fn get(&self) -> Result<T> {
        self.selector.get()
    }

    /// Queue `value` as the next value.
    ///
    /// Fails with [`Error::OutOfTransactionWrite`] when no transaction is
    /// open.
    pub fn set(&self, value: T) -> Result<()> {
        self.enqueue(Update::Value(value))
    }

    /// Queue `updater`, applied to the value left by earlier updates.
    pub fn update<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(T) -> T + 'static,
    {
        self.enqueue(Update::With(Box::new(updater)))
    }

    fn enqueue(&self, update: Update<T>) -> Result<()> {
        let node = self.id();
        if self.selector.is_disposed() {
            return Err(Error::Disposed { node });
        }
        let runtime = self.selector.runtime();
        if !runtime.transactor.is_transacting() {
            return Err(Error::OutOfTransactionWrite { node });
        }

        let queued = {
            let mut pending = self.pending.borrow_mut();
            pending.queue.push(update);
            pending.queue.len()
        };
        trace!(%node, queued, "queued update");
        runtime.store.mark_status(node, Status::Stale);
        Ok(())
    }

    /// Number of updates waiting to be resolved.
    pub fn pending_updates(&self) -> usize {
        self.pending.borrow().queue.len()
    }

    /// Register an observer called with `(new, old)` after each batch in
    /// which the value changed.
    pub fn observe<F>(&self, observer: F) -> Result<Subscription>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        self.selector.observe(observer)
    }

    pub fn observe_with<F>(&self, observer: F, options: ObserveOptions) -> Result<Subscription>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        self.selector.observe_with(observer, options)
    }

    pub fn effect<F>(&self, effect: F) -> EffectHandle
    where
        F: Fn() -> Option<Cleanup> + 'static,
    {
        self.selector.effect(effect)
    }

    /// Remove the state from its universe and drop queued updates.
    pub fn dispose(&self) {
        self.selector.dispose();
        let mut pending = self.pending.borrow_mut();
        pending.queue.clear();
        pending.base = None;
    }

    pub fn is_disposed(&self) -> bool {
        self.selector.is_disposed()
    }

    pub fn is_observed(&self) -> bool {
        self.selector.is_observed()
    }

    pub fn observer_count(&self) -> usize {
        self.selector.observer_count()
    }
}

impl<T> Clone for State<T>
where
    T: 'static,
{
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
            pending: Rc::clone(&self.pending),
        }
    }
}

impl<T> Node for State<T>
where
    T: 'static,
{
    fn node_id(&self) -> NodeId {
        self.selector.node_id()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn universe_id(&self) -> UniverseId {
        self.selector.universe_id()
    }
}

impl<T> Readable for State<T>
where
    T: Clone + 'static,
{
    type Value = T;

    fn get(&self) -> Result<T> {
        State::get(self)
    }
}

impl<T> Observable for State<T>
where
    T: Clone + 'static,
{
    fn observe_with<F>(&self, observer: F, options: ObserveOptions) -> Result<Subscription>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        State::observe_with(self, observer, options)
    }

    fn effect<F>(&self, effect: F) -> EffectHandle
    where
        F: Fn() -> Option<Cleanup> + 'static,
    {
        State::effect(self, effect)
    }
}

impl<T> Writable for State<T>
where
    T: Clone + 'static,
{
    fn set(&self, value: T) -> Result<()> {
        State::set(self, value)
    }

    fn update<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(T) -> T + 'static,
    {
        State::update(self, updater)
    }
}

impl<T> Debug for State<T>
where
    T: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("selector", &self.selector)
            .field("pending_updates", &self.pending.borrow().queue.len())
            .finish()
    }
}
