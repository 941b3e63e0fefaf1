//! Selector Implementation
//!
//! A selector is a lazily computed, memoized node.
//!
//! # How Selectors Work
//!
//! 1. Creating a selector computes nothing. The first `get` runs the
//!    getter with a [`GetterContext`] that records every node it reads.
//!
//! 2. The recorded reads replace the selector's edge set in the dependency
//!    store, and the selector is marked Fresh.
//!
//! 3. When any dependency goes Stale, the store marks the selector Stale.
//!    The next `get` recomputes.
//!
//! 4. While observed, the selector also reacts to going Stale: it schedules
//!    a job for the end of the current batch which recomputes and, if the
//!    value differs from the last one delivered, notifies observers with
//!    `(new, old)`.
//!
//! # Failure
//!
//! Reading a selector from inside its own computation, directly or through
//! other selectors, fails with [`Error::CircularDependency`]. A failed
//! computation leaves the previous value, status and edge set untouched.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace};

use super::context::GetterContext;
use super::effect::{run_effects, Cleanup, EffectFn, Effects};
use super::runtime::{Node, Observable, Readable, Runtime, UniverseId};
use super::slot::Slot;
use super::subscriber::{
    Attachments, EffectHandle, EffectId, ObserveOptions, ObserverEntry, ObserverId, Subscription,
};
use crate::error::{Error, Result};
use crate::graph::{NodeId, NodeKind, Status, StatusObserverId};

/// Computation run by a selector.
pub type Getter<T> = Box<dyn Fn(&GetterContext<'_>) -> Result<T>>;

/// Equality used to decide whether observers fire.
pub type Equals<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// Cleanup for values a selector no longer holds.
pub type ValueCleanup<T> = Rc<dyn Fn(&T)>;

/// Per-selector configuration.
pub struct SelectorOptions<T> {
    equals: Equals<T>,
    cleanup: Option<ValueCleanup<T>>,
}

impl<T> SelectorOptions<T>
where
    T: 'static,
{
    /// Options with a custom equality, for values without `PartialEq` or
    /// when identity is what matters.
    pub fn with_equals<F>(equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            equals: Rc::new(equals),
            cleanup: None,
        }
    }

    pub fn equals<F>(mut self, equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        self.equals = Rc::new(equals);
        self
    }

    /// Called once for every value the selector releases: replaced and not
    /// retained for observers, dropped on unobserve, or dropped on dispose.
    pub fn cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: Fn(&T) + 'static,
    {
        self.cleanup = Some(Rc::new(cleanup));
        self
    }
}

impl<T> Default for SelectorOptions<T>
where
    T: PartialEq + 'static,
{
    fn default() -> Self {
        Self::with_equals(|a: &T, b: &T| a == b)
    }
}

/// A lazily computed, memoized node.
///
/// Cloning is cheap; clones share the same node.
pub struct Selector<T: 'static> {
    inner: Rc<SelectorInner<T>>,
}

pub(crate) struct SelectorInner<T: 'static> {
    id: NodeId,
    kind: NodeKind,
    runtime: Rc<Runtime>,
    getter: Getter<T>,
    equals: Equals<T>,
    cleanup: Option<ValueCleanup<T>>,

    /// Current value and, while observed, the last delivered value.
    slot: RefCell<Slot<T>>,

    /// Set while the getter runs; a read in this state is a cycle.
    computing: Cell<bool>,
    disposed: Cell<bool>,

    /// Observers in subscription order.
    observers: RefCell<Vec<ObserverEntry<T>>>,

    /// Once-observers detached for the delivery round in progress.
    in_flight: RefCell<Vec<ObserverId>>,

    /// Number of non-passive observers. The node is mounted iff non-zero.
    active: Cell<usize>,
    effects: RefCell<Effects>,
    status_observer: Cell<Option<StatusObserverId>>,

    /// Number of successful computations.
    compute_count: Cell<u64>,
}

impl<T> Selector<T>
where
    T: 'static,
{
    pub(crate) fn new(
        runtime: Rc<Runtime>,
        kind: NodeKind,
        getter: Getter<T>,
        options: SelectorOptions<T>,
    ) -> Self {
        let inner = SelectorInner {
            id: NodeId::new(),
            kind,
            runtime,
            getter,
            equals: options.equals,
            cleanup: options.cleanup,
            slot: RefCell::new(Slot::new()),
            computing: Cell::new(false),
            disposed: Cell::new(false),
            observers: RefCell::new(Vec::new()),
            in_flight: RefCell::new(Vec::new()),
            active: Cell::new(0),
            effects: RefCell::new(Effects::default()),
            status_observer: Cell::new(None),
            compute_count: Cell::new(0),
        };
        trace!(node = %inner.id, kind = ?kind, "created node");
        Self {
            inner: Rc::new(inner),
        }
    }

    /// Get the node's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Register an observer called with `(new, old)` after each batch in
    /// which the value changed.
    ///
    /// The first non-passive observer mounts the selector: its value is
    /// computed, it starts reacting to invalidation, and its effects run.
    pub fn observe<F>(&self, observer: F) -> Result<Subscription>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        self.observe_with(observer, ObserveOptions::default())
    }

    /// [`Selector::observe`] with delivery options.
    pub fn observe_with<F>(&self, observer: F, options: ObserveOptions) -> Result<Subscription>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        let inner = &self.inner;
        inner.ensure_live()?;

        if !options.passive && inner.active.get() == 0 {
            inner.mount()?;
        }
        let immediate = if options.immediate {
            Some(inner.ensure_fresh()?)
        } else {
            None
        };

        let entry = ObserverEntry {
            id: ObserverId::new(),
            callback: Rc::new(observer),
            options,
        };
        inner.observers.borrow_mut().push(entry.clone());
        if !options.passive {
            inner.active.set(inner.active.get() + 1);
        }
        let subscription = Subscription::new(self.attachments(), entry.id);

        if let Some(value) = immediate {
            (entry.callback)(&value, None);
            if options.once {
                inner.remove_observer(entry.id);
            }
        }
        Ok(subscription)
    }

    /// Register an effect tied to the selector being observed.
    ///
    /// The effect runs when the selector gains its first observer (or right
    /// away if it already has one). Its cleanup runs when the last observer
    /// leaves or when the effect is removed.
    pub fn effect<F>(&self, effect: F) -> EffectHandle
    where
        F: Fn() -> Option<Cleanup> + 'static,
    {
        let id = EffectId::new();
        let run: EffectFn = Rc::new(effect);
        let mounted = {
            let mut effects = self.inner.effects.borrow_mut();
            effects.add(id, Rc::clone(&run));
            effects.is_mounted()
        };
        if mounted {
            run_effects(vec![(id, run)], |id, cleanup| {
                self.inner.effects.borrow_mut().attach_cleanup(id, cleanup)
            });
        }
        EffectHandle::new(self.attachments(), id)
    }

    /// Remove the node from its universe.
    ///
    /// Effects are unmounted, observers dropped, held values released and
    /// the node's status and edges removed from the dependency store.
    /// Former dependents become Stale; reading the node afterwards fails
    /// with [`Error::Disposed`].
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.replace(true) {
            return;
        }

        if inner.active.replace(0) > 0 {
            inner.unmount();
        } else {
            inner.runtime.transactor.unfinalize(&inner.id);
        }
        inner.observers.borrow_mut().clear();
        inner.in_flight.borrow_mut().clear();

        let cleanups = inner.effects.borrow_mut().clear();
        for cleanup in cleanups {
            cleanup();
        }
        let released = inner.slot.borrow_mut().clear();
        for value in released {
            inner.release(Some(value));
        }

        inner.runtime.store.remove_node(inner.id);
        debug!(node = %inner.id, "disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Whether at least one non-passive observer is attached.
    pub fn is_observed(&self) -> bool {
        self.inner.active.get() > 0
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    /// Check if the selector has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.slot.borrow().has_value()
    }

    /// Get the number of successful computations.
    pub fn compute_count(&self) -> u64 {
        self.inner.compute_count.get()
    }

    pub(crate) fn universe(&self) -> UniverseId {
        self.inner.runtime.id()
    }

    pub(crate) fn runtime(&self) -> &Rc<Runtime> {
        &self.inner.runtime
    }

    fn attachments(&self) -> Weak<dyn Attachments> {
        let weak: Weak<SelectorInner<T>> = Rc::downgrade(&self.inner);
        weak
    }
}

impl<T> Selector<T>
where
    T: Clone + 'static,
{
    /// Get the current value, recomputing first if the selector is Stale.
    pub fn get(&self) -> Result<T> {
        self.inner.ensure_fresh().map(|value| T::clone(&value))
    }
}

impl<T> SelectorInner<T>
where
    T: 'static,
{
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.get() {
            Err(Error::Disposed { node: self.id })
        } else {
            Ok(())
        }
    }

    /// Return the cached value, recomputing first if Stale.
    fn ensure_fresh(&self) -> Result<Rc<T>> {
        self.ensure_live()?;
        if self.computing.get() {
            debug!(node = %self.id, "circular dependency detected");
            return Err(Error::CircularDependency { node: self.id });
        }

        if !self.runtime.store.status(self.id).is_stale() {
            if let Some(value) = self.slot.borrow().current() {
                return Ok(Rc::clone(value));
            }
        }

        let value = self.compute()?;
        self.runtime.store.mark_status(self.id, Status::Fresh);
        Ok(value)
    }

    /// Run the getter and commit its value and read set.
    ///
    /// Nothing is committed unless the getter and all its tracked reads
    /// succeeded.
    fn compute(&self) -> Result<Rc<T>> {
        let cx = GetterContext::enter(&self.runtime, self.id);
        let result = {
            let _guard = ComputeGuard::enter(&self.computing);
            (self.getter)(&cx)
        };
        let value = result?;
        let reads = cx.finish()?;

        let dependency_count = reads.len();
        self.runtime.store.replace_dependencies(self.id, reads);
        self.compute_count.set(self.compute_count.get() + 1);

        let value = Rc::new(value);
        let released = self.slot.borrow_mut().replace(Rc::clone(&value));
        self.release(released);

        trace!(node = %self.id, dependencies = dependency_count, "recomputed");
        Ok(value)
    }

    fn release(&self, value: Option<Rc<T>>) {
        if let (Some(value), Some(cleanup)) = (value, &self.cleanup) {
            cleanup(&value);
        }
    }

    /// Compute, start listening for invalidation and run effects.
    fn mount(self: &Rc<Self>) -> Result<()> {
        self.ensure_fresh()?;
        let released = self.slot.borrow_mut().mark_notified();
        self.release(released);

        if self.status_observer.get().is_none() {
            let weak = Rc::downgrade(self);
            let id = self.runtime.store.observe_status(
                self.id,
                Rc::new(move |status: Status| {
                    if status.is_stale() {
                        if let Some(inner) = weak.upgrade() {
                            inner.schedule();
                        }
                    }
                }),
            );
            self.status_observer.set(Some(id));
        }

        let to_run = self.effects.borrow_mut().begin_mount();
        run_effects(to_run, |id, cleanup| {
            self.effects.borrow_mut().attach_cleanup(id, cleanup)
        });

        debug!(node = %self.id, "mounted");
        Ok(())
    }

    /// Stop listening for invalidation, cancel a pending job, run effect
    /// cleanups and drop the delivered value.
    fn unmount(&self) {
        if let Some(id) = self.status_observer.take() {
            self.runtime.store.unobserve_status(self.id, id);
        }
        self.runtime.transactor.unfinalize(&self.id);

        let cleanups = self.effects.borrow_mut().unmount();
        for cleanup in cleanups {
            cleanup();
        }
        let released = self.slot.borrow_mut().take_notified();
        self.release(released);

        debug!(node = %self.id, "unmounted");
    }

    /// Queue a notification job for the end of the current batch.
    fn schedule(self: &Rc<Self>) {
        if self.observers.borrow().is_empty() {
            return;
        }
        let weak = Rc::downgrade(self);
        self.runtime.transactor.finalize(self.id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.notify();
            }
        });
    }

    /// Bring the value up to date and deliver it if it changed.
    fn notify(&self) {
        if self.disposed.get() || self.observers.borrow().is_empty() {
            return;
        }

        let value = match self.ensure_fresh() {
            Ok(value) => value,
            Err(err) => {
                error!(node = %self.id, %err, "recompute failed before notification");
                return;
            }
        };

        let previous = self.slot.borrow().notified().cloned();
        let unchanged = previous
            .as_ref()
            .is_some_and(|previous| (self.equals)(previous, &value));
        let released = self.slot.borrow_mut().mark_notified();
        if unchanged {
            trace!(node = %self.id, "value unchanged");
            drop(previous);
            self.release(released);
            return;
        }

        let observers: Vec<ObserverEntry<T>> = self.observers.borrow().clone();
        let once = self.detach_once();
        debug!(node = %self.id, observers = observers.len(), "notifying observers");
        for entry in &observers {
            if !self.claim_delivery(entry) {
                continue;
            }
            (entry.callback)(&value, previous.as_deref());
        }
        for entry in &once {
            self.release_observer(entry);
        }

        drop(previous);
        self.release(released);
    }

    /// Detach every once-observer before delivery starts. A round started by
    /// one of the callbacks never sees them.
    fn detach_once(&self) -> Vec<ObserverEntry<T>> {
        let mut detached = Vec::new();
        self.observers.borrow_mut().retain(|entry| {
            if entry.options.once {
                detached.push(entry.clone());
                false
            } else {
                true
            }
        });
        self.in_flight
            .borrow_mut()
            .extend(detached.iter().map(|entry| entry.id));
        detached
    }

    /// Whether `entry` should still be called in this round. Observers
    /// unsubscribed by an earlier callback are skipped.
    fn claim_delivery(&self, entry: &ObserverEntry<T>) -> bool {
        if entry.options.once {
            let mut in_flight = self.in_flight.borrow_mut();
            match in_flight.iter().position(|id| *id == entry.id) {
                Some(index) => {
                    in_flight.remove(index);
                    true
                }
                None => false,
            }
        } else {
            self.observers
                .borrow()
                .iter()
                .any(|attached| attached.id == entry.id)
        }
    }

    /// Account for an observer that has left the list.
    fn release_observer(&self, entry: &ObserverEntry<T>) {
        if entry.options.passive {
            return;
        }
        let active = self.active.get().saturating_sub(1);
        self.active.set(active);
        if active == 0 && !self.disposed.get() {
            self.unmount();
        }
    }
}

impl<T> Attachments for SelectorInner<T>
where
    T: 'static,
{
    fn remove_observer(&self, id: ObserverId) {
        let removed = {
            let mut observers = self.observers.borrow_mut();
            observers
                .iter()
                .position(|entry| entry.id == id)
                .map(|index| observers.remove(index))
        };
        let Some(entry) = removed else {
            // a once-observer mid-delivery is accounted for by its round
            self.in_flight.borrow_mut().retain(|pending| *pending != id);
            return;
        };
        self.release_observer(&entry);
    }

    fn remove_effect(&self, id: EffectId) {
        let cleanup = self.effects.borrow_mut().remove(id);
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
}

/// Clears the computing flag when the getter returns or unwinds.
struct ComputeGuard<'a> {
    computing: &'a Cell<bool>,
}

impl<'a> ComputeGuard<'a> {
    fn enter(computing: &'a Cell<bool>) -> Self {
        computing.set(true);
        Self { computing }
    }
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        self.computing.set(false);
    }
}

impl<T> Clone for Selector<T>
where
    T: 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Node for Selector<T>
where
    T: 'static,
{
    fn node_id(&self) -> NodeId {
        self.inner.id
    }

    fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    fn universe_id(&self) -> UniverseId {
        self.universe()
    }
}

impl<T> Readable for Selector<T>
where
    T: Clone + 'static,
{
    type Value = T;

    fn get(&self) -> Result<T> {
        Selector::get(self)
    }
}

impl<T> Observable for Selector<T>
where
    T: Clone + 'static,
{
    fn observe_with<F>(&self, observer: F, options: ObserveOptions) -> Result<Subscription>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        Selector::observe_with(self, observer, options)
    }

    fn effect<F>(&self, effect: F) -> EffectHandle
    where
        F: Fn() -> Option<Cleanup> + 'static,
    {
        Selector::effect(self, effect)
    }
}

impl<T> Debug for Selector<T>
where
    T: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("status", &self.inner.runtime.store.status(self.inner.id))
            .field("has_value", &self.has_value())
            .field("observer_count", &self.observer_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
