//! Observer registrations.
//!
//! Observers are callbacks attached to a node and invoked with
//! `(new, old)` after a batch in which the node's value changed.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for an effect registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

impl EffectId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivery options for an observer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Remove the observer after its first delivery.
    pub once: bool,

    /// Deliver `(current, None)` synchronously on subscription.
    pub immediate: bool,

    /// Do not count toward the node being observed. A passive observer
    /// neither mounts the node's effects nor keeps them mounted, and only
    /// receives notifications while some other observer does.
    pub passive: bool,
}

impl ObserveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// Callback invoked with `(new, old)`.
pub type Observer<T> = Rc<dyn Fn(&T, Option<&T>)>;

pub(crate) struct ObserverEntry<T> {
    pub(crate) id: ObserverId,
    pub(crate) callback: Observer<T>,
    pub(crate) options: ObserveOptions,
}

impl<T> Clone for ObserverEntry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: Rc::clone(&self.callback),
            options: self.options,
        }
    }
}

/// Something observers and effects can be detached from.
pub(crate) trait Attachments {
    fn remove_observer(&self, id: ObserverId);
    fn remove_effect(&self, id: EffectId);
}

/// Handle returned by `observe`. Unsubscribing is idempotent.
///
/// Dropping the handle does not unsubscribe.
#[must_use = "an observer can only be removed through its subscription"]
pub struct Subscription {
    target: Weak<dyn Attachments>,
    id: ObserverId,
}

impl Subscription {
    pub(crate) fn new(target: Weak<dyn Attachments>, id: ObserverId) -> Self {
        Self { target, id }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Detach the observer. Calling this again does nothing.
    pub fn unsubscribe(&self) {
        if let Some(target) = self.target.upgrade() {
            target.remove_observer(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Handle returned by `effect`. Removing a mounted effect runs its cleanup.
pub struct EffectHandle {
    target: Weak<dyn Attachments>,
    id: EffectId,
}

impl EffectHandle {
    pub(crate) fn new(target: Weak<dyn Attachments>, id: EffectId) -> Self {
        Self { target, id }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn remove(&self) {
        if let Some(target) = self.target.upgrade() {
            target.remove_effect(self.id);
        }
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle").field("id", &self.id).finish()
    }
}
