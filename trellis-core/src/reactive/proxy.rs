//! Proxy states.
//!
//! A proxy state reads like a selector and writes like a state: its value
//! comes from a getter, and `set` dispatches an action that decides what
//! to write to the underlying states.

use std::fmt;

use super::action::Action;
use super::effect::Cleanup;
use super::runtime::{Node, Observable, Readable, UniverseId, Writable};
use super::selector::Selector;
use super::subscriber::{EffectHandle, ObserveOptions, Subscription};
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

/// A writable node backed by a selector and an action.
pub struct ProxyState<T: 'static> {
    selector: Selector<T>,
    action: Action<T>,
}

impl<T> ProxyState<T>
where
    T: Clone + 'static,
{
    pub(crate) fn new(selector: Selector<T>, action: Action<T>) -> Self {
        Self { selector, action }
    }

    pub fn id(&self) -> NodeId {
        self.selector.id()
    }

    pub fn get(&self) -> Result<T> {
        self.selector.get()
    }

    /// Dispatch the setter with `value`. Works inside or outside a
    /// transaction.
    pub fn set(&self, value: T) -> Result<()> {
        self.action.dispatch(value)
    }

    /// Dispatch the setter with `updater` applied to the current value.
    pub fn update<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(T) -> T,
    {
        let current = self.selector.get()?;
        self.set(updater(current))
    }

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

    pub fn dispose(&self) {
        self.selector.dispose();
    }

    /// The selector providing the value.
    pub fn selector(&self) -> &Selector<T> {
        &self.selector
    }
}

impl<T> Clone for ProxyState<T>
where
    T: 'static,
{
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
            action: self.action.clone(),
        }
    }
}

impl<T> Node for ProxyState<T>
where
    T: 'static,
{
    fn node_id(&self) -> NodeId {
        self.selector.node_id()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Derived
    }

    fn universe_id(&self) -> UniverseId {
        self.selector.universe_id()
    }
}

impl<T> Readable for ProxyState<T>
where
    T: Clone + 'static,
{
    type Value = T;

    fn get(&self) -> Result<T> {
        ProxyState::get(self)
    }
}

impl<T> Observable for ProxyState<T>
where
    T: Clone + 'static,
{
    fn observe_with<F>(&self, observer: F, options: ObserveOptions) -> Result<Subscription>
    where
        F: Fn(&T, Option<&T>) + 'static,
    {
        ProxyState::observe_with(self, observer, options)
    }

    fn effect<F>(&self, effect: F) -> EffectHandle
    where
        F: Fn() -> Option<Cleanup> + 'static,
    {
        ProxyState::effect(self, effect)
    }
}

impl<T> Writable for ProxyState<T>
where
    T: Clone + 'static,
{
    fn set(&self, value: T) -> Result<()> {
        ProxyState::set(self, value)
    }

    fn update<F>(&self, updater: F) -> Result<()>
    where
        F: FnOnce(T) -> T + 'static,
    {
        ProxyState::update(self, updater)
    }
}

impl<T> fmt::Debug for ProxyState<T>
where
    T: 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyState")
            .field("selector", &self.selector)
            .field("action", &self.action)
            .finish()
    }
}
