//! Value slot held by every node.
//!
//! A slot distinguishes "has a value" from "has none" and, while the node is
//! observed, also keeps the last value delivered to observers so the next
//! notification can report it as the old value.
//!
//! Values are stored behind `Rc` so the same value may sit in both
//! positions. A value is *released* only when it leaves the slot entirely;
//! the release methods return it so the owner can run its cleanup.

use std::rc::Rc;

#[derive(Debug)]
pub struct Slot<T> {
    current: Option<Rc<T>>,
    notified: Option<Rc<T>>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            current: None,
            notified: None,
        }
    }

    pub fn has_value(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<&Rc<T>> {
        self.current.as_ref()
    }

    pub fn notified(&self) -> Option<&Rc<T>> {
        self.notified.as_ref()
    }

    /// Store a new current value. Returns the old one if nothing retains it.
    pub fn replace(&mut self, value: Rc<T>) -> Option<Rc<T>> {
        let previous = self.current.replace(value)?;
        self.released_unless_notified(previous)
    }

    /// Record the current value as delivered to observers.
    /// Returns the previously delivered value if nothing retains it.
    pub fn mark_notified(&mut self) -> Option<Rc<T>> {
        let previous = std::mem::replace(&mut self.notified, self.current.clone())?;
        self.released_unless_current(previous)
    }

    /// Stop retaining the delivered value, e.g. when observation ends.
    pub fn take_notified(&mut self) -> Option<Rc<T>> {
        let previous = self.notified.take()?;
        self.released_unless_current(previous)
    }

    /// Empty the slot, returning every distinct value it held.
    pub fn clear(&mut self) -> Vec<Rc<T>> {
        let mut released = Vec::with_capacity(2);
        if let Some(notified) = self.take_notified() {
            released.push(notified);
        }
        if let Some(current) = self.current.take() {
            released.push(current);
        }
        released
    }

    fn released_unless_notified(&self, value: Rc<T>) -> Option<Rc<T>> {
        match &self.notified {
            Some(notified) if Rc::ptr_eq(notified, &value) => None,
            _ => Some(value),
        }
    }

    fn released_unless_current(&self, value: Rc<T>) -> Option<Rc<T>> {
        match &self.current {
            Some(current) if Rc::ptr_eq(current, &value) => None,
            _ => Some(value),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}
