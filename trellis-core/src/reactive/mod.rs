//! Reactive Primitives
//!
//! This module implements the runtime on top of the dependency graph:
//! states, selectors, actions, and the transactions that batch their
//! notifications.
//!
//! # Concepts
//!
//! ## States
//!
//! A [`State`] is a mutable leaf. Writes are queued and resolved on the next
//! read, and must happen inside a transaction.
//!
//! ## Selectors
//!
//! A [`Selector`] is a derived value. It computes lazily, caches its result
//! and recomputes only after one of the nodes it read has changed.
//!
//! ## Actions
//!
//! An [`Action`] is the entry point for writes. Dispatching opens a
//! transaction; observers of every node touched by it fire once, after the
//! outermost transaction returns.
//!
//! ## Effects
//!
//! An effect is a side-effecting function tied to a node being observed.
//! It runs on the first observer and its cleanup runs on the last
//! unobserve.
//!
//! # Implementation Notes
//!
//! Dependency tracking is explicit: a getter receives a [`GetterContext`]
//! and every read through it records an edge. There is no thread-local
//! "current computation".

mod action;
mod context;
mod effect;
mod proxy;
mod runtime;
mod selector;
mod slot;
mod state;
mod subscriber;
mod transactor;

pub use action::{Action, ActionContext, ActionId, Setter};
pub use context::GetterContext;
pub use effect::{Cleanup, EffectFn};
pub use proxy::ProxyState;
pub use runtime::{bootstrap, Node, Observable, Readable, Universe, UniverseId, Writable};
pub use selector::{Equals, Getter, Selector, SelectorOptions, ValueCleanup};
pub use slot::Slot;
pub use state::{State, Update};
pub use subscriber::{EffectHandle, EffectId, ObserveOptions, Observer, ObserverId, Subscription};
pub use transactor::{Job, Transactor};
