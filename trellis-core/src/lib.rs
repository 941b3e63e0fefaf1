//! Trellis Core
//!
//! This crate provides a reactive dependency-graph runtime: mutable states
//! and derived selectors kept consistent by lazy recomputation on read and
//! eager invalidation on write, with batched, deduplicated change
//! notification.
//!
//! # Architecture
//!
//! - `graph`: node records and the [`DependencyStore`](graph::DependencyStore)
//!   holding edges and Fresh/Stale status
//! - `reactive`: states, selectors, actions, effects and the
//!   [`Transactor`](reactive::Transactor) that batches notifications
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use trellis_core::bootstrap;
//!
//! let universe = bootstrap();
//! let count = universe.state(1);
//!
//! let source = count.clone();
//! let doubled = universe.selector(move |cx| Ok(cx.get(&source)? * 2));
//!
//! let target = count.clone();
//! let increment = universe.action(move |cx, ()| cx.update(&target, |v| v + 1));
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! let _subscription = doubled
//!     .observe(move |new, old| sink.borrow_mut().push((*new, old.copied())))
//!     .unwrap();
//!
//! increment.dispatch(()).unwrap();
//!
//! assert_eq!(count.get().unwrap(), 2);
//! assert_eq!(doubled.get().unwrap(), 4);
//! assert_eq!(*seen.borrow(), vec![(4, Some(2))]);
//! ```

pub mod graph;
pub mod reactive;

mod error;

pub use error::{Error, Result};
pub use reactive::{
    bootstrap, Action, ActionContext, GetterContext, Node, Observable, ObserveOptions, ProxyState,
    Readable, Selector, SelectorOptions, State, Subscription, Universe, Writable,
};
