//! Getter Context
//!
//! The getter context is handed to a selector's getter for the duration of
//! one computation. Every [`GetterContext::get`] returns the dependency's
//! value and records the read, so the selector's edge set can be replaced
//! with exactly what this computation touched.
//!
//! # Implementation
//!
//! The context is passed explicitly rather than tracked in thread-local
//! state. Nested computations (a selector reading another selector) each
//! get their own context on the call stack, so reads are attributed to the
//! innermost computation without any global bookkeeping.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::runtime::{Readable, Runtime};
use crate::error::{Error, Result};
use crate::graph::NodeId;

/// Tracking context for one selector computation.
pub struct GetterContext<'a> {
    runtime: &'a Runtime,

    /// The node being computed.
    node: NodeId,

    /// Nodes read so far, in first-read order.
    reads: RefCell<SmallVec<[NodeId; 4]>>,

    /// First failure seen by a tracked read. A getter that swallows it
    /// still fails its computation.
    error: RefCell<Option<Error>>,
}

impl<'a> GetterContext<'a> {
    pub(crate) fn enter(runtime: &'a Runtime, node: NodeId) -> Self {
        Self {
            runtime,
            node,
            reads: RefCell::new(SmallVec::new()),
            error: RefCell::new(None),
        }
    }

    /// The node whose getter is running.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Read `dependency` and record it as a dependency of this computation.
    pub fn get<N>(&self, dependency: &N) -> Result<N::Value>
    where
        N: Readable + ?Sized,
    {
        let result = self.track(dependency).and_then(|()| dependency.get());
        if let Err(err) = &result {
            self.error.borrow_mut().get_or_insert_with(|| err.clone());
        }
        result
    }

    /// Read `dependency` without recording an edge.
    ///
    /// The computation will not be invalidated when `dependency` changes.
    pub fn get_untracked<N>(&self, dependency: &N) -> Result<N::Value>
    where
        N: Readable + ?Sized,
    {
        self.runtime.ensure_member(dependency)?;
        dependency.get()
    }

    /// Dependencies recorded so far.
    pub fn dependencies(&self) -> Vec<NodeId> {
        self.reads.borrow().to_vec()
    }

    fn track<N>(&self, dependency: &N) -> Result<()>
    where
        N: Readable + ?Sized,
    {
        self.runtime.ensure_member(dependency)?;
        let id = dependency.node_id();
        let mut reads = self.reads.borrow_mut();
        if !reads.contains(&id) {
            reads.push(id);
        }
        Ok(())
    }

    /// Close the context, yielding the read set or the first read failure.
    pub(crate) fn finish(self) -> Result<SmallVec<[NodeId; 4]>> {
        match self.error.into_inner() {
            Some(err) => Err(err),
            None => Ok(self.reads.into_inner()),
        }
    }
}
