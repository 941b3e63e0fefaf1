//! Effect Lifecycle
//!
//! An effect is a side-effecting function whose active lifetime is tied to
//! its node being observed.
//!
//! # How Effects Work
//!
//! 1. When the node gains its first (non-passive) observer, every
//!    registered effect runs. An effect may return a cleanup.
//!
//! 2. When the node loses its last observer, the cleanups run and the
//!    effects are considered unmounted.
//!
//! 3. An effect registered while the node is already mounted runs right
//!    away; removing a mounted effect runs its cleanup.
//!
//! # Reentrancy
//!
//! Effect functions and cleanups run with no internal borrow held, so they
//! may register or remove effects on the same node.

use std::rc::Rc;

use super::subscriber::EffectId;

/// Cleanup returned by an effect.
pub type Cleanup = Box<dyn FnOnce()>;

/// Effect function. Returns an optional cleanup.
pub type EffectFn = Rc<dyn Fn() -> Option<Cleanup>>;

struct EffectEntry {
    id: EffectId,
    run: EffectFn,
    cleanup: Option<Cleanup>,
}

/// Effects registered on one node.
#[derive(Default)]
pub(crate) struct Effects {
    entries: Vec<EffectEntry>,
    mounted: bool,
}

impl Effects {
    pub(crate) fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn add(&mut self, id: EffectId, run: EffectFn) {
        self.entries.push(EffectEntry {
            id,
            run,
            cleanup: None,
        });
    }

    /// Remove an effect, returning its pending cleanup if it was mounted.
    pub(crate) fn remove(&mut self, id: EffectId) -> Option<Cleanup> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(index).cleanup
    }

    /// Flag the set as mounted and return the effects to run.
    pub(crate) fn begin_mount(&mut self) -> Vec<(EffectId, EffectFn)> {
        self.mounted = true;
        self.entries
            .iter()
            .map(|entry| (entry.id, Rc::clone(&entry.run)))
            .collect()
    }

    /// Store the cleanup produced by a mounted effect.
    ///
    /// Returns it back when the effect can no longer hold it (removed while
    /// running, or the set was unmounted in the meantime).
    pub(crate) fn attach_cleanup(&mut self, id: EffectId, cleanup: Cleanup) -> Option<Cleanup> {
        if !self.mounted {
            return Some(cleanup);
        }
        match self.entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.cleanup = Some(cleanup);
                None
            }
            None => Some(cleanup),
        }
    }

    /// Flag the set as unmounted and collect cleanups in registration order.
    pub(crate) fn unmount(&mut self) -> Vec<Cleanup> {
        self.mounted = false;
        self.entries
            .iter_mut()
            .filter_map(|entry| entry.cleanup.take())
            .collect()
    }

    pub(crate) fn clear(&mut self) -> Vec<Cleanup> {
        let cleanups = self.unmount();
        self.entries.clear();
        cleanups
    }
}

/// Run effects outside of any borrow, handing cleanups back to `attach`.
pub(crate) fn run_effects<A>(effects: Vec<(EffectId, EffectFn)>, mut attach: A)
where
    A: FnMut(EffectId, Cleanup) -> Option<Cleanup>,
{
    for (id, run) in effects {
        if let Some(cleanup) = run() {
            if let Some(orphan) = attach(id, cleanup) {
                orphan();
            }
        }
    }
}
