//! Error types for the reactive runtime.

use thiserror::Error;

use crate::graph::NodeId;
use crate::reactive::ActionId;

/// Failures raised by reads and writes on the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A node was read while it was computing, directly or through a ring
    /// of other nodes.
    #[error("circular dependency detected while reading node {node}")]
    CircularDependency { node: NodeId },

    /// A state was written with no enclosing transaction.
    #[error("state {node} was written outside of a transaction")]
    OutOfTransactionWrite { node: NodeId },

    /// A key or value fell outside its permitted domain.
    #[error("value out of range: {reason}")]
    OutOfRange { reason: String },

    /// A node created by another universe was passed to a context.
    #[error("node {node} belongs to a different universe")]
    ForeignNode { node: NodeId },

    /// An action created by another universe was dispatched from a context.
    #[error("action {action} belongs to a different universe")]
    ForeignAction { action: ActionId },

    /// The node was disposed and can no longer be used.
    #[error("node {node} has been disposed")]
    Disposed { node: NodeId },
}

impl Error {
    /// Build an [`Error::OutOfRange`] from anything displayable.
    pub fn out_of_range(reason: impl Into<String>) -> Self {
        Error::OutOfRange {
            reason: reason.into(),
        }
    }

    pub fn is_circular_dependency(&self) -> bool {
        matches!(self, Error::CircularDependency { .. })
    }

    pub fn is_out_of_transaction_write(&self) -> bool {
        matches!(self, Error::OutOfTransactionWrite { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
