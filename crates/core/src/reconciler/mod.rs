//! Reconciliation of backend replies.
//!
//! Replies read from the broker are sharded by customer onto a fixed set of
//! workers ([`ReconcilerPool`]), each of which runs them through the
//! [`ReconciliationEngine`] one at a time.

mod engine;
mod notifier;
mod pool;
mod sources;

pub use engine::ReconciliationEngine;
pub use notifier::{HttpNotifier, Notifier, NotifyError};
pub use pool::ReconcilerPool;
pub use sources::SourceRegistry;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::store::StoreError;

/// Errors that abort the handling of a single reply.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No stored state for the customer. The reply is dropped.
    #[error("no ticket state for customer {0}")]
    UnknownCustomer(String),

    /// Reply names a different backend than the one currently on record.
    #[error("reply for {customer_id} from {actual}, expected {expected}")]
    BillingMismatch {
        customer_id: String,
        expected: String,
        actual: String,
    },

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to resubmit ticket: {0}")]
    Channel(#[from] ChannelError),
}

/// What reconciling a reply did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Create confirmed, record moved to `Working`.
    Accepted { notified: bool },
    /// Create rejected, resubmitted to the alternate backend.
    Rerouted { billing_channel: String },
    /// Create rejected and no further backend to try.
    Exhausted { notified: bool },
    /// Status, note or wait reply passed on to the source.
    Forwarded { notified: bool },
    Closed { notified: bool },
    Reopened { notified: bool },
    /// Redelivered or out-of-order reply, nothing changed.
    Duplicate,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Accepted { .. } => "accepted",
            Outcome::Rerouted { .. } => "rerouted",
            Outcome::Exhausted { .. } => "exhausted",
            Outcome::Forwarded { .. } => "forwarded",
            Outcome::Closed { .. } => "closed",
            Outcome::Reopened { .. } => "reopened",
            Outcome::Duplicate => "duplicate",
        }
    }
}
