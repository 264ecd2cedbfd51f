//! Durable per-customer ticket state.
//!
//! Records are keyed by customer id and expire after a fixed retention
//! window that every write resets. Two backends are provided: Redis (the
//! production deployment) and SQLite (single-node deployments and tests).

mod record;
mod redis_store;
mod sqlite_store;

pub use record::{customer_key, field, state_from_fields, state_to_fields, KEY_PREFIX};
pub use redis_store::RedisStateStore;
pub use sqlite_store::SqliteStateStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::ticket::{TicketState, TicketStatus};

/// Default retention window for a record (3 days).
pub const DEFAULT_TTL_SECS: u64 = 259_200;

/// Default number of keys requested per scan batch.
pub const DEFAULT_SCAN_BATCH: usize = 10_000;

/// Errors that can occur in state storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed or is unreachable.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored record could not be interpreted.
    #[error("corrupt record for customer {customer_id}: {reason}")]
    Corrupt { customer_id: String, reason: String },
}

/// One batch of a key scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Customer ids found in this batch (not prefixed store keys).
    pub customer_ids: Vec<String>,
    /// Cursor for the next batch, `None` once the scan is complete.
    pub next_cursor: Option<u64>,
}

/// Persistent store of [`TicketState`] records.
///
/// Writes are last-write-wins per customer; there is no compare-and-set, so a
/// read-modify-write by a caller is best effort.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert a record and reset its retention window.
    async fn put(&self, state: &TicketState) -> Result<(), StoreError>;

    /// Load the record for a customer.
    async fn get(&self, customer_id: &str) -> Result<Option<TicketState>, StoreError>;

    /// Remove the record for a customer. Removing a missing record is not an error.
    async fn delete(&self, customer_id: &str) -> Result<(), StoreError>;

    /// Scan one batch of customer ids, starting at `cursor` (0 starts a new scan).
    async fn scan(&self, cursor: u64) -> Result<ScanPage, StoreError>;

    /// Read only the lifecycle status.
    async fn get_status(&self, customer_id: &str) -> Result<Option<TicketStatus>, StoreError>;

    /// Read only the billing channel.
    async fn get_billing_channel(&self, customer_id: &str) -> Result<Option<String>, StoreError>;

    /// Read only the originating source name.
    async fn get_source(&self, customer_id: &str) -> Result<Option<String>, StoreError>;
}

/// Parse a status projection, attributing failures to `customer_id`.
pub(crate) fn parse_status(
    customer_id: &str,
    raw: Option<String>,
) -> Result<Option<TicketStatus>, StoreError> {
    raw.map(|s| {
        s.parse().map_err(|e: crate::ticket::UnknownStatus| StoreError::Corrupt {
            customer_id: customer_id.to_string(),
            reason: e.to_string(),
        })
    })
    .transpose()
}
