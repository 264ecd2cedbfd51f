//! Redis-backed state store.
//!
//! Each record is a hash at `CustomerInternalID:<id>`. Writes replace the
//! hash and reset its expiry in one atomic pipeline.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, warn};

use super::record::{customer_key, field, state_from_fields, state_to_fields, KEY_PREFIX};
use super::{parse_status, ScanPage, StateStore, StoreError};
use crate::ticket::{TicketState, TicketStatus};

fn backend(context: &str, e: redis::RedisError) -> StoreError {
    StoreError::Backend(format!("{context}: {e}"))
}

/// Redis-backed [`StateStore`].
///
/// The connection manager multiplexes one connection and reconnects on
/// failure; it is cloned per operation, never held across calls.
#[derive(Clone)]
pub struct RedisStateStore {
    conn_manager: ConnectionManager,
    ttl_secs: u64,
    scan_batch: usize,
}

impl RedisStateStore {
    /// Connect to Redis.
    pub async fn new(redis_url: &str, ttl_secs: u64, scan_batch: usize) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| backend("Failed to create Redis client", e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| backend("Failed to create Redis connection manager", e))?;

        Ok(Self {
            conn_manager,
            ttl_secs,
            scan_batch,
        })
    }

    async fn get_field(&self, customer_id: &str, name: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        conn.hget(customer_key(customer_id), name)
            .await
            .map_err(|e| backend("Failed to read field", e))
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put(&self, state: &TicketState) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let key = customer_key(&state.customer_id);
        let fields = state_to_fields(state);
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);

        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .expire(&key, ttl)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to write record", e))?;

        debug!(
            customer_id = %state.customer_id,
            status = %state.status,
            ttl_secs = self.ttl_secs,
            "Stored ticket state"
        );
        Ok(())
    }

    async fn get(&self, customer_id: &str) -> Result<Option<TicketState>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(customer_key(customer_id))
            .await
            .map_err(|e| backend("Failed to read record", e))?;

        if fields.is_empty() {
            return Ok(None);
        }
        state_from_fields(customer_id, &fields).map(Some)
    }

    async fn delete(&self, customer_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(customer_key(customer_id))
            .await
            .map_err(|e| backend("Failed to delete record", e))?;
        Ok(())
    }

    async fn scan(&self, cursor: u64) -> Result<ScanPage, StoreError> {
        let mut conn = self.conn_manager.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(format!("{KEY_PREFIX}*"))
            .arg("COUNT")
            .arg(self.scan_batch)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("Failed to scan keys", e))?;

        let customer_ids = keys
            .into_iter()
            .filter_map(|key| match key.strip_prefix(KEY_PREFIX) {
                Some(id) => Some(id.to_string()),
                None => {
                    warn!(key = %key, "Scan returned a key outside the record prefix");
                    None
                }
            })
            .collect();

        Ok(ScanPage {
            customer_ids,
            next_cursor: (next != 0).then_some(next),
        })
    }

    async fn get_status(&self, customer_id: &str) -> Result<Option<TicketStatus>, StoreError> {
        let raw = self.get_field(customer_id, field::STATUS).await?;
        parse_status(customer_id, raw)
    }

    async fn get_billing_channel(&self, customer_id: &str) -> Result<Option<String>, StoreError> {
        self.get_field(customer_id, field::BILLING_CHANNEL).await
    }

    async fn get_source(&self, customer_id: &str) -> Result<Option<String>, StoreError> {
        self.get_field(customer_id, field::SOURCE).await
    }
}
