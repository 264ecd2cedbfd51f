//! SQLite-backed state store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{parse_status, ScanPage, StateStore, StoreError};
use crate::ticket::{Attachment, EventTime, TicketState, TicketStatus};

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

const SELECT_COLUMNS: &str = "customer_id, source, billing_channel, operator_channel, description, \
     start_epoch, start_display, classification, file_name, file_payload, operator_ticket_id, \
     status, created_at, modified_at";

/// SQLite-backed [`StateStore`].
///
/// Expiry is emulated with an `expires_at` column: expired rows are invisible
/// to reads and purged on every write.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
    ttl_secs: i64,
    scan_batch: usize,
}

impl SqliteStateStore {
    /// Open (or create) a database file.
    pub fn new(path: &Path, ttl_secs: u64, scan_batch: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn, ttl_secs, scan_batch)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory(ttl_secs: u64, scan_batch: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn, ttl_secs, scan_batch)
    }

    fn with_connection(conn: Connection, ttl_secs: u64, scan_batch: usize) -> Result<Self, StoreError> {
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            scan_batch: scan_batch.max(1),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ticket_states (
                customer_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                billing_channel TEXT NOT NULL,
                operator_channel TEXT NOT NULL,
                description TEXT NOT NULL,
                start_epoch INTEGER NOT NULL DEFAULT 0,
                start_display TEXT NOT NULL,
                classification TEXT NOT NULL,
                file_name TEXT,
                file_payload TEXT,
                operator_ticket_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ticket_states_expires_at ON ticket_states(expires_at);
            "#,
        )
        .map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))
    }

    /// Delete every record whose retention window ended at or before `now`.
    fn purge_expired(conn: &Connection, now: i64) -> Result<usize, StoreError> {
        conn.execute("DELETE FROM ticket_states WHERE expires_at <= ?", params![now])
            .map_err(db_err)
    }

    fn read_column(&self, customer_id: &str, column: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {column} FROM ticket_states WHERE customer_id = ? AND expires_at > ?"
        );
        conn.query_row(&sql, params![customer_id, Utc::now().timestamp()], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_err)
    }

    fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<(TicketState, String)> {
        let file_name: Option<String> = row.get(8)?;
        let file_payload: Option<String> = row.get(9)?;
        let status: String = row.get(11)?;

        let state = TicketState {
            customer_id: row.get(0)?,
            source: row.get(1)?,
            billing_channel: row.get(2)?,
            operator_channel: row.get(3)?,
            description: row.get(4)?,
            start: EventTime::new(row.get(5)?, row.get::<_, String>(6)?),
            classification: row.get(7)?,
            attachment: Attachment::from_parts(
                file_name.unwrap_or_default(),
                file_payload.unwrap_or_default(),
            ),
            operator_ticket_id: row.get(10)?,
            // Placeholder until the raw status text is parsed by the caller.
            status: TicketStatus::Creating,
            created_at: row.get(12)?,
            modified_at: row.get(13)?,
        };
        Ok((state, status))
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn put(&self, state: &TicketState) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let conn = self.lock()?;

        let purged = Self::purge_expired(&conn, now)?;
        if purged > 0 {
            debug!(purged, "Purged expired ticket states");
        }

        let (file_name, file_payload) = match &state.attachment {
            Some(a) => (Some(a.name.as_str()), Some(a.payload.as_str())),
            None => (None, None),
        };

        conn.execute(
            "INSERT INTO ticket_states (customer_id, source, billing_channel, operator_channel, description, start_epoch, start_display, classification, file_name, file_payload, operator_ticket_id, status, created_at, modified_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(customer_id) DO UPDATE SET
                source = excluded.source,
                billing_channel = excluded.billing_channel,
                operator_channel = excluded.operator_channel,
                description = excluded.description,
                start_epoch = excluded.start_epoch,
                start_display = excluded.start_display,
                classification = excluded.classification,
                file_name = excluded.file_name,
                file_payload = excluded.file_payload,
                operator_ticket_id = excluded.operator_ticket_id,
                status = excluded.status,
                created_at = excluded.created_at,
                modified_at = excluded.modified_at,
                expires_at = excluded.expires_at",
            params![
                state.customer_id,
                state.source,
                state.billing_channel,
                state.operator_channel,
                state.description,
                state.start.epoch,
                state.start.display,
                state.classification,
                file_name,
                file_payload,
                state.operator_ticket_id,
                state.status.as_str(),
                state.created_at,
                state.modified_at,
                now.saturating_add(self.ttl_secs),
            ],
        )
        .map_err(db_err)?;

        debug!(
            customer_id = %state.customer_id,
            status = %state.status,
            "Stored ticket state"
        );
        Ok(())
    }

    async fn get(&self, customer_id: &str) -> Result<Option<TicketState>, StoreError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM ticket_states WHERE customer_id = ? AND expires_at > ?"
                ),
                params![customer_id, Utc::now().timestamp()],
                Self::row_to_state,
            )
            .optional()
            .map_err(db_err)?
        };

        let Some((mut state, raw_status)) = row else {
            return Ok(None);
        };
        state.status = parse_status(customer_id, Some(raw_status))?.unwrap_or(state.status);
        Ok(Some(state))
    }

    async fn delete(&self, customer_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM ticket_states WHERE customer_id = ?",
            params![customer_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn scan(&self, cursor: u64) -> Result<ScanPage, StoreError> {
        let conn = self.lock()?;
        let after = i64::try_from(cursor).unwrap_or(i64::MAX);
        let limit = i64::try_from(self.scan_batch).unwrap_or(i64::MAX);

        let mut stmt = conn
            .prepare(
                "SELECT rowid, customer_id FROM ticket_states
                 WHERE rowid > ? AND expires_at > ?
                 ORDER BY rowid LIMIT ?",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![after, Utc::now().timestamp(), limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let next_cursor = if rows.len() == self.scan_batch {
            rows.last().and_then(|(rowid, _)| u64::try_from(*rowid).ok())
        } else {
            None
        };

        Ok(ScanPage {
            customer_ids: rows.into_iter().map(|(_, id)| id).collect(),
            next_cursor,
        })
    }

    async fn get_status(&self, customer_id: &str) -> Result<Option<TicketStatus>, StoreError> {
        let raw = self.read_column(customer_id, "status")?;
        parse_status(customer_id, raw)
    }

    async fn get_billing_channel(&self, customer_id: &str) -> Result<Option<String>, StoreError> {
        self.read_column(customer_id, "billing_channel")
    }

    async fn get_source(&self, customer_id: &str) -> Result<Option<String>, StoreError> {
        self.read_column(customer_id, "source")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(customer_id: &str, status: TicketStatus) -> TicketState {
        TicketState {
            source: "sberapi".to_string(),
            customer_id: customer_id.to_string(),
            billing_channel: "RIAS_12".to_string(),
            operator_channel: "ABCD12-x".to_string(),
            description: "no link".to_string(),
            start: EventTime::new(1_700_000_000, "14.11.2023"),
            classification: "network".to_string(),
            attachment: None,
            operator_ticket_id: String::new(),
            status,
            created_at: 1_700_000_000,
            modified_at: 1_700_000_000,
        }
    }

    fn store() -> SqliteStateStore {
        SqliteStateStore::in_memory(3600, 2).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = store();
        let mut s = state("C100", TicketStatus::Creating);
        s.attachment = Some(Attachment {
            name: "a.txt".to_string(),
            payload: "YQ==".to_string(),
        });
        store.put(&s).await.unwrap();

        assert_eq!(store.get("C100").await.unwrap(), Some(s));
        assert_eq!(store.get("C404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_is_last_write_wins() {
        let store = store();
        store.put(&state("C1", TicketStatus::Creating)).await.unwrap();

        let mut updated = state("C1", TicketStatus::Working);
        updated.operator_ticket_id = "ERTH-9".to_string();
        store.put(&updated).await.unwrap();

        let loaded = store.get("C1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TicketStatus::Working);
        assert_eq!(loaded.operator_ticket_id, "ERTH-9");
    }

    #[tokio::test]
    async fn test_projections() {
        let store = store();
        store.put(&state("C1", TicketStatus::Waiting)).await.unwrap();

        assert_eq!(
            store.get_status("C1").await.unwrap(),
            Some(TicketStatus::Waiting)
        );
        assert_eq!(
            store.get_billing_channel("C1").await.unwrap().as_deref(),
            Some("RIAS_12")
        );
        assert_eq!(store.get_source("C1").await.unwrap().as_deref(), Some("sberapi"));
        assert_eq!(store.get_status("C2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = store();
        store.put(&state("C1", TicketStatus::Closed)).await.unwrap();
        store.delete("C1").await.unwrap();
        store.delete("C1").await.unwrap();
        assert!(store.get("C1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_pages_through_all_records() {
        let store = store();
        for id in ["C1", "C2", "C3", "C4", "C5"] {
            store.put(&state(id, TicketStatus::Creating)).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = 0;
        let mut pages = 0;
        loop {
            let page = store.scan(cursor).await.unwrap();
            pages += 1;
            seen.extend(page.customer_ids);
            match page.next_cursor {
                Some(next) => cursor = next,
                None => break,
            }
        }

        seen.sort();
        assert_eq!(seen, vec!["C1", "C2", "C3", "C4", "C5"]);
        assert_eq!(pages, 3);
    }

    fn row_count(store: &SqliteStateStore) -> i64 {
        store
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM ticket_states", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_expired_records_are_purged_on_write() {
        // Zero retention: every row is expired as soon as it is written.
        let store = SqliteStateStore::in_memory(0, 10).unwrap();
        store.put(&state("C1", TicketStatus::Creating)).await.unwrap();
        assert!(store.get("C1").await.unwrap().is_none());
        assert_eq!(row_count(&store), 1);

        store.put(&state("C2", TicketStatus::Creating)).await.unwrap();
        let remaining: String = store
            .lock()
            .unwrap()
            .query_row("SELECT customer_id FROM ticket_states", [], |row| row.get(0))
            .unwrap();
        assert_eq!(row_count(&store), 1);
        assert_eq!(remaining, "C2");
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let store = SqliteStateStore::new(&path, 3600, 10).unwrap();
            store.put(&state("C1", TicketStatus::Working)).await.unwrap();
        }

        let reopened = SqliteStateStore::new(&path, 3600, 10).unwrap();
        assert_eq!(
            reopened.get_status("C1").await.unwrap(),
            Some(TicketStatus::Working)
        );
    }
}
