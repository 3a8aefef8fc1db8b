//! Console draft data access object
//!
//! Autosaved editor text, one row per console session.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::Arc;

#[derive(Clone)]
pub struct DraftStore {
    conn: Arc<Mutex<Connection>>,
}

impl DraftStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Insert or overwrite the draft for `session_id`
    pub fn save(&self, session_id: &str, content: &str) -> SqliteResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO console_drafts (session_id, content, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET content = ?2, updated_at = ?3",
            params![session_id, content, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> SqliteResult<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT content FROM console_drafts WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()
    }

    pub fn delete(&self, session_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM console_drafts WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(())
    }
}
