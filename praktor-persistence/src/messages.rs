//! `messages` table: append-only conversation log.

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::{now_ms, Store, StoreError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub agent_id: String,
    pub sender: String,
    pub content: String,
    pub created_at: i64,
}

impl Store {
    /// Appends a message and returns its assigned id. `created_at` is
    /// monotonic within an agent because of `AUTOINCREMENT` row id ordering
    /// combined with wall-clock time; two inserts landing on the same
    /// millisecond still get distinct, increasing ids.
    pub async fn insert_message(
        &self,
        agent_id: &str,
        sender: &str,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        let agent_id = agent_id.to_string();
        let sender = sender.to_string();
        let content = content.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let created_at = now_ms();
            conn.execute(
                "INSERT INTO messages (agent_id, sender, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![agent_id, sender, content, created_at],
            )?;
            let id = conn.last_insert_rowid();
            Ok(MessageRow {
                id,
                agent_id,
                sender,
                content,
                created_at,
            })
        })
    }

    pub async fn list_messages(&self, agent_id: &str, limit: i64) -> Result<Vec<MessageRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, sender, content, created_at FROM messages
                 WHERE agent_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![agent_id, limit], |row| {
                Ok(MessageRow {
                    id: row.get(0)?,
                    agent_id: row.get(1)?,
                    sender: row.get(2)?,
                    content: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}
