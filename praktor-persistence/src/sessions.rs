//! `agent_sessions` table: a best-effort observability mirror of the
//! orchestrator's in-memory session tracker, which remains the authority.
//! Write-through rather than authoritative so an external viewer can see
//! which containers are running without talking to the gateway process.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{now_ms, Store, StoreError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRow {
    pub agent_id: String,
    pub container_id: String,
    pub status: String,
    pub started_at: i64,
    pub last_active: i64,
}

impl Store {
    pub async fn upsert_session(&self, agent_id: &str, container_id: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let container_id = container_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let now = now_ms();
            conn.execute(
                "INSERT INTO agent_sessions (agent_id, container_id, status, started_at, last_active)
                 VALUES (?1, ?2, 'running', ?3, ?3)
                 ON CONFLICT(agent_id) DO UPDATE SET
                    container_id = excluded.container_id, status = 'running',
                    started_at = excluded.started_at, last_active = excluded.last_active",
                params![agent_id, container_id, now],
            )?;
            Ok(())
        })
    }

    pub async fn touch_session(&self, agent_id: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "UPDATE agent_sessions SET last_active = ?1 WHERE agent_id = ?2",
                params![now_ms(), agent_id],
            )?;
            Ok(())
        })
    }

    pub async fn delete_session(&self, agent_id: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute("DELETE FROM agent_sessions WHERE agent_id = ?1", params![agent_id])?;
            Ok(())
        })
    }

    pub async fn get_session(&self, agent_id: &str) -> Result<Option<SessionRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT agent_id, container_id, status, started_at, last_active FROM agent_sessions WHERE agent_id = ?1",
                params![agent_id],
                |row| {
                    Ok(SessionRow {
                        agent_id: row.get(0)?,
                        container_id: row.get(1)?,
                        status: row.get(2)?,
                        started_at: row.get(3)?,
                        last_active: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRow>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT agent_id, container_id, status, started_at, last_active FROM agent_sessions",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(SessionRow {
                    agent_id: row.get(0)?,
                    container_id: row.get(1)?,
                    status: row.get(2)?,
                    started_at: row.get(3)?,
                    last_active: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}
