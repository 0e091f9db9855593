//! `scheduled_tasks` table.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{now_ms, Store, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "paused" => TaskStatus::Paused,
            "completed" => TaskStatus::Completed,
            _ => TaskStatus::Active,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastRunStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTaskRow {
    pub id: i64,
    pub agent_id: String,
    pub name: String,
    /// Normalized schedule document (JSON — see `praktor_core::scheduler::schedule`).
    pub schedule_json: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub next_run_at: Option<i64>,
    pub last_run_at: Option<i64>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub created_at: i64,
}

impl Store {
    pub async fn create_task(
        &self,
        agent_id: &str,
        name: &str,
        schedule_json: &str,
        prompt: &str,
        next_run_at: Option<i64>,
    ) -> Result<ScheduledTaskRow, StoreError> {
        let agent_id = agent_id.to_string();
        let name = name.to_string();
        let schedule_json = schedule_json.to_string();
        let prompt = prompt.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let created_at = now_ms();
            conn.execute(
                "INSERT INTO scheduled_tasks (agent_id, name, schedule_json, prompt, status, next_run_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6)",
                params![agent_id, name, schedule_json, prompt, next_run_at, created_at],
            )?;
            let id = conn.last_insert_rowid();
            Ok(ScheduledTaskRow {
                id,
                agent_id,
                name,
                schedule_json,
                prompt,
                status: TaskStatus::Active,
                next_run_at,
                last_run_at: None,
                last_status: None,
                last_error: None,
                created_at,
            })
        })
    }

    pub async fn get_task(&self, id: i64) -> Result<Option<ScheduledTaskRow>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT id, agent_id, name, schedule_json, prompt, status, next_run_at,
                    last_run_at, last_status, last_error, created_at FROM scheduled_tasks WHERE id = ?1",
                params![id],
                row_to_task,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub async fn list_tasks_for_agent(&self, agent_id: &str) -> Result<Vec<ScheduledTaskRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, name, schedule_json, prompt, status, next_run_at,
                    last_run_at, last_status, last_error, created_at FROM scheduled_tasks
                 WHERE agent_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![agent_id], row_to_task)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Tasks eligible to fire: `status = active AND next_run_at <= now`.
    pub async fn list_due_tasks(&self, now: i64) -> Result<Vec<ScheduledTaskRow>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, name, schedule_json, prompt, status, next_run_at,
                    last_run_at, last_status, last_error, created_at FROM scheduled_tasks
                 WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at <= ?1
                 ORDER BY next_run_at ASC",
            )?;
            let rows = stmt.query_map(params![now], row_to_task)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub async fn update_task_definition(
        &self,
        id: i64,
        name: Option<&str>,
        schedule_json: Option<&str>,
        prompt: Option<&str>,
        next_run_at: Option<Option<i64>>,
    ) -> Result<(), StoreError> {
        let existing = self.get_task(id).await?.ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        let name = name.unwrap_or(&existing.name).to_string();
        let schedule_json = schedule_json.unwrap_or(&existing.schedule_json).to_string();
        let prompt = prompt.unwrap_or(&existing.prompt).to_string();
        let next_run_at = next_run_at.unwrap_or(existing.next_run_at);
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "UPDATE scheduled_tasks SET name = ?1, schedule_json = ?2, prompt = ?3, next_run_at = ?4 WHERE id = ?5",
                params![name, schedule_json, prompt, next_run_at, id],
            )?;
            Ok(())
        })
    }

    /// Records a completed run: `last_run_at`, `last_status`, `last_error`,
    /// the next `next_run_at`, and auto-pause when it's null.
    pub async fn record_task_run(
        &self,
        id: i64,
        ran_at: i64,
        last_status: LastRunStatus,
        last_error: Option<&str>,
        next_run_at: Option<i64>,
    ) -> Result<(), StoreError> {
        let last_status_str = match last_status {
            LastRunStatus::Success => "success",
            LastRunStatus::Error => "error",
        };
        let new_status = if next_run_at.is_none() {
            TaskStatus::Paused.as_str()
        } else {
            TaskStatus::Active.as_str()
        };
        let last_error = last_error.map(|s| s.to_string());
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "UPDATE scheduled_tasks SET last_run_at = ?1, last_status = ?2, last_error = ?3,
                    next_run_at = ?4, status = ?5 WHERE id = ?6",
                params![ran_at, last_status_str, last_error, next_run_at, new_status, id],
            )?;
            Ok(())
        })
    }

    pub async fn delete_task(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledTaskRow> {
    let status: String = row.get(5)?;
    Ok(ScheduledTaskRow {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        name: row.get(2)?,
        schedule_json: row.get(3)?,
        prompt: row.get(4)?,
        status: TaskStatus::from_str(&status),
        next_run_at: row.get(6)?,
        last_run_at: row.get(7)?,
        last_status: row.get(8)?,
        last_error: row.get(9)?,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentRow;
    use std::collections::HashMap;

    async fn seed_agent(store: &Store, id: &str) {
        store
            .upsert_agent(&AgentRow {
                id: id.to_string(),
                display_name: id.to_string(),
                description: String::new(),
                model: None,
                image: None,
                workspace: format!("{id}-ws"),
                env: HashMap::new(),
                allowed_tools: vec![],
                files: vec![],
                nix_enabled: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn due_tasks_respect_status_and_next_run_at() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        let due = store.create_task("coder", "digest", "{}", "p", Some(100)).await.unwrap();
        store.create_task("coder", "future", "{}", "p", Some(100_000)).await.unwrap();
        let got = store.list_due_tasks(500).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, due.id);
    }

    #[tokio::test]
    async fn record_run_with_null_next_auto_pauses() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        let task = store.create_task("coder", "oneshot", "{}", "ping", Some(100)).await.unwrap();
        store
            .record_task_run(task.id, 200, LastRunStatus::Success, None, None)
            .await
            .unwrap();
        let got = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(got.status, TaskStatus::Paused);
        assert_eq!(got.next_run_at, None);
        assert_eq!(got.last_run_at, Some(200));
    }

    #[tokio::test]
    async fn record_run_with_next_stays_active() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        let task = store.create_task("coder", "daily", "{}", "digest", Some(100)).await.unwrap();
        store
            .record_task_run(task.id, 100, LastRunStatus::Success, None, Some(86_500))
            .await
            .unwrap();
        let got = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(got.status, TaskStatus::Active);
        assert_eq!(got.next_run_at, Some(86_500));
    }
}
