//! `agents` table: the DB mirror of the YAML `AgentDefinition` registry.
//! The reloader replaces this table's contents on every confirmed
//! config change; nothing else writes to it.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{now_ms, Store, StoreError};

/// A persisted agent row. `env`, `allowed_tools` and `files` are stored as
/// JSON text columns since they're small, agent-scoped config blobs rather
/// than data queried relationally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentRow {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub model: Option<String>,
    pub image: Option<String>,
    pub workspace: String,
    pub env: HashMap<String, String>,
    pub allowed_tools: Vec<String>,
    pub files: Vec<AgentFileMount>,
    pub nix_enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentFileMount {
    pub secret_name: String,
    pub target_path: String,
    #[serde(default = "default_mode")]
    pub mode: u32,
}

fn default_mode() -> u32 {
    0o600
}

impl Store {
    /// Inserts or replaces an agent row (reload upsert).
    pub async fn upsert_agent(&self, agent: &AgentRow) -> Result<(), StoreError> {
        let env_json = serde_json::to_string(&agent.env)?;
        let tools_json = serde_json::to_string(&agent.allowed_tools)?;
        let files_json = serde_json::to_string(&agent.files)?;
        let agent = agent.clone();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                r#"INSERT INTO agents (id, display_name, description, model, image, workspace,
                    env_json, allowed_tools_json, files_json, nix_enabled, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                   ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    description = excluded.description,
                    model = excluded.model,
                    image = excluded.image,
                    workspace = excluded.workspace,
                    env_json = excluded.env_json,
                    allowed_tools_json = excluded.allowed_tools_json,
                    files_json = excluded.files_json,
                    nix_enabled = excluded.nix_enabled,
                    updated_at = excluded.updated_at"#,
                params![
                    agent.id,
                    agent.display_name,
                    agent.description,
                    agent.model,
                    agent.image,
                    agent.workspace,
                    env_json,
                    tools_json,
                    files_json,
                    agent.nix_enabled as i64,
                    now_ms(),
                ],
            )?;
            Ok(())
        })
    }

    /// Removes an agent row (config removal). Membership tables cascade.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute("DELETE FROM agents WHERE id = ?1", params![agent_id])?;
            Ok(())
        })
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT id, display_name, description, model, image, workspace, env_json,
                    allowed_tools_json, files_json, nix_enabled FROM agents WHERE id = ?1",
                params![agent_id],
                row_to_agent,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRow>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT id, display_name, description, model, image, workspace, env_json,
                    allowed_tools_json, files_json, nix_enabled FROM agents ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], row_to_agent)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    let env_json: String = row.get(6)?;
    let tools_json: String = row.get(7)?;
    let files_json: String = row.get(8)?;
    let nix_enabled: i64 = row.get(9)?;
    Ok(AgentRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        description: row.get(2)?,
        model: row.get(3)?,
        image: row.get(4)?,
        workspace: row.get(5)?,
        env: serde_json::from_str(&env_json).unwrap_or_default(),
        allowed_tools: serde_json::from_str(&tools_json).unwrap_or_default(),
        files: serde_json::from_str(&files_json).unwrap_or_default(),
        nix_enabled: nix_enabled != 0,
    })
}
