//! `agent_mcp_servers`, `agent_marketplaces`, `agent_plugins`, `agent_skills`
//! tables: the Extensions entity.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Store, StoreError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McpServerRow {
    pub agent_id: String,
    pub name: String,
    pub config: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceRow {
    pub agent_id: String,
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PluginRow {
    pub agent_id: String,
    pub name: String,
    pub disabled: bool,
    pub requires: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentSkillRow {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub content: String,
    pub requires: Vec<String>,
    pub files: Vec<String>,
}

impl Store {
    pub async fn upsert_mcp_server(&self, agent_id: &str, name: &str, config: &Value) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let name = name.to_string();
        let config_json = serde_json::to_string(config)?;
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO agent_mcp_servers (agent_id, name, config_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(agent_id, name) DO UPDATE SET config_json = excluded.config_json",
                params![agent_id, name, config_json],
            )?;
            Ok(())
        })
    }

    pub async fn remove_mcp_server(&self, agent_id: &str, name: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let name = name.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "DELETE FROM agent_mcp_servers WHERE agent_id = ?1 AND name = ?2",
                params![agent_id, name],
            )?;
            Ok(())
        })
    }

    pub async fn list_mcp_servers(&self, agent_id: &str) -> Result<Vec<McpServerRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT agent_id, name, config_json FROM agent_mcp_servers WHERE agent_id = ?1 ORDER BY name ASC",
            )?;
            let rows = stmt.query_map(params![agent_id], |row| {
                let config_json: String = row.get(2)?;
                Ok(McpServerRow {
                    agent_id: row.get(0)?,
                    name: row.get(1)?,
                    config: serde_json::from_str(&config_json).unwrap_or(Value::Null),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub async fn add_marketplace(&self, agent_id: &str, url: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let url = url.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT OR IGNORE INTO agent_marketplaces (agent_id, url) VALUES (?1, ?2)",
                params![agent_id, url],
            )?;
            Ok(())
        })
    }

    pub async fn list_marketplaces(&self, agent_id: &str) -> Result<Vec<MarketplaceRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT agent_id, url FROM agent_marketplaces WHERE agent_id = ?1 ORDER BY url ASC",
            )?;
            let rows = stmt.query_map(params![agent_id], |row| {
                Ok(MarketplaceRow {
                    agent_id: row.get(0)?,
                    url: row.get(1)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub async fn upsert_plugin(
        &self,
        agent_id: &str,
        name: &str,
        disabled: bool,
        requires: &[String],
    ) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let name = name.to_string();
        let requires_json = serde_json::to_string(requires)?;
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO agent_plugins (agent_id, name, disabled, requires_json) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(agent_id, name) DO UPDATE SET disabled = excluded.disabled, requires_json = excluded.requires_json",
                params![agent_id, name, disabled as i64, requires_json],
            )?;
            Ok(())
        })
    }

    pub async fn list_plugins(&self, agent_id: &str) -> Result<Vec<PluginRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT agent_id, name, disabled, requires_json FROM agent_plugins WHERE agent_id = ?1 ORDER BY name ASC",
            )?;
            let rows = stmt.query_map(params![agent_id], |row| {
                let disabled: i64 = row.get(2)?;
                let requires_json: String = row.get(3)?;
                Ok(PluginRow {
                    agent_id: row.get(0)?,
                    name: row.get(1)?,
                    disabled: disabled != 0,
                    requires: serde_json::from_str(&requires_json).unwrap_or_default(),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    pub async fn upsert_skill(
        &self,
        agent_id: &str,
        name: &str,
        description: &str,
        content: &str,
        requires: &[String],
        files: &[String],
    ) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let name = name.to_string();
        let description = description.to_string();
        let content = content.to_string();
        let requires_json = serde_json::to_string(requires)?;
        let files_json = serde_json::to_string(files)?;
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO agent_skills (agent_id, name, description, content, requires_json, files_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(agent_id, name) DO UPDATE SET
                    description = excluded.description, content = excluded.content,
                    requires_json = excluded.requires_json, files_json = excluded.files_json",
                params![agent_id, name, description, content, requires_json, files_json],
            )?;
            Ok(())
        })
    }

    pub async fn remove_skill(&self, agent_id: &str, name: &str) -> Result<(), StoreError> {
        let agent_id = agent_id.to_string();
        let name = name.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "DELETE FROM agent_skills WHERE agent_id = ?1 AND name = ?2",
                params![agent_id, name],
            )?;
            Ok(())
        })
    }

    pub async fn list_skills(&self, agent_id: &str) -> Result<Vec<AgentSkillRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT agent_id, name, description, content, requires_json, files_json
                 FROM agent_skills WHERE agent_id = ?1 ORDER BY name ASC",
            )?;
            let rows = stmt.query_map(params![agent_id], |row| {
                let requires_json: String = row.get(4)?;
                let files_json: String = row.get(5)?;
                Ok(AgentSkillRow {
                    agent_id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    content: row.get(3)?,
                    requires: serde_json::from_str(&requires_json).unwrap_or_default(),
                    files: serde_json::from_str(&files_json).unwrap_or_default(),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
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
    async fn skill_upsert_then_list_round_trips() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        store
            .upsert_skill("coder", "deploy", "deploys things", "run ./deploy.sh", &["bash".into()], &[])
            .await
            .unwrap();
        let got = store.list_skills("coder").await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "deploy");
        assert_eq!(got[0].requires, vec!["bash".to_string()]);
    }

    #[tokio::test]
    async fn plugin_upsert_is_idempotent_replace() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        store.upsert_plugin("coder", "linter", false, &[]).await.unwrap();
        store.upsert_plugin("coder", "linter", true, &["rustfmt".into()]).await.unwrap();
        let got = store.list_plugins("coder").await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].disabled);
    }

    #[tokio::test]
    async fn mcp_server_round_trips_config_json() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        let config = serde_json::json!({"command": "npx", "args": ["server"]});
        store.upsert_mcp_server("coder", "files", &config).await.unwrap();
        let got = store.list_mcp_servers("coder").await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].config, config);
    }
}
