//! `secrets` + `agent_secrets` tables: ciphertext/nonce at rest.
//! This module never sees plaintext — encryption and decryption are
//! `praktor-core`'s `vault` module's job; this is just storage.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{now_ms, Store, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    String,
    File,
}

impl SecretKind {
    fn as_str(self) -> &'static str {
        match self {
            SecretKind::String => "string",
            SecretKind::File => "file",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "file" => SecretKind::File,
            _ => SecretKind::String,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecretRow {
    pub id: String,
    pub description: String,
    pub kind: SecretKind,
    pub filename: Option<String>,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub global: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_secret(
        &self,
        id: &str,
        description: &str,
        kind: SecretKind,
        filename: Option<&str>,
        ciphertext: &[u8],
        nonce: &[u8],
        global: bool,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let description = description.to_string();
        let filename = filename.map(|s| s.to_string());
        let ciphertext = ciphertext.to_vec();
        let nonce = nonce.to_vec();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let now = now_ms();
            conn.execute(
                "INSERT INTO secrets (id, description, kind, filename, ciphertext, nonce, global, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    description = excluded.description, kind = excluded.kind,
                    filename = excluded.filename, ciphertext = excluded.ciphertext,
                    nonce = excluded.nonce, global = excluded.global, updated_at = excluded.updated_at",
                params![id, description, kind.as_str(), filename, ciphertext, nonce, global as i64, now],
            )?;
            Ok(())
        })
    }

    pub async fn get_secret(&self, id: &str) -> Result<Option<SecretRow>, StoreError> {
        let id = id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT id, description, kind, filename, ciphertext, nonce, global, created_at, updated_at
                 FROM secrets WHERE id = ?1",
                params![id],
                row_to_secret,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub async fn list_secrets(&self) -> Result<Vec<SecretRow>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT id, description, kind, filename, ciphertext, nonce, global, created_at, updated_at
                 FROM secrets ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], row_to_secret)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }

    /// Flips the `global` flag in place, without touching ciphertext (the
    /// `vault global <name> --enable|--disable` CLI subcommand).
    pub async fn set_secret_global(&self, id: &str, global: bool) -> Result<(), StoreError> {
        let id = id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let now = now_ms();
            let changed = conn.execute(
                "UPDATE secrets SET global = ?1, updated_at = ?2 WHERE id = ?3",
                params![global as i64, now, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }

    pub async fn delete_secret(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute("DELETE FROM secrets WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    pub async fn assign_secret(&self, secret_id: &str, agent_id: &str) -> Result<(), StoreError> {
        let secret_id = secret_id.to_string();
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT OR IGNORE INTO agent_secrets (agent_id, secret_id) VALUES (?1, ?2)",
                params![agent_id, secret_id],
            )?;
            Ok(())
        })
    }

    pub async fn unassign_secret(&self, secret_id: &str, agent_id: &str) -> Result<(), StoreError> {
        let secret_id = secret_id.to_string();
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "DELETE FROM agent_secrets WHERE agent_id = ?1 AND secret_id = ?2",
                params![agent_id, secret_id],
            )?;
            Ok(())
        })
    }

    /// Secrets accessible to `agent_id`: globally-enabled secrets plus any
    /// explicitly assigned via `agent_secrets`.
    pub async fn secrets_for_agent(&self, agent_id: &str) -> Result<Vec<SecretRow>, StoreError> {
        let agent_id = agent_id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let mut stmt = conn.prepare(
                "SELECT s.id, s.description, s.kind, s.filename, s.ciphertext, s.nonce, s.global, s.created_at, s.updated_at
                 FROM secrets s
                 LEFT JOIN agent_secrets a ON a.secret_id = s.id AND a.agent_id = ?1
                 WHERE s.global = 1 OR a.agent_id IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![agent_id], row_to_secret)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
        })
    }
}

fn row_to_secret(row: &rusqlite::Row<'_>) -> rusqlite::Result<SecretRow> {
    let kind: String = row.get(2)?;
    let global: i64 = row.get(6)?;
    Ok(SecretRow {
        id: row.get(0)?,
        description: row.get(1)?,
        kind: SecretKind::from_str(&kind),
        filename: row.get(3)?,
        ciphertext: row.get(4)?,
        nonce: row.get(5)?,
        global: global != 0,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
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
    async fn secrets_for_agent_includes_global_and_assigned() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        store
            .upsert_secret("global-one", "", SecretKind::String, None, b"ct", b"n", true)
            .await
            .unwrap();
        store
            .upsert_secret("scoped-one", "", SecretKind::String, None, b"ct2", b"n2", false)
            .await
            .unwrap();
        store.assign_secret("scoped-one", "coder").await.unwrap();

        let got = store.secrets_for_agent("coder").await.unwrap();
        let ids: Vec<_> = got.iter().map(|s| s.id.clone()).collect();
        assert!(ids.contains(&"global-one".to_string()));
        assert!(ids.contains(&"scoped-one".to_string()));
    }

    #[tokio::test]
    async fn unassigned_scoped_secret_not_visible() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        store
            .upsert_secret("scoped-two", "", SecretKind::String, None, b"ct", b"n", false)
            .await
            .unwrap();
        let got = store.secrets_for_agent("coder").await.unwrap();
        assert!(got.is_empty());
    }
}
