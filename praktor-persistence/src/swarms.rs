//! `swarm_runs` table.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::{now_ms, Store, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Running,
    Completed,
    Failed,
}

impl SwarmStatus {
    fn as_str(self) -> &'static str {
        match self {
            SwarmStatus::Running => "running",
            SwarmStatus::Completed => "completed",
            SwarmStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "completed" => SwarmStatus::Completed,
            "failed" => SwarmStatus::Failed,
            _ => SwarmStatus::Running,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SwarmNode {
    pub agent_id: String,
    pub role: String,
    pub prompt: String,
    pub workspace: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SwarmEdge {
    pub from_role: String,
    pub to_role: String,
    pub bidirectional: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SwarmResult {
    pub role: String,
    pub output: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SwarmRunRow {
    pub id: String,
    pub name: String,
    pub task: String,
    pub lead_agent: String,
    pub nodes: Vec<SwarmNode>,
    pub edges: Vec<SwarmEdge>,
    pub status: SwarmStatus,
    pub results: Vec<SwarmResult>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl Store {
    pub async fn create_swarm_run(
        &self,
        id: &str,
        name: &str,
        task: &str,
        lead_agent: &str,
        nodes: &[SwarmNode],
        edges: &[SwarmEdge],
    ) -> Result<SwarmRunRow, StoreError> {
        let id = id.to_string();
        let name = name.to_string();
        let task = task.to_string();
        let lead_agent = lead_agent.to_string();
        let nodes_json = serde_json::to_string(nodes)?;
        let edges_json = serde_json::to_string(edges)?;
        let nodes = nodes.to_vec();
        let edges = edges.to_vec();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let started_at = now_ms();
            conn.execute(
                "INSERT INTO swarm_runs (id, name, task, lead_agent, nodes_json, edges_json, status, results_json, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'running', '[]', ?7)",
                params![id, name, task, lead_agent, nodes_json, edges_json, started_at],
            )?;
            Ok(SwarmRunRow {
                id,
                name,
                task,
                lead_agent,
                nodes,
                edges,
                status: SwarmStatus::Running,
                results: vec![],
                started_at,
                completed_at: None,
            })
        })
    }

    pub async fn update_swarm_run(
        &self,
        id: &str,
        status: SwarmStatus,
        results: &[SwarmResult],
        completed: bool,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let results_json = serde_json::to_string(results)?;
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            let completed_at = if completed { Some(now_ms()) } else { None };
            conn.execute(
                "UPDATE swarm_runs SET status = ?1, results_json = ?2, completed_at = ?3 WHERE id = ?4",
                params![status.as_str(), results_json, completed_at, id],
            )?;
            Ok(())
        })
    }

    pub async fn get_swarm_run(&self, id: &str) -> Result<Option<SwarmRunRow>, StoreError> {
        let id = id.to_string();
        let conn = self.conn.clone();
        tokio::task::block_in_place(move || {
            let conn = conn.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT id, name, task, lead_agent, nodes_json, edges_json, status, results_json, started_at, completed_at
                 FROM swarm_runs WHERE id = ?1",
                params![id],
                row_to_swarm,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }
}

fn row_to_swarm(row: &rusqlite::Row<'_>) -> rusqlite::Result<SwarmRunRow> {
    let nodes_json: String = row.get(4)?;
    let edges_json: String = row.get(5)?;
    let status: String = row.get(6)?;
    let results_json: String = row.get(7)?;
    Ok(SwarmRunRow {
        id: row.get(0)?,
        name: row.get(1)?,
        task: row.get(2)?,
        lead_agent: row.get(3)?,
        nodes: serde_json::from_str(&nodes_json).unwrap_or_default(),
        edges: serde_json::from_str(&edges_json).unwrap_or_default(),
        status: SwarmStatus::from_str(&status),
        results: serde_json::from_str(&results_json).unwrap_or_default(),
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_complete_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let nodes = vec![SwarmNode {
            agent_id: "researcher".into(),
            role: "researcher".into(),
            prompt: "find facts".into(),
            workspace: None,
        }];
        let run = store
            .create_swarm_run("s1", "blog", "write a post", "reviewer", &nodes, &[])
            .await
            .unwrap();
        assert_eq!(run.status, SwarmStatus::Running);
        store
            .update_swarm_run(
                "s1",
                SwarmStatus::Completed,
                &[SwarmResult {
                    role: "researcher".into(),
                    output: "facts".into(),
                }],
                true,
            )
            .await
            .unwrap();
        let got = store.get_swarm_run("s1").await.unwrap().unwrap();
        assert_eq!(got.status, SwarmStatus::Completed);
        assert!(got.completed_at.is_some());
        assert_eq!(got.results.len(), 1);
    }
}
