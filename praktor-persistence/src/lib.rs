//! # praktor-persistence
//!
//! SQLite-backed persistence adapter: agents mirrored from YAML,
//! append-only messages, scheduled tasks, an observability mirror of running
//! sessions, swarm runs, the secret vault's ciphertext table, and per-agent
//! extension configuration. One [`Store`] owns one connection, guarded by a
//! mutex and driven through `tokio::task::block_in_place`.

mod agents;
mod error;
mod extensions;
mod messages;
mod schema;
mod secrets;
mod sessions;
mod swarms;
mod tasks;

pub use agents::AgentRow;
pub use error::StoreError;
pub use extensions::{AgentSkillRow, McpServerRow, PluginRow};
pub use messages::MessageRow;
pub use secrets::{SecretKind, SecretRow};
pub use sessions::SessionRow;
pub use swarms::{SwarmEdge, SwarmNode, SwarmResult, SwarmRunRow, SwarmStatus};
pub use tasks::{LastRunStatus, ScheduledTaskRow, TaskStatus};

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rusqlite::Connection;

/// SQLite-backed persistence adapter. Owns one connection; every public
/// method is async and internally hops to a blocking thread. Cheaply
/// `Clone`able (shared connection) so every component that needs persistence
/// can hold its own handle.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database at `path` and runs migrations.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Storage("connection mutex poisoned".into()))
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
