//! Scheduler: due-task polling, schedule evaluation, one-shot
//! auto-pause.

mod error;
mod schedule;

pub use error::ScheduleError;
pub use schedule::{normalize, Schedule};

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tracing::{info, warn};

use praktor_persistence::{LastRunStatus, Store};

/// Sentinel for "no main chat configured" in the atomic main-chat-id slot
/// (`i64` has no niche to spare for `Option`, so `0` doubles as absent —
/// chat ids are never `0` in practice).
const NO_MAIN_CHAT: i64 = 0;

/// Dispatches a scheduler-originated message to the orchestrator. The
/// orchestrator implements this; the scheduler only depends on the trait
/// to avoid a dependency cycle (mirrors [`crate::router::RouteQuerier`]).
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn handle_message(
        &self,
        agent_id: &str,
        text: &str,
        meta: HashMap<String, Value>,
    ) -> Result<(), String>;
}

pub struct Scheduler {
    store: Store,
    dispatcher: Arc<dyn TaskDispatcher>,
    main_chat_id: AtomicI64,
    poll_interval_ms: AtomicU64,
}

impl Scheduler {
    pub fn new(
        store: Store,
        dispatcher: Arc<dyn TaskDispatcher>,
        main_chat_id: Option<i64>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            main_chat_id: AtomicI64::new(main_chat_id.unwrap_or(NO_MAIN_CHAT)),
            poll_interval_ms: AtomicU64::new(poll_interval.as_millis() as u64),
        }
    }

    /// Live-updates the chat that un-scoped scheduled tasks report to
    /// (a live-apply config field — no restart needed).
    pub fn set_main_chat_id(&self, main_chat_id: Option<i64>) {
        self.main_chat_id
            .store(main_chat_id.unwrap_or(NO_MAIN_CHAT), Ordering::SeqCst);
    }

    fn main_chat_id(&self) -> Option<i64> {
        match self.main_chat_id.load(Ordering::SeqCst) {
            NO_MAIN_CHAT => None,
            id => Some(id),
        }
    }

    /// Live-updates the poll cadence (another live-apply config field).
    /// Takes effect on the next tick of [`Self::run`]'s loop.
    pub fn set_poll_interval(&self, poll_interval: Duration) {
        self.poll_interval_ms
            .store(poll_interval.as_millis() as u64, Ordering::SeqCst);
    }

    /// Runs the poll loop forever, re-reading the configured poll interval
    /// every cycle, until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            let interval = Duration::from_millis(self.poll_interval_ms.load(Ordering::SeqCst));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.poll_once().await;
                }
                _ = &mut shutdown => {
                    info!("scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// One poll cycle: fires every due task. Exposed
    /// separately from [`Self::run`] so tests can drive it deterministically.
    pub async fn poll_once(&self) {
        let now = Local::now();
        let due = match self.store.list_due_tasks(now.timestamp_millis()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "failed to query due tasks");
                return;
            }
        };

        for task in due {
            let mut meta = HashMap::new();
            meta.insert("sender".to_string(), Value::String("scheduler".to_string()));
            meta.insert("task_id".to_string(), Value::from(task.id));
            if let Some(chat_id) = self.main_chat_id() {
                meta.insert("chat_id".to_string(), Value::from(chat_id));
            }

            let dispatch_result = self
                .dispatcher
                .handle_message(&task.agent_id, &task.prompt, meta)
                .await;

            let schedule = match Schedule::from_json(&task.schedule_json) {
                Ok(s) => s,
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "task has unparsable stored schedule");
                    continue;
                }
            };
            let next_run_at = schedule.next_after(now).map(|dt| dt.timestamp_millis());

            let (last_status, last_error) = match dispatch_result {
                Ok(()) => (LastRunStatus::Success, None),
                Err(e) => (LastRunStatus::Error, Some(e)),
            };

            if let Err(e) = self
                .store
                .record_task_run(
                    task.id,
                    now.timestamp_millis(),
                    last_status,
                    last_error.as_deref(),
                    next_run_at,
                )
                .await
            {
                warn!(task_id = task.id, error = %e, "failed to record task run");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingDispatcher {
        calls: Mutex<Vec<(String, String)>>,
        fail_count: AtomicUsize,
    }

    #[async_trait]
    impl TaskDispatcher for RecordingDispatcher {
        async fn handle_message(
            &self,
            agent_id: &str,
            text: &str,
            _meta: HashMap<String, Value>,
        ) -> Result<(), String> {
            self.calls
                .lock()
                .unwrap()
                .push((agent_id.to_string(), text.to_string()));
            if self.fail_count.fetch_add(0, Ordering::SeqCst) > 0 {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    async fn seed_agent(store: &Store, id: &str) {
        store
            .upsert_agent(&praktor_persistence::AgentRow {
                id: id.to_string(),
                display_name: id.to_string(),
                description: String::new(),
                model: None,
                image: None,
                workspace: format!("{id}-ws"),
                env: Default::default(),
                allowed_tools: vec![],
                files: vec![],
                nix_enabled: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn s3_one_shot_fires_then_auto_pauses() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        let now = Local::now();
        let schedule = Schedule::Once {
            at_ms: now.timestamp_millis() - 1,
        };
        let task = store
            .create_task(
                "coder",
                "ping-task",
                &schedule.to_json(),
                "ping",
                Some(now.timestamp_millis() - 1),
            )
            .await
            .unwrap();

        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(vec![]),
            fail_count: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(store.clone(), dispatcher.clone(), None, Duration::from_secs(30));
        scheduler.poll_once().await;

        assert_eq!(dispatcher.calls.lock().unwrap().len(), 1);
        let updated = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, praktor_persistence::TaskStatus::Paused);
        assert_eq!(updated.next_run_at, None);
    }

    #[tokio::test]
    async fn s4_cron_task_advances_to_next_day() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        let fired_at = Local.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let schedule = normalize("0 9 * * *", fired_at).unwrap();
        let task = store
            .create_task(
                "coder",
                "digest",
                &schedule.to_json(),
                "digest",
                Some(fired_at.timestamp_millis()),
            )
            .await
            .unwrap();

        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(vec![]),
            fail_count: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(store.clone(), dispatcher, None, Duration::from_secs(30));
        scheduler.poll_once().await;

        let updated = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, praktor_persistence::TaskStatus::Active);
        let expected_next = Local.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap();
        assert_eq!(updated.next_run_at, Some(expected_next.timestamp_millis()));
    }

    #[tokio::test]
    async fn main_chat_id_and_poll_interval_are_live_updatable() {
        let store = Store::open_in_memory().unwrap();
        seed_agent(&store, "coder").await;
        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(vec![]),
            fail_count: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(store.clone(), dispatcher, Some(111), Duration::from_secs(30));
        assert_eq!(scheduler.main_chat_id(), Some(111));

        scheduler.set_main_chat_id(Some(222));
        assert_eq!(scheduler.main_chat_id(), Some(222));

        scheduler.set_main_chat_id(None);
        assert_eq!(scheduler.main_chat_id(), None);

        scheduler.set_poll_interval(Duration::from_millis(500));
        assert_eq!(scheduler.poll_interval_ms.load(Ordering::SeqCst), 500);
    }
}
