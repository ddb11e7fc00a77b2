use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vmctl_common::prelude::Error;

/// Lifetime of a task when none is configured.
///
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How often expired tasks are removed.
///
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Stages of a deployment, in the only order they may be entered.
///
/// `Error` is terminal and may follow any non-terminal stage.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Start,
    Import,
    Create,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Import => "import",
            Stage::Create => "create",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(Value::from(value)).ok()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

// -----------------------------------------------------------------------------

/// Handle to the status record of one background task.
///
/// Cloning is cheap, all clones point to the same record. Each task has its
/// own lock, so writers on different tasks never contend.
///
#[derive(Debug, Clone)]
pub struct Task(Arc<TaskRecord>);

#[derive(Debug)]
struct TaskRecord {
    id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: Instant,
    status: Mutex<Map<String, Value>>,
}

impl Task {
    fn new(id: Uuid, ttl: Duration) -> Self {
        Self(Arc::new(TaskRecord {
            id,
            created_at: Utc::now(),
            expires_at: Instant::now() + ttl,
            status: Mutex::new(Map::new()),
        }))
    }

    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.0.created_at
    }

    /// Absolute point in time after which the task is gone.
    ///
    pub fn expires_at(&self) -> Instant {
        self.0.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0.expires_at
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.0.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes several string keys at once. A reader sees either none or all
    /// of them.
    ///
    pub fn set_str(&self, pairs: &[(&str, &str)]) {
        let mut status = self.lock();
        for (key, value) in pairs {
            status.insert((*key).to_owned(), Value::from(*value));
        }
    }

    /// Writes a single key of any JSON value.
    ///
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.lock().insert(key.to_owned(), value.into());
    }

    /// Moves the task to the given stage together with extra keys.
    ///
    /// # Returns
    ///
    /// `false` and leaves the record untouched, if the transition would go
    /// backwards or leave a terminal stage.
    ///
    pub fn transition(&self, next: Stage, fields: Vec<(&str, Value)>) -> bool {
        let mut status = self.lock();
        let current = status
            .get("stage")
            .and_then(Value::as_str)
            .and_then(Stage::parse);

        let allowed = match current {
            None => true,
            Some(current) if current.is_terminal() => false,
            Some(_) if next == Stage::Error => true,
            Some(current) => next > current,
        };
        if !allowed {
            tracing::warn!(target: "tasks", id = %self.0.id, ?current, ?next, "Stage transition refused");
            return false;
        }

        status.insert("stage".to_owned(), Value::from(next.as_str()));
        for (key, value) in fields {
            status.insert(key.to_owned(), value);
        }
        true
    }

    pub fn stage(&self, next: Stage) -> bool {
        self.transition(next, Vec::new())
    }

    /// Records the failure, `stage=error` and `error=<message>` together.
    /// The progress message is replaced by the same text.
    ///
    pub fn fail(&self, error: &Error) -> bool {
        let message = Value::from(error.to_string());
        self.transition(
            Stage::Error,
            vec![("message", message.clone()), ("error", message)],
        )
    }

    pub fn current_stage(&self) -> Option<Stage> {
        self.lock()
            .get("stage")
            .and_then(Value::as_str)
            .and_then(Stage::parse)
    }

    /// Snapshot of the whole status map.
    ///
    pub fn status(&self) -> Map<String, Value> {
        self.lock().clone()
    }
}

// -----------------------------------------------------------------------------

/// Process-local registry of background tasks with TTL eviction.
///
#[derive(Debug)]
pub struct TaskRegistry {
    ttl: Duration,
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl TaskRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Allocates a fresh task that expires one TTL from now.
    ///
    pub fn new_task(&self) -> Task {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let mut id = Uuid::new_v4();
        while tasks.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let task = Task::new(id, self.ttl);
        tasks.insert(id, task.clone());
        tracing::debug!(target: "tasks", %id, ttl = ?self.ttl, "Task registered");

        task
    }

    /// Returns the task, unless it is unknown or already expired.
    ///
    pub fn find_by_id(&self, id: &Uuid) -> Option<Task> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .filter(|task| !task.is_expired())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired task.
    ///
    /// # Returns
    ///
    /// Number of removed tasks.
    ///
    pub fn sweep(&self) -> usize {
        let expired: Vec<Uuid> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|task| task.is_expired())
            .map(Task::id)
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        for id in &expired {
            tasks.remove(id);
        }
        tracing::debug!(target: "tasks", removed = expired.len(), "Expired tasks swept");

        expired.len()
    }

    /// Starts the periodic sweeper, which runs until `shutdown` is cancelled.
    ///
    pub fn spawn_sweeper(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.sweep();
                    }
                }
            }
            tracing::debug!(target: "tasks", "Sweeper stopped");
        })
    }
}
