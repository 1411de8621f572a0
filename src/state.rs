use crate::attempt::Attempt;
use crate::models::{validate_question_set, QuestionSet, ValidationIssue};
use crate::session::AttemptSession;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub struct InMemoryDb {
    pub question_sets: RwLock<HashMap<i64, QuestionSet>>,
    pub attempts: DashMap<Uuid, AttemptSession>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentSnapshot {
    #[serde(default)]
    pub question_sets: HashMap<i64, QuestionSet>,
    #[serde(default)]
    pub attempts: Vec<AttemptSession>,
}

impl InMemoryDb {
    pub fn new(snapshot: Option<PersistentSnapshot>) -> Self {
        let snapshot = snapshot.unwrap_or_default();
        let attempts = DashMap::new();
        for session in snapshot.attempts {
            attempts.insert(session.attempt.id, session);
        }
        Self {
            question_sets: RwLock::new(snapshot.question_sets),
            attempts,
        }
    }

    /// Copies everything out. Attempt guards are taken one at a time, so callers
    /// must not hold one themselves.
    async fn snapshot(&self) -> PersistentSnapshot {
        let question_sets = self.question_sets.read().await.clone();
        let attempts = self.attempts.iter().map(|entry| entry.value().clone()).collect();
        PersistentSnapshot {
            question_sets,
            attempts,
        }
    }
}

/// Where snapshots of the catalog and attempts go.
pub trait SnapshotStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<PersistentSnapshot>>;

    fn persist(&self, payload: Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Clone)]
pub struct NoopSnapshotStore;

impl SnapshotStore for NoopSnapshotStore {
    fn load(&self) -> anyhow::Result<Option<PersistentSnapshot>> {
        Ok(None)
    }

    fn persist(&self, _payload: Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone)]
pub struct FileSnapshotStore {
    pub path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> anyhow::Result<Option<PersistentSnapshot>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str::<PersistentSnapshot>(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                warn!("failed to read local snapshot {}: {}", self.path.display(), err);
                Ok(None)
            }
        }
    }

    fn persist(&self, payload: Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> {
        let path = self.path.clone();
        Box::pin(async move {
            if let Some(parent) = Path::new(&path).parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, payload).await?;
            Ok(())
        })
    }
}

/// Keeps the last payload in memory.
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    pub last: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemorySnapshotStore {
    pub fn last_snapshot(&self) -> Option<PersistentSnapshot> {
        let guard = self.last.lock().ok()?;
        guard.as_ref().and_then(|raw| serde_json::from_slice(raw).ok())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> anyhow::Result<Option<PersistentSnapshot>> {
        Ok(self.last_snapshot())
    }

    fn persist(&self, payload: Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> {
        let last = self.last.clone();
        Box::pin(async move {
            let mut guard = last
                .lock()
                .map_err(|_| anyhow::anyhow!("snapshot store lock poisoned"))?;
            *guard = Some(payload);
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<InMemoryDb>,
    pub store: Arc<dyn SnapshotStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn SnapshotStore>) -> anyhow::Result<Self> {
        let snapshot = store.load()?;
        if let Some(snapshot) = snapshot.as_ref() {
            info!(
                "restored {} question sets and {} attempts from snapshot",
                snapshot.question_sets.len(),
                snapshot.attempts.len()
            );
        }
        Ok(Self {
            db: Arc::new(InMemoryDb::new(snapshot)),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            db: Arc::new(InMemoryDb::new(None)),
            store: Arc::new(NoopSnapshotStore),
        }
    }

    pub async fn register_question_set(&self, set: QuestionSet) -> Result<i64, Vec<ValidationIssue>> {
        validate_question_set(&set)?;
        let id = set.id;
        info!("question set {} registered with {} questions", id, set.questions.len());
        self.db.question_sets.write().await.insert(id, set);
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after register_question_set: {}", err);
        }
        Ok(id)
    }

    pub async fn question_set(&self, id: i64) -> Option<QuestionSet> {
        self.db.question_sets.read().await.get(&id).cloned()
    }

    /// The user's most recently completed attempt on `question_set_id`.
    pub fn latest_completed_attempt(&self, user_id: &str, question_set_id: i64) -> Option<Attempt> {
        self.db
            .attempts
            .iter()
            .filter(|entry| {
                let a = &entry.attempt;
                a.user_id == user_id && a.question_set_id == question_set_id && a.is_completed
            })
            .max_by_key(|entry| entry.attempt.completed_at)
            .map(|entry| entry.attempt.clone())
    }

    /// All of a user's attempts, newest first.
    pub fn attempts_for_user(&self, user_id: &str) -> Vec<Attempt> {
        let mut attempts: Vec<Attempt> = self
            .db
            .attempts
            .iter()
            .filter(|entry| entry.attempt.user_id == user_id)
            .map(|entry| entry.attempt.clone())
            .collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        attempts
    }

    pub async fn persist_core_data(&self) -> anyhow::Result<()> {
        let snapshot = self.db.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        self.store.persist(serialized).await
    }
}
