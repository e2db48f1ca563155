use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use cleaning::Table;
use shared::domain::SessionId;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// One uploaded dataset: the snapshot taken at upload time and the working copy.
#[derive(Debug, Clone)]
pub struct DatasetSession {
    pub filename: String,
    pub original: Table,
    pub current: Table,
    pub created_at: DateTime<Utc>,
}

impl DatasetSession {
    pub fn new(filename: impl Into<String>, original: Table, current: Table) -> Self {
        Self {
            filename: filename.into(),
            original,
            current,
            created_at: Utc::now(),
        }
    }

    pub fn age_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.created_at)
            .num_seconds()
    }
}

type SessionHandle = Arc<Mutex<DatasetSession>>;

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<SessionId, SessionHandle>,
    order: VecDeque<SessionId>,
}

/// In-memory session table shared by all request handlers.
///
/// The table lock only guards lookups and eviction. Each session carries its
/// own lock, so work on one dataset never blocks another.
#[derive(Clone)]
pub struct DatasetStore {
    inner: Arc<Mutex<StoreInner>>,
    max_sessions: usize,
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl DatasetStore {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Registers a freshly uploaded dataset, evicting the oldest sessions once
    /// the cap is reached.
    pub async fn create_session(&self, session: DatasetSession) -> SessionId {
        let session_id = SessionId::new_random();
        let mut evicted = Vec::new();
        {
            let mut guard = self.inner.lock().await;
            while guard.order.len() >= self.max_sessions {
                let Some(oldest) = guard.order.pop_front() else {
                    break;
                };
                if let Some(handle) = guard.sessions.remove(&oldest) {
                    evicted.push((oldest, handle));
                }
            }
            guard
                .sessions
                .insert(session_id.clone(), Arc::new(Mutex::new(session)));
            guard.order.push_back(session_id.clone());
        }

        for (oldest, handle) in evicted {
            let session = handle.lock().await;
            info!(
                session_id = %oldest,
                filename = %session.filename,
                age_secs = session.age_secs(),
                "dataset store: evicted oldest session"
            );
        }
        session_id
    }

    /// Locks one session for exclusive use. The guard is owned so it can be
    /// moved onto a blocking thread.
    pub async fn lock_session(
        &self,
        session_id: &SessionId,
    ) -> Option<OwnedMutexGuard<DatasetSession>> {
        let handle = self.inner.lock().await.sessions.get(session_id).cloned()?;
        Some(handle.lock_owned().await)
    }

    pub async fn contains(&self, session_id: &SessionId) -> bool {
        self.inner.lock().await.sessions.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
