use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::models::{ConversationHistory, ConversationTurn, SessionSummary};

#[derive(Debug)]
struct SessionState {
    history: ConversationHistory,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// One interactive session.
///
/// Submissions queue on `turn`, which is held for a whole generation. The
/// transcript itself sits behind `state` and is only locked for short reads
/// and writes, so listing or reading a session never waits on a backend.
#[derive(Debug)]
pub struct Session {
    turn: Arc<Mutex<()>>,
    state: RwLock<SessionState>,
}

impl Session {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            turn: Arc::new(Mutex::new(())),
            state: RwLock::new(SessionState {
                history: ConversationHistory::new(),
                created_at: now,
                updated_at: now,
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.turn.try_lock().is_err()
    }

    /// Copy of the transcript as it is right now.
    pub async fn history(&self) -> ConversationHistory {
        self.state.read().await.history.clone()
    }

    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.state.read().await.history.turns().to_vec()
    }

    pub async fn record(&self, turns: impl IntoIterator<Item = ConversationTurn>) {
        let mut state = self.state.write().await;
        for turn in turns {
            state.history.push(turn);
        }
        state.updated_at = Utc::now();
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.history.clear();
        state.updated_at = Utc::now();
    }

    pub async fn updated_at(&self) -> DateTime<Utc> {
        self.state.read().await.updated_at
    }

    async fn summary(&self, id: String) -> SessionSummary {
        let state = self.state.read().await;
        SessionSummary {
            id,
            turn_count: state.history.len(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

pub type SessionHandle = Arc<Session>;

/// In-memory session registry. Separate sessions proceed independently.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(session) = self.get(id).await {
            return session;
        }
        self.sessions
            .write()
            .await
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Session::new()))
            .clone()
    }

    /// Waits until no other submission is running on session `id`, creating
    /// it if needed. The session cannot be evicted while the guard is held.
    pub async fn begin_turn(&self, id: &str) -> (SessionHandle, OwnedMutexGuard<()>) {
        loop {
            let session = self.get_or_create(id).await;
            let guard = session.turn.clone().lock_owned().await;
            // Evicted while we waited: start over on a fresh entry.
            match self.get(id).await {
                Some(current) if Arc::ptr_eq(&current, &session) => return (session, guard),
                _ => continue,
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Summaries of every session, most recently updated first.
    pub async fn summaries(&self) -> Vec<SessionSummary> {
        let handles: Vec<(String, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            summaries.push(handle.summary(id).await);
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Drops sessions untouched for longer than `max_idle`. Sessions with a
    /// submission in flight are kept. Returns how many were removed.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return 0;
        };

        let handles: Vec<(String, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut idle = Vec::new();
        for (id, handle) in handles {
            if !handle.is_busy() && handle.updated_at().await < cutoff {
                idle.push(id);
            }
        }

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        for id in &idle {
            // Re-checked under the write lock: a submission may have started since.
            if sessions.get(id).is_some_and(|s| !s.is_busy()) {
                sessions.remove(id);
            }
        }
        before - sessions.len()
    }

    /// Runs [`Self::evict_idle`] every `every` until the runtime shuts down.
    pub fn spawn_idle_sweeper(&self, max_idle: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = store.evict_idle(max_idle).await;
                if removed > 0 {
                    debug!(removed, "Evicted idle sessions");
                }
            }
        })
    }
}
