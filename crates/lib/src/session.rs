//! Per-conversation session state, keyed by chat id.
//!
//! One record per conversation: the attached dataset (if any), its display name and the
//! last-activity timestamp. The store map is guarded by a coarse `RwLock`; each session sits
//! behind its own `Mutex`, so a request that holds the session guard is serialized with every
//! other request for the same conversation while different conversations proceed in parallel.

use crate::dataset::Dataset;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Conversation identifier (Telegram chat id as a string).
pub type ConversationId = String;

/// Shared handle to one live session. Lock it for the whole handling of a message.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Source of "now" for session timestamps and eviction.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Handy for eviction tests.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// State held for one conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub conversation_id: ConversationId,
    pub dataset: Option<Dataset>,
    /// Display name of the attached dataset (the uploaded file name).
    pub dataset_name: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            dataset: None,
            dataset_name: None,
            last_activity: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    /// Replace the attached dataset.
    pub fn set_dataset(&mut self, dataset: Dataset, name: impl Into<String>) {
        self.dataset = Some(dataset);
        self.dataset_name = Some(name.into());
    }

    pub fn clear_dataset(&mut self) {
        self.dataset = None;
        self.dataset_name = None;
    }

    pub fn has_dataset(&self) -> bool {
        self.dataset.is_some()
    }

    /// True when idle strictly longer than `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (now - self.last_activity).to_std() {
            Ok(idle) => idle > ttl,
            // last activity in the future: not idle at all
            Err(_) => false,
        }
    }
}

/// In-memory session store with an injected clock and TTL.
pub struct SessionStore {
    inner: RwLock<HashMap<ConversationId, SessionHandle>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            clock,
            ttl,
        }
    }

    /// Store backed by the wall clock.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(Arc::new(SystemClock), ttl)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the session for `id`, creating an empty one on first access. Never fails.
    pub async fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(handle) = self.inner.read().await.get(id) {
            return handle.clone();
        }
        let now = self.clock.now();
        self.inner
            .write()
            .await
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(id.to_string(), now))))
            .clone()
    }

    /// Return a snapshot of the session if it exists.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let handle = self.inner.read().await.get(id).cloned()?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    /// Refresh last-activity for `id`.
    pub async fn touch(&self, id: &str) {
        let handle = self.get_or_create(id).await;
        handle.lock().await.touch(self.clock.now());
    }

    /// Attach (or replace) the dataset for `id` and refresh last-activity.
    pub async fn set_dataset(&self, id: &str, dataset: Dataset, name: impl Into<String>) {
        let handle = self.get_or_create(id).await;
        let mut session = handle.lock().await;
        session.set_dataset(dataset, name);
        session.touch(self.clock.now());
    }

    /// Drop the dataset for `id` and refresh last-activity.
    pub async fn clear_dataset(&self, id: &str) {
        let handle = self.get_or_create(id).await;
        let mut session = handle.lock().await;
        session.clear_dataset();
        session.touch(self.clock.now());
    }

    /// Remove every session idle longer than `ttl` at `now`; returns the count removed.
    /// Sessions that a request currently holds (handle cloned or guard locked) are skipped.
    pub async fn evict_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, handle| {
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(session) => !session.is_expired(now, ttl),
                Err(_) => true,
            }
        });
        let removed = before - map.len();
        if removed > 0 {
            log::debug!("session store: evicted {} idle session(s)", removed);
        }
        removed
    }

    /// `evict_expired` with the injected clock and TTL.
    pub async fn sweep(&self) -> usize {
        self.evict_expired(self.clock.now(), self.ttl).await
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
