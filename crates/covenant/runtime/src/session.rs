//! Session state and its store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_audit::genesis_hash;
use covenant_perception::LoopHistory;
use covenant_types::{ContentHash, DimensionalState, MetaKernelState};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Everything carried from one turn to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    /// Turns committed so far; also the next turn's number
    pub turn_count: u32,
    pub kernel: MetaKernelState,
    /// Hash of the last committed audit entry
    pub last_audit_hash: ContentHash,
    /// Smoothing prior for the detector
    pub previous_dimensional: Option<DimensionalState>,
    pub loop_history: LoopHistory,
}

impl Session {
    pub fn new(session_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let session_id = session_id.into();
        Self {
            last_audit_hash: genesis_hash(&session_id),
            session_id,
            created_at,
            turn_count: 0,
            kernel: MetaKernelState::new(),
            previous_dimensional: None,
            loop_history: LoopHistory::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.kernel.is_closed()
    }
}

/// Get/put persistence keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Insert or replace.
    async fn put(&self, session: Session) -> Result<()>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn put(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.session_id.clone(), session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_session_starts_at_genesis() {
        let session = Session::new("abc", Utc::now());
        assert_eq!(session.last_audit_hash, genesis_hash("abc"));
        assert_eq!(session.turn_count, 0);
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn put_replaces() {
        let store = MemorySessionStore::new();
        assert!(store.get("s").await.unwrap().is_none());

        let mut session = Session::new("s", Utc::now());
        store.put(session.clone()).await.unwrap();
        session.turn_count = 4;
        store.put(session).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("s").await.unwrap().unwrap().turn_count, 4);
    }

    #[test]
    fn session_round_trips_through_json() {
        let session = Session::new("s", Utc::now());
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
