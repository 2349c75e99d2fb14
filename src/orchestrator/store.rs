//! Session snapshots.
//!
//! A [`SessionStore`] keeps serialized [`SessionState`]s keyed by session id
//! so a conversation can be resumed with
//! [`HandoffController::with_state`](crate::HandoffController::with_state).
//! [`InMemorySessionStore`] holds JSON snapshots in process memory; nothing
//! survives a restart.

use crate::orchestrator::handoff::HandoffResult;
use crate::orchestrator::session::SessionState;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, state: &SessionState) -> HandoffResult<()>;

    async fn load(&self, session_id: &str) -> HandoffResult<Option<SessionState>>;

    /// Returns whether a snapshot was removed.
    async fn remove(&self, session_id: &str) -> HandoffResult<bool>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, state: &SessionState) -> HandoffResult<()> {
        let snapshot = serde_json::to_string(state)?;
        log::debug!(
            "Saving session {} ({} bytes)",
            state.session_id(),
            snapshot.len()
        );
        self.snapshots
            .write()
            .await
            .insert(state.session_id().to_string(), snapshot);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> HandoffResult<Option<SessionState>> {
        let snapshots = self.snapshots.read().await;
        match snapshots.get(session_id) {
            Some(snapshot) => Ok(Some(serde_json::from_str(snapshot)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, session_id: &str) -> HandoffResult<bool> {
        Ok(self.snapshots.write().await.remove(session_id).is_some())
    }
}
