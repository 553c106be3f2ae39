use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tb_auth::CredentialStore;
use tb_conversation::ConversationManager;
use tb_core::config::BridgeConfig;
use tb_core::types::{ModelFamily, SessionId};
use tb_llm::RateGate;

/// Session Orchestrator (C5) connection state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    OpenUnauth,
    OpenAuth,
    Processing,
    Closed,
}

/// A single session's durable state, owned by the Session Orchestrator for
/// the channel's lifetime (§3 "Ownership"). Process-local and memory
/// resident — no persistent storage, per the stated non-goal.
pub struct Session {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_activity: Mutex<Instant>,
    pub state: Mutex<SessionState>,
    pub credentials: CredentialStore,
    pub conversation: ConversationManager,
    pub model_family: ModelFamily,
    /// Per-session, at-most-one-turn-in-flight gate (§5 "Locking
    /// discipline"). Never held across an I/O await; acquired to commit a
    /// state transition, released before issuing the next I/O.
    pub gate: Mutex<()>,
    /// Cancelled on channel close so in-flight LLM/tool calls for this
    /// session are aborted within the configured shutdown window (§4.5, P6).
    pub cancel: CancellationToken,
    /// Paces this session's model invocations independently of the adapter
    /// router's failure-triggered backoff (§5).
    pub rate_gate: RateGate,
}

impl Session {
    pub fn new(http: reqwest::Client, config: &BridgeConfig) -> Self {
        let model_family = config
            .model
            .model_id
            .parse::<ModelFamily>()
            .unwrap_or(ModelFamily::Claude);

        Self {
            id: SessionId::new(),
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            state: Mutex::new(SessionState::OpenUnauth),
            credentials: CredentialStore::new(http, config.tools.supported_auth_types.clone()),
            conversation: ConversationManager::new(config.conversation.clone(), config.model.context_window_tokens),
            model_family,
            gate: Mutex::new(()),
            cancel: CancellationToken::new(),
            rate_gate: RateGate::new(config.model.rate_gate_capacity, config.model.rate_gate_refill_per_sec),
        }
    }

    pub async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    pub async fn is_idle(&self, timeout: std::time::Duration) -> bool {
        self.last_activity.lock().await.elapsed() > timeout
    }
}

/// In-memory session table (§9 "Session table"): a mapping from session id
/// to `Session` behind a lightweight concurrent map, used only for
/// insert/lookup/remove — all other per-session state is guarded by the
/// session's own gate.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<DashMap<String, Arc<Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.inner.insert(session.id.as_str().to_string(), session);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) {
        if let Some((_, session)) = self.inner.remove(id) {
            session.cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Cancels every live session's token without removing it from the
    /// table, so each connection task can notice and wind down on its own
    /// (§10 "cancel in-flight turns within the shutdown window").
    pub fn cancel_all(&self) {
        for entry in self.inner.iter() {
            entry.value().cancel.cancel();
        }
    }

    /// Removes every session whose last activity exceeds `timeout` (§5
    /// "Idle sessions are reaped after session_timeout with no activity").
    pub async fn reap_idle(&self, timeout: std::time::Duration) {
        let mut stale = Vec::new();
        for entry in self.inner.iter() {
            if entry.value().is_idle(timeout).await {
                stale.push(entry.key().clone());
            }
        }
        for id in stale {
            self.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn new_session_starts_open_unauth_with_no_credentials() {
        let session = Session::new(http(), &BridgeConfig::default());
        assert_eq!(*session.state.lock().await, SessionState::OpenUnauth);
        assert!(!session.credentials.has_credentials().await);
    }

    #[tokio::test]
    async fn touch_resets_idle_clock() {
        let session = Session::new(http(), &BridgeConfig::default());
        assert!(!session.is_idle(std::time::Duration::from_secs(3600)).await);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(session.is_idle(std::time::Duration::from_millis(5)).await);

        session.touch().await;
        assert!(!session.is_idle(std::time::Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn table_insert_get_remove_round_trip() {
        let table = SessionTable::new();
        let session = Arc::new(Session::new(http(), &BridgeConfig::default()));
        let id = session.id.as_str().to_string();

        table.insert(session.clone());
        assert_eq!(table.len(), 1);
        assert!(table.get(&id).is_some());

        table.remove(&id);
        assert_eq!(table.len(), 0);
        assert!(table.get(&id).is_none());
        assert!(session.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn reap_idle_removes_only_stale_sessions() {
        let table = SessionTable::new();
        let fresh = Arc::new(Session::new(http(), &BridgeConfig::default()));
        let fresh_id = fresh.id.as_str().to_string();
        table.insert(fresh);

        table.reap_idle(std::time::Duration::from_secs(3600)).await;
        assert_eq!(table.len(), 1);
        assert!(table.get(&fresh_id).is_some());

        table.reap_idle(std::time::Duration::from_millis(0)).await;
        assert_eq!(table.len(), 0);
    }
}
