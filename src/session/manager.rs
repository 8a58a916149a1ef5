//! Keyed store of investigation sessions.
//!
//! The manager exclusively owns every [`SessionState`]. Callers read clones and
//! submit [`SessionUpdate`]s; all mutation goes through [`merge`]. Sessions are
//! independent: the store is keyed by [`SessionId`] behind a single `RwLock`,
//! and no operation touches more than one entry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::compaction::{compact, CompactionPolicy, CompactionReport};
use super::state::{merge_with_retention, SessionState, SessionUpdate, TOOL_LOG_RETENTION};
use super::types::SessionId;
use crate::budget::CapabilityTier;
use crate::config::RunConfig;

/// Errors from session store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(SessionId),

    #[error("Session {0} has ended")]
    Ended(SessionId),
}

/// Tunables of the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionManagerConfig {
    /// Delay between `end_session` and physical deletion
    #[serde(with = "crate::util::duration_secs")]
    pub grace_period: Duration,
    /// Snapshots kept for `recover_session`
    pub snapshot_limit: usize,
    /// Tool-call log entries kept by merge
    pub tool_log_retention: usize,
    pub compaction: CompactionPolicy,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(300),
            snapshot_limit: 10,
            tool_log_retention: TOOL_LOG_RETENTION,
            compaction: CompactionPolicy::default(),
        }
    }
}

/// Summary of a live session, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub subject_id: String,
    pub active_tier: CapabilityTier,
    pub tool_calls: usize,
    pub errors: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct SessionEntry {
    state: SessionState,
    run_config: RunConfig,
    /// Most recent last
    history: VecDeque<SessionState>,
    ended_at: Option<DateTime<Utc>>,
}

impl SessionEntry {
    fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// In-memory session store shared by all runs of a process.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
    config: SessionManagerConfig,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// Create an empty session for `subject_id`.
    pub async fn create_session(&self, subject_id: &str, run_config: RunConfig) -> SessionId {
        let id = SessionId::new();
        let state = SessionState::new(id, subject_id);
        let mut history = VecDeque::with_capacity(self.config.snapshot_limit);
        history.push_back(state.clone());

        self.sessions.write().await.insert(
            id,
            SessionEntry {
                state,
                run_config,
                history,
                ended_at: None,
            },
        );
        tracing::debug!(session_id = %id, subject_id = %subject_id, "Created session");
        id
    }

    /// Current state of a session. Ended sessions stay readable until deleted.
    pub async fn get_session(&self, id: SessionId) -> Result<SessionState, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|e| e.state.clone())
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn run_config(&self, id: SessionId) -> Result<RunConfig, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|e| e.run_config.clone())
            .ok_or(SessionError::NotFound(id))
    }

    /// Merge a partial update and record a snapshot of the result.
    pub async fn update_session(
        &self,
        id: SessionId,
        update: SessionUpdate,
    ) -> Result<SessionState, SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if !entry.is_active() {
            return Err(SessionError::Ended(id));
        }

        entry.state = merge_with_retention(&entry.state, update, self.config.tool_log_retention);
        Self::push_snapshot(entry, self.config.snapshot_limit);
        Ok(entry.state.clone())
    }

    /// Reshape the state for a move from tier `from` to tier `to`.
    ///
    /// Compacts only when `to` has a smaller context window than `from`;
    /// otherwise just records the new active tier.
    pub async fn switch_model(
        &self,
        id: SessionId,
        from: CapabilityTier,
        to: CapabilityTier,
    ) -> Result<Option<CompactionReport>, SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if !entry.is_active() {
            return Err(SessionError::Ended(id));
        }

        if to.context_window() >= from.context_window() {
            entry.state.active_tier = to;
            return Ok(None);
        }

        let (compacted, report) = compact(&entry.state, &self.config.compaction, from, to);
        entry.state = compacted;
        Self::push_snapshot(entry, self.config.snapshot_limit);
        Ok(Some(report))
    }

    /// Detach the session now and delete it after the grace period.
    ///
    /// Deletion is scheduled on the current tokio runtime when one exists;
    /// otherwise [`purge_ended`](Self::purge_ended) removes it.
    pub async fn end_session(&self, id: SessionId) -> Result<(), SessionError> {
        {
            let mut sessions = self.sessions.write().await;
            let entry = sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;
            if entry.ended_at.is_some() {
                return Ok(());
            }
            entry.ended_at = Some(Utc::now());
        }

        let grace = self.config.grace_period;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let sessions = Arc::clone(&self.sessions);
            handle.spawn(async move {
                tokio::time::sleep(grace).await;
                if sessions.write().await.remove(&id).is_some() {
                    tracing::debug!(session_id = %id, "Deleted ended session");
                }
            });
        }
        tracing::info!(session_id = %id, grace_secs = grace.as_secs(), "Ended session");
        Ok(())
    }

    /// Most recent snapshot without an unrecoverable error, else the most recent one.
    pub async fn recover_session(&self, id: SessionId) -> Result<SessionState, SessionError> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&id).ok_or(SessionError::NotFound(id))?;

        let clean = entry
            .history
            .iter()
            .rev()
            .find(|s| !s.has_unrecoverable_error());
        match clean {
            Some(state) => Ok(state.clone()),
            None => Ok(entry
                .history
                .back()
                .cloned()
                .unwrap_or_else(|| entry.state.clone())),
        }
    }

    /// Sessions not yet ended, newest first.
    pub async fn active_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<SessionSummary> = sessions
            .values()
            .filter(|e| e.is_active())
            .map(|e| SessionSummary {
                session_id: e.state.session_id,
                subject_id: e.state.subject_id.clone(),
                active_tier: e.state.active_tier,
                tool_calls: e.state.tool_calls.len(),
                errors: e.state.errors.len(),
                created_at: e.state.created_at,
                updated_at: e.state.updated_at,
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Delete ended sessions whose grace period has passed. Returns how many.
    pub async fn purge_ended(&self) -> usize {
        let grace = chrono::Duration::from_std(self.config.grace_period)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - grace;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, e| match e.ended_at {
            Some(ended) => ended > cutoff,
            None => true,
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn push_snapshot(entry: &mut SessionEntry, limit: usize) {
        entry.history.push_back(entry.state.clone());
        while entry.history.len() > limit.max(1) {
            entry.history.pop_front();
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionManagerConfig::default())
    }
}
