//! Durable state for taviblockd
//!
//! The store owns every persistent row: unblock sessions, bypass cooldown
//! markers, and the progressive-penalty counters. All mutations are
//! serialised behind a single connection; every state change visible to the
//! CLI is flushed before it is acknowledged.

mod sqlite;

pub use sqlite::*;

use chrono::{DateTime, Local};
use taviblock_api::SessionState;
use taviblock_util::SessionId;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema error: {0}")]
    Schema(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A session as it will be inserted, before the store assigns an id
#[derive(Debug, Clone)]
pub struct SessionDraft {
    pub profile: String,
    pub targets: Vec<String>,
    pub requested_at: DateTime<Local>,
    pub effective_start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub all_targets: bool,
}

/// A persisted session row
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: SessionId,
    pub profile: String,
    pub targets: Vec<String>,
    pub requested_at: DateTime<Local>,
    pub effective_start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub state: SessionState,
    pub all_targets: bool,
}

impl SessionRow {
    /// Whether this session's target list covers the given target name
    pub fn covers_target(&self, name: &str) -> bool {
        self.all_targets || self.targets.iter().any(|t| t == name)
    }
}

/// Row filter for [`Store::list_sessions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFilter {
    All,
    NonTerminal,
}

/// Main store trait
pub trait Store: Send + Sync {
    // Sessions

    /// Insert a new session in `pending` state; returns the assigned id
    fn insert_session(&self, draft: &SessionDraft) -> StoreResult<SessionId>;

    /// Fetch a single session
    fn get_session(&self, id: SessionId) -> StoreResult<Option<SessionRow>>;

    /// List sessions matching a filter, ordered by id
    fn list_sessions(&self, filter: SessionFilter) -> StoreResult<Vec<SessionRow>>;

    /// Transition a session from an expected state to a new one.
    ///
    /// Returns `false` when the row was not in the expected state, which
    /// makes lifecycle transitions idempotent under repeated ticks.
    fn update_session_state(
        &self,
        id: SessionId,
        from: SessionState,
        to: SessionState,
    ) -> StoreResult<bool>;

    /// Move an active session's end timestamp. Returns `false` when the
    /// session is no longer active.
    fn update_session_end(&self, id: SessionId, new_end: DateTime<Local>) -> StoreResult<bool>;

    // Bypass cooldown

    /// Record the completion time of a session under a cooldown profile
    fn record_bypass(&self, profile: &str, completed_at: DateTime<Local>) -> StoreResult<()>;

    /// Most recent completion time of a cooldown session under `profile`
    fn last_bypass(&self, profile: &str) -> StoreResult<Option<DateTime<Local>>>;

    // Progressive penalty

    /// Increment today's unblock counter; returns the new count.
    /// Rows from previous day buckets are pruned.
    fn bump_penalty(&self, now: DateTime<Local>) -> StoreResult<u32>;

    /// Today's unblock count (zero after the 04:00 rollover)
    fn get_penalty(&self, now: DateTime<Local>) -> StoreResult<u32>;

    // Health

    fn is_healthy(&self) -> bool;
}
