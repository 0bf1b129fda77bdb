//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use taviblock_api::SessionState;
use taviblock_util::{day_bucket, SessionId};
use tracing::{debug, warn};

use crate::{SessionDraft, SessionFilter, SessionRow, Store, StoreError, StoreResult};

const SCHEMA_VERSION: u32 = 1;

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a store, recreating it from scratch if the existing file is
    /// unusable. Losing session state re-blocks everything, which is the
    /// safe direction.
    pub fn open_or_recreate(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        match Self::open(path) {
            Ok(store) => Ok(store),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Store unusable, recreating"
                );
                for suffix in ["", "-wal", "-shm"] {
                    let mut stale = path.as_os_str().to_owned();
                    stale.push(suffix);
                    let _ = std::fs::remove_file(std::path::Path::new(&stale));
                }
                Self::open(path)
            }
        }
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        // Every acknowledged state change must already be on disk
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile TEXT NOT NULL,
                targets TEXT NOT NULL,  -- JSON array of target names
                requested_at TEXT NOT NULL,
                effective_start TEXT NOT NULL,
                end_time TEXT NOT NULL,
                state TEXT NOT NULL
                    CHECK (state IN ('pending', 'active', 'expired', 'cancelled')),
                all_targets INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS bypass_markers (
                profile TEXT PRIMARY KEY,
                last_completed TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS penalty_counters (
                day_bucket TEXT PRIMARY KEY,
                unblock_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);
            "#,
        )?;

        let version: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| {
                row.get(0)
            })
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) => {
                let v: u32 = v
                    .parse()
                    .map_err(|_| StoreError::Schema(format!("bad schema_version '{}'", v)))?;
                if v > SCHEMA_VERSION {
                    return Err(StoreError::Schema(format!(
                        "database schema {} is newer than supported {}",
                        v, SCHEMA_VERSION
                    )));
                }
                // Older versions would upgrade here; re-running the batch
                // above is idempotent.
            }
        }

        debug!("Store schema initialized");
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Local> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .unwrap_or_else(|_| Local::now())
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SessionRow, String)> {
    let id: i64 = row.get(0)?;
    let profile: String = row.get(1)?;
    let targets_json: String = row.get(2)?;
    let requested_at: String = row.get(3)?;
    let effective_start: String = row.get(4)?;
    let end_time: String = row.get(5)?;
    let state: String = row.get(6)?;
    let all_targets: bool = row.get(7)?;

    let session = SessionRow {
        id: SessionId::new(id),
        profile,
        targets: Vec::new(), // filled in by the caller from targets_json
        requested_at: parse_timestamp(&requested_at),
        effective_start: parse_timestamp(&effective_start),
        end: parse_timestamp(&end_time),
        state: SessionState::parse(&state).unwrap_or(SessionState::Expired),
        all_targets,
    };

    Ok((session, targets_json))
}

const SESSION_COLUMNS: &str =
    "id, profile, targets, requested_at, effective_start, end_time, state, all_targets";

impl Store for SqliteStore {
    fn insert_session(&self, draft: &SessionDraft) -> StoreResult<SessionId> {
        let conn = self.conn.lock().unwrap();
        let targets_json = serde_json::to_string(&draft.targets)?;

        conn.execute(
            r#"
            INSERT INTO sessions
                (profile, targets, requested_at, effective_start, end_time, state, all_targets)
            VALUES (?, ?, ?, ?, ?, 'pending', ?)
            "#,
            params![
                draft.profile,
                targets_json,
                draft.requested_at.to_rfc3339(),
                draft.effective_start.to_rfc3339(),
                draft.end.to_rfc3339(),
                draft.all_targets,
            ],
        )?;

        let id = SessionId::new(conn.last_insert_rowid());
        debug!(session_id = %id, profile = %draft.profile, "Session inserted");
        Ok(id)
    }

    fn get_session(&self, id: SessionId) -> StoreResult<Option<SessionRow>> {
        let conn = self.conn.lock().unwrap();

        let found = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS),
                [id.as_i64()],
                row_to_session,
            )
            .optional()?;

        match found {
            Some((mut session, targets_json)) => {
                session.targets = serde_json::from_str(&targets_json)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn list_sessions(&self, filter: SessionFilter) -> StoreResult<Vec<SessionRow>> {
        let conn = self.conn.lock().unwrap();

        let sql = match filter {
            SessionFilter::All => format!("SELECT {} FROM sessions ORDER BY id", SESSION_COLUMNS),
            SessionFilter::NonTerminal => format!(
                "SELECT {} FROM sessions WHERE state IN ('pending', 'active') ORDER BY id",
                SESSION_COLUMNS
            ),
        };

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            let (mut session, targets_json) = row?;
            session.targets = serde_json::from_str(&targets_json)?;
            sessions.push(session);
        }

        Ok(sessions)
    }

    fn update_session_state(
        &self,
        id: SessionId,
        from: SessionState,
        to: SessionState,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE sessions SET state = ? WHERE id = ? AND state = ?",
            params![to.as_str(), id.as_i64(), from.as_str()],
        )?;

        if changed == 1 {
            debug!(session_id = %id, from = %from, to = %to, "Session state updated");
        }
        Ok(changed == 1)
    }

    fn update_session_end(&self, id: SessionId, new_end: DateTime<Local>) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();

        let changed = conn.execute(
            "UPDATE sessions SET end_time = ? WHERE id = ? AND state = 'active'",
            params![new_end.to_rfc3339(), id.as_i64()],
        )?;

        Ok(changed == 1)
    }

    fn record_bypass(&self, profile: &str, completed_at: DateTime<Local>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO bypass_markers (profile, last_completed)
            VALUES (?, ?)
            ON CONFLICT(profile)
            DO UPDATE SET last_completed = excluded.last_completed
            "#,
            params![profile, completed_at.to_rfc3339()],
        )?;

        debug!(profile = %profile, completed_at = %completed_at, "Bypass recorded");
        Ok(())
    }

    fn last_bypass(&self, profile: &str) -> StoreResult<Option<DateTime<Local>>> {
        let conn = self.conn.lock().unwrap();

        let last: Option<String> = conn
            .query_row(
                "SELECT last_completed FROM bypass_markers WHERE profile = ?",
                [profile],
                |row| row.get(0),
            )
            .optional()?;

        Ok(last.map(|s| parse_timestamp(&s)))
    }

    fn bump_penalty(&self, now: DateTime<Local>) -> StoreResult<u32> {
        let conn = self.conn.lock().unwrap();
        let bucket = day_bucket(now).to_string();

        conn.execute(
            "DELETE FROM penalty_counters WHERE day_bucket != ?",
            [&bucket],
        )?;
        conn.execute(
            r#"
            INSERT INTO penalty_counters (day_bucket, unblock_count)
            VALUES (?, 1)
            ON CONFLICT(day_bucket)
            DO UPDATE SET unblock_count = unblock_count + 1
            "#,
            [&bucket],
        )?;

        let count: u32 = conn.query_row(
            "SELECT unblock_count FROM penalty_counters WHERE day_bucket = ?",
            [&bucket],
            |row| row.get(0),
        )?;

        debug!(day_bucket = %bucket, count, "Penalty bumped");
        Ok(count)
    }

    fn get_penalty(&self, now: DateTime<Local>) -> StoreResult<u32> {
        let conn = self.conn.lock().unwrap();
        let bucket = day_bucket(now).to_string();

        let count: Option<u32> = conn
            .query_row(
                "SELECT unblock_count FROM penalty_counters WHERE day_bucket = ?",
                [&bucket],
                |row| row.get(0),
            )
            .optional()?;

        Ok(count.unwrap_or(0))
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
