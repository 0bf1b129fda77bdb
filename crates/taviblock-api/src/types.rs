//! Shared view and error types for the taviblockd protocol

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use taviblock_util::SessionId;

/// Lifecycle state of an unblock session.
///
/// Transitions are monotonic: `pending -> active -> expired`, with
/// `cancelled` as an alternative terminal state reachable from either
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Active => "active",
            SessionState::Expired => "expired",
            SessionState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionState::Pending),
            "active" => Some(SessionState::Active),
            "expired" => Some(SessionState::Expired),
            "cancelled" => Some(SessionState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session as reported over the control channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    pub profile: String,
    pub targets: Vec<String>,
    pub state: SessionState,
    pub requested_at: DateTime<Local>,
    pub effective_start: DateTime<Local>,
    pub end: DateTime<Local>,
    /// Bypass-style session covering every configured target
    pub all_targets: bool,
    /// Seconds until activation, for pending sessions
    pub starts_in_secs: Option<u64>,
    /// Seconds until expiry, for active sessions
    pub remaining_secs: Option<u64>,
}

/// Why a requested target was skipped during admission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyActive { session: SessionId },
    AlreadyPending { session: SessionId },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyActive { session } => {
                write!(f, "already unblocked in session {}", session)
            }
            SkipReason::AlreadyPending { session } => {
                write!(f, "already pending in session {}", session)
            }
        }
    }
}

/// A skipped target with its reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedTarget {
    pub target: String,
    pub reason: SkipReason,
}

/// Progressive-penalty state as reported in status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyStatus {
    pub unblocks_today: u32,
    pub per_unblock_secs: u64,
    pub current_penalty_secs: u64,
}

/// Cooldown remaining for a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownStatus {
    pub profile: String,
    pub remaining_secs: u64,
}

/// Full status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub api_version: u32,
    pub sessions: Vec<SessionView>,
    /// Domains currently enforced in the hosts file, sorted
    pub blocked_domains: Vec<String>,
    pub penalty: Option<PenaltyStatus>,
    pub cooldowns: Vec<CooldownStatus>,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Status(StatusSnapshot),
    Unblocked {
        created: Vec<SessionView>,
        skipped: Vec<SkippedTarget>,
    },
    Cancelled {
        count: usize,
    },
    Replaced {
        cancelled: SessionId,
        created: Vec<SessionView>,
        skipped: Vec<SkippedTarget>,
    },
    Extended {
        id: SessionId,
        new_end: DateTime<Local>,
    },
    Reloaded {
        targets: usize,
        profiles: usize,
    },
    Pong,
}

/// Structured request errors.
///
/// Every rejection carries enough payload for the CLI to print a
/// human-readable reason; `Display` provides the default rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestError {
    ConfigInvalid {
        message: String,
    },
    TargetUnknown {
        name: String,
    },
    ProfileUnknown {
        name: String,
    },
    CooldownActive {
        remaining_secs: u64,
    },
    TooManySessions {
        limit: usize,
        current: usize,
    },
    NothingToDo {
        reasons: Vec<SkippedTarget>,
    },
    SessionNotFound {
        selector: String,
    },
    SessionNotPending {
        id: SessionId,
    },
    ExtensionForbidden {
        reason: String,
    },
    StoreUnavailable {
        message: String,
    },
    InvalidRequest {
        message: String,
    },
    PermissionDenied {
        message: String,
    },
    RateLimited,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::ConfigInvalid { message } => {
                write!(f, "configuration invalid: {}", message)
            }
            RequestError::TargetUnknown { name } => write!(f, "unknown target '{}'", name),
            RequestError::ProfileUnknown { name } => write!(f, "unknown profile '{}'", name),
            RequestError::CooldownActive { remaining_secs } => write!(
                f,
                "cooldown active: {} remaining",
                taviblock_util::format_duration(std::time::Duration::from_secs(*remaining_secs))
            ),
            RequestError::TooManySessions { limit, current } => {
                write!(f, "session limit reached ({} of {})", current, limit)
            }
            RequestError::NothingToDo { reasons } => {
                write!(f, "nothing to do")?;
                for skipped in reasons {
                    write!(f, "; {}: {}", skipped.target, skipped.reason)?;
                }
                Ok(())
            }
            RequestError::SessionNotFound { selector } => {
                write!(f, "session '{}' not found", selector)
            }
            RequestError::SessionNotPending { id } => {
                write!(f, "session {} is not pending", id)
            }
            RequestError::ExtensionForbidden { reason } => {
                write!(f, "extension forbidden: {}", reason)
            }
            RequestError::StoreUnavailable { message } => {
                write!(f, "store unavailable: {}", message)
            }
            RequestError::InvalidRequest { message } => {
                write!(f, "invalid request: {}", message)
            }
            RequestError::PermissionDenied { message } => {
                write!(f, "permission denied: {}", message)
            }
            RequestError::RateLimited => write!(f, "too many requests"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_round_trips() {
        for state in [
            SessionState::Pending,
            SessionState::Active,
            SessionState::Expired,
            SessionState::Cancelled,
        ] {
            assert_eq!(SessionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SessionState::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Pending.is_terminal());
        assert!(!SessionState::Active.is_terminal());
        assert!(SessionState::Expired.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
    }

    #[test]
    fn request_error_serializes_with_payload() {
        let err = RequestError::CooldownActive {
            remaining_secs: 3500,
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("cooldown_active"));
        assert!(json.contains("3500"));
    }

    #[test]
    fn nothing_to_do_display_lists_reasons() {
        let err = RequestError::NothingToDo {
            reasons: vec![SkippedTarget {
                target: "gmail".into(),
                reason: SkipReason::AlreadyPending {
                    session: SessionId::new(3),
                },
            }],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("gmail"));
        assert!(rendered.contains("session 3"));
    }
}
