//! Command types for the taviblockd protocol

use serde::{Deserialize, Serialize};
use taviblock_util::SessionId;

use crate::{RequestError, ResponsePayload, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: RequestError) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(RequestError),
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Sessions, blocked set, penalty counter, cooldown remaining
    Status,

    /// Run the policy engine and commit admitted sessions
    Unblock {
        /// Profile name; the configured default profile when absent
        profile: Option<String>,
        /// Requested target names; profile selectors apply when empty
        #[serde(default)]
        targets: Vec<String>,
        /// Explicit wait/duration overrides
        #[serde(default)]
        overrides: Option<Overrides>,
        /// Session to tear down in the same request (frees its
        /// concurrency slot for the admission check)
        #[serde(default)]
        replace_id: Option<SessionId>,
    },

    /// Cancel matching non-terminal sessions
    Cancel { selector: CancelSelector },

    /// Cancel a pending session and unblock new targets under its profile
    Replace {
        selector: SessionSelector,
        new_targets: Vec<String>,
    },

    /// Prolong an active, non-cooldown session
    Extend { id: SessionId, minutes: u64 },

    /// Reread the configuration file
    Reload,

    /// Keepalive
    Ping,
}

/// Explicit wait/duration overrides for an unblock request.
///
/// An explicit wait replaces the computed wait entirely, penalties and tag
/// rules included.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Overrides {
    pub wait_minutes: Option<u64>,
    pub duration_minutes: Option<u64>,
}

/// Selector for cancel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum CancelSelector {
    Id { id: SessionId },
    Name { name: String },
    All,
}

/// Selector for replace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SessionSelector {
    Id { id: SessionId },
    Name { name: String },
}

impl std::fmt::Display for SessionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionSelector::Id { id } => write!(f, "{}", id),
            SessionSelector::Name { name } => write!(f, "{}", name),
        }
    }
}
