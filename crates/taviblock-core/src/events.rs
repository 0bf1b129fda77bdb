//! Events emitted by the scheduler for the active enforcer

use std::time::Duration;
use taviblock_util::SessionId;

/// Lifecycle events published on each tick
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A pending session reached its effective start
    SessionActivated {
        id: SessionId,
        /// Domains the session unblocks
        domains: Vec<String>,
    },

    /// An active session is inside the pre-expiry window. Emitted exactly
    /// once per (session, end) pair: extending a session re-arms it.
    SessionExpiring {
        id: SessionId,
        remaining: Duration,
        domains: Vec<String>,
        /// Bypass-style sessions never prompt
        prompt_exempt: bool,
    },

    /// An active session reached its end
    SessionExpired { id: SessionId },
}
