//! Session lifecycle scheduler
//!
//! Runs on a one-second cadence. Each tick advances sessions through
//! `pending -> active -> expired`, emits lifecycle events for the active
//! enforcer, and publishes the effective blocked set. Ticks are idempotent:
//! every transition is a guarded compare-and-set in the store, and the
//! pre-expiry notification is remembered per (session, end) pair.

use chrono::{DateTime, Local};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use taviblock_api::SessionState;
use taviblock_config::Config;
use taviblock_store::{SessionFilter, SessionRow, Store};
use taviblock_util::{Clock, SessionId};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::CoreEvent;

/// How long before expiry the enforcer is warned
pub const PRE_EXPIRY_WINDOW: Duration = Duration::from_secs(60);

/// Domains currently enforced, sorted
pub type BlockedSet = BTreeSet<String>;

/// The effective blocked set: every configured domain minus those covered
/// by currently `active` sessions.
pub fn effective_blocked_set(config: &Config, sessions: &[SessionRow]) -> BlockedSet {
    let mut blocked = config.all_domains();
    for session in sessions {
        if session.state != SessionState::Active {
            continue;
        }
        for domain in config.domains_for_targets(session.targets.iter().map(String::as_str)) {
            blocked.remove(&domain);
        }
    }
    blocked
}

/// The lifecycle driver
pub struct Scheduler {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: Arc<RwLock<Config>>,
    /// End timestamp for which a SessionExpiring was already emitted.
    /// Keyed by end so an extension re-arms the notification.
    notified: HashMap<SessionId, DateTime<Local>>,
    blocked_tx: watch::Sender<BlockedSet>,
}

impl Scheduler {
    /// Create a scheduler. The blocked-set channel starts at the full
    /// configured set, i.e. the state with zero active sessions.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: Arc<RwLock<Config>>,
    ) -> (Self, watch::Receiver<BlockedSet>) {
        let initial = config.read().unwrap().all_domains();
        let (blocked_tx, blocked_rx) = watch::channel(initial);

        (
            Self {
                store,
                clock,
                config,
                notified: HashMap::new(),
                blocked_tx,
            },
            blocked_rx,
        )
    }

    /// Current published blocked set
    pub fn blocked_set(&self) -> BlockedSet {
        self.blocked_tx.borrow().clone()
    }

    /// One tick: transitions, events, blocked-set publication.
    pub fn tick(&mut self) -> Vec<CoreEvent> {
        let now = self.clock.now();
        let config = self.config.read().unwrap().clone();
        let mut events = Vec::new();

        let mut sessions = match self.store.list_sessions(SessionFilter::NonTerminal) {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "Tick failed to read sessions");
                return events;
            }
        };

        // Activations first: a session's expiry is never observed before
        // its activation, even when both are due in the same tick.
        for session in sessions.iter_mut() {
            if session.state != SessionState::Pending || session.effective_start > now {
                continue;
            }
            match self
                .store
                .update_session_state(session.id, SessionState::Pending, SessionState::Active)
            {
                Ok(true) => {
                    session.state = SessionState::Active;
                    let domains = session_domains(&config, session);
                    info!(session_id = %session.id, ?domains, "Session activated");
                    events.push(CoreEvent::SessionActivated {
                        id: session.id,
                        domains,
                    });
                }
                Ok(false) => {}
                Err(e) => error!(session_id = %session.id, error = %e, "Activation failed"),
            }
        }

        // Pre-expiry notifications, exactly once per (session, end)
        for session in sessions.iter() {
            if session.state != SessionState::Active {
                continue;
            }
            let remaining = match session.end.signed_duration_since(now).to_std() {
                Ok(remaining) if remaining > Duration::ZERO => remaining,
                _ => continue,
            };
            if remaining > PRE_EXPIRY_WINDOW {
                continue;
            }
            if self.notified.get(&session.id) == Some(&session.end) {
                continue;
            }
            self.notified.insert(session.id, session.end);

            let prompt_exempt = config
                .get_profile(&session.profile)
                .map(|p| p.is_bypass_style())
                .unwrap_or(true);
            debug!(
                session_id = %session.id,
                remaining_secs = remaining.as_secs(),
                prompt_exempt,
                "Session expiring soon"
            );
            events.push(CoreEvent::SessionExpiring {
                id: session.id,
                remaining,
                domains: session_domains(&config, session),
                prompt_exempt,
            });
        }

        // Expiries
        for session in sessions.iter_mut() {
            if session.state != SessionState::Active || session.end > now {
                continue;
            }
            match self
                .store
                .update_session_state(session.id, SessionState::Active, SessionState::Expired)
            {
                Ok(true) => {
                    session.state = SessionState::Expired;
                    self.notified.remove(&session.id);

                    let has_cooldown = config
                        .get_profile(&session.profile)
                        .map(|p| p.cooldown.is_some())
                        .unwrap_or(false);
                    if has_cooldown {
                        if let Err(e) = self.store.record_bypass(&session.profile, session.end) {
                            error!(
                                session_id = %session.id,
                                error = %e,
                                "Failed to record bypass completion"
                            );
                        }
                    }

                    info!(session_id = %session.id, "Session expired");
                    events.push(CoreEvent::SessionExpired { id: session.id });
                }
                Ok(false) => {}
                Err(e) => error!(session_id = %session.id, error = %e, "Expiry failed"),
            }
        }

        // Drop notification memory for sessions cancelled out from under us
        self.notified
            .retain(|id, _| sessions.iter().any(|s| s.id == *id && !s.state.is_terminal()));

        // Publish the post-transition blocked set
        let blocked = effective_blocked_set(&config, &sessions);
        self.blocked_tx.send_if_modified(|current| {
            if *current != blocked {
                info!(blocked = blocked.len(), "Blocked set changed");
                *current = blocked;
                true
            } else {
                false
            }
        });

        events
    }

    /// Publish the full blocked set, ignoring session state. Used on
    /// startup and shutdown: fail closed.
    pub fn publish_full_set(&self) {
        let full = self.config.read().unwrap().all_domains();
        self.blocked_tx.send_if_modified(|current| {
            if *current != full {
                *current = full;
                true
            } else {
                false
            }
        });
    }
}

fn session_domains(config: &Config, session: &SessionRow) -> Vec<String> {
    config
        .domains_for_targets(session.targets.iter().map(String::as_str))
        .into_iter()
        .collect()
}
