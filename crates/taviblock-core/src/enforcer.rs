//! Active enforcement
//!
//! Reacts to the published blocked set by closing matching browser tabs and
//! terminating bound applications through the platform adapter, and hosts
//! the pre-expiry prompt state machine. Actions are throttled to at most
//! one per second per (domain, kind) pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use taviblock_api::Command;
use taviblock_config::Config;
use taviblock_platform::{
    EngagementQuery, ExpiryPrompt, PlatformAdapter, PromptChoice,
};
use taviblock_util::{MonotonicInstant, SessionId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{BlockedSet, ControlRequest, CoreEvent};

/// How long the pre-expiry dialog waits before counting as let-close
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Extension choices offered by the pre-expiry dialog, in minutes
pub const EXTEND_OPTIONS_MINUTES: [u64; 2] = [5, 30];

/// Minimum interval between actions for one (domain, kind) pair
const ACTION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ActionKind {
    Tabs,
    App,
}

/// Prompt state machine: absent = idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptState {
    Prompting,
    Resolved,
}

/// The enforcement task state
pub struct ActiveEnforcer {
    adapter: Arc<dyn PlatformAdapter>,
    config: Arc<RwLock<Config>>,
    control_tx: mpsc::UnboundedSender<ControlRequest>,
    last_action: HashMap<(String, ActionKind), MonotonicInstant>,
    /// Shared with spawned prompt tasks so resolution survives the await
    prompts: Arc<Mutex<HashMap<SessionId, PromptState>>>,
}

impl ActiveEnforcer {
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        config: Arc<RwLock<Config>>,
        control_tx: mpsc::UnboundedSender<ControlRequest>,
    ) -> Self {
        Self {
            adapter,
            config,
            control_tx,
            last_action: HashMap::new(),
            prompts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Drive the enforcement loop until the scheduler side shuts down
    pub async fn run(
        mut self,
        mut blocked_rx: watch::Receiver<BlockedSet>,
        mut events_rx: mpsc::UnboundedReceiver<CoreEvent>,
    ) {
        let mut interval = tokio::time::interval(ACTION_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = blocked_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let blocked = blocked_rx.borrow_and_update().clone();
                    self.enforce(&blocked).await;
                }

                event = events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(&event).await,
                        None => break,
                    }
                }

                // Users reopen tabs; keep re-applying the current set
                _ = interval.tick() => {
                    let blocked = blocked_rx.borrow().clone();
                    self.enforce(&blocked).await;
                }
            }
        }

        debug!("Enforcer stopped");
    }

    /// Close tabs and terminate bound apps for every blocked domain
    pub async fn enforce(&mut self, blocked: &BlockedSet) {
        let bindings: Vec<(String, String)> = {
            let config = self.config.read().unwrap();
            blocked
                .iter()
                .filter_map(|d| config.app_bindings.get(d).map(|a| (d.clone(), a.clone())))
                .collect()
        };

        for domain in blocked {
            if !self.throttle_allows(domain, ActionKind::Tabs) {
                continue;
            }
            match self.adapter.enumerate_tabs_for(domain).await {
                Ok(tabs) => {
                    for tab in tabs {
                        match self.adapter.close_tab(&tab).await {
                            Ok(()) => {
                                info!(domain = %domain, host = %tab.host, "Closed tab")
                            }
                            Err(e) => {
                                warn!(domain = %domain, error = %e, "Failed to close tab")
                            }
                        }
                    }
                }
                Err(e) => warn!(domain = %domain, error = %e, "Tab enumeration failed"),
            }
        }

        for (domain, app) in bindings {
            if !self.throttle_allows(&domain, ActionKind::App) {
                continue;
            }
            match self.adapter.app_is_running(&app).await {
                Ok(true) => match self.adapter.terminate_app(&app).await {
                    Ok(()) => info!(app = %app, domain = %domain, "Terminated app"),
                    Err(e) => warn!(app = %app, error = %e, "Failed to terminate app"),
                },
                Ok(false) => {}
                Err(e) => warn!(app = %app, error = %e, "App state query failed"),
            }
        }
    }

    /// React to a scheduler event
    pub async fn handle_event(&mut self, event: &CoreEvent) {
        match event {
            CoreEvent::SessionActivated { id, domains } => {
                debug!(session_id = %id, ?domains, "Session active, enforcement paused for its domains");
            }

            CoreEvent::SessionExpiring {
                id,
                remaining,
                domains,
                prompt_exempt,
            } => {
                if *prompt_exempt {
                    return;
                }
                if self.prompts.lock().unwrap().contains_key(id) {
                    // Already prompting or resolved; one prompt per session
                    return;
                }
                if !self.session_engaged(domains).await {
                    debug!(session_id = %id, "User not engaged, letting the session close");
                    return;
                }

                self.prompts
                    .lock()
                    .unwrap()
                    .insert(*id, PromptState::Prompting);
                info!(
                    session_id = %id,
                    remaining_secs = remaining.as_secs(),
                    "Prompting user before session closes"
                );
                self.spawn_prompt(*id, domains.clone());
            }

            CoreEvent::SessionExpired { id } => {
                self.prompts.lock().unwrap().remove(id);
            }
        }
    }

    /// Whether an open tab or foreground bound app shows the user is
    /// currently using one of the session's domains.
    async fn session_engaged(&self, domains: &[String]) -> bool {
        let apps: Vec<String> = {
            let config = self.config.read().unwrap();
            domains
                .iter()
                .filter_map(|d| config.app_bindings.get(d).cloned())
                .collect()
        };

        for domain in domains {
            let query = EngagementQuery::Domain(domain.clone());
            if self.adapter.user_is_engaged(&query).await.unwrap_or(false) {
                return true;
            }
        }
        for app in apps {
            let query = EngagementQuery::App(app);
            if self.adapter.user_is_engaged(&query).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    fn spawn_prompt(&self, id: SessionId, domains: Vec<String>) {
        let adapter = self.adapter.clone();
        let control_tx = self.control_tx.clone();
        let prompts = self.prompts.clone();

        tokio::spawn(async move {
            let prompt = ExpiryPrompt {
                session: id,
                domains,
                extend_options_minutes: EXTEND_OPTIONS_MINUTES.to_vec(),
                timeout: PROMPT_TIMEOUT,
            };

            let choice =
                match tokio::time::timeout(prompt.timeout, adapter.prompt_user(&prompt)).await {
                    Ok(Ok(choice)) => choice,
                    Ok(Err(e)) => {
                        warn!(session_id = %id, error = %e, "Prompt failed");
                        PromptChoice::LetClose
                    }
                    Err(_) => PromptChoice::LetClose,
                };

            match choice {
                PromptChoice::Extend { minutes } => {
                    let (respond_to, response) = oneshot::channel();
                    let sent = control_tx.send(ControlRequest {
                        command: Command::Extend { id, minutes },
                        respond_to,
                    });
                    if sent.is_ok() {
                        match response.await {
                            Ok(Ok(_)) => {
                                info!(session_id = %id, minutes, "Session extended from prompt")
                            }
                            Ok(Err(e)) => {
                                warn!(session_id = %id, error = %e, "Extension rejected")
                            }
                            Err(_) => warn!(session_id = %id, "Extension response dropped"),
                        }
                    }
                }
                PromptChoice::LetClose => {
                    info!(session_id = %id, "Letting session close");
                }
            }

            prompts.lock().unwrap().insert(id, PromptState::Resolved);
        });
    }

    fn throttle_allows(&mut self, domain: &str, kind: ActionKind) -> bool {
        let now = MonotonicInstant::now();
        let key = (domain.to_string(), kind);
        match self.last_action.get(&key) {
            Some(last) if now.duration_since(*last) < ACTION_INTERVAL => false,
            _ => {
                self.last_action.insert(key, now);
                true
            }
        }
    }
}
