//! Control interface
//!
//! Executes control-channel commands against the store. All mutation flows
//! through here, serialised by the daemon's single event loop: a CLI request
//! and a scheduler tick never touch the store at the same time.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use taviblock_api::{
    CancelSelector, Command, CooldownStatus, Overrides, PenaltyStatus, RequestError,
    ResponsePayload, SessionSelector, SessionState, SessionView, StatusSnapshot, API_VERSION,
};
use taviblock_config::Config;
use taviblock_platform::{EngagementQuery, PlatformAdapter};
use taviblock_store::{SessionFilter, SessionRow, Store, StoreError};
use taviblock_util::{Clock, SessionId};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::policy::{admit, AdmissionError, AdmissionOverrides, AdmissionSnapshot};
use crate::{effective_blocked_set, AdmissionPlan};

/// A command queued for the single-writer event loop
pub struct ControlRequest {
    pub command: Command,
    pub respond_to: oneshot::Sender<Result<ResponsePayload, RequestError>>,
}

/// Executes control commands
pub struct ControlInterface {
    store: Arc<dyn Store>,
    config: Arc<RwLock<Config>>,
    adapter: Arc<dyn PlatformAdapter>,
    clock: Arc<dyn Clock>,
    config_path: PathBuf,
}

impl ControlInterface {
    pub fn new(
        store: Arc<dyn Store>,
        config: Arc<RwLock<Config>>,
        adapter: Arc<dyn PlatformAdapter>,
        clock: Arc<dyn Clock>,
        config_path: PathBuf,
    ) -> Self {
        Self {
            store,
            config,
            adapter,
            clock,
            config_path,
        }
    }

    /// Execute one command. Nothing thrown escapes the request boundary;
    /// every failure is a structured [`RequestError`].
    pub async fn execute(&self, command: Command) -> Result<ResponsePayload, RequestError> {
        match command {
            Command::Status => self.status(),
            Command::Unblock {
                profile,
                targets,
                overrides,
                replace_id,
            } => self.unblock(profile, targets, overrides, replace_id),
            Command::Cancel { selector } => self.cancel(selector),
            Command::Replace {
                selector,
                new_targets,
            } => self.replace(selector, new_targets),
            Command::Extend { id, minutes } => self.extend(id, minutes).await,
            Command::Reload => self.reload(),
            Command::Ping => Ok(ResponsePayload::Pong),
        }
    }

    fn status(&self) -> Result<ResponsePayload, RequestError> {
        let now = self.clock.now();
        let config = self.config.read().unwrap().clone();

        let sessions = self
            .store
            .list_sessions(SessionFilter::NonTerminal)
            .map_err(store_err)?;

        let views = sessions.iter().map(|s| session_view(s, now)).collect();
        let blocked_domains = effective_blocked_set(&config, &sessions)
            .into_iter()
            .collect();

        let penalty = if config.penalty.enabled {
            let count = self.store.get_penalty(now).map_err(store_err)?;
            Some(PenaltyStatus {
                unblocks_today: count,
                per_unblock_secs: config.penalty.per_unblock.as_secs(),
                current_penalty_secs: config.penalty.per_unblock.as_secs() * count as u64,
            })
        } else {
            None
        };

        let mut cooldowns = Vec::new();
        for (name, profile) in &config.profiles {
            let Some(cooldown) = profile.cooldown else {
                continue;
            };
            let Some(last) = self.store.last_bypass(name).map_err(store_err)? else {
                continue;
            };
            let since = now.signed_duration_since(last);
            let cooldown = ChronoDuration::from_std(cooldown).unwrap_or_default();
            if since < cooldown {
                cooldowns.push(CooldownStatus {
                    profile: name.clone(),
                    remaining_secs: (cooldown - since).num_seconds().max(0) as u64,
                });
            }
        }

        Ok(ResponsePayload::Status(StatusSnapshot {
            api_version: API_VERSION,
            sessions: views,
            blocked_domains,
            penalty,
            cooldowns,
        }))
    }

    fn unblock(
        &self,
        profile: Option<String>,
        targets: Vec<String>,
        overrides: Option<Overrides>,
        replace_id: Option<SessionId>,
    ) -> Result<ResponsePayload, RequestError> {
        let now = self.clock.now();
        let config = self.config.read().unwrap().clone();

        let profile_name = profile
            .or_else(|| config.default_profile.clone())
            .ok_or_else(|| RequestError::InvalidRequest {
                message: "no profile named and no default_profile configured".into(),
            })?;

        // The replaced session must exist before we plan around its slot
        let non_terminal = self
            .store
            .list_sessions(SessionFilter::NonTerminal)
            .map_err(store_err)?;
        let replaced = match replace_id {
            Some(id) => Some(
                non_terminal
                    .iter()
                    .find(|s| s.id == id)
                    .cloned()
                    .ok_or(RequestError::SessionNotFound {
                        selector: id.to_string(),
                    })?,
            ),
            None => None,
        };

        let plan = self.plan_admission(
            &config,
            &profile_name,
            &targets,
            overrides,
            replace_id,
            non_terminal,
            now,
        )?;

        if let Some(replaced) = replaced {
            self.cancel_session(&config, &replaced, now)?;
            info!(session_id = %replaced.id, "Replaced session cancelled");
        }

        let (created, skipped) = self.commit(plan, now)?;
        Ok(ResponsePayload::Unblocked { created, skipped })
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_admission(
        &self,
        config: &Config,
        profile_name: &str,
        targets: &[String],
        overrides: Option<Overrides>,
        replace_id: Option<SessionId>,
        non_terminal: Vec<SessionRow>,
        now: DateTime<Local>,
    ) -> Result<AdmissionPlan, RequestError> {
        let snapshot = AdmissionSnapshot {
            non_terminal,
            last_bypass: self.store.last_bypass(profile_name).map_err(store_err)?,
            penalty_count: self.store.get_penalty(now).map_err(store_err)?,
        };

        let overrides = overrides.unwrap_or_default();
        let admission_overrides = AdmissionOverrides {
            wait: overrides.wait_minutes.map(minutes),
            duration: overrides.duration_minutes.map(minutes),
        };

        admit(
            config,
            profile_name,
            targets,
            &admission_overrides,
            replace_id,
            &snapshot,
            now,
        )
        .map_err(admission_err)
    }

    fn commit(
        &self,
        plan: AdmissionPlan,
        now: DateTime<Local>,
    ) -> Result<(Vec<SessionView>, Vec<taviblock_api::SkippedTarget>), RequestError> {
        let mut created = Vec::new();
        for draft in &plan.drafts {
            let id = self.store.insert_session(draft).map_err(store_err)?;
            info!(
                session_id = %id,
                profile = %draft.profile,
                targets = ?draft.targets,
                effective_start = %draft.effective_start,
                end = %draft.end,
                "Session created"
            );
            created.push(session_view(
                &SessionRow {
                    id,
                    profile: draft.profile.clone(),
                    targets: draft.targets.clone(),
                    requested_at: draft.requested_at,
                    effective_start: draft.effective_start,
                    end: draft.end,
                    state: SessionState::Pending,
                    all_targets: draft.all_targets,
                },
                now,
            ));
        }

        for _ in 0..plan.penalty_bumps {
            self.store.bump_penalty(now).map_err(store_err)?;
        }

        Ok((created, plan.skipped))
    }

    fn cancel(&self, selector: CancelSelector) -> Result<ResponsePayload, RequestError> {
        let now = self.clock.now();
        let config = self.config.read().unwrap().clone();

        let matching: Vec<SessionRow> = match &selector {
            CancelSelector::Id { id } => {
                let session = self
                    .store
                    .get_session(*id)
                    .map_err(store_err)?
                    .filter(|s| !s.state.is_terminal())
                    .ok_or(RequestError::SessionNotFound {
                        selector: id.to_string(),
                    })?;
                vec![session]
            }
            CancelSelector::Name { name } => {
                let canonical = config
                    .resolve_target(name)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| name.clone());
                let matching: Vec<SessionRow> = self
                    .store
                    .list_sessions(SessionFilter::NonTerminal)
                    .map_err(store_err)?
                    .into_iter()
                    .filter(|s| s.covers_target(&canonical) || s.covers_target(name))
                    .collect();
                if matching.is_empty() {
                    return Err(RequestError::SessionNotFound {
                        selector: name.clone(),
                    });
                }
                matching
            }
            CancelSelector::All => self
                .store
                .list_sessions(SessionFilter::NonTerminal)
                .map_err(store_err)?,
        };

        let mut count = 0;
        for session in &matching {
            if self.cancel_session(&config, session, now)? {
                count += 1;
            }
        }

        Ok(ResponsePayload::Cancelled { count })
    }

    /// Transition a session to cancelled. Cancelling an active cooldown
    /// session records the bypass marker, same as expiry would.
    fn cancel_session(
        &self,
        config: &Config,
        session: &SessionRow,
        now: DateTime<Local>,
    ) -> Result<bool, RequestError> {
        let changed = self
            .store
            .update_session_state(session.id, session.state, SessionState::Cancelled)
            .map_err(store_err)?;

        if changed {
            info!(session_id = %session.id, was = %session.state, "Session cancelled");
            if session.state == SessionState::Active {
                let has_cooldown = config
                    .get_profile(&session.profile)
                    .map(|p| p.cooldown.is_some())
                    .unwrap_or(false);
                if has_cooldown {
                    self.store
                        .record_bypass(&session.profile, now)
                        .map_err(store_err)?;
                }
            }
        }

        Ok(changed)
    }

    fn replace(
        &self,
        selector: SessionSelector,
        new_targets: Vec<String>,
    ) -> Result<ResponsePayload, RequestError> {
        let now = self.clock.now();
        let config = self.config.read().unwrap().clone();

        let session = match &selector {
            SessionSelector::Id { id } => self
                .store
                .get_session(*id)
                .map_err(store_err)?
                .filter(|s| !s.state.is_terminal()),
            SessionSelector::Name { name } => {
                let canonical = config
                    .resolve_target(name)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| name.clone());
                self.store
                    .list_sessions(SessionFilter::NonTerminal)
                    .map_err(store_err)?
                    .into_iter()
                    .find(|s| s.covers_target(&canonical) || s.covers_target(name))
            }
        }
        .ok_or(RequestError::SessionNotFound {
            selector: selector.to_string(),
        })?;

        if session.state != SessionState::Pending {
            return Err(RequestError::SessionNotPending { id: session.id });
        }

        self.cancel_session(&config, &session, now)?;

        let non_terminal = self
            .store
            .list_sessions(SessionFilter::NonTerminal)
            .map_err(store_err)?;
        let plan = self.plan_admission(
            &config,
            &session.profile,
            &new_targets,
            None,
            None,
            non_terminal,
            now,
        )?;
        let (created, skipped) = self.commit(plan, now)?;

        Ok(ResponsePayload::Replaced {
            cancelled: session.id,
            created,
            skipped,
        })
    }

    async fn extend(
        &self,
        id: SessionId,
        minutes: u64,
    ) -> Result<ResponsePayload, RequestError> {
        let session = self
            .store
            .get_session(id)
            .map_err(store_err)?
            .ok_or(RequestError::SessionNotFound {
                selector: id.to_string(),
            })?;

        if session.state != SessionState::Active {
            return Err(RequestError::ExtensionForbidden {
                reason: format!("session is {}", session.state),
            });
        }

        // Collect everything needed before awaiting the adapter
        let (is_bypass_style, domains, apps) = {
            let config = self.config.read().unwrap();
            let is_bypass_style = config
                .get_profile(&session.profile)
                .map(|p| p.is_bypass_style())
                .unwrap_or(true);
            let domains: Vec<String> = config
                .domains_for_targets(session.targets.iter().map(String::as_str))
                .into_iter()
                .collect();
            let apps: Vec<String> = domains
                .iter()
                .filter_map(|d| config.app_bindings.get(d).cloned())
                .collect();
            (is_bypass_style, domains, apps)
        };

        if is_bypass_style {
            return Err(RequestError::ExtensionForbidden {
                reason: "cooldown sessions cannot be extended".into(),
            });
        }

        if !self.any_engaged(&domains, &apps).await {
            return Err(RequestError::ExtensionForbidden {
                reason: "user is not engaged with the session".into(),
            });
        }

        let new_end = session.end + ChronoDuration::seconds(minutes as i64 * 60);
        let updated = self
            .store
            .update_session_end(id, new_end)
            .map_err(store_err)?;
        if !updated {
            return Err(RequestError::ExtensionForbidden {
                reason: "session already ended".into(),
            });
        }

        info!(session_id = %id, minutes, new_end = %new_end, "Session extended");
        Ok(ResponsePayload::Extended { id, new_end })
    }

    async fn any_engaged(&self, domains: &[String], apps: &[String]) -> bool {
        for domain in domains {
            let query = EngagementQuery::Domain(domain.clone());
            match self.adapter.user_is_engaged(&query).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => warn!(domain = %domain, error = %e, "Engagement query failed"),
            }
        }
        for app in apps {
            let query = EngagementQuery::App(app.clone());
            match self.adapter.user_is_engaged(&query).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => warn!(app = %app, error = %e, "Engagement query failed"),
            }
        }
        false
    }

    fn reload(&self) -> Result<ResponsePayload, RequestError> {
        match taviblock_config::load_config(&self.config_path) {
            Ok(new_config) => {
                let targets = new_config.targets.len();
                let profiles = new_config.profiles.len();
                *self.config.write().unwrap() = new_config;
                info!(targets, profiles, "Configuration reloaded");
                Ok(ResponsePayload::Reloaded { targets, profiles })
            }
            Err(e) => {
                warn!(error = %e, "Configuration reload rejected");
                Err(RequestError::ConfigInvalid {
                    message: e.to_string(),
                })
            }
        }
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

fn session_view(session: &SessionRow, now: DateTime<Local>) -> SessionView {
    let starts_in_secs = (session.state == SessionState::Pending)
        .then(|| {
            session
                .effective_start
                .signed_duration_since(now)
                .num_seconds()
                .max(0) as u64
        });
    let remaining_secs = (session.state == SessionState::Active).then(|| {
        session.end.signed_duration_since(now).num_seconds().max(0) as u64
    });

    SessionView {
        id: session.id,
        profile: session.profile.clone(),
        targets: session.targets.clone(),
        state: session.state,
        requested_at: session.requested_at,
        effective_start: session.effective_start,
        end: session.end,
        all_targets: session.all_targets,
        starts_in_secs,
        remaining_secs,
    }
}

fn store_err(e: StoreError) -> RequestError {
    RequestError::StoreUnavailable {
        message: e.to_string(),
    }
}

fn admission_err(e: AdmissionError) -> RequestError {
    match e {
        AdmissionError::ProfileUnknown(name) => RequestError::ProfileUnknown { name },
        AdmissionError::TargetUnknown(name) => RequestError::TargetUnknown { name },
        AdmissionError::NoTargets => RequestError::InvalidRequest {
            message: "no targets requested and the profile selects none".into(),
        },
        AdmissionError::CooldownActive { remaining } => RequestError::CooldownActive {
            remaining_secs: remaining.as_secs(),
        },
        AdmissionError::TooManySessions { limit, current } => {
            RequestError::TooManySessions { limit, current }
        }
        AdmissionError::NothingToDo { reasons } => RequestError::NothingToDo { reasons },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write as _;
    use taviblock_platform::MockPlatform;
    use taviblock_store::SqliteStore;
    use taviblock_util::ManualClock;

    const CONFIG: &str = r#"
        config_version = 1
        default_profile = "unblock"

        [domains.gmail]
        domains = ["gmail.com", "mail.google.com"]

        [domains."slack.com"]

        [domains."reddit.com"]

        [domains."news.ycombinator.com"]

        [domains."netflix.com"]

        [profiles.unblock]
        wait = 5
        duration = 30

        [profiles.bypass]
        wait = 0
        duration = 5
        cooldown = 60
        all = true

        [app_bindings]
        "slack.com" = "Slack"
    "#;

    struct Fixture {
        control: ControlInterface,
        store: Arc<SqliteStore>,
        clock: Arc<ManualClock>,
        platform: Arc<MockPlatform>,
        _config_file: tempfile::NamedTempFile,
    }

    fn fixture() -> Fixture {
        let mut config_file = tempfile::NamedTempFile::new().unwrap();
        config_file.write_all(CONFIG.as_bytes()).unwrap();

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let platform = Arc::new(MockPlatform::new());
        let config = Arc::new(RwLock::new(
            taviblock_config::parse_config(CONFIG).unwrap(),
        ));

        let control = ControlInterface::new(
            store.clone(),
            config,
            platform.clone(),
            clock.clone(),
            config_file.path().to_path_buf(),
        );

        Fixture {
            control,
            store,
            clock,
            platform,
            _config_file: config_file,
        }
    }

    fn unblock_cmd(targets: &[&str]) -> Command {
        Command::Unblock {
            profile: None,
            targets: targets.iter().map(|s| s.to_string()).collect(),
            overrides: None,
            replace_id: None,
        }
    }

    async fn unblock_one(fixture: &Fixture, target: &str) -> SessionId {
        match fixture.control.execute(unblock_cmd(&[target])).await.unwrap() {
            ResponsePayload::Unblocked { created, .. } => created[0].id,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    fn activate(fixture: &Fixture, id: SessionId) {
        assert!(fixture
            .store
            .update_session_state(id, SessionState::Pending, SessionState::Active)
            .unwrap());
    }

    #[tokio::test]
    async fn unblock_creates_pending_sessions() {
        let fixture = fixture();

        let payload = fixture
            .control
            .execute(unblock_cmd(&["gmail", "slack"]))
            .await
            .unwrap();

        match payload {
            ResponsePayload::Unblocked { created, skipped } => {
                assert_eq!(created.len(), 2);
                assert!(skipped.is_empty());
                assert_eq!(created[0].state, SessionState::Pending);
                assert_eq!(created[0].starts_in_secs, Some(300));
                assert_eq!(created[1].targets, vec!["slack.com"]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_unblock_is_nothing_to_do() {
        let fixture = fixture();
        unblock_one(&fixture, "gmail").await;

        let err = fixture
            .control
            .execute(unblock_cmd(&["gmail"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::NothingToDo { .. }));
    }

    #[tokio::test]
    async fn status_reports_sessions_and_blocked_set() {
        let fixture = fixture();
        let id = unblock_one(&fixture, "gmail").await;
        activate(&fixture, id);

        let payload = fixture.control.execute(Command::Status).await.unwrap();
        match payload {
            ResponsePayload::Status(status) => {
                assert_eq!(status.sessions.len(), 1);
                assert_eq!(status.sessions[0].state, SessionState::Active);
                assert!(!status.blocked_domains.contains(&"gmail.com".to_string()));
                assert!(status.blocked_domains.contains(&"slack.com".to_string()));
                assert!(status.penalty.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_unknown_id_is_not_found() {
        let fixture = fixture();
        let err = fixture
            .control
            .execute(Command::Cancel {
                selector: CancelSelector::Id {
                    id: SessionId::new(99),
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn cancel_by_name_and_all() {
        let fixture = fixture();
        unblock_one(&fixture, "gmail").await;
        unblock_one(&fixture, "reddit").await;

        let payload = fixture
            .control
            .execute(Command::Cancel {
                selector: CancelSelector::Name {
                    name: "gmail".into(),
                },
            })
            .await
            .unwrap();
        assert!(matches!(payload, ResponsePayload::Cancelled { count: 1 }));

        let payload = fixture
            .control
            .execute(Command::Cancel {
                selector: CancelSelector::All,
            })
            .await
            .unwrap();
        assert!(matches!(payload, ResponsePayload::Cancelled { count: 1 }));
    }

    #[tokio::test]
    async fn cancelling_active_cooldown_session_records_bypass() {
        let fixture = fixture();

        let id = match fixture
            .control
            .execute(Command::Unblock {
                profile: Some("bypass".into()),
                targets: vec![],
                overrides: None,
                replace_id: None,
            })
            .await
            .unwrap()
        {
            ResponsePayload::Unblocked { created, .. } => created[0].id,
            other => panic!("unexpected payload {:?}", other),
        };
        activate(&fixture, id);

        fixture
            .control
            .execute(Command::Cancel {
                selector: CancelSelector::Id { id },
            })
            .await
            .unwrap();

        assert!(fixture.store.last_bypass("bypass").unwrap().is_some());
    }

    #[tokio::test]
    async fn replace_pending_session() {
        let fixture = fixture();
        let id = unblock_one(&fixture, "gmail").await;

        let payload = fixture
            .control
            .execute(Command::Replace {
                selector: SessionSelector::Id { id },
                new_targets: vec!["reddit".into()],
            })
            .await
            .unwrap();

        match payload {
            ResponsePayload::Replaced {
                cancelled, created, ..
            } => {
                assert_eq!(cancelled, id);
                assert_eq!(created.len(), 1);
                assert_eq!(created[0].targets, vec!["reddit.com"]);
                assert_eq!(created[0].profile, "unblock");
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let old = fixture.store.get_session(id).unwrap().unwrap();
        assert_eq!(old.state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn replace_active_session_is_rejected() {
        let fixture = fixture();
        let id = unblock_one(&fixture, "gmail").await;
        activate(&fixture, id);

        let err = fixture
            .control
            .execute(Command::Replace {
                selector: SessionSelector::Id { id },
                new_targets: vec!["reddit".into()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::SessionNotPending { id: got } if got == id));
    }

    #[tokio::test]
    async fn unblock_with_replace_id_frees_the_slot() {
        let fixture = fixture();
        let first = unblock_one(&fixture, "gmail").await;
        unblock_one(&fixture, "slack").await;
        unblock_one(&fixture, "reddit").await;
        unblock_one(&fixture, "news.ycombinator.com").await;

        let err = fixture
            .control
            .execute(unblock_cmd(&["netflix"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::TooManySessions { limit: 4, current: 4 }
        ));

        let payload = fixture
            .control
            .execute(Command::Unblock {
                profile: None,
                targets: vec!["netflix".into()],
                overrides: None,
                replace_id: Some(first),
            })
            .await
            .unwrap();
        match payload {
            ResponsePayload::Unblocked { created, .. } => {
                assert_eq!(created[0].targets, vec!["netflix.com"]);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let replaced = fixture.store.get_session(first).unwrap().unwrap();
        assert_eq!(replaced.state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn extend_requires_active_session() {
        let fixture = fixture();
        let id = unblock_one(&fixture, "gmail").await;

        let err = fixture
            .control
            .execute(Command::Extend { id, minutes: 5 })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ExtensionForbidden { .. }));
    }

    #[tokio::test]
    async fn extend_requires_engagement() {
        let fixture = fixture();
        let id = unblock_one(&fixture, "gmail").await;
        activate(&fixture, id);

        let err = fixture
            .control
            .execute(Command::Extend { id, minutes: 5 })
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::ExtensionForbidden { .. }));
    }

    #[tokio::test]
    async fn extend_active_engaged_session() {
        let fixture = fixture();
        let id = unblock_one(&fixture, "gmail").await;
        activate(&fixture, id);
        fixture.platform.set_engaged("gmail.com");

        let before = fixture.store.get_session(id).unwrap().unwrap().end;
        let payload = fixture
            .control
            .execute(Command::Extend { id, minutes: 5 })
            .await
            .unwrap();

        match payload {
            ResponsePayload::Extended { new_end, .. } => {
                assert_eq!(new_end, before + ChronoDuration::seconds(300));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn extend_engaged_via_bound_app() {
        let fixture = fixture();
        let id = unblock_one(&fixture, "slack").await;
        activate(&fixture, id);
        fixture.platform.set_engaged("Slack");

        assert!(fixture
            .control
            .execute(Command::Extend { id, minutes: 30 })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn extend_rejected_for_cooldown_profile() {
        let fixture = fixture();
        let id = match fixture
            .control
            .execute(Command::Unblock {
                profile: Some("bypass".into()),
                targets: vec![],
                overrides: None,
                replace_id: None,
            })
            .await
            .unwrap()
        {
            ResponsePayload::Unblocked { created, .. } => created[0].id,
            other => panic!("unexpected payload {:?}", other),
        };
        activate(&fixture, id);
        fixture.platform.set_engaged("gmail.com");

        let err = fixture
            .control
            .execute(Command::Extend { id, minutes: 5 })
            .await
            .unwrap_err();
        assert!(
            matches!(err, RequestError::ExtensionForbidden { reason } if reason.contains("cooldown"))
        );
    }

    #[tokio::test]
    async fn bypass_cooldown_round_trip() {
        let fixture = fixture();

        let bypass = Command::Unblock {
            profile: Some("bypass".into()),
            targets: vec![],
            overrides: None,
            replace_id: None,
        };

        let id = match fixture.control.execute(bypass.clone()).await.unwrap() {
            ResponsePayload::Unblocked { created, .. } => created[0].id,
            other => panic!("unexpected payload {:?}", other),
        };
        activate(&fixture, id);

        // Session completes at +300s; the scheduler records the marker
        fixture
            .store
            .update_session_state(id, SessionState::Active, SessionState::Expired)
            .unwrap();
        fixture
            .store
            .record_bypass("bypass", fixture.clock.now() + ChronoDuration::seconds(300))
            .unwrap();

        // 100 seconds after completion: rejected with the exact remainder
        fixture.clock.advance(Duration::from_secs(400));
        let err = fixture.control.execute(bypass.clone()).await.unwrap_err();
        assert!(
            matches!(err, RequestError::CooldownActive { remaining_secs: 3500 })
        );

        // Status reports the same remaining cooldown
        match fixture.control.execute(Command::Status).await.unwrap() {
            ResponsePayload::Status(status) => {
                assert_eq!(status.cooldowns.len(), 1);
                assert_eq!(status.cooldowns[0].profile, "bypass");
                assert_eq!(status.cooldowns[0].remaining_secs, 3500);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        // After the full cooldown: admitted again
        fixture.clock.advance(Duration::from_secs(3500));
        assert!(fixture.control.execute(bypass).await.is_ok());
    }

    #[tokio::test]
    async fn reload_swaps_configuration() {
        let fixture = fixture();

        let new_config = r#"
            config_version = 1
            default_profile = "unblock"

            [domains."example.org"]

            [profiles.unblock]
            wait = 1
            duration = 10
        "#;
        std::fs::write(fixture._config_file.path(), new_config).unwrap();

        let payload = fixture.control.execute(Command::Reload).await.unwrap();
        assert!(
            matches!(payload, ResponsePayload::Reloaded { targets: 1, profiles: 1 })
        );

        // The new target resolves, the old one no longer does
        assert!(fixture
            .control
            .execute(unblock_cmd(&["example.org"]))
            .await
            .is_ok());
        let err = fixture
            .control
            .execute(unblock_cmd(&["gmail"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::TargetUnknown { .. }));
    }

    #[tokio::test]
    async fn invalid_reload_keeps_old_configuration() {
        let fixture = fixture();
        std::fs::write(fixture._config_file.path(), "config_version = 99\n").unwrap();

        let err = fixture.control.execute(Command::Reload).await.unwrap_err();
        assert!(matches!(err, RequestError::ConfigInvalid { .. }));

        // Old config still in force
        assert!(fixture.control.execute(unblock_cmd(&["gmail"])).await.is_ok());
    }
}
