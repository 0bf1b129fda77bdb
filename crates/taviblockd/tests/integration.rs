//! Integration tests for the enforcement core
//!
//! These wire the real scheduler, control interface, reconciler, and
//! enforcer together against an in-memory store, a manual clock, a mock
//! platform, and a temporary hosts file, then drive whole scenarios
//! tick by tick.

use chrono::{DateTime, Local, TimeZone};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use taviblock_api::{
    CancelSelector, Command, RequestError, ResponsePayload, SessionSelector, SessionState,
};
use taviblock_core::{
    ActiveEnforcer, BlockedSet, ControlInterface, ControlRequest, CoreEvent, HostsReconciler,
    Scheduler,
};
use taviblock_platform::{MockPlatform, PromptChoice};
use taviblock_store::{SqliteStore, Store};
use taviblock_util::{ManualClock, SessionId};
use tokio::sync::{mpsc, watch};

const CONFIG: &str = r#"
    config_version = 1
    default_profile = "unblock"

    [domains.gmail]
    domains = ["gmail.com", "mail.google.com"]

    [domains."slack.com"]

    [domains."reddit.com"]

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

struct Harness {
    store: Arc<SqliteStore>,
    clock: Arc<ManualClock>,
    platform: Arc<MockPlatform>,
    control: ControlInterface,
    scheduler: Scheduler,
    reconciler: HostsReconciler,
    enforcer: ActiveEnforcer,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
    _blocked_rx: watch::Receiver<BlockedSet>,
    _dir: tempfile::TempDir,
}

fn t0() -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let hosts_path = dir.path().join("hosts");
    std::fs::write(&hosts_path, "127.0.0.1 localhost\n").unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, CONFIG).unwrap();

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(t0()));
    let platform = Arc::new(MockPlatform::new());
    let config = Arc::new(RwLock::new(taviblock_config::parse_config(CONFIG).unwrap()));

    let (scheduler, blocked_rx) = Scheduler::new(store.clone(), clock.clone(), config.clone());
    let reconciler = HostsReconciler::new(&hosts_path);
    let control = ControlInterface::new(
        store.clone(),
        config.clone(),
        platform.clone(),
        clock.clone(),
        config_path,
    );
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let enforcer = ActiveEnforcer::new(platform.clone(), config, control_tx);

    Harness {
        store,
        clock,
        platform,
        control,
        scheduler,
        reconciler,
        enforcer,
        control_rx,
        _blocked_rx: blocked_rx,
        _dir: dir,
    }
}

impl Harness {
    /// One daemon tick: scheduler, hosts reconciliation, enforcer events
    async fn tick(&mut self) -> Vec<CoreEvent> {
        let events = self.scheduler.tick();
        self.reconciler
            .reconcile(&self.scheduler.blocked_set())
            .unwrap();
        for event in &events {
            self.enforcer.handle_event(event).await;
        }
        events
    }

    async fn advance(&mut self, secs: u64) -> Vec<CoreEvent> {
        self.clock.advance(Duration::from_secs(secs));
        self.tick().await
    }

    fn hosts(&self) -> String {
        std::fs::read_to_string(self.reconciler.hosts_path()).unwrap()
    }

    async fn unblock(&self, targets: &[&str]) -> Vec<SessionId> {
        let payload = self
            .control
            .execute(Command::Unblock {
                profile: None,
                targets: targets.iter().map(|s| s.to_string()).collect(),
                overrides: None,
                replace_id: None,
            })
            .await
            .unwrap();
        match payload {
            ResponsePayload::Unblocked { created, .. } => created.iter().map(|v| v.id).collect(),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    /// Service one queued extension request, as the daemon loop would
    async fn pump_control(&mut self) {
        let request = self.control_rx.recv().await.unwrap();
        let result = self.control.execute(request.command).await;
        let _ = request.respond_to.send(result);
    }
}

#[tokio::test]
async fn scenario_basic_unblock_lifecycle() {
    let mut harness = harness();

    harness.tick().await;
    assert!(harness.hosts().contains("127.0.0.1 gmail.com"));

    // t=0: unblock gmail under the default profile (wait 5m, duration 30m)
    let ids = harness.unblock(&["gmail"]).await;
    assert_eq!(ids[0].as_i64(), 1);

    // Still pending before the wait elapses
    harness.advance(299).await;
    assert!(harness.hosts().contains("127.0.0.1 gmail.com"));
    assert_eq!(
        harness.store.get_session(ids[0]).unwrap().unwrap().state,
        SessionState::Pending
    );

    // t=300: active, gmail domains leave the managed region
    let events = harness.advance(1).await;
    assert!(matches!(events[0], CoreEvent::SessionActivated { .. }));
    let hosts = harness.hosts();
    assert!(!hosts.contains("gmail.com"));
    assert!(!hosts.contains("mail.google.com"));
    assert!(hosts.contains("127.0.0.1 slack.com"));
    assert!(hosts.contains("127.0.0.1 localhost"));

    // t=2100: expired, everything blocked again
    let events = harness.advance(1800).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::SessionExpired { .. })));
    let hosts = harness.hosts();
    assert!(hosts.contains("127.0.0.1 gmail.com"));
    assert!(hosts.contains("::1 mail.google.com"));
}

#[tokio::test]
async fn scenario_replace_pending_session() {
    let mut harness = harness();
    let ids = harness.unblock(&["gmail"]).await;

    // t=60: replace the pending session with reddit
    harness.clock.advance(Duration::from_secs(60));
    let payload = harness
        .control
        .execute(Command::Replace {
            selector: SessionSelector::Id { id: ids[0] },
            new_targets: vec!["reddit".into()],
        })
        .await
        .unwrap();

    match payload {
        ResponsePayload::Replaced {
            cancelled, created, ..
        } => {
            assert_eq!(cancelled, ids[0]);
            assert_eq!(created[0].targets, vec!["reddit.com"]);
            assert_eq!(created[0].profile, "unblock");
        }
        other => panic!("unexpected payload {:?}", other),
    }

    // Replacing an active session is rejected
    let ids = harness.unblock(&["slack"]).await;
    harness.advance(300).await;
    let err = harness
        .control
        .execute(Command::Replace {
            selector: SessionSelector::Id { id: ids[0] },
            new_targets: vec!["gmail".into()],
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::SessionNotPending { .. }));
}

#[tokio::test]
async fn scenario_bypass_cooldown() {
    let mut harness = harness();

    // t=0: bypass unblocks everything immediately
    let payload = harness
        .control
        .execute(Command::Unblock {
            profile: Some("bypass".into()),
            targets: vec![],
            overrides: None,
            replace_id: None,
        })
        .await
        .unwrap();
    let id = match payload {
        ResponsePayload::Unblocked { created, .. } => {
            assert!(created[0].all_targets);
            created[0].id
        }
        other => panic!("unexpected payload {:?}", other),
    };

    harness.tick().await;
    let hosts = harness.hosts();
    assert!(!hosts.contains("gmail.com"));
    assert!(!hosts.contains("slack.com"));

    // t=301: expired, cooldown marker anchored at end (t=300)
    harness.advance(301).await;
    assert_eq!(
        harness.store.get_session(id).unwrap().unwrap().state,
        SessionState::Expired
    );
    assert!(harness.hosts().contains("127.0.0.1 gmail.com"));

    // t=400: rejected with 3500 seconds remaining
    harness.clock.advance(Duration::from_secs(99));
    let err = harness
        .control
        .execute(Command::Unblock {
            profile: Some("bypass".into()),
            targets: vec![],
            overrides: None,
            replace_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::CooldownActive { remaining_secs: 3500 }));

    // After the cooldown from completion: admitted
    harness.clock.advance(Duration::from_secs(3500));
    assert!(harness
        .control
        .execute(Command::Unblock {
            profile: Some("bypass".into()),
            targets: vec![],
            overrides: None,
            replace_id: None,
        })
        .await
        .is_ok());
}

#[tokio::test]
async fn scenario_pre_expiry_extend() {
    let mut harness = harness();

    let ids = harness.unblock(&["gmail"]).await;
    harness.advance(300).await; // activate; end at t=2100

    // The user keeps a tab open and is engaged; the prompt offers an
    // extension and they take 5 minutes
    harness.platform.set_engaged("gmail.com");
    harness
        .platform
        .answer_prompts_with(PromptChoice::Extend { minutes: 5 });

    let events = harness.advance(1745).await; // t=2045, remaining 55s
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::SessionExpiring { prompt_exempt: false, .. })));

    harness.pump_control().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.platform.prompt_count(), 1);

    let session = harness.store.get_session(ids[0]).unwrap().unwrap();
    assert_eq!(
        session.end,
        t0() + chrono::Duration::seconds(2100 + 300)
    );

    // Still active past the old end
    let events = harness.advance(60).await; // t=2105
    assert!(events.is_empty());
    assert!(!harness.hosts().contains("gmail.com"));

    // A second SessionExpiring fires for the new end, but the prompt
    // machine is resolved: no second dialog
    let events = harness.advance(250).await; // t=2355, remaining 45s
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::SessionExpiring { .. })));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.platform.prompt_count(), 1);

    // t=2401: finally expires
    let events = harness.advance(46).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::SessionExpired { .. })));
    assert!(harness.hosts().contains("127.0.0.1 gmail.com"));
}

#[tokio::test]
async fn bypass_sessions_never_prompt_or_extend() {
    let mut harness = harness();

    let payload = harness
        .control
        .execute(Command::Unblock {
            profile: Some("bypass".into()),
            targets: vec![],
            overrides: None,
            replace_id: None,
        })
        .await
        .unwrap();
    let id = match payload {
        ResponsePayload::Unblocked { created, .. } => created[0].id,
        other => panic!("unexpected payload {:?}", other),
    };

    harness.tick().await;
    harness.platform.set_engaged("gmail.com");

    // Inside the pre-expiry window the event is exempt: no prompt
    let events = harness.advance(250).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::SessionExpiring { prompt_exempt: true, .. })));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.platform.prompt_count(), 0);

    // And a direct extend is rejected
    let err = harness
        .control
        .execute(Command::Extend { id, minutes: 5 })
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::ExtensionForbidden { .. }));
}

#[tokio::test]
async fn enforcer_closes_tabs_and_apps_for_blocked_domains() {
    let mut harness = harness();

    harness.platform.open_tab("slack.com");
    harness.platform.open_tab("www.slack.com");
    harness.platform.open_tab("app.slack.com"); // subdomain: untouched
    harness.platform.start_app("Slack");

    harness.tick().await;
    let blocked = harness.scheduler.blocked_set();
    harness.enforcer.enforce(&blocked).await;

    assert_eq!(harness.platform.open_hosts(), vec!["app.slack.com"]);
    assert_eq!(
        *harness.platform.terminated_apps.lock().unwrap(),
        vec!["Slack".to_string()]
    );
}

#[tokio::test]
async fn cancel_active_session_reblocks_on_next_tick() {
    let mut harness = harness();

    let ids = harness.unblock(&["gmail"]).await;
    harness.advance(300).await;
    assert!(!harness.hosts().contains("gmail.com"));

    let payload = harness
        .control
        .execute(Command::Cancel {
            selector: CancelSelector::All,
        })
        .await
        .unwrap();
    assert!(matches!(payload, ResponsePayload::Cancelled { count: 1 }));

    harness.tick().await;
    assert!(harness.hosts().contains("127.0.0.1 gmail.com"));
    assert_eq!(
        harness.store.get_session(ids[0]).unwrap().unwrap().state,
        SessionState::Cancelled
    );
}

#[tokio::test]
async fn restart_reconciles_full_set_then_resumes_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let hosts_path = dir.path().join("hosts");
    std::fs::write(&hosts_path, "127.0.0.1 localhost\n").unwrap();
    let db_path = dir.path().join("state.db");

    let clock = Arc::new(ManualClock::new(t0()));
    let config = Arc::new(RwLock::new(taviblock_config::parse_config(CONFIG).unwrap()));

    // First life: unblock gmail and activate it
    {
        let store: Arc<SqliteStore> = Arc::new(SqliteStore::open(&db_path).unwrap());
        let (mut scheduler, _rx) =
            Scheduler::new(store.clone(), clock.clone(), config.clone());
        let reconciler = HostsReconciler::new(&hosts_path);

        store
            .insert_session(&taviblock_store::SessionDraft {
                profile: "unblock".into(),
                targets: vec!["gmail".into()],
                requested_at: t0(),
                effective_start: t0(),
                end: t0() + chrono::Duration::seconds(1800),
                all_targets: false,
            })
            .unwrap();
        scheduler.tick();
        reconciler.reconcile(&scheduler.blocked_set()).unwrap();
        assert!(!std::fs::read_to_string(&hosts_path)
            .unwrap()
            .contains("gmail.com"));
        // Process dies here without any cleanup
    }

    // Second life: before the first tick the hosts file is fully blocked
    let store: Arc<SqliteStore> = Arc::new(SqliteStore::open(&db_path).unwrap());
    let (mut scheduler, _rx) = Scheduler::new(store.clone(), clock.clone(), config);
    let reconciler = HostsReconciler::new(&hosts_path);

    scheduler.publish_full_set();
    reconciler.reconcile(&scheduler.blocked_set()).unwrap();
    assert!(std::fs::read_to_string(&hosts_path)
        .unwrap()
        .contains("127.0.0.1 gmail.com"));

    // The surviving active session relaxes the set again on the next tick
    scheduler.tick();
    reconciler.reconcile(&scheduler.blocked_set()).unwrap();
    assert!(!std::fs::read_to_string(&hosts_path)
        .unwrap()
        .contains("gmail.com"));
}

#[tokio::test]
async fn hosts_file_is_byte_stable_across_idle_ticks() {
    let mut harness = harness();
    harness.unblock(&["gmail"]).await;
    harness.advance(300).await;

    let snapshot = harness.hosts();
    for _ in 0..3 {
        harness.advance(1).await;
    }
    assert_eq!(harness.hosts(), snapshot);
}

#[tokio::test]
async fn concurrent_penalty_delays_second_session() {
    let mut harness = harness();

    // The default profile has a scalar wait; swap in the split-wait config
    let penalty_config = r#"
        config_version = 1
        default_profile = "unblock"

        [domains.gmail]
        domains = ["gmail.com", "mail.google.com"]

        [domains."slack.com"]

        [profiles.unblock]
        wait = { base = 5, concurrent_penalty = 5 }
        duration = 30
    "#;
    std::fs::write(harness._dir.path().join("config.toml"), penalty_config).unwrap();
    harness.control.execute(Command::Reload).await.unwrap();

    harness.unblock(&["gmail"]).await;

    harness.clock.advance(Duration::from_secs(10));
    let ids = harness.unblock(&["slack"]).await;

    let session = harness.store.get_session(ids[0]).unwrap().unwrap();
    // 10s in, base 5m plus one concurrent session's 5m penalty
    assert_eq!(
        session.effective_start,
        t0() + chrono::Duration::seconds(10 + 300 + 300)
    );
}
