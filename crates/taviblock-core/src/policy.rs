//! Pure admission logic
//!
//! [`admit`] reads a snapshot of the store and emits a plan; it never
//! mutates anything. Only the control interface commits plans.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use std::collections::BTreeSet;
use std::time::Duration;
use taviblock_api::{SessionState, SkipReason, SkippedTarget};
use taviblock_config::{Config, Profile, TargetSelector, ALL_TARGETS};
use taviblock_store::{SessionDraft, SessionRow};
use taviblock_util::SessionId;
use thiserror::Error;

/// Hard ceiling on concurrent non-terminal sessions
pub const MAX_CONCURRENT: usize = 4;

/// Store contents the admission decision depends on
#[derive(Debug, Clone, Default)]
pub struct AdmissionSnapshot {
    pub non_terminal: Vec<SessionRow>,
    /// Most recent completion of a cooldown session under this profile
    pub last_bypass: Option<DateTime<Local>>,
    /// Unblocks admitted today (current day bucket)
    pub penalty_count: u32,
}

/// Explicit wait/duration overrides. An explicit wait replaces the computed
/// wait entirely, tag rules and penalties included.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionOverrides {
    pub wait: Option<Duration>,
    pub duration: Option<Duration>,
}

/// The plan an admission produces
#[derive(Debug)]
pub struct AdmissionPlan {
    pub drafts: Vec<SessionDraft>,
    pub skipped: Vec<SkippedTarget>,
    /// How many times the progressive-penalty counter is bumped on commit
    pub penalty_bumps: u32,
}

/// Admission failures
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("unknown profile '{0}'")]
    ProfileUnknown(String),

    #[error("unknown target '{0}'")]
    TargetUnknown(String),

    #[error("no targets requested and profile selects none")]
    NoTargets,

    #[error("cooldown active for {remaining:?}")]
    CooldownActive { remaining: Duration },

    #[error("session limit reached ({current} of {limit})")]
    TooManySessions { limit: usize, current: usize },

    #[error("every requested target is already covered")]
    NothingToDo { reasons: Vec<SkippedTarget> },
}

/// What the admission will create sessions for
enum AdmissionScope {
    /// One synthetic session covering every target
    Everything,
    /// One session per named target
    Targets(Vec<String>),
}

/// Decide whether a new unblock is admissible and plan its sessions.
///
/// `replace_id` names a session the caller will tear down in the same
/// request; it is exempted from the concurrency count and penalty.
pub fn admit(
    config: &Config,
    profile_name: &str,
    requested: &[String],
    overrides: &AdmissionOverrides,
    replace_id: Option<SessionId>,
    snapshot: &AdmissionSnapshot,
    now: DateTime<Local>,
) -> Result<AdmissionPlan, AdmissionError> {
    let profile = config
        .get_profile(profile_name)
        .ok_or_else(|| AdmissionError::ProfileUnknown(profile_name.to_string()))?;

    let scope = resolve_scope(config, profile, requested)?;

    // Cooldown gate
    if let Some(cooldown) = profile.cooldown {
        if let Some(last) = snapshot.last_bypass {
            let since = now.signed_duration_since(last);
            let cooldown_chrono = ChronoDuration::from_std(cooldown).unwrap_or_default();
            if since < cooldown_chrono {
                let remaining = (cooldown_chrono - since)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                return Err(AdmissionError::CooldownActive { remaining });
            }
        }
    }

    // Duplicate suppression
    let existing: Vec<&SessionRow> = snapshot
        .non_terminal
        .iter()
        .filter(|s| Some(s.id) != replace_id)
        .collect();

    let mut admitted: Vec<String> = Vec::new();
    let mut skipped: Vec<SkippedTarget> = Vec::new();

    match &scope {
        AdmissionScope::Everything => {
            let duplicate = existing
                .iter()
                .find(|s| s.profile == profile.name && s.all_targets);
            match duplicate {
                Some(s) => skipped.push(SkippedTarget {
                    target: ALL_TARGETS.to_string(),
                    reason: skip_reason(s),
                }),
                None => admitted.push(ALL_TARGETS.to_string()),
            }
        }
        AdmissionScope::Targets(names) => {
            for name in names {
                let duplicate = existing
                    .iter()
                    .find(|s| s.profile == profile.name && s.covers_target(name));
                match duplicate {
                    Some(s) => skipped.push(SkippedTarget {
                        target: name.clone(),
                        reason: skip_reason(s),
                    }),
                    None => admitted.push(name.clone()),
                }
            }
        }
    }

    if admitted.is_empty() {
        return Err(AdmissionError::NothingToDo { reasons: skipped });
    }

    // Concurrency limit: every admitted target counts separately
    let current = existing.len();
    if current + admitted.len() > MAX_CONCURRENT {
        return Err(AdmissionError::TooManySessions {
            limit: MAX_CONCURRENT,
            current,
        });
    }

    // Wait computation
    let wait = match overrides.wait {
        Some(wait) => wait,
        None => compute_wait(config, profile, &admitted, current, snapshot.penalty_count),
    };
    let duration = overrides.duration.unwrap_or(profile.duration);

    let effective_start =
        now + ChronoDuration::from_std(wait).unwrap_or_else(|_| ChronoDuration::zero());
    let end = effective_start
        + ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero());

    let all_targets = matches!(scope, AdmissionScope::Everything);
    let drafts = admitted
        .iter()
        .map(|target| SessionDraft {
            profile: profile.name.clone(),
            targets: vec![target.clone()],
            requested_at: now,
            effective_start,
            end,
            all_targets,
        })
        .collect::<Vec<_>>();

    let penalty_bumps = if config.penalty.applies_to(&profile.name) {
        drafts.len() as u32
    } else {
        0
    };

    Ok(AdmissionPlan {
        drafts,
        skipped,
        penalty_bumps,
    })
}

fn skip_reason(session: &SessionRow) -> SkipReason {
    match session.state {
        SessionState::Active => SkipReason::AlreadyActive {
            session: session.id,
        },
        _ => SkipReason::AlreadyPending {
            session: session.id,
        },
    }
}

fn resolve_scope(
    config: &Config,
    profile: &Profile,
    requested: &[String],
) -> Result<AdmissionScope, AdmissionError> {
    // Explicit targets from the request override the profile's selectors
    if !requested.is_empty() {
        let mut names = Vec::new();
        for raw in requested {
            let target = config
                .resolve_target(raw.trim())
                .ok_or_else(|| AdmissionError::TargetUnknown(raw.clone()))?;
            if !names.contains(&target.name) {
                names.push(target.name.clone());
            }
        }
        return Ok(AdmissionScope::Targets(names));
    }

    match &profile.selector {
        TargetSelector::All => Ok(AdmissionScope::Everything),
        TargetSelector::Tags(tags) => {
            let names: Vec<String> = config
                .targets_with_any_tag(tags)
                .iter()
                .map(|t| t.name.clone())
                .collect();
            if names.is_empty() {
                return Err(AdmissionError::NoTargets);
            }
            Ok(AdmissionScope::Targets(names))
        }
        TargetSelector::Only(names) => {
            let mut resolved = Vec::new();
            for name in names {
                let target = config
                    .resolve_target(name)
                    .ok_or_else(|| AdmissionError::TargetUnknown(name.clone()))?;
                resolved.push(target.name.clone());
            }
            Ok(AdmissionScope::Targets(resolved))
        }
        TargetSelector::None => Err(AdmissionError::NoTargets),
    }
}

/// Base wait plus concurrency penalty, replaced by a matching tag rule,
/// plus the progressive daily penalty.
fn compute_wait(
    config: &Config,
    profile: &Profile,
    admitted: &[String],
    concurrent: usize,
    penalty_count: u32,
) -> Duration {
    let mut wait = profile.wait.base + profile.wait.concurrent_penalty * concurrent as u32;

    // A matching tag rule replaces the wait; the largest override wins
    let tags = admitted_tags(config, admitted);
    let best_override = profile
        .tag_rules
        .iter()
        .filter(|rule| rule.tags.iter().any(|t| tags.contains(t)))
        .map(|rule| rule.wait_override)
        .max();
    if let Some(override_wait) = best_override {
        wait = override_wait;
    }

    if config.penalty.applies_to(&profile.name) {
        wait += config.penalty.per_unblock * penalty_count;
    }

    wait
}

fn admitted_tags(config: &Config, admitted: &[String]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for name in admitted {
        if name == ALL_TARGETS {
            for target in config.targets.values() {
                tags.extend(target.tags.iter().cloned());
            }
        } else if let Some(target) = config.resolve_target(name) {
            tags.extend(target.tags.iter().cloned());
        }
    }
    tags
}
