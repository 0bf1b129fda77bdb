//! Validated configuration model

use crate::schema::{RawConfig, RawProfile, RawTagRule, RawTarget, RawWait};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Validated configuration ready for use by the enforcement core
#[derive(Debug, Clone)]
pub struct Config {
    pub default_profile: Option<String>,
    pub targets: BTreeMap<String, Target>,
    pub profiles: BTreeMap<String, Profile>,
    pub penalty: PenaltyConfig,
    /// Domain -> application process name
    pub app_bindings: BTreeMap<String, String>,
}

/// A blockable unit: a single domain or a named group of domains
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub domains: Vec<String>,
    pub tags: BTreeSet<String>,
}

/// Wait policy for a profile
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub base: Duration,
    /// Added once per concurrent non-terminal session
    pub concurrent_penalty: Duration,
}

/// How a profile picks its targets when the request names none
#[derive(Debug, Clone)]
pub enum TargetSelector {
    /// Targets must come from the request
    None,
    /// Every configured target, as one synthetic session
    All,
    /// Targets bearing any of these tags
    Tags(Vec<String>),
    /// Exactly these target names
    Only(Vec<String>),
}

/// A rule replacing the computed wait when target tags intersect
#[derive(Debug, Clone)]
pub struct TagRule {
    pub tags: BTreeSet<String>,
    pub wait_override: Duration,
}

/// A named unblock policy
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub description: Option<String>,
    pub wait: WaitPolicy,
    pub duration: Duration,
    pub cooldown: Option<Duration>,
    pub selector: TargetSelector,
    pub tag_rules: Vec<TagRule>,
}

impl Profile {
    /// Bypass-style profiles (any cooldown) are exempt from the pre-expiry
    /// prompt and cannot be extended.
    pub fn is_bypass_style(&self) -> bool {
        self.cooldown.is_some()
    }
}

/// Progressive-penalty settings
#[derive(Debug, Clone, Default)]
pub struct PenaltyConfig {
    pub enabled: bool,
    pub per_unblock: Duration,
    pub exclude_profiles: BTreeSet<String>,
}

impl PenaltyConfig {
    pub fn applies_to(&self, profile: &str) -> bool {
        self.enabled && !self.exclude_profiles.contains(profile)
    }
}

impl Config {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let targets = raw
            .domains
            .into_iter()
            .map(|(name, t)| (name.clone(), Target::from_raw(name, t)))
            .collect();

        let profiles = raw
            .profiles
            .into_iter()
            .map(|(name, p)| (name.clone(), Profile::from_raw(name, p)))
            .collect();

        let penalty = raw
            .progressive_penalty
            .map(|p| PenaltyConfig {
                enabled: p.enabled,
                per_unblock: Duration::from_secs(p.per_unblock),
                exclude_profiles: p.exclude_profiles.into_iter().collect(),
            })
            .unwrap_or_default();

        Self {
            default_profile: raw.default_profile,
            targets,
            profiles,
            penalty,
            app_bindings: raw.app_bindings,
        }
    }

    pub fn get_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Look up a target by name, retrying with a `.com` suffix so that
    /// `slack` finds `slack.com`.
    pub fn resolve_target(&self, name: &str) -> Option<&Target> {
        if let Some(target) = self.targets.get(name) {
            return Some(target);
        }
        if !name.ends_with(".com") {
            return self.targets.get(&format!("{}.com", name));
        }
        None
    }

    /// All targets bearing any of the given tags
    pub fn targets_with_any_tag(&self, tags: &[String]) -> Vec<&Target> {
        self.targets
            .values()
            .filter(|t| tags.iter().any(|tag| t.tags.contains(tag)))
            .collect()
    }

    /// The union of every configured target's domains. This is the blocked
    /// set at rest.
    pub fn all_domains(&self) -> BTreeSet<String> {
        self.targets
            .values()
            .flat_map(|t| t.domains.iter().cloned())
            .collect()
    }

    /// Domains covered by a list of target names. The synthetic `*` target
    /// covers everything; names that no longer resolve are skipped, which
    /// keeps their domains blocked.
    pub fn domains_for_targets<'a, I>(&self, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut domains = BTreeSet::new();
        for name in names {
            if name == crate::ALL_TARGETS {
                return self.all_domains();
            }
            if let Some(target) = self.resolve_target(name) {
                domains.extend(target.domains.iter().cloned());
            }
        }
        domains
    }
}

/// Synthetic target name carried by sessions that cover every target
pub const ALL_TARGETS: &str = "*";

impl Target {
    fn from_raw(name: String, raw: RawTarget) -> Self {
        let domains = match raw.domains {
            Some(domains) => domains,
            None => vec![name.clone()],
        };
        Self {
            name,
            domains,
            tags: raw.tags.into_iter().collect(),
        }
    }
}

impl Profile {
    fn from_raw(name: String, raw: RawProfile) -> Self {
        let wait = match raw.wait {
            RawWait::Minutes(m) => WaitPolicy {
                base: Duration::from_secs(m * 60),
                concurrent_penalty: Duration::ZERO,
            },
            RawWait::Split {
                base,
                concurrent_penalty,
            } => WaitPolicy {
                base: Duration::from_secs(base * 60),
                concurrent_penalty: Duration::from_secs(concurrent_penalty * 60),
            },
        };

        let selector = if raw.all {
            TargetSelector::All
        } else if let Some(tags) = raw.tags {
            TargetSelector::Tags(tags)
        } else if let Some(only) = raw.only {
            TargetSelector::Only(only)
        } else {
            TargetSelector::None
        };

        let tag_rules = raw
            .tag_rules
            .unwrap_or_default()
            .into_iter()
            .map(|r: RawTagRule| TagRule {
                tags: r.tags.into_iter().collect(),
                wait_override: Duration::from_secs(r.wait_override * 60),
            })
            .collect();

        Self {
            name,
            description: raw.description,
            wait,
            duration: Duration::from_secs(raw.duration * 60),
            cooldown: raw.cooldown.map(|m| Duration::from_secs(m * 60)),
            selector,
            tag_rules,
        }
    }
}
