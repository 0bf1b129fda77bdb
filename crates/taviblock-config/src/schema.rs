//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Profile used when a request names none
    pub default_profile: Option<String>,

    /// Blockable targets: a key with a `domains` list is a group, otherwise
    /// the key itself is the domain
    #[serde(default)]
    pub domains: BTreeMap<String, RawTarget>,

    /// Unblock profiles
    #[serde(default)]
    pub profiles: BTreeMap<String, RawProfile>,

    /// Progressive daily penalty
    pub progressive_penalty: Option<RawProgressivePenalty>,

    /// Domain-to-application bindings (e.g. "slack.com" = "Slack")
    #[serde(default)]
    pub app_bindings: BTreeMap<String, String>,

    /// Unrecognized top-level keys; logged as warnings, never fatal
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
}

/// Raw target definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawTarget {
    #[serde(default)]
    pub tags: Vec<String>,

    /// Present for groups; absent when the target name is the domain
    pub domains: Option<Vec<String>>,
}

/// Raw profile definition
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawProfile {
    pub description: Option<String>,

    /// Minutes before the session activates
    pub wait: RawWait,

    /// Minutes the session stays active
    pub duration: u64,

    /// Minutes of cooldown after a session under this profile completes
    pub cooldown: Option<u64>,

    /// Selector: every configured target
    #[serde(default)]
    pub all: bool,

    /// Selector: targets bearing any of these tags
    pub tags: Option<Vec<String>>,

    /// Selector: exactly these target names
    pub only: Option<Vec<String>>,

    /// Per-target wait overrides keyed by tags
    pub tag_rules: Option<Vec<RawTagRule>>,
}

/// Wait setting: scalar minutes or base plus concurrency penalty
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawWait {
    Minutes(u64),
    Split {
        base: u64,
        #[serde(default)]
        concurrent_penalty: u64,
    },
}

/// A tag rule replacing the computed wait for matching targets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawTagRule {
    pub tags: Vec<String>,
    pub wait_override: u64,
}

/// Progressive-penalty settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawProgressivePenalty {
    pub enabled: bool,

    /// Seconds added to the wait per unblock already admitted today
    pub per_unblock: u64,

    #[serde(default)]
    pub exclude_profiles: Vec<String>,
}
