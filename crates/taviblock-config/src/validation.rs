//! Configuration validation

use crate::schema::{RawConfig, RawProfile};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Profile '{profile}': {message}")]
    ProfileError { profile: String, message: String },

    #[error("Target '{target}': {message}")]
    TargetError { target: String, message: String },

    #[error("default_profile '{0}' is not a configured profile")]
    UnknownDefaultProfile(String),

    #[error("progressive_penalty.exclude_profiles names unknown profile '{0}'")]
    UnknownExcludedProfile(String),

    #[error("app_bindings: '{domain}' is not covered by any configured target")]
    UnboundAppDomain { domain: String },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(default) = &config.default_profile {
        if !config.profiles.contains_key(default) {
            errors.push(ValidationError::UnknownDefaultProfile(default.clone()));
        }
    }

    for (name, target) in &config.domains {
        if let Some(domains) = &target.domains {
            if domains.is_empty() {
                errors.push(ValidationError::TargetError {
                    target: name.clone(),
                    message: "group declares an empty domains list".into(),
                });
            }
            for domain in domains {
                if domain.trim().is_empty() {
                    errors.push(ValidationError::TargetError {
                        target: name.clone(),
                        message: "group contains an empty domain".into(),
                    });
                }
            }
        }
    }

    for (name, profile) in &config.profiles {
        errors.extend(validate_profile(name, profile));
    }

    if let Some(penalty) = &config.progressive_penalty {
        for excluded in &penalty.exclude_profiles {
            if !config.profiles.contains_key(excluded) {
                errors.push(ValidationError::UnknownExcludedProfile(excluded.clone()));
            }
        }
    }

    // Every bound domain must be one the blocker can actually enforce
    let mut known_domains: Vec<&str> = Vec::new();
    for (name, target) in &config.domains {
        match &target.domains {
            Some(domains) => known_domains.extend(domains.iter().map(String::as_str)),
            None => known_domains.push(name.as_str()),
        }
    }
    for domain in config.app_bindings.keys() {
        if !known_domains.contains(&domain.as_str()) {
            errors.push(ValidationError::UnboundAppDomain {
                domain: domain.clone(),
            });
        }
    }

    errors
}

fn validate_profile(name: &str, profile: &RawProfile) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if profile.duration == 0 {
        errors.push(ValidationError::ProfileError {
            profile: name.into(),
            message: "duration must be at least one minute".into(),
        });
    }

    let selector_count = usize::from(profile.all)
        + usize::from(profile.tags.is_some())
        + usize::from(profile.only.is_some());
    if selector_count > 1 {
        errors.push(ValidationError::ProfileError {
            profile: name.into(),
            message: "at most one of all/tags/only may be set".into(),
        });
    }

    if let Some(tags) = &profile.tags {
        if tags.is_empty() {
            errors.push(ValidationError::ProfileError {
                profile: name.into(),
                message: "tags selector is empty".into(),
            });
        }
    }

    if let Some(only) = &profile.only {
        if only.is_empty() {
            errors.push(ValidationError::ProfileError {
                profile: name.into(),
                message: "only selector is empty".into(),
            });
        }
    }

    if let Some(rules) = &profile.tag_rules {
        for (idx, rule) in rules.iter().enumerate() {
            if rule.tags.is_empty() {
                errors.push(ValidationError::ProfileError {
                    profile: name.into(),
                    message: format!("tag_rules[{}] declares no tags", idx),
                });
            }
        }
    }

    errors
}
