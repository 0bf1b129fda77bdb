//! No-op platform adapter
//!
//! The daemon wires this when no OS adapter is installed: hosts-file
//! blocking still works, tab/app enforcement and prompts do nothing.
//! Packaging supplies the platform-specific adapter separately.

use async_trait::async_trait;
use tracing::debug;

use crate::{
    EngagementQuery, ExpiryPrompt, PlatformAdapter, PlatformResult, PromptChoice, TabHandle,
};

/// Adapter that reports no tabs, no apps, and never prompts
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlatform;

#[async_trait]
impl PlatformAdapter for NullPlatform {
    async fn enumerate_tabs_for(&self, _domain: &str) -> PlatformResult<Vec<TabHandle>> {
        Ok(Vec::new())
    }

    async fn close_tab(&self, _tab: &TabHandle) -> PlatformResult<()> {
        Ok(())
    }

    async fn app_is_running(&self, _name: &str) -> PlatformResult<bool> {
        Ok(false)
    }

    async fn terminate_app(&self, name: &str) -> PlatformResult<()> {
        debug!(app = %name, "No platform adapter installed, skipping terminate");
        Ok(())
    }

    async fn user_is_engaged(&self, _query: &EngagementQuery) -> PlatformResult<bool> {
        Ok(false)
    }

    async fn prompt_user(&self, _prompt: &ExpiryPrompt) -> PlatformResult<PromptChoice> {
        Ok(PromptChoice::LetClose)
    }
}
