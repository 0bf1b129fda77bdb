//! Platform adapter traits

use async_trait::async_trait;
use std::time::Duration;
use taviblock_util::SessionId;
use thiserror::Error;

/// Errors from platform adapter operations
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Browser scripting failed: {0}")]
    BrowserFailed(String),

    #[error("App control failed: {0}")]
    AppFailed(String),

    #[error("Prompt failed: {0}")]
    PromptFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// A browser tab as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabHandle {
    /// Opaque platform identifier
    pub id: u64,
    /// URL host of the tab
    pub host: String,
}

/// What the user picked in the pre-expiry dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptChoice {
    Extend { minutes: u64 },
    LetClose,
}

/// Contents of the pre-expiry dialog
#[derive(Debug, Clone)]
pub struct ExpiryPrompt {
    pub session: SessionId,
    /// Domains the session is about to re-block
    pub domains: Vec<String>,
    /// Extension choices offered, in minutes
    pub extend_options_minutes: Vec<u64>,
    /// Dialog timeout; elapsing counts as let-close
    pub timeout: Duration,
}

/// What kind of engagement to test for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngagementQuery {
    /// An open tab on the exact domain (or its `www.` alias)
    Domain(String),
    /// The named application in the foreground
    App(String),
}

/// Platform adapter - implemented per OS, mocked in tests.
///
/// Adapters are stateless per call; the core owns all throttling and
/// sequencing.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Tabs whose URL host exactly equals `domain` or `www.domain`
    async fn enumerate_tabs_for(&self, domain: &str) -> PlatformResult<Vec<TabHandle>>;

    /// Close a single tab
    async fn close_tab(&self, tab: &TabHandle) -> PlatformResult<()>;

    /// Whether the named application is running
    async fn app_is_running(&self, name: &str) -> PlatformResult<bool>;

    /// Terminate the named application if running
    async fn terminate_app(&self, name: &str) -> PlatformResult<()>;

    /// Whether the user is currently engaged with the domain or app
    async fn user_is_engaged(&self, query: &EngagementQuery) -> PlatformResult<bool>;

    /// Show the pre-expiry dialog and block until a choice or timeout
    async fn prompt_user(&self, prompt: &ExpiryPrompt) -> PlatformResult<PromptChoice>;
}
