//! Mock platform adapter for testing

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    host_matches, EngagementQuery, ExpiryPrompt, PlatformAdapter, PlatformError, PlatformResult,
    PromptChoice, TabHandle,
};

/// Mock platform adapter for unit/integration testing.
///
/// Tests arrange open tabs, running apps, and engagement, then observe the
/// close/terminate/prompt calls the enforcer makes.
pub struct MockPlatform {
    next_tab_id: AtomicU64,
    tabs: Mutex<Vec<TabHandle>>,
    running_apps: Mutex<HashSet<String>>,
    engaged: Mutex<HashSet<String>>,

    /// Every domain passed to a close_tab call, in order
    pub closed_tabs: Arc<Mutex<Vec<TabHandle>>>,

    /// Every app passed to terminate_app, in order
    pub terminated_apps: Arc<Mutex<Vec<String>>>,

    /// Prompts shown, in order
    pub prompts_shown: Arc<Mutex<Vec<ExpiryPrompt>>>,

    /// Scripted answer for the next prompts (default: let close)
    pub prompt_answer: Arc<Mutex<PromptChoice>>,

    /// Configure tab enumeration to fail
    pub fail_browser: Arc<Mutex<bool>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            next_tab_id: AtomicU64::new(1),
            tabs: Mutex::new(Vec::new()),
            running_apps: Mutex::new(HashSet::new()),
            engaged: Mutex::new(HashSet::new()),
            closed_tabs: Arc::new(Mutex::new(Vec::new())),
            terminated_apps: Arc::new(Mutex::new(Vec::new())),
            prompts_shown: Arc::new(Mutex::new(Vec::new())),
            prompt_answer: Arc::new(Mutex::new(PromptChoice::LetClose)),
            fail_browser: Arc::new(Mutex::new(false)),
        }
    }

    /// Open a tab on the given host
    pub fn open_tab(&self, host: &str) -> TabHandle {
        let tab = TabHandle {
            id: self.next_tab_id.fetch_add(1, Ordering::SeqCst),
            host: host.to_string(),
        };
        self.tabs.lock().unwrap().push(tab.clone());
        tab
    }

    /// Mark an application as running
    pub fn start_app(&self, name: &str) {
        self.running_apps.lock().unwrap().insert(name.to_string());
    }

    /// Mark a domain or app as engaged (active tab / foreground app)
    pub fn set_engaged(&self, key: &str) {
        self.engaged.lock().unwrap().insert(key.to_string());
    }

    pub fn clear_engaged(&self) {
        self.engaged.lock().unwrap().clear();
    }

    /// Script the answer for subsequent prompts
    pub fn answer_prompts_with(&self, choice: PromptChoice) {
        *self.prompt_answer.lock().unwrap() = choice;
    }

    /// Hosts of tabs still open
    pub fn open_hosts(&self) -> Vec<String> {
        self.tabs.lock().unwrap().iter().map(|t| t.host.clone()).collect()
    }

    pub fn close_call_count(&self) -> usize {
        self.closed_tabs.lock().unwrap().len()
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts_shown.lock().unwrap().len()
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAdapter for MockPlatform {
    async fn enumerate_tabs_for(&self, domain: &str) -> PlatformResult<Vec<TabHandle>> {
        if *self.fail_browser.lock().unwrap() {
            return Err(PlatformError::BrowserFailed("mock browser failure".into()));
        }

        Ok(self
            .tabs
            .lock()
            .unwrap()
            .iter()
            .filter(|t| host_matches(&t.host, domain))
            .cloned()
            .collect())
    }

    async fn close_tab(&self, tab: &TabHandle) -> PlatformResult<()> {
        let mut tabs = self.tabs.lock().unwrap();
        tabs.retain(|t| t.id != tab.id);
        self.closed_tabs.lock().unwrap().push(tab.clone());
        Ok(())
    }

    async fn app_is_running(&self, name: &str) -> PlatformResult<bool> {
        Ok(self.running_apps.lock().unwrap().contains(name))
    }

    async fn terminate_app(&self, name: &str) -> PlatformResult<()> {
        self.running_apps.lock().unwrap().remove(name);
        self.terminated_apps.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn user_is_engaged(&self, query: &EngagementQuery) -> PlatformResult<bool> {
        let engaged = self.engaged.lock().unwrap();
        Ok(match query {
            EngagementQuery::Domain(domain) => engaged.contains(domain),
            EngagementQuery::App(app) => engaged.contains(app),
        })
    }

    async fn prompt_user(&self, prompt: &ExpiryPrompt) -> PlatformResult<PromptChoice> {
        self.prompts_shown.lock().unwrap().push(prompt.clone());
        Ok(*self.prompt_answer.lock().unwrap())
    }
}
