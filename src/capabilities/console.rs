//! Console capabilities - logs every call and answers with canned data
//!
//! Stands in for a real host when running headless: useful for exercising
//! trigger routing, the safety gate and the remote bridge without a browser,
//! a model server or audio devices.

use super::{
    ActionError, AgentEvent, AgentRunRequest, Capabilities, Capability, CapabilitySet, ModelOptions, PageContent,
    Screenshot, SpeechOutput, TabId, Transcript,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const CONSOLE_TOOLS: [&str; 7] = [
    "fetch/fetch",
    "memory/save_memory",
    "memory/search_memories",
    "filesystem/read_file",
    "filesystem/append_file",
    "filesystem/write_file",
    "calendar/list_events",
];

pub struct ConsoleCapabilities {
    name: String,
    available: CapabilitySet,
    page: PageContent,
    tabs: Mutex<HashMap<TabId, String>>,
    next_tab: AtomicU64,
    /// Call counter for debugging
    call_count: AtomicU64,
}

impl ConsoleCapabilities {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: CapabilitySet::all(),
            page: PageContent {
                title: Some("Console page".to_string()),
                url: Some("about:console".to_string()),
                text: "Console host page. No browser is attached; content is synthetic.".to_string(),
            },
            tabs: Mutex::new(HashMap::new()),
            next_tab: AtomicU64::new(1),
            call_count: AtomicU64::new(0),
        }
    }

    /// Restrict the reported capabilities
    pub fn with_capabilities(mut self, available: CapabilitySet) -> Self {
        self.available = available;
        self
    }

    pub fn with_page(mut self, page: PageContent) -> Self {
        self.page = page;
        self
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn open_tabs(&self) -> usize {
        self.tabs.lock().len()
    }

    fn require(&self, capability: Capability, operation: &str) -> Result<u64, ActionError> {
        if !self.available.contains(capability) {
            debug!("ConsoleCapabilities '{}' has no {}", self.name, capability);
            return Err(ActionError::Unavailable(capability));
        }
        let call = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!("🖥️  [{}] #{} {}", self.name, call, operation);
        Ok(call)
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    line.chars().take(max_chars).collect()
}

#[async_trait]
impl Capabilities for ConsoleCapabilities {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> CapabilitySet {
        self.available.clone()
    }

    async fn prompt(&self, options: &ModelOptions, prompt: &str) -> Result<String, ActionError> {
        self.require(Capability::Model, "prompt")?;
        debug!("Prompt ({} chars) for {}/{}", prompt.len(), options.provider, options.model);
        Ok(format!("[{}:{}] {}", options.provider, options.model, first_line(prompt, 120)))
    }

    async fn read_active_tab(&self) -> Result<PageContent, ActionError> {
        self.require(Capability::ActiveTabRead, "read active tab")?;
        Ok(self.page.clone())
    }

    async fn capture_screenshot(&self) -> Result<Screenshot, ActionError> {
        self.require(Capability::ActiveTabScreenshot, "capture screenshot")?;
        Ok(Screenshot {
            data_url: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        })
    }

    async fn open_tab(&self, url: &str, active: bool) -> Result<TabId, ActionError> {
        self.require(Capability::TabsCreate, "open tab")?;
        let id = self.next_tab.fetch_add(1, Ordering::Relaxed);
        debug!("Tab {} -> {} (active: {})", id, url, active);
        self.tabs.lock().insert(id, url.to_string());
        Ok(id)
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), ActionError> {
        self.require(Capability::TabsCreate, "close tab")?;
        match self.tabs.lock().remove(&tab) {
            Some(_) => Ok(()),
            None => Err(ActionError::failed(format!("Unknown tab {}.", tab))),
        }
    }

    async fn tab_html(&self, tab: TabId) -> Result<String, ActionError> {
        self.require(Capability::TabHtml, "tab html")?;
        if !self.tabs.lock().contains_key(&tab) {
            return Err(ActionError::failed(format!("Unknown tab {}.", tab)));
        }

        let links: String = (1..=3)
            .map(|n| format!("<li><a href=\"https://example.org/result-{}\">Result {}</a></li>", n, n))
            .collect();
        Ok(format!("<html><body><ol>{}</ol></body></html>", links))
    }

    async fn read_tab(&self, tab: TabId) -> Result<PageContent, ActionError> {
        self.require(Capability::TabRead, "read tab")?;
        let url = self
            .tabs
            .lock()
            .get(&tab)
            .cloned()
            .ok_or_else(|| ActionError::failed(format!("Unknown tab {}.", tab)))?;

        Ok(PageContent {
            title: Some(format!("Console tab {}", tab)),
            text: format!("Synthetic content of {}.", url),
            url: Some(url),
        })
    }

    async fn run_agent(&self, request: &AgentRunRequest) -> Result<Vec<AgentEvent>, ActionError> {
        self.require(Capability::AgentRun, "agent run")?;
        Ok(vec![
            AgentEvent::Status {
                message: format!("console agent using {}", request.provider),
            },
            AgentEvent::Final {
                output: format!("[agent] {}", first_line(&request.task, 120)),
            },
        ])
    }

    async fn list_tools(&self) -> Result<Vec<String>, ActionError> {
        self.require(Capability::McpTools, "list tools")?;
        Ok(CONSOLE_TOOLS.iter().map(|tool| tool.to_string()).collect())
    }

    async fn call_tool(&self, tool: &str, args: Value) -> Result<Value, ActionError> {
        self.require(Capability::McpTools, "call tool")?;
        if !CONSOLE_TOOLS.contains(&tool) {
            return Err(ActionError::failed(format!("Unknown tool {}.", tool)));
        }
        Ok(json!({ "tool": tool, "ok": true, "args": args }))
    }

    async fn speak(&self, text: &str, voice_id: Option<&str>) -> Result<SpeechOutput, ActionError> {
        self.require(Capability::Speech, "speak")?;
        info!("🔊 [{}] ({}) {}", self.name, voice_id.unwrap_or("default voice"), text);
        Ok(SpeechOutput {
            audio_bytes: text.len() as u64 * 32,
        })
    }

    async fn record_and_transcribe(&self, duration_ms: u64) -> Result<Transcript, ActionError> {
        self.require(Capability::Transcription, "record and transcribe")?;
        Ok(Transcript {
            duration_ms,
            ..Default::default()
        })
    }

    async fn live_conversation_url(&self, agent_id: Option<&str>) -> Result<String, ActionError> {
        self.require(Capability::LiveConversation, "live conversation url")?;
        Ok(format!(
            "https://voice.console.invalid/conversation?agent_id={}",
            agent_id.unwrap_or("default")
        ))
    }
}
