//! Host capabilities invoked by action runners
//!
//! The text model, tab reading and control, the tool-calling agent, MCP tools
//! and voice are external collaborators. A host implements [`Capabilities`];
//! every operation defaults to [`ActionError::Unavailable`] so a host only
//! overrides what it actually provides and reports it through [`Capabilities::probe`].

use crate::broker::BrokerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

pub mod console;

pub use console::ConsoleCapabilities;

/// Agent error codes that make `agent_run_brief` fall back to `read_summarize`
pub const FALLBACK_ERROR_CODES: [&str; 3] = ["ERR_FEATURE_DISABLED", "ERR_SCOPE_REQUIRED", "ERR_PERMISSION_DENIED"];

/// One operation family a host may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Model,
    ActiveTabRead,
    ActiveTabScreenshot,
    TabsCreate,
    TabHtml,
    TabRead,
    AgentRun,
    McpTools,
    Speech,
    Transcription,
    LiveConversation,
}

impl Capability {
    pub const ALL: [Capability; 11] = [
        Capability::Model,
        Capability::ActiveTabRead,
        Capability::ActiveTabScreenshot,
        Capability::TabsCreate,
        Capability::TabHtml,
        Capability::TabRead,
        Capability::AgentRun,
        Capability::McpTools,
        Capability::Speech,
        Capability::Transcription,
        Capability::LiveConversation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Model => "model",
            Capability::ActiveTabRead => "active_tab.read",
            Capability::ActiveTabScreenshot => "active_tab.screenshot",
            Capability::TabsCreate => "tabs.create",
            Capability::TabHtml => "tab.html",
            Capability::TabRead => "tab.read",
            Capability::AgentRun => "agent.run",
            Capability::McpTools => "mcp.tools",
            Capability::Speech => "voice.speech",
            Capability::Transcription => "voice.transcription",
            Capability::LiveConversation => "voice.live",
        }
    }

    /// Operator-facing explanation used when the capability is missing
    pub fn unavailable_message(&self) -> &'static str {
        match self {
            Capability::Model => "Text model session is unavailable.",
            Capability::ActiveTabRead => "Active tab reading is unavailable. Enable browser interaction.",
            Capability::ActiveTabScreenshot => "Active tab screenshot is unavailable. Enable browser interaction.",
            Capability::TabsCreate => "Tab creation is unavailable. Enable browser control.",
            Capability::TabHtml => "Tab HTML access is unavailable. Enable browser control.",
            Capability::TabRead => "Tab reading is unavailable. Enable browser control.",
            Capability::AgentRun => "agent.run() is unavailable. Enable the tool calling feature.",
            Capability::McpTools => "MCP tool calls are unavailable. Enable mcp:tools.list and mcp:tools.call.",
            Capability::Speech => "Speech synthesis is unavailable.",
            Capability::Transcription => "Speech transcription is unavailable.",
            Capability::LiveConversation => "Live voice conversation is unavailable.",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of capabilities a host reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// First entry of `required` not in the set, in the given order
    pub fn first_missing(&self, required: &[Capability]) -> Option<Capability> {
        required.iter().copied().find(|capability| !self.contains(*capability))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Failure of an action runner
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("{}", .0.unavailable_message())]
    Unavailable(Capability),

    #[error("{message}")]
    Failed { code: Option<String>, message: String },

    #[error(transparent)]
    Remote(#[from] BrokerError),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        ActionError::Failed {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ActionError::Failed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether a failed agent run should be retried as a plain page summary
    pub fn allows_agent_fallback(&self) -> bool {
        if matches!(self, ActionError::Unavailable(_)) {
            return true;
        }
        if self.code().is_some_and(|code| FALLBACK_ERROR_CODES.contains(&code)) {
            return true;
        }

        let message = self.to_string().to_lowercase();
        ["agent.run", "toolcalling", "model:tools", "permission denied"]
            .iter()
            .any(|needle| message.contains(needle))
    }
}

/// Readable content of a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub title: Option<String>,
    pub url: Option<String>,
    pub text: String,
}

impl PageContent {
    /// Non-blank title, or `Untitled page`
    pub fn title_or_default(&self) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or("Untitled page")
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub data_url: String,
}

pub type TabId = u64;

/// Model session parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    pub provider: String,
    pub model: String,
    pub system_prompt: Option<String>,
}

/// Task handed to the tool-calling agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRunRequest {
    pub task: String,
    pub provider: String,
    pub max_tool_calls: u32,
}

/// One event of an agent run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Status { message: String },
    Thinking { content: String },
    ToolCall { tool: String, args: Value },
    ToolResult { tool: String, result: Value },
    Token { token: String },
    Final { output: String },
    Error { code: Option<String>, message: String },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Status { .. } => "status",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::Token { .. } => "token",
            AgentEvent::Final { .. } => "final",
            AgentEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechOutput {
    pub audio_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    pub language_code: Option<String>,
    pub language_probability: Option<f64>,
    pub transcription_id: Option<String>,
    pub audio_bytes: u64,
    pub duration_ms: u64,
}

/// Host integration implemented once per environment
///
/// All methods take `&self` so hosts can be shared as `Arc<dyn Capabilities>`.
#[async_trait]
pub trait Capabilities: Send + Sync {
    /// Host name for logs (e.g. "console")
    fn name(&self) -> &str;

    /// Capabilities this host provides right now
    fn probe(&self) -> CapabilitySet;

    /// Ask the host to grant permission scopes
    ///
    /// Default implementation: hosts without a permission model grant everything.
    async fn ensure_permissions(&self, _scopes: &[&str]) -> Result<(), ActionError> {
        Ok(())
    }

    async fn prompt(&self, _options: &ModelOptions, _prompt: &str) -> Result<String, ActionError> {
        Err(ActionError::Unavailable(Capability::Model))
    }

    async fn read_active_tab(&self) -> Result<PageContent, ActionError> {
        Err(ActionError::Unavailable(Capability::ActiveTabRead))
    }

    async fn capture_screenshot(&self) -> Result<Screenshot, ActionError> {
        Err(ActionError::Unavailable(Capability::ActiveTabScreenshot))
    }

    async fn open_tab(&self, _url: &str, _active: bool) -> Result<TabId, ActionError> {
        Err(ActionError::Unavailable(Capability::TabsCreate))
    }

    async fn close_tab(&self, _tab: TabId) -> Result<(), ActionError> {
        Err(ActionError::Unavailable(Capability::TabsCreate))
    }

    async fn tab_html(&self, _tab: TabId) -> Result<String, ActionError> {
        Err(ActionError::Unavailable(Capability::TabHtml))
    }

    async fn read_tab(&self, _tab: TabId) -> Result<PageContent, ActionError> {
        Err(ActionError::Unavailable(Capability::TabRead))
    }

    /// Run the agent to completion and return its event stream in order
    async fn run_agent(&self, _request: &AgentRunRequest) -> Result<Vec<AgentEvent>, ActionError> {
        Err(ActionError::Unavailable(Capability::AgentRun))
    }

    async fn list_tools(&self) -> Result<Vec<String>, ActionError> {
        Err(ActionError::Unavailable(Capability::McpTools))
    }

    async fn call_tool(&self, _tool: &str, _args: Value) -> Result<Value, ActionError> {
        Err(ActionError::Unavailable(Capability::McpTools))
    }

    async fn speak(&self, _text: &str, _voice_id: Option<&str>) -> Result<SpeechOutput, ActionError> {
        Err(ActionError::Unavailable(Capability::Speech))
    }

    async fn record_and_transcribe(&self, _duration_ms: u64) -> Result<Transcript, ActionError> {
        Err(ActionError::Unavailable(Capability::Transcription))
    }

    /// Signed URL of a live voice conversation
    async fn live_conversation_url(&self, _agent_id: Option<&str>) -> Result<String, ActionError> {
        Err(ActionError::Unavailable(Capability::LiveConversation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl Capabilities for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        fn probe(&self) -> CapabilitySet {
            CapabilitySet::new()
        }
    }

    #[tokio::test]
    async fn test_default_methods_report_unavailable() {
        let host = Bare;
        assert_eq!(
            host.read_active_tab().await.unwrap_err(),
            ActionError::Unavailable(Capability::ActiveTabRead)
        );
        assert_eq!(host.list_tools().await.unwrap_err(), ActionError::Unavailable(Capability::McpTools));
        assert!(host.ensure_permissions(&["model:prompt"]).await.is_ok());
    }

    #[test]
    fn test_first_missing_keeps_order() {
        let set = CapabilitySet::new().with(Capability::Model);
        let required = [Capability::Model, Capability::TabsCreate, Capability::TabHtml];
        assert_eq!(set.first_missing(&required), Some(Capability::TabsCreate));
        assert_eq!(CapabilitySet::all().first_missing(&required), None);
        assert!(!CapabilitySet::all().without(Capability::Speech).contains(Capability::Speech));
    }

    #[test]
    fn test_agent_fallback_classification() {
        assert!(ActionError::Unavailable(Capability::AgentRun).allows_agent_fallback());
        assert!(ActionError::with_code("ERR_SCOPE_REQUIRED", "scope missing").allows_agent_fallback());
        assert!(ActionError::failed("Permission denied for scopes: model:tools.").allows_agent_fallback());
        assert!(ActionError::failed("agent.run failed.").allows_agent_fallback());
        assert!(!ActionError::failed("network down").allows_agent_fallback());
        assert!(!ActionError::with_code("ERR_TIMEOUT", "slow").allows_agent_fallback());
    }

    #[test]
    fn test_page_title_default() {
        assert_eq!(PageContent::default().title_or_default(), "Untitled page");
        let page = PageContent {
            title: Some("  Docs ".into()),
            ..Default::default()
        };
        assert_eq!(page.title_or_default(), "Docs");
    }

    #[test]
    fn test_agent_event_wire_shape() {
        let event: AgentEvent = serde_json::from_str(r#"{"type":"tool_call","tool":"fetch","args":{"url":"x"}}"#).unwrap();
        assert_eq!(event.kind(), "tool_call");
    }
}
