//! Action catalog
//!
//! Every routable action with its operator-facing label, the permission scopes
//! shown in confirmations, and the host capabilities it needs, checked in the
//! listed order before the runner starts.

use crate::capabilities::{ActionError, Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Routable action id; unknown ids read as `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum ActionId {
    #[default]
    None,
    ReadSummarize,
    ScreenshotAnalyze,
    ScreenshotAnalyzeAlt,
    ResearchAgent,
    ResearchAgentAlt,
    AgentRunBrief,
    RemoteReadScreenshotSummarize,
    McpFetchBrief,
    McpMemorySave,
    McpMemoryRecall,
    McpFilesystemLog,
    McpFilesystemNestedWorkflow,
    McpCalendarNext,
    VoiceTtsPing,
    VoiceTranscribeNote,
    ConversationSiteBrief,
    ConversationLiveElevenlabs,
    AskModel,
}

/// Catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub id: ActionId,
    pub label: &'static str,
    pub description: &'static str,
    pub scopes: &'static [&'static str],
    pub capabilities: &'static [Capability],
}

use Capability::*;

const MODEL_READ: &[Capability] = &[Model, ActiveTabRead];
const SCREENSHOT: &[Capability] = &[Model, ActiveTabRead, ActiveTabScreenshot];
const RESEARCH: &[Capability] = &[Model, TabsCreate, TabHtml, TabRead, ActiveTabRead];
const MCP_WITH_PAGE: &[Capability] = &[McpTools, ActiveTabRead];

const SCOPES_READ: &[&str] = &["model:prompt", "browser:activeTab.read"];
const SCOPES_SCREENSHOT: &[&str] = &["model:prompt", "browser:activeTab.screenshot", "browser:activeTab.read"];
const SCOPES_RESEARCH: &[&str] = &["model:prompt", "browser:activeTab.read", "browser:tabs.create", "browser:tabs.read"];
const SCOPES_MCP_PAGE: &[&str] = &["mcp:tools.call", "browser:activeTab.read"];

pub const CATALOG: [ActionSpec; 19] = [
    ActionSpec {
        id: ActionId::None,
        label: "No action",
        description: "Do not run any action.",
        scopes: &[],
        capabilities: &[],
    },
    ActionSpec {
        id: ActionId::ReadSummarize,
        label: "Read page + summarize",
        description: "Read active tab content and summarize via model.",
        scopes: SCOPES_READ,
        capabilities: MODEL_READ,
    },
    ActionSpec {
        id: ActionId::ScreenshotAnalyze,
        label: "Screenshot + summarize",
        description: "Capture screenshot and produce quick page brief.",
        scopes: SCOPES_SCREENSHOT,
        capabilities: SCREENSHOT,
    },
    ActionSpec {
        id: ActionId::ScreenshotAnalyzeAlt,
        label: "Screenshot + risk scan (alt)",
        description: "Capture screenshot and run stricter risk-focused analysis.",
        scopes: SCOPES_SCREENSHOT,
        capabilities: SCREENSHOT,
    },
    ActionSpec {
        id: ActionId::ResearchAgent,
        label: "Research agent",
        description: "Open search/results tabs and synthesize cited findings.",
        scopes: SCOPES_RESEARCH,
        capabilities: RESEARCH,
    },
    ActionSpec {
        id: ActionId::ResearchAgentAlt,
        label: "Research agent (alt)",
        description: "Run deeper research mode with broader synthesis.",
        scopes: SCOPES_RESEARCH,
        capabilities: RESEARCH,
    },
    ActionSpec {
        id: ActionId::AgentRunBrief,
        label: "Agent run brief",
        description: "Use the tool-calling agent to produce a concise answer.",
        scopes: &["model:tools", "model:prompt"],
        capabilities: &[Model, AgentRun],
    },
    ActionSpec {
        id: ActionId::RemoteReadScreenshotSummarize,
        label: "Remote tab summarize",
        description: "Dispatch read+screenshot+summary to a helper session.",
        scopes: &[],
        capabilities: &[],
    },
    ActionSpec {
        id: ActionId::McpFetchBrief,
        label: "MCP fetch + brief",
        description: "Read current page URL/title, fetch related content via MCP, and summarize.",
        scopes: SCOPES_MCP_PAGE,
        capabilities: MCP_WITH_PAGE,
    },
    ActionSpec {
        id: ActionId::McpMemorySave,
        label: "MCP memory save",
        description: "Persist current page context into MCP memory.",
        scopes: SCOPES_MCP_PAGE,
        capabilities: MCP_WITH_PAGE,
    },
    ActionSpec {
        id: ActionId::McpMemoryRecall,
        label: "MCP memory recall",
        description: "Recall related memory entries for current page context.",
        scopes: SCOPES_MCP_PAGE,
        capabilities: MCP_WITH_PAGE,
    },
    ActionSpec {
        id: ActionId::McpFilesystemLog,
        label: "MCP filesystem log",
        description: "Append a local log line for the current page using filesystem MCP.",
        scopes: SCOPES_MCP_PAGE,
        capabilities: MCP_WITH_PAGE,
    },
    ActionSpec {
        id: ActionId::McpFilesystemNestedWorkflow,
        label: "MCP filesystem workflow",
        description: "Read state, append an event and update next-step files via filesystem MCP.",
        scopes: SCOPES_MCP_PAGE,
        capabilities: MCP_WITH_PAGE,
    },
    ActionSpec {
        id: ActionId::McpCalendarNext,
        label: "MCP calendar next",
        description: "Read upcoming events through an MCP calendar server.",
        scopes: &["mcp:tools.call"],
        capabilities: &[McpTools],
    },
    ActionSpec {
        id: ActionId::VoiceTtsPing,
        label: "Voice TTS ping",
        description: "Speak a short confirmation through text-to-speech.",
        scopes: &[],
        capabilities: &[Speech],
    },
    ActionSpec {
        id: ActionId::VoiceTranscribeNote,
        label: "Voice STT note",
        description: "Record a short microphone note and transcribe it.",
        scopes: &[],
        capabilities: &[Transcription],
    },
    ActionSpec {
        id: ActionId::ConversationSiteBrief,
        label: "Site conversation brief",
        description: "Read page, generate concise answer, and speak it.",
        scopes: SCOPES_READ,
        capabilities: MODEL_READ,
    },
    ActionSpec {
        id: ActionId::ConversationLiveElevenlabs,
        label: "Live voice conversation",
        description: "Open a live voice conversation, with page context when available.",
        scopes: &[],
        capabilities: &[LiveConversation],
    },
    ActionSpec {
        id: ActionId::AskModel,
        label: "Ask model",
        description: "Run the custom prompt template against the active context.",
        scopes: &["model:prompt"],
        capabilities: &[Model],
    },
];

impl ActionId {
    pub fn all() -> impl Iterator<Item = ActionId> {
        CATALOG.iter().map(|spec| spec.id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::None => "none",
            ActionId::ReadSummarize => "read_summarize",
            ActionId::ScreenshotAnalyze => "screenshot_analyze",
            ActionId::ScreenshotAnalyzeAlt => "screenshot_analyze_alt",
            ActionId::ResearchAgent => "research_agent",
            ActionId::ResearchAgentAlt => "research_agent_alt",
            ActionId::AgentRunBrief => "agent_run_brief",
            ActionId::RemoteReadScreenshotSummarize => "remote_read_screenshot_summarize",
            ActionId::McpFetchBrief => "mcp_fetch_brief",
            ActionId::McpMemorySave => "mcp_memory_save",
            ActionId::McpMemoryRecall => "mcp_memory_recall",
            ActionId::McpFilesystemLog => "mcp_filesystem_log",
            ActionId::McpFilesystemNestedWorkflow => "mcp_filesystem_nested_workflow",
            ActionId::McpCalendarNext => "mcp_calendar_next",
            ActionId::VoiceTtsPing => "voice_tts_ping",
            ActionId::VoiceTranscribeNote => "voice_transcribe_note",
            ActionId::ConversationSiteBrief => "conversation_site_brief",
            ActionId::ConversationLiveElevenlabs => "conversation_live_elevenlabs",
            ActionId::AskModel => "ask_model",
        }
    }

    /// Known id, or `None` for anything else
    pub fn parse(raw: &str) -> Option<ActionId> {
        let trimmed = raw.trim();
        Self::all().find(|id| id.as_str() == trimmed)
    }

    pub fn spec(&self) -> &'static ActionSpec {
        let index = CATALOG.iter().position(|spec| spec.id == *self).unwrap_or(0);
        &CATALOG[index]
    }

    pub fn label(&self) -> &'static str {
        self.spec().label
    }

    pub fn is_none(&self) -> bool {
        *self == ActionId::None
    }
}

impl From<String> for ActionId {
    fn from(raw: String) -> Self {
        ActionId::parse(&raw).unwrap_or_default()
    }
}

impl From<ActionId> for &'static str {
    fn from(id: ActionId) -> Self {
        id.as_str()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fail with the first required capability the host lacks
pub fn ensure_capabilities(action: ActionId, available: &CapabilitySet) -> Result<(), ActionError> {
    match available.first_missing(action.spec().capabilities) {
        Some(missing) => Err(ActionError::Unavailable(missing)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_round_trip() {
        assert_eq!(ActionId::all().count(), 19);
        for id in ActionId::all() {
            assert_eq!(ActionId::parse(id.as_str()), Some(id));
            assert_eq!(id.spec().id, id);
        }
    }

    #[test]
    fn test_unknown_id_reads_as_none() {
        let id: ActionId = serde_json::from_str("\"launch_rockets\"").unwrap();
        assert_eq!(id, ActionId::None);
        let id: ActionId = serde_json::from_str("\"research_agent_alt\"").unwrap();
        assert_eq!(id, ActionId::ResearchAgentAlt);
        assert_eq!(serde_json::to_string(&ActionId::AskModel).unwrap(), "\"ask_model\"");
    }

    #[test]
    fn test_ensure_reports_first_missing_in_order() {
        let host = CapabilitySet::new().with(Capability::Model);
        assert_eq!(
            ensure_capabilities(ActionId::ResearchAgent, &host),
            Err(ActionError::Unavailable(Capability::TabsCreate))
        );
        assert_eq!(
            ensure_capabilities(ActionId::AgentRunBrief, &host),
            Err(ActionError::Unavailable(Capability::AgentRun))
        );
        assert!(ensure_capabilities(ActionId::AskModel, &host).is_ok());
        assert!(ensure_capabilities(ActionId::RemoteReadScreenshotSummarize, &CapabilitySet::new()).is_ok());
    }

    #[test]
    fn test_screenshot_needs_model_before_screenshot() {
        let host = CapabilitySet::new().with(Capability::ActiveTabScreenshot);
        assert_eq!(
            ensure_capabilities(ActionId::ScreenshotAnalyzeAlt, &host),
            Err(ActionError::Unavailable(Capability::Model))
        );
    }
}
