//! Action runners
//!
//! Each runner turns a routed trigger into capability calls and returns the
//! text shown to the operator plus a free-form `meta` document. Runners never
//! check capabilities themselves; the router does that before calling them.

use super::actions::ActionId;
use super::payload::{ModifierState, TriggerPayload};
use super::settings::RouterSettings;
use super::text::{
    authority_of, encode_component, extract_urls_from_html, host_of, normalize_search_url, parse_json_array,
    replace_template, tool_result_preview, truncate,
};
use super::Router;
use crate::broker::Command;
use crate::capabilities::{ActionError, AgentEvent, AgentRunRequest, Capability, ModelOptions, PageContent, TabId};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

const HELLO_WORLD_TEXT: &str = "Hello world.";
const REMOTE_ACTION: &str = "remote_read_screenshot_summarize";
const REMOTE_MAX_CONTEXT_CHARS: usize = 6400;
const AGENT_MAX_TOOL_CALLS: u32 = 3;
const TRANSCRIBE_DURATION_MS: u64 = 2600;
const TOOL_PREVIEW_CHARS: usize = 1400;
const TOOL_META_PREVIEW_CHARS: usize = 480;
const WORKFLOW_DIR: &str = "gesture-workflow";
const LOG_FILE_PATH: &str = "gesture-log.md";

const FETCH_TOOLS: &[&str] = &["fetch/fetch", "http/fetch", "web-fetch/fetch_url", "fetch/get"];
const MEMORY_SAVE_TOOLS: &[&str] = &["memory/save_memory", "memory/set", "memory/upsert"];
const MEMORY_SEARCH_TOOLS: &[&str] = &["memory/search_memories", "memory/search", "memory/query"];
const READ_FILE_TOOLS: &[&str] = &["filesystem/read_file", "fs/read_file", "filesystem/read"];
const APPEND_LOG_TOOLS: &[&str] = &["filesystem/append_file", "filesystem/write_file", "fs/append_file"];
const APPEND_QUEUE_TOOLS: &[&str] = &["filesystem/append_file", "fs/append_file", "filesystem/write_file"];
const WRITE_FILE_TOOLS: &[&str] = &["filesystem/write_file", "fs/write_file", "filesystem/write"];
const CALENDAR_TOOLS: &[&str] = &["calendar/list_events", "caldav/list_events", "calendar/next_events"];

/// Inputs shared by every runner
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub payload: TriggerPayload,
    pub pose_slot: usize,
    pub pose_label: String,
    pub base_action_id: ActionId,
    pub modifier: ModifierState,
    pub settings: RouterSettings,
}

impl ActionContext {
    fn model_options(&self) -> ModelOptions {
        ModelOptions {
            provider: self.settings.provider.clone(),
            model: self.settings.model.clone(),
            system_prompt: None,
        }
    }

    fn trigger_line(&self) -> String {
        format!("Trigger: pose {} ({}).", self.pose_slot, self.pose_label)
    }
}

/// What a runner hands back to the router
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutput {
    pub output: String,
    pub meta: Value,
}

impl ActionOutput {
    fn new(output: impl Into<String>, meta: Value) -> Self {
        Self {
            output: output.into(),
            meta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Default,
    Alt,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Alt => "alt",
        }
    }
}

struct Source {
    url: String,
    title: String,
    text: String,
}

struct ConversationBrief {
    page_title: String,
    brief: String,
    page_text_chars: usize,
}

fn page_url(page: Option<&PageContent>) -> String {
    page.and_then(|page| page.url.clone())
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| "about:blank".to_string())
}

fn page_title(page: Option<&PageContent>) -> String {
    page.map(PageContent::title_or_default)
        .unwrap_or_else(|| "Untitled page".to_string())
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

impl Router {
    /// Run one action without any gating
    pub(crate) async fn run_action(&self, action: ActionId, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        debug!("Running action {} for pose {}", action, context.pose_slot);
        match action {
            ActionId::None => Ok(ActionOutput::new("Action is disabled.", json!({}))),
            ActionId::ReadSummarize => self.run_read_summarize(context).await,
            ActionId::ScreenshotAnalyze => self.run_screenshot_analyze(context, Mode::Default).await,
            ActionId::ScreenshotAnalyzeAlt => self.run_screenshot_analyze(context, Mode::Alt).await,
            ActionId::ResearchAgent => self.run_research(context, Mode::Default).await,
            ActionId::ResearchAgentAlt => self.run_research(context, Mode::Alt).await,
            ActionId::AgentRunBrief => self.run_agent_brief(context).await,
            ActionId::RemoteReadScreenshotSummarize => self.run_remote(context).await,
            ActionId::McpFetchBrief => self.run_mcp_fetch_brief().await,
            ActionId::McpMemorySave => self.run_mcp_memory_save().await,
            ActionId::McpMemoryRecall => self.run_mcp_memory_recall().await,
            ActionId::McpFilesystemLog => self.run_mcp_filesystem_log().await,
            ActionId::McpFilesystemNestedWorkflow => self.run_mcp_nested_workflow(context).await,
            ActionId::McpCalendarNext => self.run_mcp_calendar_next().await,
            ActionId::VoiceTtsPing => self.run_voice_tts_ping(context).await,
            ActionId::VoiceTranscribeNote => self.run_voice_transcribe_note().await,
            ActionId::ConversationSiteBrief => self.run_conversation_site_brief(context).await,
            ActionId::ConversationLiveElevenlabs => self.run_conversation_live(context).await,
            ActionId::AskModel => self.run_ask_model(context).await,
        }
    }

    async fn prompt_model(&self, context: &ActionContext, prompt: &str) -> Result<String, ActionError> {
        self.capabilities.prompt(&context.model_options(), prompt).await
    }

    /// Active tab, or `None` when it cannot be read
    async fn try_read_active_tab(&self) -> Option<PageContent> {
        match self.capabilities.read_active_tab().await {
            Ok(page) => Some(page),
            Err(e) => {
                debug!("Active tab unreadable: {}", e);
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Page and screenshot
    // ---------------------------------------------------------------------

    async fn run_read_summarize(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let page = self.capabilities.read_active_tab().await?;
        let page_title = page.title_or_default();
        let page_text = truncate(&page.text, 4800);

        let prompt = [
            "You are a browser automation assistant.".to_string(),
            context.trigger_line(),
            format!("Page title: {}", page_title),
            "Summarize the page briefly and suggest two safe next actions.".to_string(),
            "Page content:".to_string(),
            page_text.clone(),
        ]
        .join("\n\n");

        let output = self.prompt_model(context, &prompt).await?;
        Ok(ActionOutput::new(
            output,
            json!({
                "pageTitle": page_title,
                "textChars": char_len(&page_text),
            }),
        ))
    }

    async fn run_screenshot_analyze(&self, context: &ActionContext, mode: Mode) -> Result<ActionOutput, ActionError> {
        let screenshot = self.capabilities.capture_screenshot().await?;
        let page = self.try_read_active_tab().await;

        let page_title = page_title(page.as_ref());
        let page_text = truncate(page.as_ref().map_or("", |page| page.text.as_str()), 3200);
        let screenshot_chars = screenshot.data_url.len();
        let mode_line = match mode {
            Mode::Alt => "Prioritize risk and ambiguity detection over productivity suggestions.",
            Mode::Default => "Focus on current state and a safe next step.",
        };

        let prompt = [
            "You are assisting a browser gesture workflow.".to_string(),
            context.trigger_line(),
            format!("A screenshot was captured (data URL length: {}).", screenshot_chars),
            mode_line.to_string(),
            format!("Page title: {}", page_title),
            "Assume this may be a text-only model. Use page text context to infer what the user is viewing.".to_string(),
            "Provide: 1) current-state summary, 2) one recommended next step, 3) one risk check.".to_string(),
            "Page content:".to_string(),
            if page_text.is_empty() {
                "No readability content available.".to_string()
            } else {
                page_text
            },
        ]
        .join("\n\n");

        let output = self.prompt_model(context, &prompt).await?;
        Ok(ActionOutput::new(
            output,
            json!({
                "pageTitle": page_title,
                "screenshotChars": screenshot_chars,
                "mode": mode.as_str(),
            }),
        ))
    }

    // ---------------------------------------------------------------------
    // Research
    // ---------------------------------------------------------------------

    fn research_query(&self, context: &ActionContext, page_title: &str) -> String {
        let values = [
            ("poseId", context.pose_slot.to_string()),
            ("poseLabel", context.pose_label.clone()),
            ("triggerId", context.payload.trigger_id.clone()),
            ("pageTitle", page_title.to_string()),
            ("timestamp", context.payload.timestamp.clone()),
        ];
        let rendered = replace_template(&context.settings.research.query_template, &values);
        let rendered = rendered.trim();
        if rendered.is_empty() {
            format!("Research and summarize with citations: {}", page_title)
        } else {
            rendered.to_string()
        }
    }

    fn search_url(&self, context: &ActionContext, query: &str) -> String {
        let template = &context.settings.research.search_engine_url_template;
        let encoded = encode_component(query);
        if template.contains("{{query}}") {
            template.replace("{{query}}", &encoded)
        } else {
            format!("https://www.google.com/search?q={}", encoded)
        }
    }

    async fn model_extract_urls(&self, context: &ActionContext, html: &str, max_urls: usize) -> Vec<String> {
        if !self.capabilities.probe().contains(Capability::Model) {
            return Vec::new();
        }

        let options = ModelOptions {
            system_prompt: Some(
                "You extract organic result links from search HTML and return only a JSON array of URLs.".to_string(),
            ),
            ..context.model_options()
        };
        let prompt = [
            format!("Extract up to {} organic result URLs from this search results HTML.", max_urls),
            "Return only a JSON array of URL strings.".to_string(),
            "Exclude search engine, ads, and social media domains.".to_string(),
            String::new(),
            truncate(html, 24000),
        ]
        .join("\n");

        let response = match self.capabilities.prompt(&options, &prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️  Model URL extraction failed: {}", e);
                return Vec::new();
            }
        };

        let mut urls: Vec<String> = Vec::new();
        for url in parse_json_array(&response)
            .iter()
            .filter_map(Value::as_str)
            .filter_map(normalize_search_url)
        {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls.truncate(max_urls);
        urls
    }

    async fn collect_result_urls(
        &self,
        context: &ActionContext,
        search_tab: TabId,
        max_urls: usize,
    ) -> Result<Vec<String>, ActionError> {
        let html = self.capabilities.tab_html(search_tab).await?;
        if html.len() < 80 {
            return Err(ActionError::failed("Search result HTML is empty or too short."));
        }

        let mut urls = extract_urls_from_html(&html);
        urls.truncate(max_urls);
        if urls.len() >= max_urls.min(2) {
            return Ok(urls);
        }

        for url in self.model_extract_urls(context, &html, max_urls).await {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls.truncate(max_urls);
        Ok(urls)
    }

    async fn synthesize_research(
        &self,
        context: &ActionContext,
        query: &str,
        sources: &[Source],
        mode: Mode,
    ) -> Result<String, ActionError> {
        let formatted = sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                [
                    format!("[Source {}]", index + 1),
                    format!("Title: {}", source.title),
                    format!("URL: {}", source.url),
                    format!("Content: {}", truncate(&source.text, 5500)),
                ]
                .join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mode_line = match mode {
            Mode::Alt => "Use a deeper lens: include conflicting points and uncertainties.",
            Mode::Default => "Focus on direct, high-signal conclusions first.",
        };

        let prompt = [
            "You are a browser research assistant.".to_string(),
            format!("User intent: {}", query),
            mode_line.to_string(),
            "Synthesize these sources into a concise answer with inline citations like [1], [2].".to_string(),
            "End with one short risk check and one suggested next action.".to_string(),
            String::new(),
            formatted,
        ]
        .join("\n\n");

        self.prompt_model(context, &prompt).await
    }

    async fn run_research(&self, context: &ActionContext, mode: Mode) -> Result<ActionOutput, ActionError> {
        let source_count = context.settings.research.source_count_default;
        let active_page = self.capabilities.read_active_tab().await?;
        let page_title = active_page.title_or_default();
        let query = self.research_query(context, &page_title);
        let search_url = self.search_url(context, &query);

        let mut opened_tabs: Vec<(TabId, String)> = Vec::new();
        let mut search_tab: Option<TabId> = None;

        let result = self
            .research_inner(context, mode, &query, &search_url, source_count, &mut search_tab, &mut opened_tabs)
            .await;

        if context.settings.research.close_tabs_after_run {
            for tab in opened_tabs.iter().map(|(tab, _)| *tab).chain(search_tab) {
                if let Err(e) = self.capabilities.close_tab(tab).await {
                    debug!("Failed to close research tab {}: {}", tab, e);
                }
            }
        }

        let (output, sources) = result?;
        Ok(ActionOutput::new(
            output,
            json!({
                "pageTitle": page_title,
                "query": query,
                "mode": mode.as_str(),
                "sourceCountRequested": source_count,
                "sourceCountRead": sources.len(),
                "sources": sources
                    .iter()
                    .map(|source| json!({ "title": source.title, "url": source.url }))
                    .collect::<Vec<_>>(),
            }),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn research_inner(
        &self,
        context: &ActionContext,
        mode: Mode,
        query: &str,
        search_url: &str,
        source_count: usize,
        search_tab: &mut Option<TabId>,
        opened_tabs: &mut Vec<(TabId, String)>,
    ) -> Result<(String, Vec<Source>), ActionError> {
        let preview: String = query.chars().take(70).collect();
        self.events.emit_status(format!("Research: opening search page for \"{}\"...", preview));
        let tab = self.capabilities.open_tab(search_url, false).await?;
        *search_tab = Some(tab);

        let urls = self.collect_result_urls(context, tab, source_count).await?;
        if urls.is_empty() {
            return Err(ActionError::failed("Could not extract any research result URLs."));
        }

        self.events.emit_status(format!("Research: opening {} result tabs...", urls.len()));
        for url in urls {
            match self.capabilities.open_tab(&url, false).await {
                Ok(tab) => opened_tabs.push((tab, url)),
                Err(e) => debug!("Could not open {}: {}", url, e),
            }
        }
        if opened_tabs.is_empty() {
            return Err(ActionError::failed("No result tabs could be opened."));
        }

        self.events.emit_status(format!("Research: reading {} pages...", opened_tabs.len()));
        let mut sources = Vec::new();
        for (tab, url) in opened_tabs.iter() {
            let page = match self.capabilities.read_tab(*tab).await {
                Ok(page) => page,
                Err(e) => {
                    debug!("Skipping unreadable tab {}: {}", url, e);
                    continue;
                }
            };
            let text = truncate(&page.text, 6000);
            if text.trim().is_empty() {
                continue;
            }
            let title = page
                .title
                .filter(|title| !title.trim().is_empty())
                .or_else(|| host_of(url))
                .unwrap_or_else(|| url.clone());
            sources.push(Source {
                url: url.clone(),
                title,
                text,
            });
        }

        if sources.is_empty() {
            return Err(ActionError::failed("No readable content extracted from opened tabs."));
        }

        self.events.emit_status("Research: synthesizing answer with citations...");
        let output = self.synthesize_research(context, query, &sources, mode).await?;
        Ok((output, sources))
    }

    // ---------------------------------------------------------------------
    // Agent run
    // ---------------------------------------------------------------------

    fn agent_task(context: &ActionContext, page_title: &str, page_text: &str) -> String {
        let mut lines = vec![
            "You are a concise browser copilot.".to_string(),
            context.trigger_line(),
            format!("Page title: {}", page_title),
            "Give: 1) short summary, 2) one safe next action, 3) one risk check.".to_string(),
        ];
        if page_text.trim().is_empty() {
            lines.push("No page text context is available.".to_string());
        } else {
            lines.push("Page context:".to_string());
            lines.push(truncate(page_text, 1600));
        }
        lines.join("\n\n")
    }

    async fn run_agent_brief(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let page = self.try_read_active_tab().await;
        let page_title = page_title(page.as_ref());
        let page_text = truncate(page.as_ref().map_or("", |page| page.text.as_str()), 2400);
        let task = Self::agent_task(context, &page_title, &page_text);

        let events = self
            .capabilities
            .run_agent(&AgentRunRequest {
                task: task.clone(),
                provider: context.settings.provider.clone(),
                max_tool_calls: AGENT_MAX_TOOL_CALLS,
            })
            .await?;

        let mut counts: Map<String, Value> = ["status", "thinking", "tool_call", "tool_result", "token", "final", "error"]
            .iter()
            .map(|kind| (kind.to_string(), json!(0)))
            .collect();
        let mut tokens = String::new();
        let mut trace = Vec::new();
        let mut final_output = String::new();

        for event in events {
            if let Some(count) = counts.get_mut(event.kind()) {
                *count = json!(count.as_u64().unwrap_or(0) + 1);
            }

            match event {
                AgentEvent::Status { message } => {
                    self.events.emit_status(format!("agent.run status: {}", truncate(&message, 120)));
                }
                AgentEvent::Thinking { content } => {
                    self.events.emit_status(format!("agent.run thinking: {}", truncate(&content, 120)));
                }
                AgentEvent::ToolCall { tool, args } => trace.push(json!({
                    "phase": "call",
                    "tool": tool,
                    "details": truncate(&args.to_string(), 260),
                })),
                AgentEvent::ToolResult { tool, result } => trace.push(json!({
                    "phase": "result",
                    "tool": tool,
                    "details": truncate(&result.to_string(), 260),
                })),
                AgentEvent::Token { token } => tokens.push_str(&token),
                AgentEvent::Final { output } => final_output = output.trim().to_string(),
                AgentEvent::Error { code, message } => {
                    let message = if message.trim().is_empty() {
                        "agent.run failed.".to_string()
                    } else {
                        message
                    };
                    return Err(ActionError::Failed { code, message });
                }
            }
        }

        let output = [final_output.as_str(), tokens.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
            .unwrap_or("agent.run completed with no output.")
            .to_string();
        trace.truncate(8);

        Ok(ActionOutput::new(
            output,
            json!({
                "mode": "agent.run",
                "pageTitle": page_title,
                "pageTextChars": char_len(&page_text),
                "task": truncate(&task, 320),
                "eventCounts": counts,
                "toolTrace": trace,
            }),
        ))
    }

    // ---------------------------------------------------------------------
    // Remote helper
    // ---------------------------------------------------------------------

    fn remote_command(&self, context: &ActionContext) -> Command {
        Command::new(REMOTE_ACTION)
            .with_field("provider", json!(context.settings.provider))
            .with_field("model", json!(context.settings.model))
            .with_field("poseSlot", json!(context.pose_slot))
            .with_field("poseLabel", json!(context.pose_label))
            .with_field(
                "options",
                json!({
                    "maxContextChars": REMOTE_MAX_CONTEXT_CHARS,
                    "timeoutMs": self.broker.timeout().as_millis() as u64,
                }),
            )
    }

    async fn run_remote(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let session_id = context.settings.remote_bridge.session_id.clone();
        self.events.emit_status(format!(
            "Remote bridge: dispatching {} to session \"{}\".",
            REMOTE_ACTION, session_id
        ));

        let outcome = self.broker.dispatch(Some(&session_id), self.remote_command(context)).await?;
        let Value::Object(result) = outcome.result else {
            return Err(ActionError::failed("Remote bridge returned no result payload."));
        };

        if result.get("ok") == Some(&Value::Bool(false)) {
            let message = result
                .get("errorMessage")
                .and_then(Value::as_str)
                .filter(|message| !message.is_empty())
                .unwrap_or("Remote helper execution failed.")
                .to_string();
            let code = result
                .get("errorCode")
                .and_then(Value::as_str)
                .filter(|code| !code.is_empty())
                .map(str::to_string);
            return Err(ActionError::Failed { code, message });
        }

        let output = result
            .get("output")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|output| !output.is_empty())
            .unwrap_or("Remote helper completed with no output.")
            .to_string();

        let mut meta = match result.get("meta") {
            Some(Value::Object(meta)) => meta.clone(),
            _ => Map::new(),
        };
        let non_empty = |key: &str| {
            meta.get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let target_title = non_empty("targetTitle")
            .or_else(|| non_empty("pageTitle"))
            .unwrap_or_else(|| "Remote page".to_string());
        let target_url = non_empty("targetUrl");

        meta.insert("pageTitle".into(), json!(target_title));
        meta.insert("remoteBridge".into(), json!(true));
        meta.insert("remoteSessionId".into(), json!(outcome.session_id));
        meta.insert("commandId".into(), json!(outcome.command_id));
        meta.insert("targetUrl".into(), json!(target_url));
        meta.insert("targetTitle".into(), json!(target_title));

        Ok(ActionOutput::new(output, Value::Object(meta)))
    }

    // ---------------------------------------------------------------------
    // MCP tools
    // ---------------------------------------------------------------------

    /// First candidate the host exposes, by exact name then by `/short` suffix
    async fn resolve_tool_name(&self, candidates: &[&str]) -> Result<String, ActionError> {
        let tools = self.capabilities.list_tools().await?;

        if let Some(exact) = candidates.iter().find(|candidate| tools.iter().any(|tool| tool == *candidate)) {
            return Ok(exact.to_string());
        }

        for candidate in candidates {
            let short = candidate.rsplit('/').next().unwrap_or(candidate);
            let suffix = format!("/{}", short);
            if let Some(tool) = tools.iter().find(|tool| tool.ends_with(&suffix)) {
                return Ok(tool.clone());
            }
        }

        Err(ActionError::failed(format!(
            "No compatible MCP tool found. Tried: {}.",
            candidates.join(", ")
        )))
    }

    async fn call_tool(&self, candidates: &[&str], args: Value) -> Result<Value, ActionError> {
        let tool = self.resolve_tool_name(candidates).await?;
        debug!("Calling MCP tool {}", tool);
        self.capabilities.call_tool(&tool, args).await
    }

    async fn run_mcp_fetch_brief(&self) -> Result<ActionOutput, ActionError> {
        let page = self.capabilities.read_active_tab().await?;
        let page_title = page.title_or_default();
        let page_url = page_url(Some(&page));
        let result = self.call_tool(FETCH_TOOLS, json!({ "url": page_url })).await?;

        Ok(ActionOutput::new(
            format!(
                "Fetched context for \"{}\".\n{}",
                page_title,
                tool_result_preview(&result, TOOL_PREVIEW_CHARS)
            ),
            json!({ "pageTitle": page_title, "pageUrl": page_url }),
        ))
    }

    async fn run_mcp_memory_save(&self) -> Result<ActionOutput, ActionError> {
        let page = self.capabilities.read_active_tab().await?;
        let page_title = page.title_or_default();
        let page_url = page_url(Some(&page));
        let summary = truncate(&page.text, 2200);

        let result = self
            .call_tool(
                MEMORY_SAVE_TOOLS,
                json!({
                    "key": page_url,
                    "value": {
                        "title": page_title,
                        "url": page_url,
                        "summary": summary,
                        "savedAt": now_iso(),
                    },
                }),
            )
            .await?;

        Ok(ActionOutput::new(
            format!("Saved memory for \"{}\".", page_title),
            json!({
                "pageTitle": page_title,
                "pageUrl": page_url,
                "result": tool_result_preview(&result, TOOL_META_PREVIEW_CHARS),
            }),
        ))
    }

    async fn run_mcp_memory_recall(&self) -> Result<ActionOutput, ActionError> {
        let page = self.try_read_active_tab().await;
        let page_title = page_title(page.as_ref());
        let page_url = page_url(page.as_ref());

        let result = self
            .call_tool(
                MEMORY_SEARCH_TOOLS,
                json!({ "query": format!("{} {}", page_title, page_url), "limit": 3 }),
            )
            .await?;

        Ok(ActionOutput::new(
            format!(
                "Memory recall for \"{}\":\n{}",
                page_title,
                tool_result_preview(&result, TOOL_PREVIEW_CHARS)
            ),
            json!({ "pageTitle": page_title, "pageUrl": page_url }),
        ))
    }

    async fn run_mcp_filesystem_log(&self) -> Result<ActionOutput, ActionError> {
        let page = self.try_read_active_tab().await;
        let page_title = page_title(page.as_ref());
        let page_url = page_url(page.as_ref());
        let line = format!("{} | {} | {}\n", now_iso(), page_title, page_url);

        let result = self
            .call_tool(
                APPEND_LOG_TOOLS,
                json!({ "path": LOG_FILE_PATH, "content": line, "append": true }),
            )
            .await?;

        Ok(ActionOutput::new(
            format!("Appended a local log entry for \"{}\".", page_title),
            json!({
                "pageTitle": page_title,
                "pageUrl": page_url,
                "filePath": LOG_FILE_PATH,
                "result": tool_result_preview(&result, TOOL_META_PREVIEW_CHARS),
            }),
        ))
    }

    /// Read state, append to the queue, rewrite state, write the handoff note
    async fn run_mcp_nested_workflow(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let page = self.capabilities.read_active_tab().await?;
        let page_title = page.title_or_default();
        let page_url = page_url(Some(&page));
        let now = now_iso();
        let state_path = format!("{}/state.json", WORKFLOW_DIR);
        let queue_path = format!("{}/queue.md", WORKFLOW_DIR);
        let next_path = format!("{}/next-action.md", WORKFLOW_DIR);

        let previous_raw = match self.call_tool(READ_FILE_TOOLS, json!({ "path": state_path })).await {
            Ok(result) => ["content", "text", "value"]
                .iter()
                .find_map(|key| result.get(*key).and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| result.to_string()),
            Err(e) => {
                debug!("No previous workflow state: {}", e);
                String::new()
            }
        };
        let previous_runs = serde_json::from_str::<Value>(&previous_raw)
            .ok()
            .and_then(|state| state.get("runCount").and_then(Value::as_u64))
            .unwrap_or(0);
        let run_count = previous_runs + 1;

        let event_line = format!(
            "- {} | pose={} ({}) | {} | {}\n",
            now, context.pose_slot, context.pose_label, page_title, page_url
        );
        self.call_tool(
            APPEND_QUEUE_TOOLS,
            json!({ "path": queue_path, "content": event_line, "append": true }),
        )
        .await?;

        let next_state = json!({
            "runCount": run_count,
            "lastRunAt": now,
            "lastPose": { "slot": context.pose_slot, "label": context.pose_label },
            "lastPage": { "title": page_title, "url": page_url },
            "previousStateAvailable": !previous_raw.is_empty(),
        });
        let state_text = serde_json::to_string_pretty(&next_state).unwrap_or_default();
        self.call_tool(
            WRITE_FILE_TOOLS,
            json!({ "path": state_path, "content": format!("{}\n", state_text), "append": false }),
        )
        .await?;

        let next_action = [
            "# Next Step".to_string(),
            String::new(),
            format!("Triggered at: {}", now),
            format!("Pose: {} ({})", context.pose_slot, context.pose_label),
            format!("Page: {}", page_title),
            format!("URL: {}", page_url),
            String::new(),
            "Suggested follow-up: run MCP fetch brief, then summarize and speak.".to_string(),
        ]
        .join("\n");
        self.call_tool(
            WRITE_FILE_TOOLS,
            json!({ "path": next_path, "content": format!("{}\n", next_action), "append": false }),
        )
        .await?;

        Ok(ActionOutput::new(
            format!(
                "Filesystem workflow complete (run #{}). Updated {}, {}, and {}.",
                run_count, state_path, queue_path, next_path
            ),
            json!({
                "pageTitle": page_title,
                "pageUrl": page_url,
                "runCount": run_count,
                "workflowDir": WORKFLOW_DIR,
                "files": [state_path, queue_path, next_path],
            }),
        ))
    }

    async fn run_mcp_calendar_next(&self) -> Result<ActionOutput, ActionError> {
        let result = self.call_tool(CALENDAR_TOOLS, json!({ "limit": 3 })).await?;
        Ok(ActionOutput::new(
            format!("Upcoming events:\n{}", tool_result_preview(&result, TOOL_PREVIEW_CHARS)),
            json!({ "source": "mcp-calendar" }),
        ))
    }

    // ---------------------------------------------------------------------
    // Prompt
    // ---------------------------------------------------------------------

    async fn run_ask_model(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let page = self.try_read_active_tab().await;
        let page_title = page_title(page.as_ref());
        let values = [
            ("poseId", context.pose_slot.to_string()),
            ("poseLabel", context.pose_label.clone()),
            ("triggerId", context.payload.trigger_id.clone()),
            ("handedness", context.payload.handedness.as_str().to_string()),
            ("pageTitle", page_title.clone()),
            ("timestamp", context.payload.timestamp.clone()),
        ];
        let prompt = replace_template(&context.settings.ask_prompt_template, &values);
        let output = self.prompt_model(context, &prompt).await?;

        Ok(ActionOutput::new(output, json!({ "pageTitle": page_title })))
    }

    // ---------------------------------------------------------------------
    // Voice
    // ---------------------------------------------------------------------

    async fn conversation_brief(&self, context: &ActionContext) -> Result<ConversationBrief, ActionError> {
        let page = self.capabilities.read_active_tab().await?;
        let page_title = page.title_or_default();
        let page_text = truncate(&page.text, 5600);

        let prompt = [
            "You are a site-aware voice assistant.".to_string(),
            context.trigger_line(),
            format!("Page title: {}", page_title),
            "Write a concise spoken response (4-6 sentences) explaining what this page is about,".to_string(),
            "why it matters, and one suggested next action.".to_string(),
            "Page content:".to_string(),
            if page_text.is_empty() {
                "No readable page text available.".to_string()
            } else {
                page_text.clone()
            },
        ]
        .join("\n\n");

        let brief = self.prompt_model(context, &prompt).await?;
        Ok(ConversationBrief {
            page_title,
            brief,
            page_text_chars: char_len(&page_text),
        })
    }

    /// Short spoken cue; failure is reported in the result, never raised
    async fn hello_world_cue(&self, context: &ActionContext) -> Value {
        match self.capabilities.speak(HELLO_WORLD_TEXT, context.settings.voice.voice_id()).await {
            Ok(audio) => json!({ "played": true, "audioBytes": audio.audio_bytes }),
            Err(e) => {
                self.events.emit_status(format!("Voice hello-world cue skipped: {}", e));
                json!({ "played": false, "error": e.to_string() })
            }
        }
    }

    async fn run_voice_tts_ping(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let text = format!(
            "{} Gesture pose {} ({}) received. Voice output is active.",
            HELLO_WORLD_TEXT, context.pose_slot, context.pose_label
        );
        let audio = self.capabilities.speak(&text, context.settings.voice.voice_id()).await?;

        Ok(ActionOutput::new(
            text,
            json!({ "voiceMode": "tts_ping", "audioBytes": audio.audio_bytes }),
        ))
    }

    async fn run_voice_transcribe_note(&self) -> Result<ActionOutput, ActionError> {
        self.events.emit_status("Voice STT: recording microphone note...");
        let transcript = self.capabilities.record_and_transcribe(TRANSCRIBE_DURATION_MS).await?;

        let text = transcript.text.trim();
        let output = if text.is_empty() { "[No speech recognized]" } else { text };

        Ok(ActionOutput::new(
            output,
            json!({
                "voiceMode": "stt_note",
                "audioBytes": transcript.audio_bytes,
                "durationMs": transcript.duration_ms,
                "languageCode": transcript.language_code,
                "languageProbability": transcript.language_probability,
                "transcriptionId": transcript.transcription_id,
            }),
        ))
    }

    async fn run_conversation_site_brief(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let cue = self.hello_world_cue(context).await;
        let summary = self.conversation_brief(context).await?;

        match self.capabilities.speak(&summary.brief, context.settings.voice.voice_id()).await {
            Ok(audio) => Ok(ActionOutput::new(
                summary.brief,
                json!({
                    "pageTitle": summary.page_title,
                    "pageTextChars": summary.page_text_chars,
                    "voiceMode": "site_brief_tts",
                    "audioBytes": audio.audio_bytes,
                    "helloWorldCue": cue,
                    "voiceFallback": false,
                }),
            )),
            Err(e) => Ok(ActionOutput::new(
                format!("{}\n\n[TTS fallback] {}", summary.brief, e),
                json!({
                    "pageTitle": summary.page_title,
                    "pageTextChars": summary.page_text_chars,
                    "voiceMode": "site_brief_text_fallback",
                    "helloWorldCue": cue,
                    "voiceFallback": true,
                    "ttsError": e.to_string(),
                }),
            )),
        }
    }

    async fn run_conversation_live(&self, context: &ActionContext) -> Result<ActionOutput, ActionError> {
        let cue = self.hello_world_cue(context).await;

        let (summary, context_error) = match self.conversation_brief(context).await {
            Ok(summary) => (summary, None),
            Err(e) => {
                self.events.emit_status(format!("Live conversation context fallback: {}", e));
                let title = "Untitled page".to_string();
                let summary = ConversationBrief {
                    brief: format!("Opening live conversation for \"{}\".", title),
                    page_title: title,
                    page_text_chars: 0,
                };
                (summary, Some(e.to_string()))
            }
        };

        let signed_url = self
            .capabilities
            .live_conversation_url(context.settings.voice.agent_id())
            .await?;
        if signed_url.trim().is_empty() {
            return Err(ActionError::failed("Signed URL response did not include a usable URL."));
        }

        let opened_via = if self.capabilities.probe().contains(Capability::TabsCreate) {
            self.capabilities.open_tab(&signed_url, true).await?;
            "tabs.create"
        } else {
            "url-only"
        };
        let output = if opened_via == "tabs.create" {
            format!("{}\n\nOpened live conversation in a new tab.", summary.brief)
        } else {
            format!("{}\n\nLive conversation URL: {}", summary.brief, signed_url)
        };

        Ok(ActionOutput::new(
            output,
            json!({
                "pageTitle": summary.page_title,
                "pageTextChars": summary.page_text_chars,
                "voiceMode": "live_conversation",
                "helloWorldCue": cue,
                "contextFallback": context_error.is_some(),
                "contextError": context_error,
                "signedUrlHost": authority_of(&signed_url),
                "openedVia": opened_via,
            }),
        ))
    }
}
