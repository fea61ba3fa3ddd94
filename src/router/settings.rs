//! Router settings document
//!
//! Any JSON value deserializes into a fully valid [`RouterSettings`]: missing
//! or malformed fields take their defaults, unknown action ids become `none`,
//! unknown modifier gestures become the configured base gesture, numbers are
//! clamped and the remote session id is sanitized.

use super::actions::ActionId;
use crate::broker::sanitize_session_id;
use crate::pose::Gesture;
use crate::store::{SharedStore, SETTINGS_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

pub const DEFAULT_COOLDOWN_MS: u64 = 2000;
pub const MAX_COOLDOWN_MS: u64 = 5000;
pub const DEFAULT_SOURCE_COUNT: usize = 5;
pub const MAX_SOURCE_COUNT: usize = 8;
pub const DEFAULT_PROVIDER: &str = "ollama";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_SEARCH_URL_TEMPLATE: &str = "https://www.google.com/search?q={{query}}";
pub const DEFAULT_QUERY_TEMPLATE: &str = "Research this topic and summarize with citations: {{pageTitle}}";
pub const DEFAULT_ASK_PROMPT_TEMPLATE: &str =
    "Pose {{poseId}} ({{poseLabel}}) fired on {{pageTitle}}. Give a concise action recommendation and why.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    #[default]
    ConfirmEach,
    Cooldown,
}

impl SafetyMode {
    fn parse(raw: Option<&Value>) -> Self {
        match raw.and_then(Value::as_str) {
            Some("cooldown") => SafetyMode::Cooldown,
            _ => SafetyMode::ConfirmEach,
        }
    }
}

/// How a modifier is detected; only the secondary-hand strategy exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierStrategy {
    #[default]
    SecondaryHand,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierConfig {
    pub enabled: bool,
    pub strategy: ModifierStrategy,
    pub gesture: Gesture,
    pub per_pose_gesture: BTreeMap<usize, Gesture>,
    pub per_pose_alt_action: BTreeMap<usize, ActionId>,
}

impl Default for ModifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: ModifierStrategy::SecondaryHand,
            gesture: Gesture::Fist,
            per_pose_gesture: BTreeMap::from([(0, Gesture::Fist), (1, Gesture::Pinch), (2, Gesture::Fist)]),
            per_pose_alt_action: BTreeMap::from([
                (0, ActionId::ResearchAgentAlt),
                (1, ActionId::ScreenshotAnalyzeAlt),
                (2, ActionId::ConversationLiveElevenlabs),
            ]),
        }
    }
}

impl ModifierConfig {
    /// Gesture the secondary hand must show for `slot`
    pub fn expected_gesture(&self, slot: usize) -> Gesture {
        self.per_pose_gesture.get(&slot).copied().unwrap_or(self.gesture)
    }

    pub fn alternate_action(&self, slot: usize) -> ActionId {
        self.per_pose_alt_action.get(&slot).copied().unwrap_or_default()
    }

    fn normalize(raw: Option<&Value>) -> Self {
        let defaults = Self::default();
        let empty = Map::new();
        let raw = raw.and_then(Value::as_object).unwrap_or(&empty);

        let gesture = raw
            .get("gesture")
            .and_then(Value::as_str)
            .and_then(Gesture::parse)
            .unwrap_or(defaults.gesture);

        Self {
            enabled: raw.get("enabled") != Some(&Value::Bool(false)),
            strategy: ModifierStrategy::SecondaryHand,
            gesture,
            per_pose_gesture: normalize_slot_map(raw.get("perPoseGesture"), &defaults.per_pose_gesture, |value| {
                value.as_str().and_then(Gesture::parse).unwrap_or(gesture)
            }),
            per_pose_alt_action: normalize_slot_map(
                raw.get("perPoseAltAction"),
                &defaults.per_pose_alt_action,
                action_from_value,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSettings {
    pub source_count_default: usize,
    pub close_tabs_after_run: bool,
    pub search_engine_url_template: String,
    pub query_template: String,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            source_count_default: DEFAULT_SOURCE_COUNT,
            close_tabs_after_run: true,
            search_engine_url_template: DEFAULT_SEARCH_URL_TEMPLATE.to_string(),
            query_template: DEFAULT_QUERY_TEMPLATE.to_string(),
        }
    }
}

impl ResearchSettings {
    fn normalize(raw: Option<&Value>) -> Self {
        let empty = Map::new();
        let raw = raw.and_then(Value::as_object).unwrap_or(&empty);

        Self {
            source_count_default: parse_int(raw.get("sourceCountDefault"))
                .map(|count| count.clamp(1, MAX_SOURCE_COUNT as i64) as usize)
                .unwrap_or(DEFAULT_SOURCE_COUNT),
            close_tabs_after_run: raw.get("closeTabsAfterRun") != Some(&Value::Bool(false)),
            search_engine_url_template: non_blank(raw.get("searchEngineUrlTemplate"), DEFAULT_SEARCH_URL_TEMPLATE),
            query_template: non_blank(raw.get("queryTemplate"), DEFAULT_QUERY_TEMPLATE),
        }
    }
}

/// Voice backend identifiers; blank means the backend default
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSettings {
    pub agent_id: String,
    pub voice_id: String,
}

impl VoiceSettings {
    fn normalize(raw: Option<&Value>) -> Self {
        let field = |key: &str| {
            raw.and_then(|raw| raw.get(key))
                .and_then(Value::as_str)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };
        Self {
            agent_id: field("agentId"),
            voice_id: field("voiceId"),
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        Some(self.agent_id.as_str()).filter(|id| !id.is_empty())
    }

    pub fn voice_id(&self) -> Option<&str> {
        Some(self.voice_id.as_str()).filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBridgeSettings {
    pub session_id: String,
}

impl Default for RemoteBridgeSettings {
    fn default() -> Self {
        Self {
            session_id: sanitize_session_id(None),
        }
    }
}

/// Action mapping, modifier, safety policy and model selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct RouterSettings {
    pub mapping: BTreeMap<usize, ActionId>,
    pub modifier: ModifierConfig,
    pub research: ResearchSettings,
    pub voice: VoiceSettings,
    pub remote_bridge: RemoteBridgeSettings,
    pub safety_mode: SafetyMode,
    pub cooldown_ms: u64,
    pub armed: bool,
    pub provider: String,
    pub model: String,
    pub ask_prompt_template: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            mapping: default_mapping(),
            modifier: ModifierConfig::default(),
            research: ResearchSettings::default(),
            voice: VoiceSettings::default(),
            remote_bridge: RemoteBridgeSettings::default(),
            safety_mode: SafetyMode::ConfirmEach,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            armed: false,
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            ask_prompt_template: DEFAULT_ASK_PROMPT_TEMPLATE.to_string(),
        }
    }
}

fn default_mapping() -> BTreeMap<usize, ActionId> {
    BTreeMap::from([
        (0, ActionId::ReadSummarize),
        (1, ActionId::ScreenshotAnalyze),
        (2, ActionId::ConversationSiteBrief),
    ])
}

impl RouterSettings {
    /// Build valid settings from an arbitrary document
    pub fn normalize(raw: &Value) -> Self {
        let get = |key: &str| raw.get(key);

        Self {
            mapping: normalize_slot_map(get("mapping"), &default_mapping(), action_from_value),
            modifier: ModifierConfig::normalize(get("modifier")),
            research: ResearchSettings::normalize(get("research")),
            voice: VoiceSettings::normalize(get("voice").or_else(|| get("elevenLabs"))),
            remote_bridge: RemoteBridgeSettings {
                session_id: sanitize_session_id(
                    get("remoteBridge").and_then(|bridge| bridge.get("sessionId")).and_then(Value::as_str),
                ),
            },
            safety_mode: SafetyMode::parse(get("safetyMode")),
            cooldown_ms: parse_int(get("cooldownMs"))
                .map(|ms| ms.clamp(0, MAX_COOLDOWN_MS as i64) as u64)
                .unwrap_or(DEFAULT_COOLDOWN_MS),
            armed: get("armed").is_some_and(truthy),
            provider: non_blank(get("provider"), DEFAULT_PROVIDER),
            model: non_blank(get("model"), DEFAULT_MODEL),
            ask_prompt_template: non_blank(get("askPromptTemplate"), DEFAULT_ASK_PROMPT_TEMPLATE),
        }
    }

    /// Base action mapped to `slot`
    pub fn action_for(&self, slot: usize) -> ActionId {
        self.mapping.get(&slot).copied().unwrap_or_default()
    }

    /// Stored settings, or defaults when absent or unreadable
    pub fn load(store: &SharedStore) -> Self {
        match store.load(SETTINGS_KEY) {
            Ok(Some(document)) => Self::normalize(&document),
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("⚠️  Failed to load router settings, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    /// Persist; failures are logged and the in-memory value stays authoritative
    pub fn save(&self, store: &SharedStore) {
        let document = match serde_json::to_value(self) {
            Ok(document) => document,
            Err(e) => {
                warn!("⚠️  Failed to serialize router settings: {}", e);
                return;
            }
        };
        if let Err(e) = store.save(SETTINGS_KEY, &document) {
            warn!("⚠️  Failed to persist router settings: {:#}", e);
        }
    }
}

impl From<Value> for RouterSettings {
    fn from(raw: Value) -> Self {
        Self::normalize(&raw)
    }
}

fn action_from_value(value: &Value) -> ActionId {
    value.as_str().and_then(ActionId::parse).unwrap_or_default()
}

/// Defaults overlaid with every numeric key of `raw`
///
/// Present keys go through `normalize` even when malformed, so an unknown
/// action id becomes `none` rather than the default.
fn normalize_slot_map<T: Copy>(
    raw: Option<&Value>,
    defaults: &BTreeMap<usize, T>,
    normalize: impl Fn(&Value) -> T,
) -> BTreeMap<usize, T> {
    let mut map = defaults.clone();
    let Some(entries) = raw.and_then(Value::as_object) else {
        return map;
    };

    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        if let Ok(slot) = key.trim().parse::<usize>() {
            map.insert(slot, normalize(value));
        }
    }
    map
}

/// Integer prefix of a number or numeric string
fn parse_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(text) => {
            let text = text.trim();
            let (sign, digits) = match text.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, text.strip_prefix('+').unwrap_or(text)),
            };
            let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
            digits[..end].parse::<i64>().ok().map(|n| sign * n)
        }
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn non_blank(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
