//! Configuration management for the gesture bridge
//!
//! Handles loading, defaulting and validation of the YAML configuration file.

use crate::pipeline::{default_pose_classes, PoseClass};
use crate::pose::library::{
    DEFAULT_MATCH_THRESHOLD, DEFAULT_MAX_POSES, DEFAULT_MAX_SAMPLES_PER_SLOT, DEFAULT_MAX_SNAPSHOTS,
};
use crate::pose::LibraryOptions;
use crate::trigger::TriggerDefinition;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default = "default_pose_classes")]
    pub pose_classes: Vec<PoseClass>,
    #[serde(default = "default_triggers")]
    pub triggers: Vec<TriggerDefinition>,
    #[serde(default)]
    pub safety: SafetyConfig,
}

/// HTTP API and remote bridge settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a dispatched command waits for a helper result
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// SSE keep-alive interval
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Template library sizing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LibraryConfig {
    #[serde(default = "default_max_poses")]
    pub max_poses: usize,
    #[serde(default = "default_max_samples_per_slot")]
    pub max_samples_per_slot: usize,
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

/// Confirmation behaviour when no operator is attached
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SafetyConfig {
    /// Answer every confirmation prompt with "yes"
    #[serde(default)]
    pub auto_confirm: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            library: LibraryConfig::default(),
            pose_classes: default_pose_classes(),
            triggers: default_triggers(),
            safety: SafetyConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            command_timeout_ms: default_command_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            max_poses: default_max_poses(),
            max_samples_per_slot: default_max_samples_per_slot(),
            max_snapshots: default_max_snapshots(),
            match_threshold: default_match_threshold(),
            labels: default_labels(),
        }
    }
}

impl LibraryConfig {
    pub fn to_options(&self) -> LibraryOptions {
        LibraryOptions {
            max_poses: self.max_poses,
            max_samples_per_slot: self.max_samples_per_slot,
            max_snapshots: self.max_snapshots,
            match_threshold: self.match_threshold,
            labels: self.labels.clone(),
            initial_state: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        let library = &self.library;
        if library.max_poses == 0 {
            anyhow::bail!("library.max_poses must be at least 1");
        }
        if library.max_samples_per_slot == 0 {
            anyhow::bail!("library.max_samples_per_slot must be at least 1");
        }
        if library.max_snapshots == 0 {
            anyhow::bail!("library.max_snapshots must be at least 1");
        }
        if library.match_threshold.is_nan() || library.match_threshold <= 0.0 {
            anyhow::bail!("library.match_threshold must be positive (got {})", library.match_threshold);
        }

        if self.server.command_timeout_ms == 0 {
            anyhow::bail!("server.command_timeout_ms must be positive");
        }
        if self.server.ping_interval_ms == 0 {
            anyhow::bail!("server.ping_interval_ms must be positive");
        }

        for class in &self.pose_classes {
            if class.slot >= library.max_poses {
                anyhow::bail!(
                    "Pose class slot {} is out of range (max_poses = {})",
                    class.slot,
                    library.max_poses
                );
            }
        }

        let mut seen = HashSet::new();
        for (index, trigger) in self.triggers.iter().enumerate() {
            self.validate_trigger(trigger)
                .with_context(|| format!("Invalid trigger #{} ('{}')", index, trigger.id))?;
            if !seen.insert(trigger.id.as_str()) {
                anyhow::bail!("Duplicate trigger id '{}'", trigger.id);
            }
        }

        Ok(())
    }

    /// Validate a single trigger definition
    fn validate_trigger(&self, trigger: &TriggerDefinition) -> Result<()> {
        if trigger.id.trim().is_empty() {
            anyhow::bail!("Trigger id cannot be empty");
        }

        match (trigger.pose_slot, trigger.gesture) {
            (Some(_), Some(_)) => anyhow::bail!("Trigger must not set both 'pose_slot' and 'gesture'"),
            (None, None) => anyhow::bail!("Trigger must set either 'pose_slot' or 'gesture'"),
            (Some(slot), None) if slot >= self.library.max_poses => {
                anyhow::bail!(
                    "Trigger pose_slot {} is out of range (max_poses = {})",
                    slot,
                    self.library.max_poses
                );
            }
            _ => {}
        }

        if let Some(action) = &trigger.action {
            if action.kind.trim().is_empty() {
                anyhow::bail!("Trigger action 'type' cannot be empty");
            }
        }

        Ok(())
    }
}

/// One trigger per default slot, routed through the pose action mapping
pub fn default_triggers() -> Vec<TriggerDefinition> {
    ["read_summarize", "screenshot_analyze", "conversation_site_brief"]
        .iter()
        .enumerate()
        .map(|(slot, action)| {
            TriggerDefinition::for_slot(format!("pose-{}-trigger", slot), slot).with_action("pose-action", action)
        })
        .collect()
}

// Default value functions
fn default_port() -> u16 { crate::api::DEFAULT_API_PORT }
fn default_command_timeout_ms() -> u64 { 15_000 }
fn default_ping_interval_ms() -> u64 { 10_000 }
fn default_max_body_bytes() -> usize { crate::api::DEFAULT_MAX_BODY_BYTES }
fn default_max_poses() -> usize { DEFAULT_MAX_POSES }
fn default_max_samples_per_slot() -> usize { DEFAULT_MAX_SAMPLES_PER_SLOT }
fn default_max_snapshots() -> usize { DEFAULT_MAX_SNAPSHOTS }
fn default_match_threshold() -> f64 { DEFAULT_MATCH_THRESHOLD }
fn default_labels() -> Vec<String> { LibraryOptions::default().labels }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Gesture;
    use crate::trigger::HandFilter;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 4173);
        assert_eq!(config.server.command_timeout(), Duration::from_secs(15));
        assert_eq!(config.library.labels, vec!["thumbs_up", "palm", "peace"]);
        assert_eq!(config.triggers.len(), 3);
        assert_eq!(config.triggers[2].id, "pose-2-trigger");
        assert_eq!(config.pose_classes[1].gesture, Gesture::OpenPalm);
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
server:
  port: 8080
  command_timeout_ms: 2000
library:
  max_poses: 4
  match_threshold: 0.2
  labels: [a, b, c, d]
pose_classes:
  - { slot: 3, gesture: fist }
triggers:
  - id: left-fist
    gesture: fist
    hand: left
    hold_ms: 300
  - id: slot-3
    pose_slot: 3
    action: { type: pose-action, default_action_id: ask_model }
safety:
  auto_confirm: true
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.ping_interval_ms, 10_000);
        assert_eq!(config.library.max_poses, 4);
        assert_eq!(config.library.max_samples_per_slot, 24);
        assert_eq!(config.triggers[0].hand, HandFilter::Left);
        assert_eq!(config.triggers[0].hold_ms, 300);
        assert_eq!(config.triggers[0].cooldown_ms, 1200);
        assert_eq!(
            config.triggers[1].action.as_ref().and_then(|a| a.default_action_id.as_deref()),
            Some("ask_model")
        );
        assert!(config.safety.auto_confirm);
        assert_eq!(config.library.to_options().max_poses, 4);
    }

    #[test]
    fn test_rejects_invalid_triggers() {
        let both = "triggers: [ { id: t, pose_slot: 0, gesture: fist } ]";
        assert!(AppConfig::from_yaml(both).is_err());

        let neither = "triggers: [ { id: t } ]";
        assert!(AppConfig::from_yaml(neither).is_err());

        let out_of_range = "triggers: [ { id: t, pose_slot: 3 } ]";
        let err = AppConfig::from_yaml(out_of_range).unwrap_err();
        assert!(format!("{:#}", err).contains("out of range"));

        let duplicate = "triggers: [ { id: t, gesture: fist }, { id: t, gesture: pinch } ]";
        let err = AppConfig::from_yaml(duplicate).unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate trigger id 't'"));

        let blank = "triggers: [ { id: ' ', gesture: fist } ]";
        assert!(AppConfig::from_yaml(blank).is_err());
    }

    #[test]
    fn test_rejects_invalid_library() {
        assert!(AppConfig::from_yaml("library: { max_poses: 0 }\ntriggers: []\npose_classes: []").is_err());
        assert!(AppConfig::from_yaml("library: { match_threshold: 0 }").is_err());
        assert!(AppConfig::from_yaml("library: { max_snapshots: 0 }").is_err());
        assert!(AppConfig::from_yaml("pose_classes: [ { slot: 5, gesture: fist } ]").is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = AppConfig::default();
        config.server.port = 9999;
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing_file_names_path() {
        let err = AppConfig::load("/nonexistent/gesture-bridge.yaml").await.unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/gesture-bridge.yaml"));
    }
}
