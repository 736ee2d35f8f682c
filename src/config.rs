//! Configuration management for hidkeys-midi
//!
//! Loads the device pattern, key layout, device mode, key signature and MIDI
//! output settings from a JSON (default) or YAML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

use crate::device::{char_to_usage, KeyCode};
use crate::error::ConfigError;
use crate::layout::LayoutTable;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Regular expression matched against the device product name
    pub pattern: String,
    /// Interval label ("plus2", "minus5", "zero", ...) to one or more key codes.
    /// Sorted by label so that overlapping labels resolve deterministically.
    pub layout: BTreeMap<String, KeyCodes>,
    #[serde(rename = "type", default)]
    pub device_mode: DeviceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub midi: MidiConfig,
}

/// One key code or a list of them
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KeyCodes {
    One(KeyCodeSpec),
    Many(Vec<KeyCodeSpec>),
}

impl KeyCodes {
    pub fn specs(&self) -> &[KeyCodeSpec] {
        match self {
            KeyCodes::One(spec) => std::slice::from_ref(spec),
            KeyCodes::Many(specs) => specs,
        }
    }
}

/// A key code as written in the config: a HID usage number, a string of
/// two or more digits, or a single character
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KeyCodeSpec {
    Usage(u64),
    Text(String),
}

impl KeyCodeSpec {
    /// Resolve to a HID keyboard usage id
    pub fn resolve(&self) -> Option<KeyCode> {
        match self {
            KeyCodeSpec::Usage(n) => u8::try_from(*n).ok().map(KeyCode),
            KeyCodeSpec::Text(s) => {
                if s.len() > 1 && s.chars().all(|c| c.is_ascii_digit()) {
                    return s.parse::<u8>().ok().map(KeyCode);
                }
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => char_to_usage(ch).map(KeyCode),
                    _ => None,
                }
            }
        }
    }
}

impl std::fmt::Display for KeyCodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyCodeSpec::Usage(n) => write!(f, "{}", n),
            KeyCodeSpec::Text(s) => write!(f, "{}", s),
        }
    }
}

/// How reports are pulled from the device
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Blocking reads with a short timeout
    #[default]
    Stream,
    /// Non-blocking reads at a fixed interval. Any value other than
    /// `stream` selects this mode.
    #[serde(other)]
    Poll,
}

/// MIDI output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Substring of an existing output port. A virtual port is created when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            output_port: None,
            client_name: default_client_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&contents, is_yaml(path))
            .with_context(|| format!("Failed to parse config: {}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path))?;

        Ok(config)
    }

    /// Parse configuration text without touching the filesystem
    pub fn parse(contents: &str, yaml: bool) -> Result<Self> {
        let config = if yaml {
            serde_yaml::from_str(contents)?
        } else {
            serde_json::from_str(contents)?
        };
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pattern.trim().is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        self.device_regex()?;

        if self.layout.is_empty() {
            return Err(ConfigError::EmptyLayout);
        }
        LayoutTable::build(&self.layout)?;

        Ok(())
    }

    /// Compile the device name pattern
    pub fn device_regex(&self) -> Result<regex::Regex, ConfigError> {
        regex::Regex::new(&self.pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })
    }
}

fn is_yaml(path: &str) -> bool {
    matches!(
        Path::new(path).extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn default_client_name() -> String {
    "hidkeys-midi".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "pattern": "Keypad",
        "layout": {
            "plus1": ["a", "b"],
            "minus2": 30,
            "zero": "40"
        },
        "type": "poll",
        "key": "cmajor"
    }"#;

    #[test]
    fn test_parse_json() {
        let config = AppConfig::parse(SAMPLE, false).unwrap();
        assert_eq!(config.pattern, "Keypad");
        assert_eq!(config.device_mode, DeviceMode::Poll);
        assert_eq!(config.key.as_deref(), Some("cmajor"));
        assert_eq!(config.midi.client_name, "hidkeys-midi");
        assert_eq!(
            config.layout["minus2"],
            KeyCodes::One(KeyCodeSpec::Usage(30))
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_yaml_defaults() {
        let yaml = r#"
pattern: "Num.*Pad"
layout:
  plus7: [4, 5]
midi:
  output_port: "IAC"
"#;
        let config = AppConfig::parse(yaml, true).unwrap();
        assert_eq!(config.device_mode, DeviceMode::Stream);
        assert_eq!(config.key, None);
        assert_eq!(config.midi.output_port.as_deref(), Some("IAC"));
    }

    #[test]
    fn test_any_other_type_means_poll() {
        for mode in ["hid", "polling", "Stream"] {
            let json = format!(
                r#"{{"pattern":"K","layout":{{"plus1":"a"}},"type":"{}"}}"#,
                mode
            );
            let config = AppConfig::parse(&json, false).unwrap();
            assert_eq!(config.device_mode, DeviceMode::Poll, "type {:?}", mode);
        }

        let yaml = "pattern: K\nlayout: {plus1: a}\ntype: usb\n";
        let config = AppConfig::parse(yaml, true).unwrap();
        assert_eq!(config.device_mode, DeviceMode::Poll);
    }

    #[test]
    fn test_key_code_resolution() {
        assert_eq!(KeyCodeSpec::Usage(30).resolve(), Some(KeyCode(30)));
        assert_eq!(KeyCodeSpec::Usage(300).resolve(), None);
        assert_eq!(KeyCodeSpec::Text("a".into()).resolve(), Some(KeyCode(0x04)));
        assert_eq!(KeyCodeSpec::Text("1".into()).resolve(), Some(KeyCode(0x1E)));
        assert_eq!(KeyCodeSpec::Text("39".into()).resolve(), Some(KeyCode(39)));
        assert_eq!(KeyCodeSpec::Text("enter".into()).resolve(), None);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut config = AppConfig::parse(SAMPLE, false).unwrap();
        config.pattern = "  ".into();
        assert_eq!(config.validate(), Err(ConfigError::EmptyPattern));

        config.pattern = "(unclosed".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));

        config.pattern = "Keypad".into();
        config
            .layout
            .insert("upward".into(), KeyCodes::One(KeyCodeSpec::Usage(7)));
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidInterval("upward".into()))
        );

        config.layout.clear();
        assert_eq!(config.validate(), Err(ConfigError::EmptyLayout));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = AppConfig::parse(include_str!("../config.json"), false).unwrap();
        config.validate().unwrap();
        let table = LayoutTable::build(&config.layout).unwrap();
        assert_eq!(table.interval(KeyCode(0x04)), Some(-12));
        assert_eq!(table.interval(KeyCode(0x28)), Some(12));
    }

    #[tokio::test]
    async fn test_load_from_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.json");
        std::fs::write(&config_path, SAMPLE)?;

        let config = AppConfig::load(&config_path.to_string_lossy()).await?;
        assert_eq!(config.layout.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/hidkeys.json").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
