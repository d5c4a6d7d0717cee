//! Configuration for Telegram API credentials and message tracking
//!
//! Values come from the process environment (populated from `.env`) and an
//! optional `config.yml`. Environment variables take precedence.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Deserialize;

use crate::client::SubscriptionFilter;
use crate::error::{Error, Result};
use crate::pattern::{resolve_preset, Matcher, DEFAULT_TRAINING_PATTERN};

pub const DEFAULT_CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_ENV_FILE: &str = ".env";

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
pub struct YamlConfig {
    #[serde(default)]
    telegram: TelegramSection,
    #[serde(default)]
    tracking: TrackingSection,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramSection {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    api_id: Option<String>,
    api_hash: Option<String>,
    phone: Option<String>,
    session_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackingSection {
    chat_ids: Option<Vec<i64>>,
    user_ids: Option<Vec<i64>>,
    pattern: Option<String>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

impl YamlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::Configuration(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }
}

/// What to listen for and where.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Empty means any conversation.
    pub conversation_ids: BTreeSet<i64>,
    /// Empty means any sender.
    pub sender_ids: BTreeSet<i64>,
    pub pattern: String,
    pub session_name: String,
}

impl TrackingConfig {
    /// Replace the configured pattern with a command-line override.
    /// An empty override keeps the configured pattern.
    pub fn with_pattern_override(mut self, pattern: Option<&str>) -> Self {
        if let Some(pattern) = pattern.filter(|p| !p.is_empty()) {
            self.pattern = resolve_preset(pattern).to_string();
        }
        self
    }

    pub fn matcher(&self) -> Result<Matcher> {
        Matcher::compile(&self.pattern)
    }

    pub fn filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            conversation_ids: self.conversation_ids.clone(),
            sender_ids: self.sender_ids.clone(),
        }
    }

    /// Print what is being tracked.
    pub fn print_summary(&self) {
        println!("Current tracking users: {:?}", self.sender_ids);
        println!("Current tracking chats: {:?}", self.conversation_ids);
        println!("Current pattern: \"{}\"", self.pattern);
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    pub phone: Option<String>,
    pub tracking: TrackingConfig,
}

impl Config {
    /// Load `.env` and the optional YAML file, then resolve every key.
    pub fn load(env_file: Option<&Path>, config_file: Option<&Path>) -> Result<Self> {
        Self::load_dotenv(env_file);

        let yaml_path = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let yaml = if yaml_path.exists() {
            YamlConfig::from_file(&yaml_path)?
        } else if config_file.is_some() {
            return Err(Error::Configuration(format!(
                "config file {} not found",
                yaml_path.display()
            )));
        } else {
            YamlConfig::default()
        };

        Self::from_lookup(|key| std::env::var(key).ok(), yaml)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv(env_file: Option<&Path>) {
        match env_file {
            Some(path) => {
                if let Err(e) = dotenvy::from_path(path) {
                    tracing::warn!("Failed to load {}: {}", path.display(), e);
                }
            }
            None => {
                // Try to load from current directory first, then parent
                if dotenvy::from_filename(DEFAULT_ENV_FILE).is_err() {
                    let _ = dotenvy::from_filename("../.env");
                }
            }
        }
    }

    /// Resolve configuration from a key lookup and parsed YAML.
    pub fn from_lookup<F>(lookup: F, yaml: YamlConfig) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram = yaml.telegram;
        let tracking = yaml.tracking;

        let api_id_raw = resolve(&lookup, "API_ID", telegram.api_id)
            .ok_or_else(|| Error::Configuration("API_ID must be set in .env".to_string()))?;
        let api_id = api_id_raw.trim().parse::<i32>().map_err(|_| {
            Error::Configuration(format!("API_ID must be an integer, got {:?}", api_id_raw))
        })?;

        let api_hash = resolve(&lookup, "API_HASH", telegram.api_hash)
            .filter(|hash| !hash.trim().is_empty())
            .ok_or_else(|| Error::Configuration("API_HASH must be set in .env".to_string()))?;

        let phone = resolve(&lookup, "PHONE", telegram.phone).filter(|p| !p.is_empty());

        let conversation_ids = match lookup("CHAT_IDS") {
            Some(raw) => parse_id_list(&raw, "CHAT_IDS")?,
            None => tracking.chat_ids.unwrap_or_default().into_iter().collect(),
        };
        let sender_ids = match lookup("USER_IDS") {
            Some(raw) => parse_id_list(&raw, "USER_IDS")?,
            None => tracking.user_ids.unwrap_or_default().into_iter().collect(),
        };

        let pattern = resolve(&lookup, "PATTERN", tracking.pattern)
            .filter(|p| !p.is_empty())
            .map(|p| resolve_preset(&p).to_string())
            .unwrap_or_else(|| DEFAULT_TRAINING_PATTERN.to_string());

        let session_name = resolve(&lookup, "SESSION_NAME", telegram.session_name)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_session_name);

        Ok(Self {
            api_id,
            api_hash,
            phone,
            tracking: TrackingConfig {
                conversation_ids,
                sender_ids,
                pattern,
                session_name,
            },
        })
    }
}

/// Prefer the environment key, then the YAML value with `${VAR}` expanded.
fn resolve<F>(lookup: &F, env_key: &str, yaml_value: Option<String>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(env_key) {
        return Some(value);
    }
    let value = yaml_value?;
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        return lookup(var_name);
    }
    Some(value)
}

/// Parse a comma-separated id list such as `100,200,`.
///
/// Segments are trimmed and empty segments are dropped, so the trailing
/// comma older `.env` files carry is accepted but not required.
pub fn parse_id_list(raw: &str, key: &str) -> Result<BTreeSet<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment.parse::<i64>().map_err(|_| {
                Error::Configuration(format!("{} contains a non-integer id: {:?}", key, segment))
            })
        })
        .collect()
}

/// Session name derived from the current local time.
pub fn default_session_name() -> String {
    Local::now().format("session_%Y%m%d_%H%M%S").to_string()
}
