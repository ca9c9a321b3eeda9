use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::tags::{self, TagError, Tags};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Lower bound used for article searches that don't specify `date_start`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultRange {
    /// Start of the current UTC day.
    #[default]
    Day,
    /// Unix epoch, i.e. everything up to the end of today.
    All,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// sqlx connection string
    #[serde(default = "default_db")]
    pub db: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub default_range: DefaultRange,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_db() -> String {
    "sqlite:allnews.db?mode=rwc".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Refresh period between fetches in continuous mode
    #[serde(default = "default_update", deserialize_with = "deserialize_duration")]
    pub update: Duration,
    #[serde(default)]
    pub tags: Tags,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_update() -> Duration {
    Duration::from_secs(15 * 60)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {:?}", raw)))
}

/// Parse durations like "100ms", "30s", "15m", "1h30m" or "1d".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut has_unit = false;
    let mut chars = s.trim().chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
            continue;
        }

        let n: u64 = num_buf.parse().ok()?;
        num_buf.clear();
        let unit_ms = match ch {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            _ => return None,
        };
        total_ms = total_ms.checked_add(n.checked_mul(unit_ms)?)?;
        has_unit = true;
    }

    // Trailing digits with no unit
    if !num_buf.is_empty() {
        return None;
    }

    if has_unit && total_ms > 0 {
        Some(Duration::from_millis(total_ms))
    } else {
        None
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source with url {:?} has an empty name",
                    source.url
                )));
            }
            if source.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source {:?} has an empty url",
                    source.name
                )));
            }
        }
        Ok(())
    }

    /// Every tag category with all values seen across the configured sources.
    pub fn all_tags(&self) -> BTreeMap<String, BTreeSet<String>> {
        tags::all_tags(&self.sources)
    }

    /// Names of the sources whose tags contain every `category:value` token.
    pub fn resources_with_tags<S: AsRef<str>>(
        &self,
        tokens: &[S],
    ) -> Result<BTreeSet<String>, TagError> {
        tags::resolve(tokens, &self.sources)
    }
}
