use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Telegram rejects text messages longer than this.
pub const MAX_TEXT_LEN: usize = 4096;
/// Telegram rejects photo captions longer than this.
pub const MAX_CAPTION_LEN: usize = 1024;
const MIN_LIMIT: usize = 64;
const MAX_BACKOFF_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppConfig {
    pub token: String,
    pub api_url: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub language: String,
    pub strings_file: Option<PathBuf>,
    pub proxy: Option<String>,
    pub interval_seconds: u64,
    /// Let chats subscribe and unsubscribe themselves with `/start` and `/stop`.
    pub self_registration: bool,
    pub feed_configs: FeedConfig,
    pub fetch: FetchConfig,
    pub limits: MessageLimits,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Xml,
    Html,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FeedConfig {
    pub source: String,
    pub feed_format: FeedFormat,
    pub feeds_selector: String,
    /// `None` means items carry no title.
    pub title_selector: Option<String>,
    pub link_selector: String,
    pub content_selector: String,
    pub published_selector: String,
    #[serde(rename = "feed-skip-condition")]
    pub skip: SkipRule,
    pub remove_elements: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetchConfig {
    pub request_timeout_seconds: u64,
    pub max_feed_bytes: u64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MessageLimits {
    pub max_text_len: usize,
    pub max_caption_len: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
}

/// Condition excluding a candidate item, checked at exactly one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SkipRule {
    #[default]
    None,
    /// Skip the candidate when this selector matches inside the feed item node.
    FeedSelector(String),
    /// Skip the candidate when this selector matches inside its sanitized content.
    ContentSelector(String),
    /// Skip the candidate when its title matches from the start.
    TitleRegex(Regex),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: "https://api.telegram.org".into(),
            log_level: "info".into(),
            log_file: None,
            state_dir: None,
            language: "en-us".into(),
            strings_file: None,
            proxy: None,
            interval_seconds: 300,
            self_registration: true,
            feed_configs: FeedConfig::default(),
            fetch: FetchConfig::default(),
            limits: MessageLimits::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            feed_format: FeedFormat::Xml,
            feeds_selector: "item".into(),
            title_selector: Some("title".into()),
            link_selector: "link".into(),
            content_selector: "description".into(),
            published_selector: "pubDate".into(),
            skip: SkipRule::None,
            remove_elements: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            max_feed_bytes: 5 * 1024 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            initial_delay_ms: 3000,
            backoff_factor: 2.0,
            max_delay_ms: 300_000,
        }
    }
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            max_text_len: MAX_TEXT_LEN,
            max_caption_len: MAX_CAPTION_LEN,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

impl AppConfig {
    /// Default location, `<config dir>/feedcast/config.json`.
    pub fn default_path() -> PathBuf {
        let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.push("feedcast");
        dir.push("config.json");
        dir
    }

    /// Loads and validates the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.feed_configs.validate()?;
        self.fetch.retry.validate()?;
        self.limits.validate()
    }

    /// Directory holding the state and chat registry files.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            let mut dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
            dir.push("feedcast");
            dir
        })
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.interval_seconds.max(1)),
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.source).map_err(|e| ConfigError::Source {
            source_url: self.source.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Source {
                source_url: self.source.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        check_selector("feeds-selector", &self.feeds_selector)?;
        if let Some(title) = &self.title_selector {
            check_selector("title-selector", title)?;
        }
        check_selector("link-selector", &self.link_selector)?;
        check_selector("content-selector", &self.content_selector)?;
        check_selector("published-selector", &self.published_selector)?;
        if let Some(remove) = &self.remove_elements {
            check_selector("remove-elements", remove)?;
        }
        match &self.skip {
            SkipRule::FeedSelector(s) | SkipRule::ContentSelector(s) => {
                check_selector("feed-skip-condition", s)
            }
            SkipRule::None | SkipRule::TitleRegex(_) => Ok(()),
        }
    }

    /// Key under which the last published timestamp of this source is kept.
    pub fn state_key(&self) -> String {
        format!("last-feed-date:{}", self.source)
    }
}

impl MessageLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("max-text-len", self.max_text_len),
            ("max-caption-len", self.max_caption_len),
        ] {
            if value < MIN_LIMIT {
                return Err(ConfigError::Limit {
                    field,
                    min: MIN_LIMIT,
                    value,
                });
            }
        }
        Ok(())
    }
}

impl RetryPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let factor = self.backoff_factor;
        if !(1.0..=MAX_BACKOFF_FACTOR).contains(&factor) {
            return Err(ConfigError::Retry(format!(
                "backoff-factor must be between 1 and {MAX_BACKOFF_FACTOR}, got {factor}"
            )));
        }
        Ok(())
    }

    /// Delay following `current`, grown by the backoff factor and capped.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let max = Duration::from_millis(self.max_delay_ms);
        let factor = if self.backoff_factor.is_finite() {
            self.backoff_factor.max(1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(current.as_secs_f64() * factor)
            .map_or(max, |grown| grown.min(max))
    }
}

fn check_selector(field: &'static str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::Selector {
            field,
            selector: selector.to_owned(),
            reason: e.to_string(),
        })
}

impl SkipRule {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            return Ok(SkipRule::None);
        }
        let (scope, condition) = value
            .split_once('/')
            .ok_or_else(|| ConfigError::SkipRule(value.to_owned()))?;
        match scope {
            "feed" => Ok(SkipRule::FeedSelector(condition.to_owned())),
            "content" => Ok(SkipRule::ContentSelector(condition.to_owned())),
            "title" => Ok(SkipRule::TitleRegex(Regex::new(&format!(
                "^(?:{condition})"
            ))?)),
            _ => Err(ConfigError::SkipRule(value.to_owned())),
        }
    }
}

impl TryFrom<String> for SkipRule {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SkipRule::parse(&value)
    }
}

impl From<SkipRule> for String {
    fn from(rule: SkipRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for SkipRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipRule::None => f.write_str("none"),
            SkipRule::FeedSelector(s) => write!(f, "feed/{s}"),
            SkipRule::ContentSelector(s) => write!(f, "content/{s}"),
            SkipRule::TitleRegex(re) => {
                let pattern = re.as_str();
                let inner = pattern
                    .strip_prefix("^(?:")
                    .and_then(|p| p.strip_suffix(')'))
                    .unwrap_or(pattern);
                write!(f, "title/{inner}")
            }
        }
    }
}
