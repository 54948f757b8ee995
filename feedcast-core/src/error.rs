use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },
    #[error("feed too large: more than {max} bytes")]
    TooLarge { max: u64 },
}

/// A candidate item lacks something the configured selectors require.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("item #{index}: {field} selector `{selector}` matched nothing")]
    Missing {
        index: usize,
        field: &'static str,
        selector: String,
    },
    #[error("item #{index}: unparseable publication date `{value}`")]
    InvalidDate { index: usize, value: String },
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SanitizationError {
    #[error("content of {link} is empty after sanitization")]
    Empty { link: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field} `{selector}`: {reason}")]
    Selector {
        field: &'static str,
        selector: String,
        reason: String,
    },
    #[error("invalid skip condition `{0}` (expected none, feed/<css>, content/<css> or title/<regex>)")]
    SkipRule(String),
    #[error("invalid title pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("invalid feed source `{source_url}`: {reason}")]
    Source { source_url: String, reason: String },
    #[error("invalid retry policy: {0}")]
    Retry(String),
    #[error("{field} must be at least {min} characters, got {value}")]
    Limit {
        field: &'static str,
        min: usize,
        value: usize,
    },
}

#[derive(Debug, Error)]
pub enum StringsError {
    #[error("cannot read strings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed strings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("language `{0}` not present in strings file")]
    Language(String),
}

/// Failure reported by a delivery transport for one message unit.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("recipient revoked access: {0}")]
    Unauthorized(String),
    /// The bot credentials themselves were refused; no recipient is at fault.
    #[error("bot token rejected: {0}")]
    Token(String),
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// A fan-out that could not finish for every recipient.
#[derive(Debug, Error)]
pub enum FanOutError {
    #[error(transparent)]
    Registry(#[from] StorageError),
    #[error("bot token rejected: {0}")]
    Token(String),
}

/// Any failure of a single pipeline run. None of them is fatal: the run
/// yields no item and the next scheduled run proceeds normally.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Sanitization(#[from] SanitizationError),
    #[error("state store: {0}")]
    State(#[from] StorageError),
}

impl PipelineError {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::Sanitization(_) => "sanitization",
            PipelineError::State(_) => "state",
        }
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_error_names_item_and_selector() {
        let err = ExtractionError::Missing {
            index: 2,
            field: "content",
            selector: "description".into(),
        };
        assert_eq!(
            err.to_string(),
            "item #2: content selector `description` matched nothing"
        );
    }

    #[test]
    fn pipeline_error_reports_stage() {
        let err = PipelineError::from(SanitizationError::Empty {
            link: "http://e/1".into(),
        });
        assert_eq!(err.stage(), "sanitization");
        assert!(err.to_string().contains("http://e/1"));
    }
}
