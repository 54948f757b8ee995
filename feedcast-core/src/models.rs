use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One syndication entry resolved through the configured selectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: String,
    pub published_at: DateTime<Utc>,
    pub raw_content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Text,
    Image,
}

/// An inline URL button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub label: String,
    pub url: String,
}

/// One deliverable payload. `Text` units never carry an image; `Image`
/// units carry exactly one and use `text` as their caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUnit {
    pub kind: UnitKind,
    pub text: String,
    pub image: Option<String>,
    /// Button rows, top to bottom.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<Vec<Control>>,
}

impl MessageUnit {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::Text,
            text: text.into(),
            image: None,
            controls: Vec::new(),
        }
    }

    pub fn image(src: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            kind: UnitKind::Image,
            text: caption.into(),
            image: Some(src.into()),
            controls: Vec::new(),
        }
    }

    pub fn with_control(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.push_control(label, url);
        self
    }

    /// Appends a single-button row.
    pub fn push_control(&mut self, label: impl Into<String>, url: impl Into<String>) {
        self.controls.push(vec![Control {
            label: label.into(),
            url: url.into(),
        }]);
    }

    pub fn is_image(&self) -> bool {
        self.kind == UnitKind::Image
    }

    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// An accepted item together with the units to deliver for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub item: FeedItem,
    pub units: Vec<MessageUnit>,
}
