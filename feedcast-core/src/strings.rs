//! Localized labels used in assembled messages.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::StringsError;

pub const DEFAULT_LANGUAGE: &str = "en-us";

const BUILTIN: [(&str, &str); 6] = [
    ("new-feed", "New post"),
    ("read-more", "… Read more"),
    ("view-post", "View post"),
    ("open-image", "Open image"),
    ("subscribed", "This chat will now receive new posts."),
    ("unsubscribed", "This chat will no longer receive posts."),
];

/// A string, or a list of fragments joined without separator.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Entry {
    One(String),
    Many(Vec<String>),
}

impl Entry {
    fn joined(&self) -> String {
        match self {
            Entry::One(s) => s.clone(),
            Entry::Many(parts) => parts.concat(),
        }
    }
}

type Table = HashMap<String, Entry>;

/// Strings file contents, keyed by language code.
#[derive(Debug, Clone, Default)]
pub struct Strings {
    languages: HashMap<String, Table>,
}

/// The labels a pipeline run needs, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
    pub new_post: String,
    pub read_more: String,
    pub view_post: String,
    pub open_image: String,
}

impl Strings {
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, StringsError> {
        Ok(Self {
            languages: serde_json::from_str(json)?,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StringsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads `path` when given; a missing or malformed file is logged and
    /// the built-in table is used instead.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::builtin();
        };
        match Self::load(path) {
            Ok(strings) => strings,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "using built-in strings");
                Self::builtin()
            }
        }
    }

    pub fn has_language(&self, language: &str) -> bool {
        self.languages.contains_key(language)
    }

    /// Looks `name` up in `language`, then in the default language, then in
    /// the built-in English table.
    pub fn get(&self, language: &str, name: &str) -> Option<String> {
        let lookup = |lang: &str| {
            self.languages
                .get(lang)
                .and_then(|table| table.get(name))
                .map(Entry::joined)
        };
        lookup(language)
            .or_else(|| lookup(DEFAULT_LANGUAGE))
            .or_else(|| {
                BUILTIN
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value).to_owned())
            })
    }

    pub fn labels(&self, language: &str) -> Labels {
        if !self.languages.is_empty() && !self.has_language(language) {
            warn!(
                error = %StringsError::Language(language.to_owned()),
                "falling back to {DEFAULT_LANGUAGE}"
            );
        }
        let get = |name| self.get(language, name).unwrap_or_default();
        Labels {
            new_post: get("new-feed"),
            read_more: get("read-more"),
            view_post: get("view-post"),
            open_image: get("open-image"),
        }
    }
}

impl Default for Labels {
    fn default() -> Self {
        Strings::builtin().labels(DEFAULT_LANGUAGE)
    }
}
