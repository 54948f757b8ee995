//! Reduces arbitrary item markup to the platform whitelist.

use std::collections::HashSet;

use ego_tree::{NodeId, NodeRef};
use scraper::{Html, Node, Selector};

use crate::config::SkipRule;
use crate::error::{ExtractionError, SanitizationError};
use crate::markup::{self, ImageRef, Tag, Token};

/// Elements whose text is code or styling rather than prose.
const DROPPED_TAGS: [&str; 4] = ["script", "style", "template", "noscript"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    Content(String),
    /// The content-scoped skip rule matched.
    Skip,
}

pub struct Sanitizer {
    remove: Option<Selector>,
    skip: Option<Selector>,
}

impl Sanitizer {
    pub fn new(remove: Option<&str>, skip: &SkipRule) -> Result<Self, ExtractionError> {
        let remove = remove.map(compile).transpose()?;
        let skip = match skip {
            SkipRule::ContentSelector(selector) => Some(compile(selector)?),
            _ => None,
        };
        Ok(Self { remove, skip })
    }

    /// Sanitizes `markup`, then applies the content skip rule to the result.
    pub fn sanitize(&self, markup: &str, link: &str) -> Result<Sanitized, SanitizationError> {
        let tokens = self.tokens(markup);
        if markup::is_blank(&tokens) {
            return Err(SanitizationError::Empty {
                link: link.to_owned(),
            });
        }
        let clean = markup::render(&tokens);

        if let Some(skip) = &self.skip {
            let fragment = Html::parse_fragment(&clean);
            if fragment.select(skip).next().is_some() {
                return Ok(Sanitized::Skip);
            }
        }
        Ok(Sanitized::Content(clean))
    }

    fn tokens(&self, markup: &str) -> Vec<Token> {
        let fragment = Html::parse_fragment(markup);
        let removed: HashSet<NodeId> = match &self.remove {
            Some(selector) => fragment.select(selector).map(|el| el.id()).collect(),
            None => HashSet::new(),
        };
        let mut out = Vec::new();
        for child in fragment.root_element().children() {
            walk(child, &removed, &mut out);
        }
        markup::drop_empty_pairs(out)
    }
}

fn walk(node: NodeRef<'_, Node>, removed: &HashSet<NodeId>, out: &mut Vec<Token>) {
    match node.value() {
        Node::Text(text) => out.push(Token::Text(text.to_string())),
        Node::Element(element) => {
            if removed.contains(&node.id()) || DROPPED_TAGS.contains(&element.name()) {
                return;
            }
            if element.name() == "br" {
                out.push(Token::Text("\n".into()));
                return;
            }
            match Tag::from_element(element) {
                Some(tag) if tag.name == "img" => {
                    if let Some((_, src)) = tag.attr {
                        out.push(Token::Image(ImageRef { src, link: None }));
                    }
                }
                Some(tag) => {
                    let name = tag.name;
                    out.push(Token::Open(tag));
                    for child in node.children() {
                        walk(child, removed, out);
                    }
                    out.push(Token::Close(name));
                }
                None => {
                    for child in node.children() {
                        walk(child, removed, out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn compile(selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|e| ExtractionError::Selector {
        selector: selector.to_owned(),
        reason: e.to_string(),
    })
}
