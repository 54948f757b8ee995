use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use xml5ever::driver::{parse_document as parse_xml_document, XmlParseOpts};
use xml5ever::tendril::TendrilSink;

use crate::config::{FeedConfig, FeedFormat, SkipRule};
use crate::error::ExtractionError;
use crate::models::FeedItem;

/// Resolves feed items from a raw document through the configured selectors.
pub struct ItemSelector {
    format: FeedFormat,
    items: Selector,
    title: Option<(String, Selector)>,
    link: (String, Selector),
    content: (String, Selector),
    published: (String, Selector),
    feed_skip: Option<Selector>,
    title_skip: Option<Regex>,
}

impl ItemSelector {
    pub fn new(config: &FeedConfig) -> Result<Self, ExtractionError> {
        let named = |s: &str| compile(s).map(|sel| (s.to_owned(), sel));
        let (feed_skip, title_skip) = match &config.skip {
            SkipRule::FeedSelector(s) => (Some(compile(s)?), None),
            SkipRule::TitleRegex(re) => (None, Some(re.clone())),
            SkipRule::None | SkipRule::ContentSelector(_) => (None, None),
        };
        Ok(Self {
            format: config.feed_format,
            items: compile(&config.feeds_selector)?,
            title: config.title_selector.as_deref().map(named).transpose()?,
            link: named(&config.link_selector)?,
            content: named(&config.content_selector)?,
            published: named(&config.published_selector)?,
            feed_skip,
            title_skip,
        })
    }

    pub fn parse(&self, raw: &[u8]) -> Html {
        let text = String::from_utf8_lossy(raw);
        match self.format {
            FeedFormat::Html => Html::parse_document(&text),
            FeedFormat::Xml => {
                parse_xml_document(Html::new_document(), XmlParseOpts::default()).one(&*text)
            }
        }
    }

    /// First candidate surviving the feed and title skip rules.
    pub fn select_item(&self, raw: &[u8]) -> Result<Option<FeedItem>, ExtractionError> {
        let selected = self.select_with(raw, |_| Ok::<_, ExtractionError>(Some(())))?;
        Ok(selected.map(|(item, ())| item))
    }

    /// Walks candidates in document order and returns the first one that
    /// survives the skip rules and that `accept` maps to `Some`.
    pub fn select_with<T, E, F>(&self, raw: &[u8], mut accept: F) -> Result<Option<(FeedItem, T)>, E>
    where
        E: From<ExtractionError>,
        F: FnMut(&FeedItem) -> Result<Option<T>, E>,
    {
        let document = self.parse(raw);
        for (index, node) in document.select(&self.items).enumerate() {
            let Some(item) = self.extract(index, node)? else {
                continue;
            };
            if let Some(accepted) = accept(&item)? {
                return Ok(Some((item, accepted)));
            }
        }
        Ok(None)
    }

    /// `Ok(None)` when a skip rule excludes the candidate.
    fn extract(&self, index: usize, node: ElementRef<'_>) -> Result<Option<FeedItem>, ExtractionError> {
        if let Some(skip) = &self.feed_skip {
            if node.select(skip).next().is_some() {
                return Ok(None);
            }
        }

        let title = match &self.title {
            Some(selector) => {
                let title = text_of(first(node, index, "title", selector)?);
                if let Some(re) = &self.title_skip {
                    if re.is_match(&title) {
                        return Ok(None);
                    }
                }
                Some(title)
            }
            None => None,
        };

        let link_el = first(node, index, "link", &self.link)?;
        let mut link = text_of(link_el);
        if link.is_empty() {
            link = link_el.value().attr("href").unwrap_or_default().trim().to_owned();
        }
        if link.is_empty() {
            return Err(ExtractionError::Missing {
                index,
                field: "link",
                selector: self.link.0.clone(),
            });
        }

        let date = text_of(first(node, index, "published", &self.published)?);
        let published_at = parse_date(&date).ok_or(ExtractionError::InvalidDate {
            index,
            value: date,
        })?;

        let content = first(node, index, "content", &self.content)?;
        let raw_content = match self.format {
            FeedFormat::Html => content.inner_html(),
            FeedFormat::Xml => xml_inner_content(content),
        };

        Ok(Some(FeedItem {
            title,
            link,
            published_at,
            raw_content,
        }))
    }
}

fn compile(selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|e| ExtractionError::Selector {
        selector: selector.to_owned(),
        reason: e.to_string(),
    })
}

fn first<'a>(
    node: ElementRef<'a>,
    index: usize,
    field: &'static str,
    (name, selector): &(String, Selector),
) -> Result<ElementRef<'a>, ExtractionError> {
    node.select(selector)
        .next()
        .ok_or_else(|| ExtractionError::Missing {
            index,
            field,
            selector: name.clone(),
        })
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_owned()
}

/// Text children are taken verbatim: feeds carry item bodies as escaped
/// markup or CDATA.
fn xml_inner_content(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    out.push_str(&child.html());
                }
            }
            _ => {}
        }
    }
    out
}

pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
