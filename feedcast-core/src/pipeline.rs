use std::sync::Arc;

use chrono::DateTime;
use tracing::{debug, info, warn};

use crate::assembler::Assembler;
use crate::config::{FeedConfig, MessageLimits};
use crate::error::PipelineError;
use crate::feed::ItemSelector;
use crate::fetcher::Fetch;
use crate::models::{FeedItem, MessageUnit, Publication};
use crate::sanitizer::{Sanitized, Sanitizer};
use crate::segmenter::Segmenter;
use crate::storage::StateStore;
use crate::strings::Labels;

/// One feed source and the collaborators a run needs.
pub struct Pipeline {
    feed: FeedConfig,
    limits: MessageLimits,
    labels: Labels,
    fetcher: Arc<dyn Fetch>,
    state: Arc<dyn StateStore>,
}

impl Pipeline {
    pub fn new(
        feed: FeedConfig,
        limits: MessageLimits,
        labels: Labels,
        fetcher: Arc<dyn Fetch>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            feed,
            limits,
            labels,
            fetcher,
            state,
        }
    }

    pub fn source(&self) -> &str {
        &self.feed.source
    }

    /// Fetches the feed and returns the first surviving item if it is newer
    /// than the last one published from this source.
    pub async fn check_for_new_item(&self) -> Result<Option<Publication>, PipelineError> {
        let raw = self.fetcher.fetch(&self.feed.source).await?;
        let Some((item, content)) = self.prepare(&raw)? else {
            debug!(source = %self.feed.source, "no candidate survived selection");
            return Ok(None);
        };

        let key = self.feed.state_key();
        if let Some(stored) = self.state.get(&key).await? {
            match DateTime::parse_from_rfc3339(&stored) {
                Ok(last) if item.published_at <= last => {
                    debug!(link = %item.link, last = %stored, "item already published");
                    return Ok(None);
                }
                Ok(_) => {}
                Err(err) => warn!(value = %stored, error = %err, "ignoring unreadable stored date"),
            }
        }
        self.state.set(&key, item.published_at.to_rfc3339()).await?;

        let units = self.render(&item, &content);
        info!(link = %item.link, units = units.len(), "new item");
        Ok(Some(Publication { item, units }))
    }

    /// Selects the first candidate whose sanitized content survives the
    /// content skip rule.
    fn prepare(&self, raw: &[u8]) -> Result<Option<(FeedItem, String)>, PipelineError> {
        let selector = ItemSelector::new(&self.feed)?;
        let sanitizer = Sanitizer::new(self.feed.remove_elements.as_deref(), &self.feed.skip)?;
        selector.select_with(raw, |item| -> Result<Option<String>, PipelineError> {
            match sanitizer.sanitize(&item.raw_content, &item.link)? {
                Sanitized::Content(content) => Ok(Some(content)),
                Sanitized::Skip => {
                    debug!(link = %item.link, "content skip rule matched");
                    Ok(None)
                }
            }
        })
    }

    fn render(&self, item: &FeedItem, content: &str) -> Vec<MessageUnit> {
        let assembler = Assembler {
            header_label: &self.labels.new_post,
            view_post_label: &self.labels.view_post,
        };
        let segmenter = Segmenter {
            max_text_len: self.limits.max_text_len,
            max_caption_len: self.limits.max_caption_len,
            first_unit_reserve: assembler.header_len(item),
            read_more: &self.labels.read_more,
            open_image_label: &self.labels.open_image,
        };
        assembler.assemble(segmenter.segment(content), item)
    }
}
