use crate::markup::{escape_attr, escape_text};
use crate::models::{FeedItem, MessageUnit};

/// Adds the post header and the final "view post" control.
pub struct Assembler<'a> {
    /// Localized label shown above the post title.
    pub header_label: &'a str,
    pub view_post_label: &'a str,
}

impl Assembler<'_> {
    pub fn header(&self, item: &FeedItem) -> String {
        let title = item.title.as_deref().unwrap_or(&item.link);
        format!(
            "<i>{}</i>\n\n<b><a href=\"{}\">{}</a></b>\n",
            self.header_label,
            escape_attr(&item.link),
            escape_text(title)
        )
    }

    /// Length of [`Assembler::header`], to be reserved in the first unit.
    pub fn header_len(&self, item: &FeedItem) -> usize {
        self.header(item).chars().count()
    }

    pub fn assemble(&self, mut units: Vec<MessageUnit>, item: &FeedItem) -> Vec<MessageUnit> {
        if units.is_empty() {
            units.push(MessageUnit::text(String::new()));
        }
        let header = self.header(item);
        units[0].text.insert_str(0, &header);
        if let Some(last) = units.last_mut() {
            last.push_control(self.view_post_label, item.link.clone());
        }
        units
    }
}
