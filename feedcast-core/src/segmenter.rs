//! Slices sanitized markup into length-bounded text and image units.
//!
//! Content before the first image becomes one or more text units. Each image
//! becomes an image unit captioned with the content that follows it, up to
//! the caption limit; caption overflow moves on to the next image's caption,
//! and whatever is still left after the last image becomes trailing text
//! units. Nothing is dropped except when a lone text unit is summarized.

use ego_tree::NodeRef;
use scraper::{Html, Node};

use crate::markup::{self, ImageRef, Tag, Token};
use crate::models::MessageUnit;

pub struct Segmenter<'a> {
    pub max_text_len: usize,
    pub max_caption_len: usize,
    /// Room kept free in the first unit for the header added later.
    pub first_unit_reserve: usize,
    pub read_more: &'a str,
    pub open_image_label: &'a str,
}

/// Position in a token list: before token `index`, or inside a text token
/// at byte `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cut {
    index: usize,
    offset: usize,
}

impl Segmenter<'_> {
    pub fn segment(&self, sanitized: &str) -> Vec<MessageUnit> {
        let (mut runs, images) = split_runs(tokenize(sanitized));
        if images.is_empty() {
            let budget = self.max_text_len.saturating_sub(self.first_unit_reserve);
            let text = summarize(&runs[0], budget, self.read_more);
            return vec![MessageUnit::text(text)];
        }

        let mut units = Vec::new();
        let leading = std::mem::take(&mut runs[0]);
        if !markup::is_blank(&leading) {
            for chunk in self.chunks(leading, self.first_text_budget()) {
                units.push(MessageUnit::text(chunk));
            }
        }

        let mut carry: Vec<Token> = Vec::new();
        for (image, run) in images.into_iter().zip(runs.into_iter().skip(1)) {
            let mut body = std::mem::take(&mut carry);
            body.extend(run);
            markup::trim_leading_whitespace(&mut body);

            let budget = if units.is_empty() {
                self.max_caption_len.saturating_sub(self.first_unit_reserve)
            } else {
                self.max_caption_len
            };
            let caption = match take_prefix(&body, budget) {
                Some((head, rest)) => {
                    carry = rest;
                    head
                }
                None => body,
            };

            let mut unit = MessageUnit::image(image.src, markup::render(&caption).trim());
            if let Some(link) = image.link {
                unit.push_control(self.open_image_label, link);
            }
            units.push(unit);
        }

        markup::trim_leading_whitespace(&mut carry);
        if !markup::is_blank(&carry) {
            for chunk in self.chunks(carry, self.max_text_len) {
                units.push(MessageUnit::text(chunk));
            }
        }
        units
    }

    fn first_text_budget(&self) -> usize {
        self.max_text_len.saturating_sub(self.first_unit_reserve)
    }

    /// Splits `tokens` into rendered pieces of at most `first` characters
    /// for the first piece and `max_text_len` for the others.
    fn chunks(&self, mut tokens: Vec<Token>, first: usize) -> Vec<String> {
        let mut out = Vec::new();
        let mut budget = first;
        loop {
            match take_prefix(&tokens, budget) {
                Some((head, mut rest)) if !markup::is_blank(&head) => {
                    out.push(markup::render(&head).trim_end().to_owned());
                    markup::trim_leading_whitespace(&mut rest);
                    if markup::is_blank(&rest) {
                        break;
                    }
                    tokens = rest;
                }
                // Nothing fits: the limit is smaller than a single tag or
                // character, so emit the remainder as is.
                Some(_) | None => {
                    out.push(markup::render(&tokens));
                    break;
                }
            }
            budget = self.max_text_len;
        }
        out
    }
}

/// Truncates `tokens` to `limit` characters at a word boundary and appends
/// `suffix`. Content already within the limit is returned unchanged.
pub(crate) fn summarize(tokens: &[Token], limit: usize, suffix: &str) -> String {
    let budget = limit.saturating_sub(suffix.chars().count());
    match take_prefix(tokens, limit) {
        None => markup::render(tokens),
        Some(_) => {
            let head = match take_prefix(tokens, budget) {
                Some((head, _)) => head,
                None => tokens.to_vec(),
            };
            let mut text = markup::render(&head).trim_end().to_owned();
            text.push_str(suffix);
            text
        }
    }
}

/// Splits off the longest prefix rendering within `budget` characters,
/// balanced and cut at a word boundary when one exists. `None` when
/// everything fits.
fn take_prefix(tokens: &[Token], budget: usize) -> Option<(Vec<Token>, Vec<Token>)> {
    let cut = find_cut(tokens, budget)?;
    Some(split_at(tokens, cut))
}

fn find_cut(tokens: &[Token], budget: usize) -> Option<Cut> {
    let mut used = 0;
    let mut boundary: Option<Cut> = None;
    let mut seen_text = false;

    for (index, token) in tokens.iter().enumerate() {
        match token {
            // Closing tags are paid for when their tag opens.
            Token::Open(tag) => {
                let cost = tag.open_len() + tag.close_len();
                if used + cost > budget {
                    return Some(boundary.unwrap_or(Cut { index, offset: 0 }));
                }
                used += cost;
            }
            Token::Close(_) => {}
            Token::Image(image) => {
                let cost = image.markup().chars().count();
                if used + cost > budget {
                    return Some(boundary.unwrap_or(Cut { index, offset: 0 }));
                }
                used += cost;
                seen_text = true;
            }
            Token::Text(text) => {
                for (offset, ch) in text.char_indices() {
                    if ch.is_whitespace() {
                        if seen_text {
                            boundary = Some(Cut { index, offset });
                        }
                    } else {
                        seen_text = true;
                    }
                    let cost = markup::escaped_len(ch);
                    if used + cost > budget {
                        return Some(boundary.unwrap_or(Cut { index, offset }));
                    }
                    used += cost;
                }
            }
        }
    }
    None
}

/// Head is closed with the tags open at `cut`; the rest reopens them.
fn split_at(tokens: &[Token], cut: Cut) -> (Vec<Token>, Vec<Token>) {
    let mut head = Vec::with_capacity(cut.index + 4);
    let mut stack: Vec<&Tag> = Vec::new();
    for token in &tokens[..cut.index] {
        match token {
            Token::Open(tag) => stack.push(tag),
            Token::Close(_) => {
                stack.pop();
            }
            Token::Text(_) | Token::Image(_) => {}
        }
        head.push(token.clone());
    }

    let mut rest: Vec<Token> = stack.iter().map(|tag| Token::Open((*tag).clone())).collect();
    match &tokens[cut.index] {
        Token::Text(text) => {
            head.push(Token::Text(text[..cut.offset].to_owned()));
            rest.push(Token::Text(text[cut.offset..].to_owned()));
        }
        other => rest.push(other.clone()),
    }
    rest.extend(tokens[cut.index + 1..].iter().cloned());

    head.extend(stack.iter().rev().map(|tag| Token::Close(tag.name)));
    (markup::drop_empty_pairs(head), markup::drop_empty_pairs(rest))
}

/// Token form of sanitized markup. A link whose direct children include
/// images is consumed whole: each image carries the link's `href`.
fn tokenize(sanitized: &str) -> Vec<Token> {
    let fragment = Html::parse_fragment(sanitized);
    let mut out = Vec::new();
    for child in fragment.root_element().children() {
        walk(child, &mut out);
    }
    out
}

fn walk(node: NodeRef<'_, Node>, out: &mut Vec<Token>) {
    match node.value() {
        Node::Text(text) => out.push(Token::Text(text.to_string())),
        Node::Element(element) => match Tag::from_element(element) {
            Some(tag) if tag.name == "img" => {
                if let Some((_, src)) = tag.attr {
                    out.push(Token::Image(ImageRef { src, link: None }));
                }
            }
            Some(tag) if tag.name == "a" && has_image_child(node) => {
                let link = tag.attr.map(|(_, href)| href);
                for child in node.children() {
                    let src = child
                        .value()
                        .as_element()
                        .filter(|el| el.name() == "img")
                        .and_then(|el| el.attr("src"));
                    if let Some(src) = src {
                        out.push(Token::Image(ImageRef {
                            src: src.to_owned(),
                            link: link.clone(),
                        }));
                    }
                }
            }
            Some(tag) => {
                let name = tag.name;
                out.push(Token::Open(tag));
                for child in node.children() {
                    walk(child, out);
                }
                out.push(Token::Close(name));
            }
            None => {
                for child in node.children() {
                    walk(child, out);
                }
            }
        },
        _ => {}
    }
}

fn has_image_child(node: NodeRef<'_, Node>) -> bool {
    node.children()
        .any(|child| child.value().as_element().is_some_and(|el| el.name() == "img"))
}

/// Splits at images into `images.len() + 1` balanced runs, closing the
/// formatting open around an image before it and reopening it after.
fn split_runs(tokens: Vec<Token>) -> (Vec<Vec<Token>>, Vec<ImageRef>) {
    let mut runs = Vec::new();
    let mut images = Vec::new();
    let mut stack: Vec<Tag> = Vec::new();
    let mut current = Vec::new();

    for token in tokens {
        match token {
            Token::Open(tag) => {
                stack.push(tag.clone());
                current.push(Token::Open(tag));
            }
            Token::Close(name) => {
                stack.pop();
                current.push(Token::Close(name));
            }
            Token::Text(text) => current.push(Token::Text(text)),
            Token::Image(image) => {
                current.extend(stack.iter().rev().map(|tag| Token::Close(tag.name)));
                runs.push(markup::drop_empty_pairs(std::mem::take(&mut current)));
                images.push(image);
                current.extend(stack.iter().cloned().map(Token::Open));
            }
        }
    }
    runs.push(markup::drop_empty_pairs(current));
    (runs, images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitKind;

    fn segmenter(max_text_len: usize, max_caption_len: usize) -> Segmenter<'static> {
        Segmenter {
            max_text_len,
            max_caption_len,
            first_unit_reserve: 0,
            read_more: "…",
            open_image_label: "Open image",
        }
    }

    /// Puts each image back in front of its caption and drops whitespace.
    fn reconstruct(units: &[MessageUnit]) -> String {
        let mut out = String::new();
        for unit in units {
            if let Some(src) = &unit.image {
                let img = format!("<img src=\"{src}\">");
                match unit.controls.first().map(|row| &row[0]) {
                    Some(control) => out.push_str(&format!("<a href=\"{}\">{img}</a>", control.url)),
                    None => out.push_str(&img),
                }
            }
            out.push_str(&unit.text);
        }
        out.split_whitespace().collect()
    }

    #[test]
    fn image_splits_text_and_caption() {
        let units = segmenter(100, 100).segment("<p>Hello <img src='x.png'> World</p>");
        assert_eq!(
            units,
            vec![MessageUnit::text("Hello "), MessageUnit::image("x.png", "World")]
        );
    }

    #[test]
    fn linked_image_gets_open_image_control() {
        let units = segmenter(100, 100).segment(r#"<a href="u"><img src="x.png"></a>"#);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].kind, UnitKind::Image);
        assert_eq!(units[0].image.as_deref(), Some("x.png"));
        assert_eq!(units[0].controls[0][0].label, "Open image");
        assert_eq!(units[0].controls[0][0].url, "u");
    }

    #[test]
    fn leading_image_needs_no_empty_text_unit() {
        let units = segmenter(100, 100).segment(r#"<img src="a.png"> caption <img src="b.png">tail"#);
        assert_eq!(
            units,
            vec![
                MessageUnit::image("a.png", "caption"),
                MessageUnit::image("b.png", "tail"),
            ]
        );
    }

    #[test]
    fn long_text_without_images_is_summarized() {
        let words = "lorem ipsum dolor ".repeat(300);
        let content = &words[..5000];
        let units = segmenter(4096, 1024).segment(content);
        assert_eq!(units.len(), 1);
        let text = &units[0].text;
        assert!(text.chars().count() <= 4096);
        assert!(text.ends_with('…'));
        let body = text.trim_end_matches('…');
        assert!(content.starts_with(body));
        // Cut falls on a word boundary.
        assert_eq!(content[body.len()..].chars().next(), Some(' '));
    }

    #[test]
    fn short_text_is_left_alone() {
        let units = segmenter(4096, 1024).segment("<b>short</b> post");
        assert_eq!(units, vec![MessageUnit::text("<b>short</b> post")]);
    }

    #[test]
    fn summarization_keeps_markup_balanced() {
        let content = format!("<b>{}</b>", "word ".repeat(40));
        let units = segmenter(64, 64).segment(&content);
        let text = &units[0].text;
        assert!(text.chars().count() <= 64, "{text}");
        assert!(text.starts_with("<b>word"));
        assert!(text.ends_with("</b>…"));
        assert!(!text.contains("wor</b>"));
    }

    #[test]
    fn unbreakable_word_is_cut_hard() {
        let units = segmenter(70, 64).segment(&"x".repeat(200));
        assert_eq!(units[0].text, format!("{}…", "x".repeat(69)));
    }

    #[test]
    fn caption_overflow_moves_to_next_image() {
        let first = "alpha beta gamma delta epsilon";
        let content = format!(r#"<img src="1.png">{first} <img src="2.png">zeta"#);
        let units = segmenter(100, 20).segment(&content);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "alpha beta gamma");
        assert_eq!(units[1].text, "delta epsilon zeta");
        for unit in &units {
            assert!(unit.text_len() <= 20);
        }
    }

    #[test]
    fn leftover_after_last_image_becomes_text_units() {
        let tail = "one two three four five six seven eight nine ten";
        let content = format!(r#"intro<img src="1.png">{tail}"#);
        let units = segmenter(70, 20).segment(&content);
        assert_eq!(units[0], MessageUnit::text("intro"));
        assert_eq!(units[1].text, "one two three four");
        assert_eq!(units[2], MessageUnit::text("five six seven eight nine ten"));
    }

    #[test]
    fn long_leading_text_splits_into_several_units() {
        let intro = "word ".repeat(30);
        let content = format!(r#"{intro}<img src="1.png">"#);
        let units = segmenter(64, 64).segment(&content);
        let texts: Vec<&MessageUnit> = units.iter().filter(|u| !u.is_image()).collect();
        assert!(texts.len() >= 2);
        assert!(texts.iter().all(|u| u.text_len() <= 64));
        assert!(units.last().unwrap().is_image());
        assert_eq!(reconstruct(&units), format!("{}<imgsrc=\"1.png\">", "word".repeat(30)));
    }

    #[test]
    fn formatting_around_image_is_closed_and_reopened() {
        let units = segmenter(100, 100).segment(r#"<b>bold <img src="x.png"> still bold</b> plain"#);
        assert_eq!(units[0], MessageUnit::text("<b>bold </b>"));
        assert_eq!(units[1].text, "<b>still bold</b> plain");
    }

    #[test]
    fn reserve_shrinks_the_first_unit_only() {
        let mut seg = segmenter(100, 30);
        seg.first_unit_reserve = 20;
        let units = seg.segment(r#"<img src="1.png">aaa bbb ccc ddd <img src="2.png">x"#);
        assert!(units[0].text_len() <= 10);
        assert_eq!(units[0].text, "aaa bbb");
        assert_eq!(units[1].text, "ccc ddd x");
    }

    #[test]
    fn segments_reconstruct_the_content() {
        let content = concat!(
            "Intro <i>text</i> ",
            r#"<img src="a.png"> first caption is here "#,
            r#"<a href="http://l">"#,
            r#"<img src="b.png"></a> second <code>caption</code> "#,
            r#"<img src="c.png"> and a tail that keeps going for a while"#
        );
        let units = segmenter(64, 40).segment(content);
        assert_eq!(units.len(), 4);
        for unit in &units {
            let limit = if unit.is_image() { 40 } else { 64 };
            assert!(unit.text_len() <= limit, "{unit:?}");
        }
        let expected: String = content.split_whitespace().collect();
        assert_eq!(reconstruct(&units), expected);
    }
}
