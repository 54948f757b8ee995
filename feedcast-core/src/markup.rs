//! Flat token form of whitelisted markup shared by the sanitizer and the
//! segmenter. Text tokens hold decoded text; escaping happens on render.

use scraper::node::Element;

/// Tags the delivery platform understands.
pub const ALLOWED_TAGS: [&str; 12] = [
    "a", "b", "strong", "i", "em", "code", "pre", "s", "strike", "del", "u", "img",
];

/// The single attribute kept for a whitelisted tag, if any.
pub fn allowed_attr(tag: &str) -> Option<&'static str> {
    match tag {
        "a" => Some("href"),
        "img" => Some("src"),
        "pre" => Some("language"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tag {
    pub name: &'static str,
    pub attr: Option<(&'static str, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageRef {
    pub src: String,
    /// `href` of the link wrapping the image.
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Open(Tag),
    Close(&'static str),
    Text(String),
    Image(ImageRef),
}

impl Tag {
    /// Whitelisted view of `element`, keeping only its permitted attribute.
    pub fn from_element(element: &Element) -> Option<Self> {
        let name = ALLOWED_TAGS
            .iter()
            .copied()
            .find(|tag| *tag == element.name())?;
        let attr = allowed_attr(name)
            .and_then(|attr| element.attr(attr).map(|value| (attr, value.to_owned())));
        Some(Self { name, attr })
    }

    pub fn open_markup(&self) -> String {
        match &self.attr {
            Some((name, value)) => format!("<{} {}=\"{}\">", self.name, name, escape_attr(value)),
            None => format!("<{}>", self.name),
        }
    }

    pub fn open_len(&self) -> usize {
        self.open_markup().chars().count()
    }

    pub fn close_len(&self) -> usize {
        self.name.len() + 3
    }
}

impl ImageRef {
    pub fn markup(&self) -> String {
        let img = format!("<img src=\"{}\">", escape_attr(&self.src));
        match &self.link {
            Some(href) => format!("<a href=\"{}\">{img}</a>", escape_attr(href)),
            None => img,
        }
    }
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        push_escaped(&mut out, ch, false);
    }
    out
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        push_escaped(&mut out, ch, true);
    }
    out
}

fn push_escaped(out: &mut String, ch: char, in_attr: bool) {
    match ch {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' if in_attr => out.push_str("&quot;"),
        _ => out.push(ch),
    }
}

/// Rendered length of one text character.
pub(crate) fn escaped_len(ch: char) -> usize {
    match ch {
        '&' => 5,
        '<' | '>' => 4,
        _ => 1,
    }
}

pub(crate) fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Open(tag) => out.push_str(&tag.open_markup()),
            Token::Close(name) => {
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            Token::Text(text) => out.push_str(&escape_text(text)),
            Token::Image(image) => out.push_str(&image.markup()),
        }
    }
    out
}

/// True when the tokens render to nothing visible.
pub(crate) fn is_blank(tokens: &[Token]) -> bool {
    tokens.iter().all(|token| match token {
        Token::Text(text) => text.trim().is_empty(),
        Token::Image(_) => false,
        Token::Open(_) | Token::Close(_) => true,
    })
}

/// Removes tag pairs enclosing nothing, innermost first.
pub(crate) fn drop_empty_pairs(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Close(name) if matches!(out.last(), Some(Token::Open(tag)) if tag.name == name) => {
                out.pop();
            }
            Token::Text(text) if text.is_empty() => {}
            other => out.push(other),
        }
    }
    out
}

/// Strips whitespace at the start of the first visible text.
pub(crate) fn trim_leading_whitespace(tokens: &mut Vec<Token>) {
    for token in tokens.iter_mut() {
        match token {
            Token::Text(text) => {
                let trimmed = text.trim_start();
                if trimmed.is_empty() {
                    text.clear();
                    continue;
                }
                *text = trimmed.to_owned();
                break;
            }
            Token::Image(_) => break,
            Token::Open(_) | Token::Close(_) => {}
        }
    }
    let taken = std::mem::take(tokens);
    *tokens = drop_empty_pairs(taken);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bold() -> Tag {
        Tag {
            name: "b",
            attr: None,
        }
    }

    #[test]
    fn escapes_text_and_attributes() {
        assert_eq!(escape_text("a < b & \"c\""), "a &lt; b &amp; \"c\"");
        assert_eq!(escape_attr("x\"><script>"), "x&quot;&gt;&lt;script&gt;");
    }

    #[test]
    fn renders_tokens() {
        let tokens = vec![
            Token::Open(Tag {
                name: "a",
                attr: Some(("href", "http://e/?a=1&b=2".into())),
            }),
            Token::Text("x<y".into()),
            Token::Close("a"),
            Token::Image(ImageRef {
                src: "p.png".into(),
                link: None,
            }),
        ];
        assert_eq!(
            render(&tokens),
            "<a href=\"http://e/?a=1&amp;b=2\">x&lt;y</a><img src=\"p.png\">"
        );
    }

    #[test]
    fn drops_nested_empty_pairs() {
        let tokens = vec![
            Token::Open(bold()),
            Token::Open(Tag {
                name: "i",
                attr: None,
            }),
            Token::Close("i"),
            Token::Close("b"),
            Token::Text("kept".into()),
        ];
        assert_eq!(drop_empty_pairs(tokens), vec![Token::Text("kept".into())]);
    }

    #[test]
    fn trims_leading_whitespace_across_tags() {
        let mut tokens = vec![
            Token::Text("  ".into()),
            Token::Open(bold()),
            Token::Text("  word".into()),
            Token::Close("b"),
        ];
        trim_leading_whitespace(&mut tokens);
        assert_eq!(render(&tokens), "<b>word</b>");
    }

    #[test]
    fn blank_ignores_empty_formatting() {
        assert!(is_blank(&[Token::Open(bold()), Token::Text(" \n".into()), Token::Close("b")]));
        assert!(!is_blank(&[Token::Text("x".into())]));
    }
}
