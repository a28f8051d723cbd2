//! Structured replies — tag-delimited fragments returned by the model.
//!
//! The planner and the compression phase ask the model for a handful of
//! sibling elements (`<task>…</task><warnings>…</warnings>`). A reply is
//! read as the children of an implicit root element:
//!
//! - top-level elements become fields; the first occurrence of a name wins
//! - nested markup is allowed, and its text is kept without the tags
//! - text between top-level elements is ignored
//! - comments, CDATA sections and `<?…?>` declarations are skipped
//! - the predefined entities and numeric character references are decoded
//!
//! Unbalanced or malformed tags are a [`ParseError`]; callers fall back to
//! [`extract_between`].

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated markup starting at byte {0}")]
    Unterminated(usize),

    #[error("invalid tag name at byte {0}")]
    InvalidName(usize),

    #[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
    Mismatched { expected: String, found: String },

    #[error("closing tag </{0}> without an opening tag")]
    UnexpectedClose(String),

    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

/// Parsed top-level elements of a structured reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    fields: Vec<(String, String)>,
}

impl Fragment {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut fields = Vec::new();
        // (name, byte offset where its content starts)
        let mut open: Vec<(String, usize)> = Vec::new();
        let mut pos = 0;

        while let Some(rel) = text[pos..].find('<') {
            let start = pos + rel;
            let rest = &text[start..];

            if let Some(skip) = skip_special(rest) {
                pos = start + skip.ok_or(ParseError::Unterminated(start))?;
                continue;
            }

            let close = rest.find('>').ok_or(ParseError::Unterminated(start))?;
            let inner = &rest[1..close];
            let end = start + close + 1;

            if let Some(name) = inner.strip_prefix('/') {
                let name = name.trim();
                match open.pop() {
                    Some((expected, content_start)) if expected == name => {
                        if open.is_empty() {
                            fields.push((expected, element_text(&text[content_start..start])));
                        }
                    }
                    Some((expected, _)) => {
                        return Err(ParseError::Mismatched {
                            expected,
                            found: name.to_string(),
                        });
                    }
                    None => return Err(ParseError::UnexpectedClose(name.to_string())),
                }
            } else {
                let self_closing = inner.ends_with('/');
                let name = inner
                    .trim_end_matches('/')
                    .split(char::is_whitespace)
                    .next()
                    .unwrap_or_default();
                if !is_valid_name(name) {
                    return Err(ParseError::InvalidName(start));
                }
                if !self_closing {
                    open.push((name.to_string(), end));
                } else if open.is_empty() {
                    fields.push((name.to_string(), String::new()));
                }
            }
            pos = end;
        }

        match open.pop() {
            Some((name, _)) => Err(ParseError::Unclosed(name)),
            None => Ok(Self { fields }),
        }
    }

    /// Trimmed text of the first top-level element called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Like [`get`](Self::get), but `None` for an empty element.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

/// The raw text between the first literal `<tag>` and the following
/// `</tag>`, trimmed. The tags themselves are not included.
pub fn extract_between(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let len = text[start..].find(&close)?;
    Some(text[start..start + len].trim().to_string())
}

/// Byte length of a comment/CDATA/declaration at the start of `rest`.
/// `Some(None)` means it is never terminated.
fn skip_special(rest: &str) -> Option<Option<usize>> {
    const SPECIAL: [(&str, &str); 3] = [("<!--", "-->"), ("<![CDATA[", "]]>"), ("<?", "?>")];
    SPECIAL.iter().find(|(open, _)| rest.starts_with(open)).map(|(open, close)| {
        rest[open.len()..]
            .find(close)
            .map(|i| open.len() + i + close.len())
    })
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

/// Element content with nested tags removed and entities decoded.
fn element_text(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('<') {
        text.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(cdata) = tail.strip_prefix("<![CDATA[")
            && let Some(end) = cdata.find("]]>")
        {
            // CDATA content is literal; keep it out of entity decoding
            text.push_str(&escape_amp(&cdata[..end]));
            rest = &cdata[end + 3..];
            continue;
        }
        match tail.find('>') {
            Some(end) => rest = &tail[end + 1..],
            None => {
                rest = "";
            }
        }
    }
    text.push_str(rest);
    unescape(text.trim())
}

fn escape_amp(s: &str) -> String {
    s.replace('&', "&amp;")
}

/// Decode entities. Unknown or malformed references are kept verbatim.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let c = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi + 1))
        });
        match decoded {
            Some((c, consumed)) => {
                out.push(c);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
