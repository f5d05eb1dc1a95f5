//! Finding URL Defense links in free text.

use std::ops::Range;

use regex::{Matches, Regex};

use crate::url_defense::{DecodingError, Version};

// Each alternative ends at the terminator of its scheme, matched lazily so
// that neighbouring links are never merged:
//
// * v2 ends at `&e=` or its HTML form `&amp;e=`,
// * v3 ends at the `$` after the `__;<mask>!` signature,
// * any other version token runs to the next blank, quote or angle bracket,
//   so it can be reported rather than silently skipped.
lazy_static::lazy_static! {
    static ref LINK_RE: Regex = Regex::new(concat!(
        r"https://urldefense\.proofpoint\.com/v2/url\?u=[^ \t\r\n]*?(?:&amp;|&)e=",
        r"|https://urldefense(?:\.proofpoint)?\.com/v3/__[^ \t\r\n]+?__;[^ \t\r\n]*?![^ \t\r\n]*?\$",
        r#"|https://urldefense(?:\.proofpoint)?\.com/v(?:[0-14-9][^/ \t\r\n]*|[23][^/ \t\r\n]+|[^/0-9 \t\r\n][^/ \t\r\n]*)/[^ \t\r\n"'<>]*"#,
    ))
    .unwrap();
}

/// A rewritten link found in a larger text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUrlMatch<'t> {
    raw: &'t str,
    span: Range<usize>,
}

impl<'t> EncodedUrlMatch<'t> {
    /// The link exactly as it appears in the text.
    pub fn as_str(&self) -> &'t str {
        self.raw
    }

    /// Byte offsets of the link in the text.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    pub fn version(&self) -> Result<Version, DecodingError> {
        Version::detect(self.raw)
    }

    pub fn decode(&self) -> Result<String, DecodingError> {
        self.version()?.decode(self.raw)
    }
}

/// Lazy iterator over the links in a text, in order and never overlapping.
pub struct Locator<'r, 't> {
    matches: Matches<'r, 't>,
}

impl<'r, 't> Iterator for Locator<'r, 't> {
    type Item = EncodedUrlMatch<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        self.matches.next().map(|m| EncodedUrlMatch {
            raw: m.as_str(),
            span: m.start()..m.end(),
        })
    }
}

pub fn locate(text: &str) -> Locator<'static, '_> {
    Locator {
        matches: LINK_RE.find_iter(text),
    }
}
