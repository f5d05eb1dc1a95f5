//! Replacing every URL Defense link in a text with the URL it protects.

use std::borrow::Cow;

use tracing::{debug, warn};

use crate::locator::locate;
use crate::url_defense::DecodingError;

/// What to do with a link that cannot be decoded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Leave the link as it is and keep going.
    Permissive,
    /// Fail the whole rewrite with the first error.
    Strict,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Permissive
    }
}

/// Rewrite `text`, replacing each link by its decoded form.
///
/// Replacement is done by position: every link is swapped out at the span
/// where the locator found it, and all text between links is copied
/// unchanged.  Text without any link is returned as is, without copying.
pub fn rewrite_text(text: &str, mode: Mode) -> Result<Cow<str>, DecodingError> {
    let mut out = String::new();
    let mut copied = 0;

    for found in locate(text) {
        let span = found.span();
        let decoded = match found.decode() {
            Ok(decoded) => decoded,
            Err(err) if mode == Mode::Permissive => {
                warn!("Leaving {} unchanged: {}", found.as_str(), err);
                continue;
            }
            Err(err) => return Err(err),
        };
        debug!("Decoded {} to {}", found.as_str(), decoded);

        out.push_str(&text[copied..span.start]);
        out.push_str(&decoded);
        copied = span.end;
    }

    if copied == 0 {
        return Ok(Cow::Borrowed(text));
    }
    out.push_str(&text[copied..]);
    Ok(Cow::Owned(out))
}
