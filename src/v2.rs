//! Version 2 links: `https://urldefense.proofpoint.com/v2/url?u=<url>&d=...&e=`.
//!
//! The original URL travels in the `u` query parameter.  The gateway swaps
//! `/` for `_` and writes every other unsafe byte as `-XX` with uppercase hex
//! digits, on top of ordinary percent escaping.

use regex::{Captures, Regex};
use url::Url;

use crate::charset::percent_decode;
use crate::url_defense::DecodingError;

lazy_static::lazy_static! {
    static ref HEX_ESCAPE_RE: Regex = Regex::new(r"-([0-9A-F]{2})").unwrap();
}

fn malformed<T: Into<String>>(reason: T) -> DecodingError {
    DecodingError::MalformedV2 {
        reason: reason.into(),
    }
}

// The raw, still escaped, value of the `u` parameter.  Taken from the link
// text rather than `Url::query`, which re-encodes 8-bit characters as UTF-8.
fn query_param_u(url: &str) -> Option<&str> {
    let (_, query) = url.split_once('?')?;
    query
        .split('#')
        .next()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("u="))
}

// Every `-XX` token is replaced in one pass over the input, so a character
// produced by one substitution is never read as part of another token.
fn unescape_hex(escaped: &str) -> String {
    HEX_ESCAPE_RE
        .replace_all(escaped, |caps: &Captures| {
            let byte = hex::decode(&caps[1]).expect("invalid regex capture")[0];
            char::from(byte).to_string()
        })
        .into_owned()
}

/// Decode a v2 link into the URL it protects.
pub fn decode<T: AsRef<str>>(url: T) -> Result<String, DecodingError> {
    let url = url.as_ref();
    Url::parse(url).map_err(|err| malformed(err.to_string()))?;
    let param = query_param_u(url).ok_or_else(|| malformed("missing u parameter"))?;

    let slashed = param.replace('_', "/");
    let unescaped = unescape_hex(&slashed);
    let decoded = percent_decode(&unescaped);

    Ok(decoded.trim_end().to_string())
}
