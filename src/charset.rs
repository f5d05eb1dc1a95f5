use std::borrow::Cow;
use std::convert::TryFrom;

use encoding_rs::mem::{decode_latin1, encode_latin1_lossy, is_str_latin1};
use percent_encoding::percent_decode_str;

/// The single 8-bit character set used end to end.
///
/// Mail parts are not decoded according to their declared charset.  Every
/// byte is read as the character with the same code point (ISO-8859-1 proper,
/// not the windows-1252 superset), so decoding followed by encoding gives back
/// the original bytes, and a byte restored into a URL as `char::from(byte)`
/// is written out as that same byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Charset;

impl Charset {
    pub fn name(&self) -> &'static str {
        "iso-8859-1"
    }

    /// Turn raw part bytes into text.  Never fails.
    pub fn decode(self, bytes: &[u8]) -> Cow<str> {
        decode_latin1(bytes)
    }

    /// Turn text back into bytes.
    ///
    /// The flag is set when some character had no mapping and was replaced
    /// by a numeric character reference.
    pub fn encode(self, input: &str) -> (Cow<[u8]>, bool) {
        if is_str_latin1(input) {
            return (encode_latin1_lossy(input), false);
        }

        let mut out = Vec::with_capacity(input.len());
        for ch in input.chars() {
            match u8::try_from(u32::from(ch)) {
                Ok(byte) => out.push(byte),
                Err(_) => out.extend_from_slice(format!("&#{};", u32::from(ch)).as_bytes()),
            }
        }
        (Cow::Owned(out), true)
    }
}

/// Percent-decode `input`, reading each escaped byte as the character with
/// the same code point.
///
/// Escapes are plain ASCII, so characters outside ASCII are copied as they
/// are and never end up inside an escape.
pub fn percent_decode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for piece in input.split_inclusive(|c: char| !c.is_ascii()) {
        let ascii_len = piece.trim_end_matches(|c: char| !c.is_ascii()).len();
        let (ascii, rest) = piece.split_at(ascii_len);
        out.extend(percent_decode_str(ascii).map(char::from));
        out.push_str(rest);
    }
    out
}
