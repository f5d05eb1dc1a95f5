//! Content-Transfer-Encoding handling for message bodies.
//!
//! The rewriter works on text, so a part body is first undone from its
//! transfer encoding and turned into text with the fixed 8-bit charset
//! ([`extract_text`]), and afterwards turned back into bytes and wrapped in
//! the same transfer encoding ([`reinsert_text`]).
//!
//! Decoding is lax: problems are reported as defects and worked around, in
//! the same way header encoded words are handled.

use regex::bytes::{Captures, Regex};

use crate::charset::Charset;
use crate::defects::Defect;

/// Longest encoded line, not counting the line ending.
const MAX_LINE_LEN: usize = 76;

// -- Quoted Printable

// regex based decoder.

lazy_static::lazy_static! {
    static ref QP_ESCAPE_RE: Regex =
        Regex::new(r"(?-u)=([ \t]*\r?\n|[0-9A-Fa-f]{2}|[^\r\n=]{0,2})").unwrap();
}

fn decode_qp<T: AsRef<[u8]>>(encoded: T) -> (Vec<u8>, Vec<Defect>) {
    let mut defects = Vec::new();

    let decoded = QP_ESCAPE_RE
        .replace_all(encoded.as_ref(), |caps: &Captures| {
            let escape = &caps[1];
            if escape.ends_with(b"\n") {
                // soft line break, possibly after transport padding
                Vec::new()
            } else if escape.len() == 2 && escape.iter().all(u8::is_ascii_hexdigit) {
                hex::decode(escape).expect("invalid regex capture")
            } else {
                defects.push(Defect::InvalidQuotedPrintableEscape {
                    escape: String::from_utf8_lossy(&caps[0]).into_owned(),
                });
                caps[0].to_vec()
            }
        })
        .into_owned();

    (decoded, defects)
}

fn write_qp_byte<T: std::fmt::Write>(mut writer: T, byte: u8, line_end: bool) -> std::fmt::Result {
    match byte {
        b' ' | b'\t' if !line_end => writer.write_char(byte as char),
        b'!'..=b'<' | b'>'..=b'~' => writer.write_char(byte as char),
        _ => write!(writer, "={:02X}", byte),
    }
}

fn len_qp_byte(byte: u8, line_end: bool) -> usize {
    match byte {
        b' ' | b'\t' if !line_end => 1,
        b'!'..=b'<' | b'>'..=b'~' => 1,
        _ => 3,
    }
}

fn encode_qp<T: AsRef<[u8]>>(bstring: T, eol: &str) -> String {
    let bstring = bstring.as_ref();
    let mut out = String::with_capacity(bstring.len());

    for (index, line) in bstring.split(|&b| b == b'\n').enumerate() {
        if index > 0 {
            out.push_str(eol);
        }
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let mut line_len = 0;
        for (pos, &byte) in line.iter().enumerate() {
            let line_end = pos + 1 == line.len();
            let len = len_qp_byte(byte, line_end);
            // Leave room for the `=` of a soft line break.
            if line_len + len > MAX_LINE_LEN - 1 {
                out.push('=');
                out.push_str(eol);
                line_len = 0;
            }
            write_qp_byte(&mut out, byte, line_end).expect("String writes always succeed");
            line_len += len;
        }
    }

    out
}

// -- Base64

fn decode_b<T: AsRef<[u8]>>(encoded: T) -> (Vec<u8>, Vec<Defect>) {
    let mut defects = Vec::new();

    // Line breaks are part of the format, not defects.
    let encoded: Vec<u8> = encoded
        .as_ref()
        .iter()
        .copied()
        .filter(|b| !b" \t\r\n".contains(b))
        .collect();

    let config =
        base64::Config::new(base64::CharacterSet::Standard, true).decode_allow_trailing_bits(true);
    // First try the good case.
    match base64::decode_config(&encoded, config) {
        Ok(decoded) => {
            if encoded.len() % 4 > 0 {
                defects.push(Defect::InvalidBase64Padding);
            }

            (decoded, defects)
        }
        Err(err) => match err {
            base64::DecodeError::InvalidByte(_offset, byte) => {
                defects.push(Defect::InvalidBase64Characters { byte });

                // filter out invalid characters
                let encoded: Vec<u8> = encoded
                    .iter()
                    .copied()
                    .filter(|b| b.is_ascii_alphanumeric() || *b == b'+' || *b == b'/')
                    .collect();

                if encoded.len() % 4 > 0 {
                    defects.push(Defect::InvalidBase64Padding);
                }

                match base64::decode_config(&encoded, config) {
                    Ok(decoded) => (decoded, defects),
                    Err(_err) => {
                        // giving up
                        defects.push(Defect::InvalidBase64Length);
                        (encoded, defects)
                    }
                }
            }
            base64::DecodeError::InvalidLastSymbol(_offset, _byte) => {
                unreachable!("config disables this error");
            }
            base64::DecodeError::InvalidLength => {
                // Nothing we can do
                defects.push(Defect::InvalidBase64Length);
                (encoded, defects)
            }
        },
    }
}

fn encode_b<T: AsRef<[u8]>>(bstring: T, eol: &str) -> String {
    let encoded = base64::encode(&bstring);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LEN * eol.len());

    // base64 output is ASCII, so any byte offset is a char boundary.
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(MAX_LINE_LEN));
        out.push_str(line);
        out.push_str(eol);
        rest = tail;
    }

    out
}

/// The body encodings a part can declare.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `7bit`, `8bit`, `binary`, unknown or absent: the body is the text.
    Identity,
    QuotedPrintable,
    Base64,
}

impl Default for TransferEncoding {
    fn default() -> Self {
        TransferEncoding::Identity
    }
}

impl TransferEncoding {
    /// Map a `Content-Transfer-Encoding` header value.
    pub fn from_header<T: AsRef<str>>(value: Option<T>) -> TransferEncoding {
        let value = match value {
            Some(value) => value.as_ref().trim().to_lowercase(),
            None => return TransferEncoding::Identity,
        };
        match value.as_str() {
            "quoted-printable" => TransferEncoding::QuotedPrintable,
            "base64" => TransferEncoding::Base64,
            _ => TransferEncoding::Identity,
        }
    }

    pub fn decode<T: AsRef<[u8]>>(self, body: T) -> (Vec<u8>, Vec<Defect>) {
        match self {
            TransferEncoding::Identity => (body.as_ref().to_vec(), Vec::new()),
            TransferEncoding::QuotedPrintable => decode_qp(body),
            TransferEncoding::Base64 => decode_b(body),
        }
    }

    /// Encode `bstring`, breaking lines with `eol` where the encoding
    /// introduces line breaks of its own.
    pub fn encode<T: AsRef<[u8]>>(self, bstring: T, eol: &str) -> Vec<u8> {
        match self {
            TransferEncoding::Identity => bstring.as_ref().to_vec(),
            TransferEncoding::QuotedPrintable => encode_qp(bstring, eol).into_bytes(),
            TransferEncoding::Base64 => encode_b(bstring, eol).into_bytes(),
        }
    }
}

/// Undo the transfer encoding of a body and read it as text.
pub fn extract_text<T: AsRef<[u8]>>(body: T, encoding: TransferEncoding) -> (String, Vec<Defect>) {
    let (bytes, defects) = encoding.decode(body);
    (Charset::default().decode(&bytes).into_owned(), defects)
}

/// Turn text back into a body with the given transfer encoding.
pub fn reinsert_text<T: AsRef<str>>(
    text: T,
    encoding: TransferEncoding,
    eol: &str,
) -> (Vec<u8>, Vec<Defect>) {
    let mut defects = Vec::new();
    let (bytes, unmappable) = Charset::default().encode(text.as_ref());
    if unmappable {
        defects.push(Defect::UnencodableCharacters);
    }
    (encoding.encode(bytes, eol), defects)
}
