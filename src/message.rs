//! Flat walk over a mail message.
//!
//! Only what is needed to reach the text is parsed: the header block of the
//! message and, for `multipart/*` messages, the header block of each direct
//! child.  `text/plain` and `text/html` bodies go through the rewriter; every
//! other byte (headers, preamble, epilogue, attachments, nested multiparts)
//! is copied through unchanged.

use std::borrow::Cow;

use tracing::{debug, warn};

use crate::charset::Charset;
use crate::defects::Defect;
use crate::rewrite::{rewrite_text, Mode};
use crate::transfer::{self, TransferEncoding};
use crate::url_defense::DecodingError;

const WSP: &[u8] = &[b' ', b'\t'];

/// Removes a single LF or CRLF from the end of the slice
fn without_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn log_defects(defects: &[Defect]) {
    for defect in defects {
        warn!("Transfer encoding defect: {}", defect);
    }
}

/// A header field, unfolded, with the name lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    /// Returns the value up to the first `;`, lowercased.
    pub fn main_value(&self) -> String {
        self.value
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_lowercase()
    }

    /// Looks up a `name=value` parameter, removing quotes around the value.
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.value.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_at(param.find('=')?);
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value[1..].trim().trim_matches('"'))
            } else {
                None
            }
        })
    }
}

fn parse_headers(head: &[u8]) -> Vec<Header> {
    let head = Charset::default().decode(head);
    let mut headers: Vec<Header> = Vec::new();

    for line in head.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with(|c: char| c == ' ' || c == '\t') {
            if let Some(last) = headers.last_mut() {
                last.value.push(' ');
                last.value.push_str(line.trim());
            }
            continue;
        }
        // Field names never contain blanks, which rules out an mbox `From ` line.
        if let Some(colon) = line.find(':') {
            let (name, value) = line.split_at(colon);
            if name.contains(' ') {
                continue;
            }
            headers.push(Header {
                name: name.trim().to_lowercase(),
                value: value[1..].trim().to_string(),
            });
        }
    }

    headers
}

/// A message, or one direct child of a multipart message.
#[derive(Debug, Clone)]
pub struct Part<'a> {
    head: &'a [u8],
    body: &'a [u8],
    headers: Vec<Header>,
}

impl<'a> Part<'a> {
    /// Split raw bytes at the first empty line into the header block and the
    /// body.
    pub fn parse(raw: &'a [u8]) -> Part<'a> {
        let mut offset = 0;
        for line in raw.split_inclusive(|&b| b == b'\n') {
            offset += line.len();
            if without_eol(line).is_empty() && line.ends_with(b"\n") {
                let (head, body) = raw.split_at(offset);
                return Part {
                    head,
                    body,
                    headers: parse_headers(head),
                };
            }
        }

        Part {
            head: raw,
            body: &[],
            headers: parse_headers(raw),
        }
    }

    /// Retrieves the first header matching `name`, if any
    pub fn get_header(&self, name: &str) -> Option<&Header> {
        self.headers
            .iter()
            .find(|hdr| hdr.name.eq_ignore_ascii_case(name))
    }

    /// The header block, including the empty line that ends it.
    pub fn head(&self) -> &'a [u8] {
        self.head
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Returns the part `Content-Type`, `text/plain` when absent
    pub fn content_type(&self) -> String {
        self.get_header("content-type")
            .map(Header::main_value)
            .unwrap_or_else(|| "text/plain".to_string())
    }

    /// The boundary of a `multipart/*` part with a non-empty boundary parameter.
    pub fn boundary(&self) -> Option<&str> {
        self.get_header("content-type")
            .filter(|hdr| hdr.main_value().starts_with("multipart/"))
            .and_then(|hdr| hdr.get_param("boundary"))
            .filter(|bound| !bound.is_empty())
    }

    /// Whether the body is text the rewriter should see.
    pub fn is_rewritable(&self) -> bool {
        matches!(self.content_type().as_str(), "text/plain" | "text/html")
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        TransferEncoding::from_header(
            self.get_header("content-transfer-encoding")
                .map(|hdr| hdr.value.as_str()),
        )
    }

    /// The line ending used by this part.
    pub fn eol(&self) -> &'static str {
        if self.body.windows(2).any(|w| w == b"\r\n")
            || (self.body.is_empty() && self.head.ends_with(b"\r\n"))
        {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Undo the body transfer encoding and read it as text.
    pub fn extract_text(&self) -> (String, TransferEncoding) {
        let encoding = self.transfer_encoding();
        let (text, defects) = transfer::extract_text(self.body, encoding);
        log_defects(&defects);
        (text, encoding)
    }
}

/// Write a part to `out` with its text body rewritten.
///
/// A body without any decodable link is written back byte for byte instead
/// of being re-encoded.
fn rewrite_part(part: &Part, mode: Mode, out: &mut Vec<u8>) -> Result<(), DecodingError> {
    out.extend_from_slice(part.head());

    if !part.is_rewritable() {
        debug!("Copying {} part", part.content_type());
        out.extend_from_slice(part.body());
        return Ok(());
    }

    let (text, encoding) = part.extract_text();
    match rewrite_text(&text, mode)? {
        Cow::Borrowed(_) => out.extend_from_slice(part.body()),
        Cow::Owned(rewritten) => {
            debug!("Rewrote {} part ({:?})", part.content_type(), encoding);
            let (body, defects) = transfer::reinsert_text(&rewritten, encoding, part.eol());
            log_defects(&defects);
            out.extend_from_slice(&body);
        }
    }

    Ok(())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Delimiter {
    Next,
    Close,
}

fn delimiter(line: &[u8], boundary: &str) -> Option<Delimiter> {
    let rest = without_eol(line)
        .strip_prefix(b"--")?
        .strip_prefix(boundary.as_bytes())?;
    let (kind, rest) = match rest.strip_prefix(b"--") {
        Some(rest) => (Delimiter::Close, rest),
        None => (Delimiter::Next, rest),
    };
    if rest.iter().all(|b| WSP.contains(b)) {
        Some(kind)
    } else {
        None
    }
}

fn rewrite_multipart(
    body: &[u8],
    boundary: &str,
    mode: Mode,
    out: &mut Vec<u8>,
) -> Result<(), DecodingError> {
    let mut part_start: Option<usize> = None;
    let mut closed = false;
    let mut offset = 0;

    for line in body.split_inclusive(|&b| b == b'\n') {
        let line_start = offset;
        offset += line.len();

        if closed {
            out.extend_from_slice(line);
            continue;
        }

        match delimiter(line, boundary) {
            Some(kind) => {
                if let Some(start) = part_start.take() {
                    write_child(&body[start..line_start], mode, out)?;
                }
                out.extend_from_slice(line);
                match kind {
                    Delimiter::Next => part_start = Some(offset),
                    Delimiter::Close => closed = true,
                }
            }
            // preamble
            None if part_start.is_none() => out.extend_from_slice(line),
            None => {}
        }
    }

    if let Some(start) = part_start {
        debug!("Multipart body ended without a closing boundary");
        write_child(&body[start..], mode, out)?;
    }

    Ok(())
}

fn write_child(raw: &[u8], mode: Mode, out: &mut Vec<u8>) -> Result<(), DecodingError> {
    let part = Part::parse(raw);
    if part.boundary().is_some() {
        debug!("Copying nested {} part", part.content_type());
        out.extend_from_slice(raw);
        return Ok(());
    }
    rewrite_part(&part, mode, out)
}

/// Rewrite the URL Defense links in the text parts of a raw message.
pub fn rewrite_message<T: AsRef<[u8]>>(raw: T, mode: Mode) -> Result<Vec<u8>, DecodingError> {
    let raw = raw.as_ref();
    let message = Part::parse(raw);
    let mut out = Vec::with_capacity(raw.len());

    match message.boundary() {
        Some(boundary) => {
            debug!("Walking multipart message, boundary {:?}", boundary);
            out.extend_from_slice(message.head());
            rewrite_multipart(message.body(), boundary, mode, &mut out)?;
        }
        None => rewrite_part(&message, mode, &mut out)?,
    }

    Ok(out)
}
