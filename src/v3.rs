//! Version 3 links: `https://urldefense.com/v3/__<body>__;<mask>!<signature>$`.
//!
//! The body is the original URL with some characters cut out.  Each cut is
//! marked with a `*`: a lone `*` stands for one character, while `**` followed
//! by a symbol from [`RUN_ALPHABET`] stands for a run of 2 to 65 characters.
//! The cut characters themselves are stored, in order, in the mask segment as
//! unpadded URL-safe base64.  Decoding splices them back in left to right.

use std::collections::HashMap;

use crate::charset::percent_decode;
use crate::url_defense::DecodingError;

/// Run marker symbols, in order of the run length they stand for.
pub const RUN_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

const BODY_START: &str = "v3/__";
const BODY_END: &str = "__;";
const MASK_END: char = '!';

lazy_static::lazy_static! {
    static ref RUN_LENGTHS: HashMap<char, usize> = RUN_ALPHABET
        .chars()
        .enumerate()
        .map(|(position, symbol)| (symbol, position + 2))
        .collect();
}

fn malformed<T: Into<String>>(reason: T) -> DecodingError {
    DecodingError::MalformedV3 {
        reason: reason.into(),
    }
}

/// Number of mask bytes a run marker symbol consumes.
pub fn run_length(symbol: char) -> Option<usize> {
    RUN_LENGTHS.get(&symbol).copied()
}

// -- Structure

/// The two encoded segments of a v3 link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segments<'a> {
    body: &'a str,
    mask: &'a str,
}

fn split_segments(url: &str) -> Result<Segments, DecodingError> {
    let start = url
        .find(BODY_START)
        .ok_or_else(|| malformed(format!("missing {:?}", BODY_START)))?
        + BODY_START.len();
    let rest = &url[start..];

    let body_len = rest
        .find(BODY_END)
        .ok_or_else(|| malformed(format!("missing {:?}", BODY_END)))?;
    let body = &rest[..body_len];
    let rest = &rest[body_len + BODY_END.len()..];

    let mask_len = rest
        .find(MASK_END)
        .ok_or_else(|| malformed(format!("missing {:?}", MASK_END)))?;

    Ok(Segments {
        body,
        mask: &rest[..mask_len],
    })
}

// -- Mask bytes

/// The characters cut out of the body, consumed strictly left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBytes {
    bytes: Vec<u8>,
    cursor: usize,
}

impl MaskBytes {
    /// Decode the mask segment of a link.
    ///
    /// The gateway strips the base64 padding, so two `=` are put back before
    /// decoding.  Any padding beyond what the length calls for is dropped
    /// again, since the decoder only accepts canonical padding.
    pub fn from_segment<T: AsRef<str>>(segment: T) -> Result<MaskBytes, DecodingError> {
        let segment = segment.as_ref();
        let mut padded = format!("{}==", segment);
        padded.truncate((segment.len() + 3) / 4 * 4);

        let config = base64::Config::new(base64::CharacterSet::UrlSafe, true)
            .decode_allow_trailing_bits(true);
        let bytes = base64::decode_config(&padded, config).map_err(|err| {
            malformed(format!("undecodable mask {:?}: {}", segment, err))
        })?;

        Ok(MaskBytes::new(bytes))
    }

    pub fn new(bytes: Vec<u8>) -> MaskBytes {
        MaskBytes { bytes, cursor: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    /// Take the next `count` bytes.
    pub fn take(&mut self, count: usize) -> Result<&[u8], DecodingError> {
        if count > self.remaining() {
            return Err(DecodingError::MaskExhausted {
                needed: count,
                available: self.remaining(),
            });
        }
        let taken = &self.bytes[self.cursor..self.cursor + count];
        self.cursor += count;
        Ok(taken)
    }
}

// -- Tokens

/// One `*` cut point in the body and the literal text after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// The run marker symbol, `None` for a lone `*`.
    pub run: Option<char>,
    pub literal: &'a str,
}

impl<'a> Token<'a> {
    /// How many mask bytes this token splices in.
    pub fn mask_len(&self) -> Result<usize, DecodingError> {
        match self.run {
            None => Ok(1),
            Some(symbol) => run_length(symbol)
                .ok_or_else(|| malformed(format!("unknown run marker {:?}", symbol))),
        }
    }
}

/// Splits a decoded body into its base prefix and the tokens that follow.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    /// Returns the base prefix along with the lexer positioned at the first `*`.
    pub fn split(body: &'a str) -> (&'a str, Lexer<'a>) {
        let split = body.find('*').unwrap_or(body.len());
        let (prefix, rest) = body.split_at(split);
        (prefix, Lexer { rest })
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let after_star = self.rest.strip_prefix('*')?;

        let (run, after_marker) = match after_star.strip_prefix('*') {
            Some(marked) => {
                let mut chars = marked.chars();
                match chars.next() {
                    Some(symbol) => (Some(symbol), chars.as_str()),
                    None => {
                        self.rest = "";
                        return Some(Err(malformed("run marker without a symbol")));
                    }
                }
            }
            None => (None, after_star),
        };

        let literal_len = after_marker.find('*').unwrap_or(after_marker.len());
        let (literal, rest) = after_marker.split_at(literal_len);
        self.rest = rest;

        Some(Ok(Token { run, literal }))
    }
}

// -- Decoding

/// Splice the mask bytes back into a percent-decoded body.
pub fn restore(body: &str, mut mask: MaskBytes) -> Result<String, DecodingError> {
    let (prefix, tokens) = Lexer::split(body);
    let mut out = String::with_capacity(body.len() + mask.remaining());
    out.push_str(prefix);

    for token in tokens {
        let token = token?;
        let spliced = mask.take(token.mask_len()?)?;
        out.extend(spliced.iter().copied().map(char::from));
        out.push_str(token.literal);
    }

    Ok(out)
}

/// Decode a v3 link into the URL it protects.
pub fn decode<T: AsRef<str>>(url: T) -> Result<String, DecodingError> {
    let segments = split_segments(url.as_ref())?;
    let body = percent_decode(segments.body);
    let mask = MaskBytes::from_segment(segments.mask)?;
    restore(&body, mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lengths() {
        assert_eq!(run_length('A'), Some(2));
        assert_eq!(run_length('B'), Some(3));
        assert_eq!(run_length('Z'), Some(27));
        assert_eq!(run_length('a'), Some(28));
        assert_eq!(run_length('z'), Some(53));
        assert_eq!(run_length('0'), Some(54));
        assert_eq!(run_length('9'), Some(63));
        assert_eq!(run_length('-'), Some(64));
        assert_eq!(run_length('_'), Some(65));
        assert_eq!(run_length('*'), None);
        assert_eq!(run_length('.'), None);
    }

    #[test]
    fn test_split_segments() {
        assert_eq!(
            split_segments("https://urldefense.com/v3/__http://a.b/c__;Kw!sig!more$").unwrap(),
            Segments {
                body: "http://a.b/c",
                mask: "Kw",
            }
        );
    }

    #[test]
    fn test_split_segments_missing_markers() {
        assert_eq!(
            split_segments("https://urldefense.com/v3/http://a.b__;Kw!x$"),
            Err(DecodingError::MalformedV3 {
                reason: "missing \"v3/__\"".into()
            })
        );
        assert_eq!(
            split_segments("https://urldefense.com/v3/__http://a.b;Kw!x$"),
            Err(DecodingError::MalformedV3 {
                reason: "missing \"__;\"".into()
            })
        );
        assert_eq!(
            split_segments("https://urldefense.com/v3/__http://a.b__;Kw$"),
            Err(DecodingError::MalformedV3 {
                reason: "missing '!'".into()
            })
        );
    }

    #[test]
    fn test_mask_from_segment() {
        assert_eq!(MaskBytes::from_segment("QUJD").unwrap(), MaskBytes::new(b"ABC".to_vec()));
        assert_eq!(MaskBytes::from_segment("Kw").unwrap(), MaskBytes::new(b"+".to_vec()));
        assert_eq!(MaskBytes::from_segment("Oi8vJg").unwrap(), MaskBytes::new(b"://&".to_vec()));
        assert_eq!(MaskBytes::from_segment("dmk").unwrap(), MaskBytes::new(b"vi".to_vec()));
        assert_eq!(MaskBytes::from_segment("").unwrap(), MaskBytes::new(Vec::new()));
    }

    #[test]
    fn test_mask_url_safe_alphabet() {
        // 0xfb 0xff encodes to `-_8` in the URL-safe alphabet.
        assert_eq!(
            MaskBytes::from_segment("-_8").unwrap(),
            MaskBytes::new(vec![0xfb, 0xff])
        );
    }

    #[test]
    fn test_mask_invalid_length() {
        match MaskBytes::from_segment("QUJDR") {
            Err(DecodingError::MalformedV3 { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_mask_take() {
        let mut mask = MaskBytes::new(b"ABC".to_vec());
        assert_eq!(mask.take(2).unwrap(), b"AB");
        assert_eq!(mask.remaining(), 1);
        assert_eq!(
            mask.take(2),
            Err(DecodingError::MaskExhausted {
                needed: 2,
                available: 1
            })
        );
        assert_eq!(mask.take(1).unwrap(), b"C");
        assert_eq!(mask.remaining(), 0);
    }

    #[test]
    fn test_lexer() {
        let (prefix, lexer) = Lexer::split("AB**A/CD*EF");
        assert_eq!(prefix, "AB");
        let tokens: Vec<_> = lexer.map(Result::unwrap).collect();
        assert_eq!(
            tokens,
            vec![
                Token {
                    run: Some('A'),
                    literal: "/CD"
                },
                Token {
                    run: None,
                    literal: "EF"
                },
            ]
        );
    }

    #[test]
    fn test_lexer_adjacent_markers() {
        let (prefix, lexer) = Lexer::split("x*y**");
        assert_eq!(prefix, "x");
        let tokens: Vec<_> = lexer.collect();
        assert_eq!(
            tokens,
            vec![
                Ok(Token {
                    run: None,
                    literal: "y"
                }),
                Err(DecodingError::MalformedV3 {
                    reason: "run marker without a symbol".into()
                }),
            ]
        );

        let (prefix, lexer) = Lexer::split("***B*");
        assert_eq!(prefix, "");
        let tokens: Vec<_> = lexer.map(Result::unwrap).collect();
        assert_eq!(
            tokens,
            vec![
                Token {
                    run: Some('*'),
                    literal: "B"
                },
                Token {
                    run: None,
                    literal: ""
                },
            ]
        );
    }

    #[test]
    fn test_lexer_no_tokens() {
        let (prefix, mut lexer) = Lexer::split("https://example.com");
        assert_eq!(prefix, "https://example.com");
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn test_restore_run_and_single() {
        assert_eq!(
            restore("AB**A/CD*EF", MaskBytes::new(b"ABC".to_vec())).unwrap(),
            "ABAB/CDCEF"
        );
    }

    #[test]
    fn test_restore_unknown_run_symbol() {
        assert_eq!(
            restore("a**.b", MaskBytes::new(b"xyz".to_vec())),
            Err(DecodingError::MalformedV3 {
                reason: "unknown run marker '.'".into()
            })
        );
    }

    #[test]
    fn test_restore_mask_exhausted() {
        assert_eq!(
            restore("a*b*c", MaskBytes::new(b"A".to_vec())),
            Err(DecodingError::MaskExhausted {
                needed: 1,
                available: 0
            })
        );
        assert_eq!(
            restore("a**Zb", MaskBytes::new(b"AB".to_vec())),
            Err(DecodingError::MaskExhausted {
                needed: 27,
                available: 2
            })
        );
    }

    #[test]
    fn test_restore_leftover_mask_ignored() {
        assert_eq!(
            restore("a*b", MaskBytes::new(b"XYZ".to_vec())).unwrap(),
            "aXb"
        );
    }

    #[test]
    fn test_decode_example_run() {
        assert_eq!(
            decode("https://urldefense.com/v3/__AB**A/CD*EF__;QUJD!xyz$").unwrap(),
            "ABAB/CDCEF"
        );
    }

    #[test]
    fn test_decode_single_substitution() {
        assert_eq!(
            decode("https://urldefense.com/v3/__https://google.com:443/search?q=a*test&gs=ps__;Kw!-612Flbf0JvQ3kNJkRi5Jg!Ue6tQudNKaShHg93trcdjqDP8se2ySE65jyCIe2K1D_uNjZ1Lnf6YLQERujngZv9UWf66ujQIQ$")
                .unwrap(),
            "https://google.com:443/search?q=a+test&gs=ps"
        );
    }

    #[test]
    fn test_decode_run_marker() {
        assert_eq!(
            decode("https://urldefense.proofpoint.com/v3/__https**Bex.com/p?a=b*c=d__;Oi8vJg!abc$")
                .unwrap(),
            "https://ex.com/p?a=b&c=d"
        );
    }

    #[test]
    fn test_decode_percent_escaped_body() {
        assert_eq!(
            decode("https://urldefense.com/v3/__http://ex.com/a%20b*c__;Kw!x$").unwrap(),
            "http://ex.com/a b+c"
        );
    }

    #[test]
    fn test_decode_8bit_bytes() {
        assert_eq!(
            decode("https://urldefense.com/v3/__https://a.com/caf%E9__;!x$").unwrap(),
            "https://a.com/caf\u{e9}"
        );
        // 4oKs is the mask for the bytes E2 82 AC.
        assert_eq!(
            decode("https://urldefense.com/v3/__https://a.com/**B__;4oKs!x$").unwrap(),
            "https://a.com/\u{e2}\u{82}\u{ac}"
        );
    }

    #[test]
    fn test_decode_no_substitutions() {
        assert_eq!(
            decode("https://urldefense.com/v3/__http://ex.com/__;!x$").unwrap(),
            "http://ex.com/"
        );
    }

    #[test]
    fn test_decode_mask_exhausted() {
        assert_eq!(
            decode("https://urldefense.com/v3/__http://a.com/*x__;!sig$"),
            Err(DecodingError::MaskExhausted {
                needed: 1,
                available: 0
            })
        );
    }
}
