//! Version dispatch for URL Defense links.
//!
//! A rewritten link looks like `https://urldefense.proofpoint.com/v2/url?u=...&e=`
//! or `https://urldefense.com/v3/__<url>__;<mask>!<signature>$`.  The version
//! token is whatever follows `/v` in the path, up to the next `/`.  Only `2`
//! and `3` are understood; anything else is reported instead of guessed at.

use thiserror::Error;

use crate::{v2, v3};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodingError {
    #[error("Unsupported URL Defense version {:?}", version)]
    UnsupportedVersion { version: String },
    #[error("Malformed v2 URL: {}", reason)]
    MalformedV2 { reason: String },
    #[error("Malformed v3 URL: {}", reason)]
    MalformedV3 { reason: String },
    #[error(
        "v3 run needs {} mask bytes but only {} remain",
        needed,
        available
    )]
    MaskExhausted { needed: usize, available: usize },
}

/// The encoding schemes this crate can reverse.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Version {
    V2,
    V3,
}

impl Version {
    /// Read the version token out of a rewritten link.
    pub fn detect<T: AsRef<str>>(url: T) -> Result<Version, DecodingError> {
        let url = url.as_ref();
        let token = version_token(url).ok_or_else(|| DecodingError::UnsupportedVersion {
            version: String::new(),
        })?;

        match token {
            "2" => Ok(Version::V2),
            "3" => Ok(Version::V3),
            other => Err(DecodingError::UnsupportedVersion {
                version: other.into(),
            }),
        }
    }

    pub fn decode<T: AsRef<str>>(self, url: T) -> Result<String, DecodingError> {
        match self {
            Version::V2 => v2::decode(url),
            Version::V3 => v3::decode(url),
        }
    }
}

// The text between `/v` and the following `/`, past the host part.
fn version_token(url: &str) -> Option<&str> {
    let path = url.splitn(4, '/').nth(3)?;
    let rest = path.strip_prefix('v')?;
    let end = rest.find('/').unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Restore the original URL behind a single URL Defense link.
///
/// The link must be exactly one rewritten URL, as produced by the locator.
pub fn decode<T: AsRef<str>>(url: T) -> Result<String, DecodingError> {
    let url = url.as_ref();
    Version::detect(url)?.decode(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_v2() {
        assert_eq!(
            Version::detect("https://urldefense.proofpoint.com/v2/url?u=x&e="),
            Ok(Version::V2)
        );
    }

    #[test]
    fn test_detect_v3() {
        assert_eq!(
            Version::detect("https://urldefense.com/v3/__a__;!x$"),
            Ok(Version::V3)
        );
        assert_eq!(
            Version::detect("https://urldefense.proofpoint.com/v3/__a__;!x$"),
            Ok(Version::V3)
        );
    }

    #[test]
    fn test_detect_unknown_digit() {
        assert_eq!(
            Version::detect("https://urldefense.com/v4/__a__;!x$"),
            Err(DecodingError::UnsupportedVersion {
                version: "4".into()
            })
        );
    }

    #[test]
    fn test_detect_multi_digit() {
        assert_eq!(
            Version::detect("https://urldefense.com/v23/foo"),
            Err(DecodingError::UnsupportedVersion {
                version: "23".into()
            })
        );
    }

    #[test]
    fn test_detect_missing_version() {
        assert_eq!(
            Version::detect("https://urldefense.com/url?u=x"),
            Err(DecodingError::UnsupportedVersion {
                version: String::new()
            })
        );
        assert_eq!(
            Version::detect("https://urldefense.com"),
            Err(DecodingError::UnsupportedVersion {
                version: String::new()
            })
        );
    }

    #[test]
    fn test_decode_dispatches() {
        assert_eq!(
            decode("https://urldefense.proofpoint.com/v2/url?u=https-3A__example.com_p-2Dath&e=")
                .unwrap(),
            "https://example.com/p-ath"
        );
        assert_eq!(
            decode("https://urldefense.com/v3/__AB**A/CD*EF__;QUJD!xyz$").unwrap(),
            "ABAB/CDCEF"
        );
    }

    #[test]
    fn test_decode_unknown_version() {
        assert_eq!(
            decode("https://urldefense.com/v9/__x__;Kw!sig$"),
            Err(DecodingError::UnsupportedVersion {
                version: "9".into()
            })
        );
    }
}
