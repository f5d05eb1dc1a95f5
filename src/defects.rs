//! Defects

use thiserror::Error;

/// These are transfer decoding defects which the decoder was able to work around.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Defect {
    #[error("base64 encoded body had an incorrect length")]
    InvalidBase64Padding,
    #[error(
        "base64 encoded body had characters not in base64 alphabet: {}",
        byte
    )]
    InvalidBase64Characters { byte: u8 },
    #[error("base64 encoded body had invalid length (1 mod 4)")]
    InvalidBase64Length,
    #[error("quoted-printable body had a malformed escape: {:?}", escape)]
    InvalidQuotedPrintableEscape { escape: String },
    #[error("Text contained characters outside the 8-bit charset")]
    UnencodableCharacters,
}
