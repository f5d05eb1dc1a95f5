mod charset;
mod defects;
mod locator;
mod message;
mod rewrite;
mod transfer;
mod url_defense;
mod v2;
mod v3;

pub use self::charset::Charset;
pub use self::defects::Defect;
pub use self::locator::{locate, EncodedUrlMatch, Locator};
pub use self::message::{rewrite_message, Header, Part};
pub use self::rewrite::{rewrite_text, Mode};
pub use self::transfer::{extract_text, reinsert_text, TransferEncoding};
pub use self::url_defense::*;
pub use self::v3::{run_length, Lexer, MaskBytes, Token, RUN_ALPHABET};
