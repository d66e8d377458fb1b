//! # Bundle Export
//!
//! Tokenizer records and the JSON writer used for them.

pub mod json;
pub mod records;

#[doc(inline)]
pub use json::{AsciiPrettyFormatter, to_string_ascii_pretty, write_json_file};
#[doc(inline)]
pub use records::{NO_PAD_TOKEN_ID, TokenizerConfigRecord, VocabRecord};
