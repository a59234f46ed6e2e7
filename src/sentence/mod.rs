//! Sentence Module
//!
//! The line-notation mini-language:
//! - Modifier values and their string codec
//! - Tokenizer and word-list resolver

pub mod modifier;
pub mod parser;

pub use modifier::Modifier;
pub use parser::{
    parse_sentence, tokenize, Segment, SegmentKind, SentenceParser, WordToken, DEFAULT_PATH,
};
