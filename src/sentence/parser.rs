//! Sentence parser
//!
//! Sentences use a compact line notation:
//!
//! ```text
//! vox/ hello(p110) , fvox/(v60) bizwarn bizwarn .
//! ```
//!
//! - `word/` switches the directory prefix for following words
//! - `(mods)` on its own changes the modifier for all following words
//! - `word(mods)` applies a modifier to that word only
//! - `.` and `,` map to the `_period` and `_comma` clips
//!
//! Anything else is skipped.

use std::ops::Range;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sentence::modifier::Modifier;

/// Directory prefix used until the first path directive
pub const DEFAULT_PATH: &str = "vox/";

static RE_SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?P<path>[A-Za-z0-9_]+/)",
        r"|(?P<name>[A-Za-z0-9_]+!?|\.|,)(?:\((?P<mod1>.*?)\))?",
        r"|\((?P<modall>.*?)\)",
    ))
    .unwrap()
});

/// One resolved word of a sentence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordToken {
    /// Lowercase `prefix + name` used to find the clip
    pub sound_key: String,
    /// Effective modifier for this word
    pub modifier: Modifier,
}

impl WordToken {
    pub fn new(sound_key: impl Into<String>, modifier: Modifier) -> Self {
        Self {
            sound_key: sound_key.into(),
            modifier,
        }
    }
}

/// What a span of the sentence matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentKind {
    /// `word/`
    Path(String),
    /// A word with its optional inline modifier text
    Word {
        name: String,
        modifier: Option<String>,
    },
    /// A standalone `(mods)` block
    Modifier(String),
    /// Input that matched nothing (whitespace-only gaps are not reported)
    Unmatched,
}

/// A raw match of the sentence grammar with its byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub range: Range<usize>,
}

/// Split a sentence into grammar segments without resolving anything
pub fn tokenize(sentence: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in RE_SENTENCE.captures_iter(sentence) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(cursor..cursor);
        push_gap(&mut segments, sentence, cursor..whole.start);
        cursor = whole.end;

        let kind = if let Some(path) = caps.name("path") {
            SegmentKind::Path(path.as_str().to_string())
        } else if let Some(name) = caps.name("name") {
            SegmentKind::Word {
                name: name.as_str().to_string(),
                modifier: caps.name("mod1").map(|m| m.as_str().to_string()),
            }
        } else if let Some(mods) = caps.name("modall") {
            SegmentKind::Modifier(mods.as_str().to_string())
        } else {
            SegmentKind::Unmatched
        };

        segments.push(Segment { kind, range: whole });
    }

    push_gap(&mut segments, sentence, cursor..sentence.len());
    segments
}

fn push_gap(segments: &mut Vec<Segment>, sentence: &str, range: Range<usize>) {
    if sentence[range.clone()].chars().any(|c| !c.is_whitespace()) {
        segments.push(Segment {
            kind: SegmentKind::Unmatched,
            range,
        });
    }
}

/// Resolves sentences into word lists
#[derive(Debug, Clone)]
pub struct SentenceParser {
    default_path: String,
}

impl Default for SentenceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceParser {
    /// Create a parser using the `vox/` default prefix
    pub fn new() -> Self {
        Self {
            default_path: DEFAULT_PATH.to_string(),
        }
    }

    /// Use a different prefix before the first path directive
    pub fn with_default_path(mut self, path: impl Into<String>) -> Self {
        self.default_path = path.into();
        self
    }

    pub fn default_path(&self) -> &str {
        &self.default_path
    }

    /// Parse a sentence into its ordered word list
    ///
    /// # Example
    /// ```
    /// use voxline::sentence::SentenceParser;
    /// let words = SentenceParser::new().parse("hello fvox/ beep(v50)");
    /// assert_eq!(words[0].sound_key, "vox/hello");
    /// assert_eq!(words[1].sound_key, "fvox/beep");
    /// assert_eq!(words[1].modifier.volume, 50);
    /// ```
    pub fn parse(&self, sentence: &str) -> Vec<WordToken> {
        self.resolve(&tokenize(sentence))
    }

    /// Resolve already tokenized segments into words
    pub fn resolve(&self, segments: &[Segment]) -> Vec<WordToken> {
        let mut path = self.default_path.clone();
        let mut current = Modifier::DEFAULT;
        let mut words = Vec::new();

        for segment in segments {
            match &segment.kind {
                SegmentKind::Path(p) => path = p.clone(),
                SegmentKind::Modifier(text) => current = Modifier::parse(text, &current),
                SegmentKind::Word { name, modifier } => {
                    let modifier = match modifier {
                        Some(text) => Modifier::parse(text, &current),
                        None => current,
                    };
                    let key = format!("{}{}", path, substitute_name(name)).to_lowercase();
                    words.push(WordToken::new(key, modifier));
                }
                SegmentKind::Unmatched => {
                    debug!("skipping unmatched input at {:?}", segment.range);
                }
            }
        }

        words
    }
}

/// Parse a sentence with the default `vox/` prefix
pub fn parse_sentence(sentence: &str) -> Vec<WordToken> {
    SentenceParser::new().parse(sentence)
}

fn substitute_name(name: &str) -> &str {
    match name {
        "." => "_period",
        "," => "_comma",
        other => other,
    }
}
