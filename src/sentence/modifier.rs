//! Per-word audio modifiers
//!
//! A modifier is written as space separated `<letter><integer>` pairs, e.g.
//! `"s10 e90 p120"`:
//!
//! | letter | field           | default |
//! |--------|-----------------|---------|
//! | `s`    | start (%)       | 0       |
//! | `e`    | end (%)         | 100     |
//! | `t`    | time compress   | 0       |
//! | `p`    | pitch (%)       | 100     |
//! | `v`    | volume (%)      | 100     |
//!
//! Parsing is permissive: unknown tokens are skipped and values are never
//! clamped. Out-of-range values produce degenerate buffers downstream, not
//! errors.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One `<letter><digits>` token, terminated by whitespace or end of text.
static RE_MOD_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9_])([0-9]+)(?:\s|$)").unwrap());

/// Adjustments applied to a single word of a sentence
///
/// `start`, `end` and `time_compress` select samples from the clip and are
/// baked into a buffer variant. `pitch` and `volume` are applied when the
/// word is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifier {
    pub start: u32,
    pub end: u32,
    pub volume: u32,
    pub pitch: u32,
    pub time_compress: u32,
}

impl Modifier {
    /// The unmodified, full-length clip
    pub const DEFAULT: Modifier = Modifier {
        start: 0,
        end: 100,
        volume: 100,
        pitch: 100,
        time_compress: 0,
    };

    /// Merge a (possibly partial) modifier string onto `base`
    ///
    /// # Example
    /// ```
    /// use voxline::sentence::Modifier;
    /// let m = Modifier::parse("v50 p80", &Modifier::DEFAULT);
    /// assert_eq!(m.volume, 50);
    /// assert_eq!(m.pitch, 80);
    /// assert_eq!(m.end, 100);
    /// ```
    pub fn parse(text: &str, base: &Modifier) -> Modifier {
        let mut result = *base;

        for caps in RE_MOD_TOKEN.captures_iter(text) {
            let letter = caps[1].chars().next().unwrap_or('_');
            // Values too large for u32 are treated like unknown tokens
            if let Ok(value) = caps[2].parse::<u32>() {
                result.set(letter, value);
            }
        }

        result
    }

    /// Serialize the fields that differ from `base`
    ///
    /// Fields are emitted in the order `s e t p v`.
    ///
    /// # Example
    /// ```
    /// use voxline::sentence::Modifier;
    /// let m = Modifier { volume: 50, start: 10, ..Modifier::DEFAULT };
    /// assert_eq!(m.to_mod_string(&Modifier::DEFAULT), "s10 v50");
    /// ```
    pub fn to_mod_string(&self, base: &Modifier) -> String {
        self.fields()
            .iter()
            .zip(base.fields().iter())
            .filter(|((_, value), (_, base_value))| value != base_value)
            .map(|((letter, value), _)| format!("{}{}", letter, value))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Cache key for the buffer variant this modifier selects
    ///
    /// The full modifier string, so every non-default modifier gets its own
    /// chunked buffer. The empty key is the base clip.
    pub fn variant_key(&self) -> String {
        self.to_mod_string(&Modifier::DEFAULT)
    }

    /// Playback rate multiplier (`pitch / 100`)
    pub fn playback_rate(&self) -> f64 {
        self.pitch as f64 / 100.0
    }

    /// Linear gain (`volume / 100`)
    pub fn gain_level(&self) -> f32 {
        self.volume as f32 / 100.0
    }

    /// Whether the trim window satisfies `start <= end <= 100`
    pub fn has_valid_range(&self) -> bool {
        self.start <= self.end && self.end <= 100 && self.time_compress <= 100
    }

    fn fields(&self) -> [(char, u32); 5] {
        [
            ('s', self.start),
            ('e', self.end),
            ('t', self.time_compress),
            ('p', self.pitch),
            ('v', self.volume),
        ]
    }

    fn set(&mut self, letter: char, value: u32) -> bool {
        match letter.to_ascii_lowercase() {
            's' => self.start = value,
            'e' => self.end = value,
            't' => self.time_compress = value,
            'p' => self.pitch = value,
            'v' => self.volume = value,
            _ => return false,
        }
        true
    }
}

impl Default for Modifier {
    fn default() -> Self {
        Modifier::DEFAULT
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mod_string(&Modifier::DEFAULT))
    }
}

impl FromStr for Modifier {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Modifier::parse(s, &Modifier::DEFAULT))
    }
}
