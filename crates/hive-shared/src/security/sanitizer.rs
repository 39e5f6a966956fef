//! Gate 1: input sanitization.
//!
//! Strips invisible Unicode code points that can smuggle instructions past
//! a reviewer, NFC-normalizes, and collapses whitespace runs. Never mutates
//! the caller's input; the sanitized text is a new string.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Invisible code points that can hide instructions inside otherwise
/// harmless text.
pub const INVISIBLE_CHARS: [char; 13] = [
    '\u{200B}', // zero-width space
    '\u{200C}', // zero-width non-joiner
    '\u{200D}', // zero-width joiner
    '\u{180E}', // mongolian vowel separator
    '\u{FEFF}', // zero-width no-break space
    '\u{2060}', // word joiner
    '\u{2061}', // function application
    '\u{2062}', // invisible times
    '\u{2063}', // invisible separator
    '\u{2064}', // invisible plus
    '\u{00AD}', // soft hyphen
    '\u{034F}', // combining grapheme joiner
    '\u{061C}', // arabic letter mark
];

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("static regex"));

/// A detected invisible character with its position in the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvisibleChar {
    pub ch: char,
    /// Char index in the original input.
    pub position: usize,
    /// `U+XXXX` form for reporting.
    pub code_point: String,
}

/// Sanitize input: strip invisible characters, NFC-normalize, collapse
/// whitespace runs to a single space, trim.
pub fn sanitize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let stripped: String = text.chars().filter(|c| !INVISIBLE_CHARS.contains(c)).collect();
    let normalized: String = stripped.nfc().collect();
    WHITESPACE_RUN
        .replace_all(&normalized, " ")
        .trim()
        .to_string()
}

/// Locate every invisible character in the original input.
pub fn detect_invisible_chars(text: &str) -> Vec<InvisibleChar> {
    text.chars()
        .enumerate()
        .filter(|(_, c)| INVISIBLE_CHARS.contains(c))
        .map(|(i, c)| InvisibleChar {
            ch: c,
            position: i,
            code_point: format!("U+{:04X}", c as u32),
        })
        .collect()
}
