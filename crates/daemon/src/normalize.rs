//! Title normalization for canonical file names.
//!
//! A media record carries a localized `title` and an `original_title`. The
//! original title is preferred when it is written in the Latin script, so a
//! French library still files "Spider-Man" as `spider-man` while a Japanese
//! original falls back to the localized title.

use crate::library::MediaRecord;

/// Unicode ranges assigned to the Latin script.
const LATIN_RANGES: &[(char, char)] = &[
    ('A', 'Z'),
    ('a', 'z'),
    ('\u{00AA}', '\u{00AA}'),
    ('\u{00BA}', '\u{00BA}'),
    ('\u{00C0}', '\u{024F}'),
    ('\u{0250}', '\u{02AF}'),
    ('\u{1D00}', '\u{1D7F}'),
    ('\u{1E00}', '\u{1EFF}'),
    ('\u{2C60}', '\u{2C7F}'),
    ('\u{A720}', '\u{A7FF}'),
    ('\u{AB30}', '\u{AB6F}'),
    ('\u{FB00}', '\u{FB06}'),
    ('\u{FF21}', '\u{FF3A}'),
    ('\u{FF41}', '\u{FF5A}'),
];

fn is_latin_letter(c: char) -> bool {
    LATIN_RANGES
        .iter()
        .any(|&(start, end)| c >= start && c <= end)
}

/// Returns true if `text` contains at least one letter and every letter is Latin.
///
/// Digits, punctuation and whitespace are script-neutral and ignored.
pub fn is_latin(text: &str) -> bool {
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(is_latin_letter)
}

/// Lowercases `name` and replaces spaces with dots.
///
/// Idempotent: normalizing an already normalized string returns it unchanged.
pub fn normalize_str(name: &str) -> String {
    name.replace(' ', ".").to_lowercase()
}

/// Derives the normalized title used in canonical file names.
pub fn normalized_title(record: &MediaRecord) -> String {
    if is_latin(&record.original_title) {
        normalize_str(&record.original_title)
    } else {
        normalize_str(&record.title)
    }
}
