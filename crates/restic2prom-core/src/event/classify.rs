//! Line classifier.
//!
//! Splits the child's output into structured events and opaque text. A line
//! that is not a known event is never an error: password prompts, progress
//! bars and human-readable diagnostics all end up as [`Line::Raw`].

use super::Event;

/// Result of classifying one line of child output.
#[derive(Debug, Clone, PartialEq)]
pub enum Line<'a> {
    /// A decoded restic message.
    Event(Event),
    /// Anything else, borrowed byte-for-byte from the input (terminator included).
    Raw(&'a [u8]),
}

/// Classify a single line.
///
/// `line` may include its trailing `\n` (or `\r\n`); JSON decoding ignores
/// trailing whitespace and the raw variant keeps the bytes untouched.
pub fn classify(line: &[u8]) -> Line<'_> {
    // Cheap reject before handing the line to serde: every restic message
    // is a JSON object.
    let first = line.iter().find(|b| !b.is_ascii_whitespace());
    if first != Some(&b'{') {
        return Line::Raw(line);
    }

    match serde_json::from_slice::<Event>(line) {
        Ok(event) => Line::Event(event),
        Err(_) => Line::Raw(line),
    }
}
