//! Fixed-size character chunker.
//!
//! Splits extracted document text into consecutive windows of at most
//! `max_chars` characters. There is no sentence or paragraph awareness:
//! windows are cut purely by count, which keeps chunk boundaries stable
//! across re-ingestion of the same text.
//!
//! Lengths are counted in Unicode scalar values, so a window never ends in
//! the middle of a multi-byte character.

/// Split `text` into windows of at most `max_chars` characters.
///
/// Returns no chunks for text that is empty or whitespace-only.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut count = 0usize;

    for (pos, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(text[start..pos].to_string());
            start = pos;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(text[start..].to_string());
    }

    chunks
}
