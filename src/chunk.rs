//! Size-bounded text chunker.
//!
//! Splits protocol text into contiguous chunks of at most `limit`
//! characters for submission to the structuring service. A chunk that would
//! end mid-text is cut just after the last newline in its window, or after
//! the last space when the window holds no newline. Only when neither
//! exists is the window cut hard at `limit` characters.
//!
//! Concatenating the chunks always reproduces the input exactly.

/// Chunk budget tuned to the structuring service's input window.
pub const DEFAULT_CHUNK_CHARS: usize = 8000;

/// Split `text` into chunks of at most `limit` characters on natural
/// boundaries. Returns an empty vector for empty input.
///
/// # Panics
///
/// Panics if `limit` is zero.
pub fn split_text(text: &str, limit: usize) -> Vec<String> {
    assert!(limit > 0, "chunk limit must be > 0");

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let cut = boundary(rest, limit);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_string());
        rest = tail;
    }
    chunks
}

/// Byte offset at which the next chunk of `rest` ends.
fn boundary(rest: &str, limit: usize) -> usize {
    let window_end = match rest.char_indices().nth(limit) {
        Some((offset, _)) => offset,
        // The remaining text fits in one chunk.
        None => return rest.len(),
    };
    let window = &rest[..window_end];

    // A delimiter at offset 0 would yield a chunk holding only the delimiter.
    let after = |pos: usize| if pos > 0 { Some(pos + 1) } else { None };
    window
        .rfind('\n')
        .and_then(after)
        .or_else(|| window.rfind(' ').and_then(after))
        .unwrap_or(window_end)
}
