//! Text segmentation for ingestion
//!
//! Splits extracted text into overlapping chunks no longer than a configured
//! character budget. Cuts prefer paragraph breaks, then sentence ends, then
//! any whitespace, and only fall back to a hard cut when a single unit
//! overruns the budget. Identical input and parameters always produce the
//! identical span sequence, which re-ingestion relies on.

/// One chunk of source text with its position in the original
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Sequence index within the document, starting at 0
    pub index: usize,
    /// Byte offset of the first character in the source text
    pub start: usize,
    /// Byte offset one past the last character in the source text
    pub end: usize,
    /// The chunk text; always equals the source slice at `start..end`
    pub text: String,
}

/// Split `text` into ordered, overlapping spans of at most `max_chars`
/// characters. Consecutive spans share `overlap` characters of context.
/// Text that is empty or all whitespace yields no spans.
pub fn chunk(text: &str, max_chars: usize, overlap: usize) -> Vec<ChunkSpan> {
    if max_chars == 0 {
        return Vec::new();
    }

    // Work in character positions so the budget means characters, not bytes.
    let chars: Vec<char> = text.chars().collect();
    let byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    let total = chars.len();
    let byte_at = |pos: usize| -> usize {
        if pos >= byte_offsets.len() {
            text.len()
        } else {
            byte_offsets[pos]
        }
    };

    let mut spans: Vec<ChunkSpan> = Vec::new();
    let mut start = skip_whitespace(&chars, 0);

    while start < total {
        let window_end = (start + max_chars).min(total);
        let cut = if window_end == total {
            total
        } else {
            pick_cut(&chars, start, window_end)
        };

        // Drop trailing whitespace from the span but keep offsets honest.
        let mut end = cut;
        while end > start && chars[end - 1].is_whitespace() {
            end -= 1;
        }
        if end > start {
            let start_byte = byte_at(start);
            let end_byte = byte_at(end);
            spans.push(ChunkSpan {
                index: spans.len(),
                start: start_byte,
                end: end_byte,
                text: text[start_byte..end_byte].to_string(),
            });
        }

        if cut >= total {
            break;
        }
        // Step back by the overlap, but always move forward overall.
        let next = if cut > start + overlap { cut - overlap } else { cut };
        start = skip_whitespace(&chars, next.max(start + 1));
    }

    spans
}

/// Choose where to cut a window that spans `start..limit` characters.
/// `limit` is strictly less than the text length when this is called.
fn pick_cut(chars: &[char], start: usize, limit: usize) -> usize {
    // Paragraph break: a newline immediately followed by another.
    let mut pos = limit.saturating_sub(1);
    while pos > start {
        if chars[pos] == '\n' && pos + 1 < chars.len() && chars[pos + 1] == '\n' {
            return pos;
        }
        pos -= 1;
    }

    // Sentence end: terminal punctuation followed by whitespace.
    let mut pos = limit;
    while pos > start + 1 {
        let before = chars[pos - 1];
        if matches!(before, '.' | '!' | '?') && chars[pos].is_whitespace() {
            return pos;
        }
        pos -= 1;
    }

    // Any whitespace.
    let mut pos = limit.saturating_sub(1);
    while pos > start {
        if chars[pos].is_whitespace() {
            return pos;
        }
        pos -= 1;
    }

    // Hard cut inside an unbroken run.
    limit
}

fn skip_whitespace(chars: &[char], mut pos: usize) -> usize {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    pos
}
