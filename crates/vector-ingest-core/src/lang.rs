//! Language tagging for chunks.

use crate::models::DocumentChunk;

/// Tag used when detection is inconclusive.
pub const UNDETERMINED: &str = "und";

/// Only the head of long texts is inspected.
const MAX_DETECT_CHARS: usize = 10_000;

/// Detects the ISO 639-3 language code of `text`, or [`UNDETERMINED`].
pub fn detect_language(text: &str) -> &'static str {
    let head = match text.char_indices().nth(MAX_DETECT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    };
    match whatlang::detect(head) {
        Some(info) if info.is_reliable() => info.lang().code(),
        _ => UNDETERMINED,
    }
}

/// Sets `lang` on every chunk.
pub fn tag_chunks(chunks: &mut [DocumentChunk]) {
    for chunk in chunks {
        chunk.lang = Some(detect_language(&chunk.text).to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;

    #[test]
    fn english_prose_is_detected() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    This sentence is written in plain English so that the \
                    detector has enough material to work with reliably.";
        assert_eq!(detect_language(text), "eng");
    }

    #[test]
    fn noise_degrades_to_undetermined() {
        assert_eq!(detect_language(""), UNDETERMINED);
        assert_eq!(detect_language("1234 5678 !!!"), UNDETERMINED);
    }

    #[test]
    fn every_chunk_gets_a_tag() {
        let mut chunks = chunk_text("a.txt", "0000 1111\n# Heading\nsome words", 512, 0);
        tag_chunks(&mut chunks);
        assert!(chunks.iter().all(|c| c.lang.is_some()));
    }
}
