//! Section-aware sliding-window chunker and per-job deduper.
//!
//! Splits normalized document text into [`DocumentChunk`]s of at most
//! `size` characters, with `overlap` characters shared between consecutive
//! windows of the same section.
//!
//! # Algorithm
//!
//! 1. Split the text into sections at markdown headings (`# ...` through
//!    `###### ...`, up to three leading spaces). A heading line starts its
//!    section; text before the first heading forms its own section.
//! 2. Slide a window of `size` characters over each section. When the
//!    window does not reach the end of the section, its end is pulled back
//!    to the last whitespace found in the final fifth of the window, so
//!    words are not cut in half.
//! 3. The next window starts `overlap` characters before the previous end.
//!    The window that reaches the end of the section is the last one.
//! 4. Whitespace-only windows are skipped; ordinals are contiguous across
//!    the whole file.
//!
//! Sizes are measured in characters (Unicode scalar values), so multi-byte
//! text never splits inside a code point.
//!
//! Each chunk's id is a UUID v5 over `"<source>#<ordinal>"`, so chunking
//! unchanged input yields the same ids on every run.
//!
//! # Example
//!
//! ```rust
//! use vector_ingest_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("notes/a.md", "# Title\n\nSome body text.", 512, 64);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use std::collections::{BTreeMap, HashSet};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::DocumentChunk;

/// Split `text` from `source` into overlapping windows.
///
/// `size` must be greater than `overlap`; callers validate this through
/// [`IngestOptions::validate`](crate::models::IngestOptions::validate).
/// A `size` of zero is treated as one.
pub fn chunk_text(source: &str, text: &str, size: usize, overlap: usize) -> Vec<DocumentChunk> {
    let size = size.max(1);
    let overlap = overlap.min(size - 1);
    let (filename, ext) = file_parts(source);

    let mut chunks = Vec::new();
    let mut ordinal: u32 = 0;

    for (section_idx, section) in split_sections(text).into_iter().enumerate() {
        let chars: Vec<char> = section.chars().collect();
        for (start, end) in windows(&chars, size, overlap) {
            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut meta = BTreeMap::new();
            meta.insert("filename".to_string(), filename.clone());
            if !ext.is_empty() {
                meta.insert("ext".to_string(), ext.clone());
            }
            meta.insert("section".to_string(), section_idx.to_string());
            if let Some(page) = find_page_marker(trimmed) {
                meta.insert("page".to_string(), page);
            }

            chunks.push(DocumentChunk {
                id: stable_chunk_id(source, ordinal),
                source: source.to_string(),
                ordinal,
                text: trimmed.to_string(),
                lang: None,
                fingerprint: fingerprint(trimmed),
                meta,
            });
            ordinal += 1;
        }
    }

    chunks
}

/// Deterministic chunk id from source identity and ordinal.
pub fn stable_chunk_id(source: &str, ordinal: u32) -> String {
    let name = format!("{}#{}", source, ordinal);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// SHA-256 over the lowercased text with whitespace runs collapsed.
pub fn fingerprint(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `(start, end)` character ranges of each window over one section.
fn windows(chars: &[char], size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut out = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + size).min(len);
        if end < len {
            // Snap back to whitespace, but keep the window longer than the overlap
            // so the next start still moves forward.
            let lo = start + (size * 4 / 5).max(overlap + 1);
            if lo < end {
                if let Some(pos) = chars[lo..end].iter().rposition(|c| c.is_whitespace()) {
                    end = lo + pos;
                }
            }
        }
        out.push((start, end));
        if end >= len {
            break;
        }
        start = end - overlap;
    }

    out
}

fn is_heading(line: &str) -> bool {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return false;
    }
    let rest = &line[indent..];
    let hashes = rest.len() - rest.trim_start_matches('#').len();
    if !(1..=6).contains(&hashes) {
        return false;
    }
    let after = &rest[hashes..];
    after.starts_with(' ') || after.starts_with('\t')
}

/// Splits text into trimmed, non-empty sections starting at headings.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if is_heading(line) && !current.trim().is_empty() {
            sections.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }

    sections
}

/// Finds a `Page N` marker (case-insensitive) and returns `N`.
fn find_page_marker(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let mut search_from = 0;
    while let Some(pos) = lower[search_from..].find("page") {
        let at = search_from + pos;
        search_from = at + 4;
        let boundary_before = lower[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        if !boundary_before {
            continue;
        }
        let rest = &lower[at + 4..];
        let digits_start = rest.len() - rest.trim_start().len();
        if digits_start == 0 {
            continue;
        }
        let digits: String = rest[digits_start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            return Some(digits);
        }
    }
    None
}

fn file_parts(source: &str) -> (String, String) {
    let filename = source.rsplit('/').next().unwrap_or(source).to_string();
    let ext = match filename.rfind('.') {
        Some(i) if i > 0 => filename[i..].to_lowercase(),
        _ => String::new(),
    };
    (filename, ext)
}

/// Per-job chunk admission: drops undersized chunks and repeated content.
#[derive(Debug, Default)]
pub struct ChunkFilter {
    dedupe: bool,
    min_chars: usize,
    seen: HashSet<String>,
    deduped: usize,
    filtered: usize,
}

impl ChunkFilter {
    pub fn new(dedupe: bool, min_chars: usize) -> Self {
        Self {
            dedupe,
            min_chars,
            ..Default::default()
        }
    }

    /// Returns `true` when the chunk should be kept.
    pub fn admit(&mut self, chunk: &DocumentChunk) -> bool {
        if chunk.text.chars().count() < self.min_chars {
            self.filtered += 1;
            return false;
        }
        if self.dedupe && !self.seen.insert(chunk.fingerprint.clone()) {
            self.deduped += 1;
            return false;
        }
        true
    }

    /// Chunks dropped as duplicates so far.
    pub fn deduped(&self) -> usize {
        self.deduped
    }

    /// Chunks dropped for being shorter than `min_chars` so far.
    pub fn filtered(&self) -> usize {
        self.filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[DocumentChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("a.txt", "", 100, 10).is_empty());
        assert!(chunk_text("a.txt", "  \n\t\n ", 100, 10).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("a.txt", "Hello world.", 512, 64);
        assert_eq!(texts(&chunks), vec!["Hello world."]);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].meta["filename"], "a.txt");
        assert_eq!(chunks[0].meta["ext"], ".txt");
    }

    #[test]
    fn windows_overlap_and_last_may_be_short() {
        let text: String = "abcdefghij".repeat(3); // 30 chars, no whitespace
        let chunks = chunk_text("a.txt", &text, 12, 4);
        let got = texts(&chunks);
        assert_eq!(got[0], &text[0..12]);
        assert_eq!(got[1], &text[8..20]);
        assert_eq!(got[2], &text[16..28]);
        assert_eq!(got[3], &text[24..30]);
        assert_eq!(got.len(), 4);
        for pair in got.windows(2) {
            assert_eq!(&pair[0][pair[0].len() - 4..], &pair[1][..4]);
        }
    }

    #[test]
    fn window_reaching_the_end_terminates_with_overlap() {
        let text = "x".repeat(20);
        let chunks = chunk_text("a.txt", &text, 10, 5);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text.len(), 10);
    }

    #[test]
    fn windows_never_exceed_size() {
        let text = "lorem ipsum dolor sit amet ".repeat(200);
        for chunk in chunk_text("a.txt", &text, 64, 16) {
            assert!(chunk.text.chars().count() <= 64);
            assert!(!chunk.text.is_empty());
        }
    }

    #[test]
    fn window_end_snaps_to_whitespace() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunk_text("a.txt", text, 20, 0);
        assert_eq!(chunks[0].text, "alpha beta gamma");
        assert_eq!(chunks[1].text, "delta epsilon zeta");
    }

    #[test]
    fn headings_start_new_sections() {
        let text = "intro line\n# First\nbody one\n## Second\nbody two";
        let chunks = chunk_text("doc.md", text, 512, 0);
        assert_eq!(
            texts(&chunks),
            vec!["intro line", "# First\nbody one", "## Second\nbody two"]
        );
        assert_eq!(chunks[2].meta["section"], "2");
        let ordinals: Vec<u32> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn hashtag_without_space_is_not_a_heading() {
        let text = "#tag is inline\nmore text";
        assert_eq!(chunk_text("a.md", text, 512, 0).len(), 1);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "Paragraph one is here.\n\n# Section\n".repeat(40);
        let a = chunk_text("docs/x.md", &text, 100, 20);
        let b = chunk_text("docs/x.md", &text, 100, 20);
        assert_eq!(a, b);
        let ids: HashSet<_> = a.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), a.len());
    }

    #[test]
    fn ids_depend_on_source_and_ordinal() {
        assert_eq!(stable_chunk_id("a.txt", 0), stable_chunk_id("a.txt", 0));
        assert_ne!(stable_chunk_id("a.txt", 0), stable_chunk_id("a.txt", 1));
        assert_ne!(stable_chunk_id("a.txt", 0), stable_chunk_id("b.txt", 0));
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "héllo wörld ".repeat(30);
        let chunks = chunk_text("a.txt", &text, 25, 5);
        assert!(chunks.len() > 1);
        for chunk in chunks {
            assert!(chunk.text.chars().count() <= 25);
        }
    }

    #[test]
    fn page_marker_is_recorded() {
        let chunks = chunk_text("a.pdf", "Report\nPage 12\nnumbers", 512, 0);
        assert_eq!(chunks[0].meta.get("page").map(String::as_str), Some("12"));
        let chunks = chunk_text("a.pdf", "homepage 3 is not a marker", 512, 0);
        assert!(!chunks[0].meta.contains_key("page"));
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        assert_eq!(fingerprint("Hello   World"), fingerprint("hello world\n"));
        assert_ne!(fingerprint("hello world"), fingerprint("hello there"));
    }

    #[test]
    fn filter_drops_duplicates_and_tiny_chunks() {
        let mut chunks = chunk_text("a.txt", "The same sentence here.", 512, 0);
        chunks.extend(chunk_text("b.txt", "the SAME sentence   here.", 512, 0));
        chunks.extend(chunk_text("c.txt", "tiny", 512, 0));
        let mut filter = ChunkFilter::new(true, 12);
        let kept: Vec<_> = chunks.iter().filter(|c| filter.admit(c)).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source, "a.txt");
        assert_eq!(filter.deduped(), 1);
        assert_eq!(filter.filtered(), 1);
    }

    #[test]
    fn filter_keeps_duplicates_when_dedupe_is_off() {
        let mut chunks = chunk_text("a.txt", "The same sentence here.", 512, 0);
        chunks.extend(chunk_text("b.txt", "The same sentence here.", 512, 0));
        let mut filter = ChunkFilter::new(false, 0);
        assert_eq!(chunks.iter().filter(|c| filter.admit(c)).count(), 2);
        assert_eq!(filter.deduped(), 0);
    }
}
