mod extract;

use crate::config::{ChunkerConfig, MAX_CHUNK_MULTIPLIER};
use std::sync::LazyLock;

/// Separator preference list for the recursive character splitter, tried in
/// order; `""` falls back to a plain character split and always matches.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Extracts indexable text by file extension, sanitizes it, and splits it
/// into overlapping chunks per `cfg`. Chunks that are empty after trim,
/// contain a NUL byte, or exceed `2 * chunk_size` are dropped.
pub fn chunk_text(content: &str, ext: &str, cfg: &ChunkerConfig) -> Vec<Chunk> {
    let extracted = extract::extract(content, ext, &cfg.exclude_code_languages);
    let sanitized = sanitize(&extracted);
    if sanitized.is_empty() {
        return Vec::new();
    }

    let pieces = split_text(&sanitized, SEPARATORS, cfg.chunk_size);
    let merged = merge_splits(&pieces, cfg.chunk_size, cfg.chunk_overlap);
    let max_len = cfg.chunk_size * MAX_CHUNK_MULTIPLIER;

    merged
        .into_iter()
        .filter_map(|raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.contains('\0') {
                return None;
            }
            if trimmed.chars().count() > max_len {
                tracing::warn!(
                    "dropping oversized chunk ({} chars > {})",
                    trimmed.chars().count(),
                    max_len
                );
                return None;
            }
            let (start_line, end_line) = locate_lines(&sanitized, trimmed);
            Some(Chunk {
                content: trimmed.to_string(),
                start_line,
                end_line,
            })
        })
        .collect()
}

/// Remove NUL bytes, normalize line endings, collapse excess blank lines and
/// horizontal whitespace, and trim.
fn sanitize(text: &str) -> String {
    static RUN_OF_NEWLINES: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"\n{4,}").unwrap());
    static RUN_OF_HSPACE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"[ \t]{2,}").unwrap());

    let no_nul = text.replace('\0', "");
    let normalized = no_nul.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed_newlines = RUN_OF_NEWLINES.replace_all(&normalized, "\n\n\n");
    let collapsed_hspace = RUN_OF_HSPACE.replace_all(&collapsed_newlines, " ");
    collapsed_hspace.trim().to_string()
}

/// Split `text` on the first separator (in order) that occurs in it,
/// retaining the separator at the end of each piece. Pieces still larger
/// than `chunk_size` are recursively split using the remaining separators,
/// bottoming out at a character split (separator `""`, always matches).
fn split_text(text: &str, separators: &[&str], chunk_size: usize) -> Vec<String> {
    let mut chosen_index = separators.len() - 1;
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            chosen_index = i;
            break;
        }
    }
    let separator = separators[chosen_index];
    let remaining = &separators[(chosen_index + 1).min(separators.len())..];

    let pieces = split_keeping_separator(text, separator);

    let mut result = Vec::with_capacity(pieces.len());
    for piece in pieces {
        if piece.chars().count() > chunk_size && !remaining.is_empty() {
            result.extend(split_text(&piece, remaining, chunk_size));
        } else {
            result.push(piece);
        }
    }
    result
}

fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(|c| c.to_string()).collect();
    }
    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some(idx) = rest.find(separator) {
        let split_at = idx + separator.len();
        let (head, tail) = rest.split_at(split_at);
        pieces.push(head.to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Greedily merge splitter pieces into windows of up to `chunk_size`
/// characters, carrying the trailing `chunk_overlap` characters of a
/// completed chunk into the start of the next one.
fn merge_splits(pieces: &[String], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for piece in pieces {
        if !current.is_empty()
            && current.chars().count() + piece.chars().count() > chunk_size
        {
            chunks.push(std::mem::take(&mut current));
            current = take_last_chars(chunks.last().unwrap(), chunk_overlap);
        }
        current.push_str(piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn take_last_chars(text: &str, n: usize) -> String {
    let total = text.chars().count();
    if total <= n {
        return text.to_string();
    }
    text.chars().skip(total - n).collect()
}

/// Locate a chunk's 1-based line range by finding its first occurrence in
/// the source text. Duplicate content resolves to the first occurrence; this
/// is a deliberate simplification, not offset-tracked splitting.
fn locate_lines(original: &str, chunk: &str) -> (usize, usize) {
    let byte_offset = original.find(chunk).unwrap_or(0);
    let start_line = original[..byte_offset].matches('\n').count() + 1;
    let end_line = start_line + chunk.matches('\n').count();
    (start_line, end_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk_size: usize, chunk_overlap: usize) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size,
            chunk_overlap,
            exclude_code_languages: vec![],
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", "txt", &cfg(1000, 200)).is_empty());
    }

    #[test]
    fn small_text_is_a_single_chunk() {
        let chunks = chunk_text("hello world", "txt", &cfg(1000, 200));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "hello world");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn line_ranges_are_one_based_and_ordered() {
        let text = "line1\nline2\nline3\nline4\nline5\nline6\nline7\nline8";
        let chunks = chunk_text(text, "txt", &cfg(15, 5));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.start_line >= 1);
            assert!(c.start_line <= c.end_line);
        }
    }

    #[test]
    fn large_text_splits_into_multiple_overlapping_chunks() {
        let paragraph = "word ".repeat(400); // well over the default chunk size
        let chunks = chunk_text(&paragraph, "txt", &cfg(1000, 200));
        assert!(chunks.len() > 1);
    }

    #[test]
    fn whitespace_only_text_yields_no_chunks() {
        assert!(chunk_text("   \n\n\t  ", "txt", &cfg(1000, 200)).is_empty());
    }

    #[test]
    fn nul_bytes_are_stripped_before_chunking() {
        let text = "hello\0world";
        let chunks = chunk_text(text, "txt", &cfg(1000, 200));
        assert_eq!(chunks.len(), 1);
        assert!(!chunks[0].content.contains('\0'));
    }

    #[test]
    fn markdown_extension_strips_excluded_fenced_blocks() {
        let md = "intro\n```python\nsecret()\n```\noutro";
        let c = ChunkerConfig {
            chunk_size: 1000,
            chunk_overlap: 200,
            exclude_code_languages: vec!["python".to_string()],
        };
        let chunks = chunk_text(md, "md", &c);
        assert!(chunks.iter().all(|c| !c.content.contains("secret()")));
    }
}
