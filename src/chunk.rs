//! Paragraph-boundary text chunker.
//!
//! Splits a canonical document body into [`Chunk`]s bounded by a
//! configurable `max_tokens` budget, preserving grapheme-cluster
//! boundaries (via `unicode-segmentation`) and tracking the 1-based
//! line range each chunk spans. Re-running the splitter on identical
//! input always yields byte-identical output.

use unicode_segmentation::UnicodeSegmentation;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` (the canonical body for `mirror_hash`) into chunks with
/// contiguous `seq = 0..N-1`.
pub fn split(mirror_hash: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    if text.trim().is_empty() {
        return vec![make_chunk(mirror_hash, 0, text, 0, line_count(text))];
    }

    let paragraphs = split_paragraphs_with_lines(text);
    let mut chunks = Vec::new();
    let mut seq: i64 = 0;

    let mut buf = String::new();
    let mut buf_start_line: usize = 0;
    let mut buf_end_line: usize = 0;
    let mut buf_pos: usize = 0;

    let flush = |buf: &mut String,
                 buf_start_line: usize,
                 buf_end_line: usize,
                 buf_pos: usize,
                 seq: &mut i64,
                 chunks: &mut Vec<Chunk>| {
        if !buf.trim().is_empty() {
            chunks.push(make_chunk_at(
                mirror_hash,
                *seq,
                buf.trim(),
                buf_pos,
                buf_start_line,
                buf_end_line,
            ));
            *seq += 1;
        }
        buf.clear();
    };

    for para in &paragraphs {
        let trimmed = para.text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.graphemes(true).count()
        } else {
            buf.graphemes(true).count() + 2 + trimmed.graphemes(true).count()
        };

        if would_be > max_chars && !buf.is_empty() {
            flush(
                &mut buf,
                buf_start_line,
                buf_end_line,
                buf_pos,
                &mut seq,
                &mut chunks,
            );
        }

        if trimmed.graphemes(true).count() > max_chars {
            if !buf.is_empty() {
                flush(
                    &mut buf,
                    buf_start_line,
                    buf_end_line,
                    buf_pos,
                    &mut seq,
                    &mut chunks,
                );
            }
            for piece in hard_split(trimmed, max_chars) {
                chunks.push(make_chunk_at(
                    mirror_hash,
                    seq,
                    piece.trim(),
                    para.start_pos,
                    para.start_line,
                    para.end_line,
                ));
                seq += 1;
            }
        } else {
            if buf.is_empty() {
                buf_start_line = para.start_line;
                buf_pos = para.start_pos;
            } else {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
            buf_end_line = para.end_line;
        }
    }

    flush(
        &mut buf,
        buf_start_line,
        buf_end_line,
        buf_pos,
        &mut seq,
        &mut chunks,
    );

    if chunks.is_empty() {
        chunks.push(make_chunk(
            mirror_hash,
            0,
            text.trim(),
            0,
            line_count(text),
        ));
    }

    chunks
}

struct Paragraph<'a> {
    text: &'a str,
    start_pos: usize,
    start_line: usize,
    end_line: usize,
}

/// Split `text` on blank-line boundaries (`\n\n`), tracking each
/// paragraph's byte offset and 1-based start/end line numbers.
fn split_paragraphs_with_lines(text: &str) -> Vec<Paragraph<'_>> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    let mut line = 1usize;

    for part in text.split("\n\n") {
        let start_pos = offset;
        let start_line = line;
        let lines_in_part = part.matches('\n').count();
        let end_line = start_line + lines_in_part;
        out.push(Paragraph {
            text: part,
            start_pos,
            start_line,
            end_line,
        });
        offset += part.len() + 2;
        line = end_line + 2;
    }

    out
}

fn line_count(text: &str) -> usize {
    (text.matches('\n').count() + 1).max(1)
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < graphemes.len() {
        let end = (i + max_chars).min(graphemes.len());
        let mut split_at = end;
        if end < graphemes.len() {
            if let Some(pos) = graphemes[i..end].iter().rposition(|g| *g == "\n") {
                split_at = i + pos + 1;
            } else if let Some(pos) = graphemes[i..end].iter().rposition(|g| *g == " ") {
                split_at = i + pos + 1;
            }
        }
        if split_at <= i {
            split_at = end;
        }
        out.push(graphemes[i..split_at].concat());
        i = split_at;
    }
    out
}

fn make_chunk(
    mirror_hash: &str,
    seq: i64,
    text: &str,
    pos: usize,
    end_line: usize,
) -> Chunk {
    make_chunk_at(mirror_hash, seq, text, pos, 1, end_line)
}

fn make_chunk_at(
    mirror_hash: &str,
    seq: i64,
    text: &str,
    pos: usize,
    start_line: usize,
    end_line: usize,
) -> Chunk {
    Chunk {
        mirror_hash: mirror_hash.to_string(),
        seq,
        pos: pos as i64,
        text: text.to_string(),
        start_line: start_line as i64,
        end_line: end_line as i64,
        language: None,
        token_count: Some((text.graphemes(true).count() / CHARS_PER_TOKEN).max(1) as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_text_single_chunk() {
        let chunks = split("h1", "Hello, world!", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn empty_text_yields_one_chunk() {
        let chunks = split("h1", "", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 0);
    }

    #[test]
    fn multiple_paragraphs_under_limit_stay_together() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = split("h1", text, 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn seq_is_contiguous_from_zero() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = split("h1", &text, 10);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.seq, i as i64, "seq mismatch at position {}", i);
        }
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = split("h1", text, 5);
        let c2 = split("h1", text, 5);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.seq, b.seq);
            assert_eq!(a.start_line, b.start_line);
        }
    }

    #[test]
    fn start_line_is_nondecreasing() {
        let text = "one\n\ntwo\n\nthree\n\nfour\n\nfive";
        let chunks = split("h1", text, 2);
        let mut last = 0i64;
        for c in &chunks {
            assert!(c.start_line >= last);
            last = c.start_line;
        }
    }

    #[test]
    fn grapheme_clusters_are_not_split_mid_cluster() {
        let emoji = "family: \u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        let text = format!("{}\n\n{}", emoji.repeat(1), "padding text".repeat(5));
        let chunks = split("h1", &text, 2);
        for c in &chunks {
            assert!(c.text.graphemes(true).count() > 0 || c.text.is_empty());
        }
    }
}
