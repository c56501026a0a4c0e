//! Extracts wiki-style and Markdown links out of a canonical document body.
//!
//! Two grammars are recognized:
//! - Wiki: `[[target(#anchor)?(|alias)?]]`, where `target` may carry a path
//!   (`folder/Name.md`) and an optional `collection:` routing prefix
//!   (`other:Note`).
//! - Markdown: `[text](target(#anchor)?)`. Absolute URLs (anything with a
//!   `scheme://`) and `collection:`-style prefixed targets are skipped —
//!   cross-collection routing is a wiki-only feature.
//!
//! Both grammars are scanned with fenced/indented code blocks and inline
//! code spans masked out first, so a link-looking string inside a code
//! sample is never treated as a reference.

use regex::Regex;
use std::sync::OnceLock;

use crate::id::normalize_wiki_name;
use crate::models::{Link, LinkSource, LinkType};

fn wiki_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]|#]+)(?:#([^\[\]|]+))?(?:\|([^\[\]]+))?\]\]").unwrap())
}

fn md_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\[\]]*)\]\(([^)\s]+)\)").unwrap())
}

fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://").unwrap())
}

fn collection_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z0-9][a-z0-9_-]{0,63}):(?!//)(.+)$").unwrap())
}

/// Extract every outgoing link from `body`, as parsed by the document at
/// `doc_dir` (the directory the source file lives in, used to resolve
/// relative Markdown targets).
pub fn extract(body: &str, doc_dir: &str) -> Vec<Link> {
    let masked = mask_code(body);
    let mut links = Vec::new();

    for caps in wiki_re().captures_iter(&masked) {
        let whole = caps.get(0).unwrap();
        let target = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if target.is_empty() {
            continue;
        }
        let anchor = caps.get(2).map(|m| m.as_str().trim().to_lowercase());
        let alias = caps.get(3).map(|m| m.as_str().trim().to_string());

        let (collection, bare_target) = split_collection_prefix(target);

        let (start_line, start_col) = line_col(body, whole.start());
        let (end_line, end_col) = line_col(body, whole.end());

        links.push(Link {
            source_doc_id: 0,
            target_ref: target.to_string(),
            target_ref_norm: normalize_wiki_name(bare_target),
            target_anchor: anchor,
            target_collection: collection,
            link_type: LinkType::Wiki,
            link_text: alias,
            start_line,
            start_col,
            end_line,
            end_col,
            source: LinkSource::Parsed,
        });
    }

    for caps in md_re().captures_iter(&masked) {
        let whole = caps.get(0).unwrap();
        let text = caps.get(1).map(|m| m.as_str().to_string());
        let raw_target = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if raw_target.is_empty() {
            continue;
        }
        if scheme_re().is_match(raw_target) {
            continue;
        }
        if collection_prefix_re().is_match(raw_target) {
            continue;
        }

        let (target, anchor) = match raw_target.split_once('#') {
            Some((t, a)) => (t, Some(a.to_lowercase())),
            None => (raw_target, None),
        };

        let resolved = resolve_relative(doc_dir, target);
        let normalized = normalize_md_path(&resolved);

        let (start_line, start_col) = line_col(body, whole.start());
        let (end_line, end_col) = line_col(body, whole.end());

        links.push(Link {
            source_doc_id: 0,
            target_ref: raw_target.to_string(),
            target_ref_norm: normalized,
            target_anchor: anchor,
            target_collection: None,
            link_type: LinkType::Markdown,
            link_text: text,
            start_line,
            start_col,
            end_line,
            end_col,
            source: LinkSource::Parsed,
        });
    }

    links.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(a.start_col.cmp(&b.start_col))
    });
    links
}

fn split_collection_prefix(target: &str) -> (Option<String>, &str) {
    if let Some(caps) = collection_prefix_re().captures(target) {
        let collection = caps.get(1).unwrap().as_str().to_string();
        let rest = caps.get(2).unwrap().as_str();
        (Some(collection), rest)
    } else {
        (None, target)
    }
}

fn resolve_relative(doc_dir: &str, target: &str) -> String {
    if target.starts_with('/') {
        return target.trim_start_matches('/').to_string();
    }
    if doc_dir.is_empty() || doc_dir == "." {
        return target.to_string();
    }
    format!("{doc_dir}/{target}")
}

/// Normalize a resolved relative-path Markdown target: strip `./`
/// segments, collapse `..`, and case-fold for matching.
fn normalize_md_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Replace the interior of fenced code blocks (``` or ~~~), indented code
/// blocks, and inline code spans with spaces, preserving line/col offsets
/// so span computation on the original text stays correct.
fn mask_code(body: &str) -> String {
    let mut out: Vec<char> = body.chars().collect();
    let len = out.len();

    // Fenced blocks: ``` or ~~~ at start of a line, closed by a matching fence.
    let fence_re = {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"(?m)^(```|~~~)").unwrap())
    };
    let mut fence_starts: Vec<(usize, &str)> = fence_re
        .find_iter(body)
        .map(|m| (m.start(), &body[m.start()..m.end()]))
        .collect();

    let mut i = 0;
    while i + 1 < fence_starts.len() {
        let (start, marker) = fence_starts[i];
        let (end_start, end_marker) = fence_starts[i + 1];
        if marker == end_marker {
            let line_end = body[end_start..]
                .find('\n')
                .map(|p| end_start + p)
                .unwrap_or(len);
            for c in out.iter_mut().take(line_end.min(len)).skip(start) {
                if *c != '\n' {
                    *c = ' ';
                }
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    // Inline code spans: `...`
    let inline_re = {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"`[^`\n]+`").unwrap())
    };
    for m in inline_re.find_iter(body) {
        for c in out.iter_mut().take(m.end()).skip(m.start()) {
            if *c != '\n' {
                *c = ' ';
            }
        }
    }

    out.into_iter().collect()
}

/// Convert a byte offset into 1-based (line, col).
fn line_col(text: &str, byte_offset: usize) -> (i64, i64) {
    let mut line = 1i64;
    let mut col = 1i64;
    for (i, c) in text.char_indices() {
        if i >= byte_offset {
            break;
        }
        if c == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiki_extraction_two_links() {
        let body = "See [[Meeting Notes]] and [[Project Plan]].";
        let links = extract(body, "");
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.link_type == LinkType::Wiki));
        let refs: Vec<&str> = links.iter().map(|l| l.target_ref.as_str()).collect();
        assert!(refs.contains(&"Meeting Notes"));
        assert!(refs.contains(&"Project Plan"));
    }

    #[test]
    fn code_fence_exclusion() {
        let body = "```\n[[Wiki Syntax]]\n```\n\nBody has [[Real Link]] here.";
        let links = extract(body, "");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_ref, "Real Link");
    }

    #[test]
    fn inline_code_span_exclusion() {
        let body = "Use `[[Not A Link]]` in prose, but [[Actual Link]] works.";
        let links = extract(body, "");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_ref, "Actual Link");
    }

    #[test]
    fn wiki_alias_and_anchor() {
        let body = "[[Target Note#section|display text]]";
        let links = extract(body, "");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_anchor.as_deref(), Some("section"));
        assert_eq!(links[0].link_text.as_deref(), Some("display text"));
    }

    #[test]
    fn wiki_collection_prefix() {
        let body = "[[other:Shared Note]]";
        let links = extract(body, "");
        assert_eq!(links[0].target_collection.as_deref(), Some("other"));
        assert_eq!(links[0].target_ref_norm, "shared note");
    }

    #[test]
    fn markdown_link_skips_absolute_url() {
        let body = "[external](https://example.com/page) and [local](./note.md)";
        let links = extract(body, "docs");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_ref_norm, "docs/note.md");
    }

    #[test]
    fn markdown_relative_path_collapses_dotdot() {
        let body = "[up](../sibling/file.md)";
        let links = extract(body, "a/b");
        assert_eq!(links[0].target_ref_norm, "a/sibling/file.md");
    }

    #[test]
    fn links_sorted_by_span() {
        let body = "[[B]] then [[A]]";
        let links = extract(body, "");
        assert_eq!(links[0].target_ref, "B");
        assert_eq!(links[1].target_ref, "A");
    }
}
