//! Stable document identifiers and URIs.
//!
//! A `docid` is a short, content-derived handle (`#` + first 8 hex chars of
//! `sourceHash`) used in CLI output and API responses. A `uri` is the
//! canonical `gno://<collection>/<url-encoded-relpath>` address used for
//! link resolution. Both are derived, never stored independently of the
//! document row that produced them.

use sha2::{Digest, Sha256};

/// Compute the content hash of raw file bytes, hex-encoded.
pub fn source_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Derive a docid from a sourceHash: `#` followed by its first 8 hex chars.
pub fn docid(source_hash: &str) -> String {
    let prefix: String = source_hash.chars().take(8).collect();
    format!("#{prefix}")
}

/// True if `s` looks like a docid (`#` followed by 8 lowercase hex chars).
pub fn is_docid(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('#') else {
        return false;
    };
    rest.len() == 8 && rest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Build the canonical `gno://<collection>/<url-encoded-relpath>` URI.
pub fn build_uri(collection: &str, rel_path: &str) -> String {
    let encoded = rel_path
        .split('/')
        .map(|seg| urlencode_segment(seg))
        .collect::<Vec<_>>()
        .join("/");
    format!("gno://{collection}/{encoded}")
}

/// Parse a `gno://collection/rel/path` URI back into `(collection, rel_path)`.
/// Returns `None` if the scheme or shape doesn't match.
pub fn parse_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.strip_prefix("gno://")?;
    let (collection, path) = rest.split_once('/')?;
    if collection.is_empty() {
        return None;
    }
    let decoded = path
        .split('/')
        .map(urldecode_segment)
        .collect::<Vec<_>>()
        .join("/");
    Some((collection.to_string(), decoded))
}

fn urlencode_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for b in seg.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn urldecode_segment(seg: &str) -> String {
    let bytes = seg.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&seg[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Strip a trailing `.md`/`.markdown` extension from a wiki-link target,
/// since wiki links conventionally omit it.
pub fn strip_wiki_md_ext(target: &str) -> &str {
    target
        .strip_suffix(".markdown")
        .or_else(|| target.strip_suffix(".md"))
        .unwrap_or(target)
}

/// Normalize a wiki-link name for matching: lowercase, strip a markdown
/// extension, collapse whitespace/underscores/dashes to a single space,
/// trim. Used so `[[My Note]]`, `[[my-note]]`, and `[[my_note.md]]` all
/// resolve to the same candidate key.
pub fn normalize_wiki_name(name: &str) -> String {
    let stripped = strip_wiki_md_ext(name.trim());
    let mut out = String::with_capacity(stripped.len());
    let mut last_was_space = false;
    for c in stripped.chars() {
        let c = c.to_ascii_lowercase();
        if c == '_' || c == '-' || c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docid_is_first_8_hex_with_hash_prefix() {
        let h = source_hash(b"hello world");
        let id = docid(&h);
        assert_eq!(id.len(), 9);
        assert!(id.starts_with('#'));
        assert_eq!(&id[1..], &h[..8]);
        assert!(is_docid(&id));
    }

    #[test]
    fn uri_round_trips() {
        let uri = build_uri("notes", "folder a/My Note.md");
        let (collection, rel) = parse_uri(&uri).unwrap();
        assert_eq!(collection, "notes");
        assert_eq!(rel, "folder a/My Note.md");
    }

    #[test]
    fn parse_uri_rejects_bad_scheme() {
        assert!(parse_uri("http://notes/a.md").is_none());
        assert!(parse_uri("gno://").is_none());
    }

    #[test]
    fn normalize_wiki_name_collapses_separators() {
        assert_eq!(normalize_wiki_name("My Note"), "my note");
        assert_eq!(normalize_wiki_name("my-note"), "my note");
        assert_eq!(normalize_wiki_name("my_note.md"), "my note");
        assert_eq!(normalize_wiki_name("  Spaced   Out  "), "spaced out");
    }

    #[test]
    fn strip_wiki_md_ext_only_strips_known_suffixes() {
        assert_eq!(strip_wiki_md_ext("note.md"), "note");
        assert_eq!(strip_wiki_md_ext("note.markdown"), "note");
        assert_eq!(strip_wiki_md_ext("note.txt"), "note.txt");
    }
}
