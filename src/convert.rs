//! Converts raw source bytes into a canonical body.
//!
//! The only registered converter targets Markdown/plain text: it strips
//! a leading YAML front-matter block (if present), pulls `title` and
//! `tags` out of it, and falls back to the first `# Heading` or the
//! first non-blank line when no front-matter title is given. Binary
//! document formats are out of scope — a local-first Markdown vault is
//! the target corpus.

pub const CONVERTER_ID: &str = "markdown-v1";
pub const CONVERTER_VERSION: &str = "1";

pub struct Converted {
    pub title: Option<String>,
    pub body: String,
    pub language_hint: Option<String>,
    pub tags: Vec<String>,
}

/// Convert raw UTF-8 source text into a canonical body.
pub fn convert(raw: &str) -> Converted {
    let (frontmatter, rest) = split_frontmatter(raw);
    let fm = frontmatter.map(parse_frontmatter).unwrap_or_default();

    let title = fm
        .title
        .or_else(|| first_heading(rest))
        .or_else(|| first_nonblank_line(rest));

    Converted {
        title,
        body: rest.trim().to_string(),
        language_hint: fm.language,
        tags: fm.tags,
    }
}

#[derive(Default)]
struct Frontmatter {
    title: Option<String>,
    language: Option<String>,
    tags: Vec<String>,
}

/// Split a leading `---\n...\n---\n` YAML block off the document, if present.
fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let trimmed = raw.trim_start_matches('\u{feff}');
    let Some(after_open) = trimmed.strip_prefix("---\n") else {
        return (None, raw);
    };
    let Some(close_pos) = after_open.find("\n---") else {
        return (None, raw);
    };
    let fm_block = &after_open[..close_pos];
    let after_close = &after_open[close_pos + 4..];
    let rest = after_close.strip_prefix('\n').unwrap_or(after_close);
    (Some(fm_block), rest)
}

/// A tiny hand-rolled `key: value` / `key:\n  - item` YAML subset parser,
/// sufficient for front-matter — not a general YAML implementation.
fn parse_frontmatter(block: &str) -> Frontmatter {
    let mut fm = Frontmatter::default();
    let mut lines = block.lines().peekable();

    while let Some(line) = lines.next() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "title" => {
                if !value.is_empty() {
                    fm.title = Some(strip_quotes(value).to_string());
                }
            }
            "language" | "lang" => {
                if !value.is_empty() {
                    fm.language = Some(strip_quotes(value).to_string());
                }
            }
            "tags" => {
                if value.starts_with('[') {
                    fm.tags = parse_inline_list(value);
                } else if value.is_empty() {
                    while let Some(next) = lines.peek() {
                        let trimmed = next.trim_start();
                        if let Some(item) = trimmed.strip_prefix("- ") {
                            fm.tags.push(strip_quotes(item.trim()).to_string());
                            lines.next();
                        } else {
                            break;
                        }
                    }
                } else {
                    fm.tags = value
                        .split(',')
                        .map(|s| strip_quotes(s.trim()).to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
            }
            _ => {}
        }
    }

    fm
}

fn parse_inline_list(value: &str) -> Vec<String> {
    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| strip_quotes(s.trim()).to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches('"').trim_matches('\'')
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find(|l| l.trim_start().starts_with("# "))
        .map(|l| l.trim_start().trim_start_matches("# ").trim().to_string())
}

fn first_nonblank_line(body: &str) -> Option<String> {
    body.lines()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .map(|l| l.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_frontmatter_uses_first_heading() {
        let c = convert("# My Title\n\nBody text.");
        assert_eq!(c.title.as_deref(), Some("My Title"));
        assert_eq!(c.body, "# My Title\n\nBody text.");
    }

    #[test]
    fn frontmatter_title_and_tags() {
        let raw = "---\ntitle: Hello World\ntags: [a, b, c]\n---\nBody here.";
        let c = convert(raw);
        assert_eq!(c.title.as_deref(), Some("Hello World"));
        assert_eq!(c.tags, vec!["a", "b", "c"]);
        assert_eq!(c.body, "Body here.");
    }

    #[test]
    fn frontmatter_tags_as_list_block() {
        let raw = "---\ntitle: T\ntags:\n  - one\n  - two\n---\nBody.";
        let c = convert(raw);
        assert_eq!(c.tags, vec!["one", "two"]);
    }

    #[test]
    fn falls_back_to_first_nonblank_line() {
        let c = convert("\n\nJust some prose, no heading.");
        assert_eq!(c.title.as_deref(), Some("Just some prose, no heading."));
    }
}
