//! Collection file discovery.
//!
//! Walks a collection's root directory, applies its `pattern`/`include`/
//! `exclude` globs (default excludes always layered in), and returns a
//! deterministically ordered list of matching files with filesystem
//! metadata for idempotence gating.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::errors::EngineError;
use crate::models::Collection;

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: i64,
    pub mtime: i64,
}

/// Enumerate files under `collection.path` matching `pattern` and
/// `include`, minus `exclude` (spec §4.6 step 1). `pattern` widens the
/// default `**/*`; `include` narrows further; `exclude` always wins.
pub fn scan_collection(collection: &Collection) -> Result<Vec<ScannedFile>, EngineError> {
    if !collection.path.exists() {
        return Err(EngineError::PathNotFound(format!(
            "collection '{}' root does not exist: {}",
            collection.name,
            collection.path.display()
        )));
    }

    let pattern_set = build_globset(std::slice::from_ref(&collection.pattern))?;
    let include_set = if collection.include.is_empty() {
        None
    } else {
        Some(build_globset(&collection.include)?)
    };
    let exclude_set = build_globset(&collection.exclude)?;

    let mut out = Vec::new();
    for entry in WalkDir::new(&collection.path).follow_links(false) {
        let entry = entry.map_err(|e| EngineError::Runtime(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&collection.path).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !pattern_set.is_match(&rel_str) {
            continue;
        }
        if let Some(ref inc) = include_set {
            if !inc.is_match(&rel_str) {
                continue;
            }
        }

        let metadata = std::fs::metadata(path)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        out.push(ScannedFile {
            rel_path: rel_str,
            abs_path: path.to_path_buf(),
            size: metadata.len() as i64,
            mtime,
        });
    }

    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}

/// Joins `rel_path` onto a collection `root`, rejecting paths that escape
/// the root or enter a short deny-list of sensitive directories. Shared by
/// every write surface that creates files from a caller-supplied path
/// (the HTTP API and the JSON-RPC capture tools).
pub fn safe_join(root: &std::path::Path, rel_path: &str) -> Result<PathBuf, EngineError> {
    let candidate = std::path::Path::new(rel_path);
    if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(EngineError::InvalidPath(format!(
            "rel_path must be relative and may not traverse outside the collection root: {rel_path}"
        )));
    }
    const DENY_LIST: &[&str] = &[".git", ".ssh", ".aws"];
    if candidate.components().any(
        |c| matches!(c, std::path::Component::Normal(part) if DENY_LIST.contains(&part.to_string_lossy().as_ref())),
    ) {
        return Err(EngineError::InvalidPath(format!(
            "rel_path may not enter a reserved directory: {rel_path}"
        )));
    }
    Ok(root.join(candidate))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, EngineError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern).map_err(|e| EngineError::Validation(format!("bad glob '{pattern}': {e}")))?,
        );
    }
    builder
        .build()
        .map_err(|e| EngineError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn collection(path: PathBuf) -> Collection {
        Collection {
            name: "notes".into(),
            path,
            pattern: "**/*".into(),
            include: vec![],
            exclude: vec![
                "**/.git/**".into(),
                "**/node_modules/**".into(),
                "**/target/**".into(),
            ],
            update_cmd: None,
            language_hint: None,
            synced_at: None,
        }
    }

    #[test]
    fn scan_finds_nested_markdown_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.md"), "hello").unwrap();
        fs::write(dir.path().join("sub/b.md"), "world").unwrap();

        let files = scan_collection(&collection(dir.path().to_path_buf())).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "sub/b.md"]);
    }

    #[test]
    fn scan_excludes_git_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(dir.path().join("note.md"), "content").unwrap();

        let files = scan_collection(&collection(dir.path().to_path_buf())).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "note.md");
    }

    #[test]
    fn scan_missing_root_is_path_not_found() {
        let missing = PathBuf::from("/nonexistent/definitely-not-a-real-path");
        let err = scan_collection(&collection(missing)).unwrap_err();
        assert!(matches!(err, EngineError::PathNotFound(_)));
    }
}
