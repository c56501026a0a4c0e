//! Ingestion progress reporting.
//!
//! Reports observable progress during `gno update`/`gno sync` so users see
//! what collection is being scanned, how far ingestion has gotten, and
//! which file is current. Progress is emitted on **stderr** so stdout
//! remains parseable for scripts; the same events feed
//! [`crate::jobs::JobTracker::update_job_progress`] when running as a
//! background job.

use std::io::Write;

use crate::jobs::JobProgress;

/// A single progress event for a collection sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Scanning the collection root; total file count not yet known.
    Discovering { collection: String },
    /// Ingest phase: `current` of `total` files processed.
    Ingesting {
        collection: String,
        current: u64,
        total: u64,
        current_file: Option<String>,
    },
}

impl SyncProgressEvent {
    /// Projects this event onto the shape [`crate::jobs::JobTracker`] stores.
    pub fn to_job_progress(&self) -> Option<JobProgress> {
        match self {
            SyncProgressEvent::Discovering { .. } => None,
            SyncProgressEvent::Ingesting {
                current,
                total,
                current_file,
                ..
            } => Some(JobProgress {
                current: *current as i64,
                total: *total as i64,
                current_file: current_file.clone(),
            }),
        }
    }
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync notes  ingesting  1,234 / 5,000 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Discovering { collection } => {
                format!("sync {collection}  discovering...\n")
            }
            SyncProgressEvent::Ingesting {
                collection,
                current,
                total,
                current_file,
            } => {
                let suffix = current_file
                    .as_deref()
                    .map(|f| format!("  ({f})"))
                    .unwrap_or_default();
                format!(
                    "sync {collection}  ingesting  {} / {} files{suffix}\n",
                    format_number(*current),
                    format_number(*total)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Discovering { collection } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "discovering"
            }),
            SyncProgressEvent::Ingesting {
                collection,
                current,
                total,
                current_file,
            } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "ingesting",
                "current": current,
                "total": total,
                "currentFile": current_file,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{line}");
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn discovering_has_no_job_progress() {
        let event = SyncProgressEvent::Discovering { collection: "notes".into() };
        assert!(event.to_job_progress().is_none());
    }

    #[test]
    fn ingesting_maps_to_job_progress() {
        let event = SyncProgressEvent::Ingesting {
            collection: "notes".into(),
            current: 3,
            total: 10,
            current_file: Some("a.md".into()),
        };
        let progress = event.to_job_progress().unwrap();
        assert_eq!(progress.current, 3);
        assert_eq!(progress.total, 10);
        assert_eq!(progress.current_file.as_deref(), Some("a.md"));
    }
}
