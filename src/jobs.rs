//! Single-slot in-memory registry for background write jobs (add/sync/embed).
//!
//! One job runs at a time: `start_job` fails with [`EngineError::Conflict`]
//! while a job is active. The slot is freed in a `finally`-style guard so
//! a panicking or early-returning task can never leave it stuck, the same
//! guarantee the teacher gets for free from Rust's `Drop` — here made
//! explicit because the slot is an `Option` behind a `tokio::sync::Mutex`,
//! not a scope-bound resource.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::EngineError;

const COMPLETED_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Add,
    Sync,
    Embed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub current: i64,
    pub total: i64,
    pub current_file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: i64,
    pub progress: Option<JobProgress>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub server_instance_id: String,
    #[serde(skip)]
    finished_at: Option<std::time::Instant>,
}

struct Slot {
    record: JobRecord,
}

/// One process-wide instance shared by the CLI, HTTP, and JSON-RPC
/// front-ends via `Arc<JobTracker>`.
pub struct JobTracker {
    slot: Mutex<Option<Slot>>,
    server_instance_id: String,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            server_instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn server_instance_id(&self) -> &str {
        &self.server_instance_id
    }

    /// Start `task` under `job_type`, returning its id. Fails if a job is
    /// already running (TTL-expired completed/failed jobs don't count).
    pub async fn start_job<F, Fut>(
        self: &Arc<Self>,
        job_type: JobType,
        task: F,
    ) -> Result<String, EngineError>
    where
        F: FnOnce(Arc<JobTracker>, String) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, EngineError>> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        {
            let mut guard = self.slot.lock().await;
            if let Some(existing) = guard.as_ref() {
                if existing.record.status == JobStatus::Running {
                    return Err(EngineError::Conflict(format!(
                        "job {} is already running",
                        existing.record.id
                    )));
                }
            }
            *guard = Some(Slot {
                record: JobRecord {
                    id: id.clone(),
                    job_type,
                    status: JobStatus::Running,
                    created_at: chrono::Utc::now().timestamp(),
                    progress: None,
                    result: None,
                    error: None,
                    server_instance_id: self.server_instance_id.clone(),
                    finished_at: None,
                },
            });
        }

        let tracker = Arc::clone(self);
        let job_id = id.clone();
        tokio::spawn(async move {
            let fut = AssertUnwindSafe(task(Arc::clone(&tracker), job_id.clone()));
            let outcome = match fut.catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(EngineError::Runtime(format!(
                    "job panicked: {}",
                    panic_message(&panic)
                ))),
            };
            tracker.finish_job(&job_id, outcome).await;
        });

        Ok(id)
    }

    async fn finish_job(&self, id: &str, outcome: Result<serde_json::Value, EngineError>) {
        let mut guard = self.slot.lock().await;
        if let Some(slot) = guard.as_mut() {
            if slot.record.id == id {
                match outcome {
                    Ok(result) => {
                        slot.record.status = JobStatus::Completed;
                        slot.record.result = Some(result);
                    }
                    Err(e) => {
                        slot.record.status = JobStatus::Failed;
                        slot.record.error = Some(e.to_string());
                    }
                }
                slot.record.finished_at = Some(std::time::Instant::now());
            }
        }
    }

    /// Callable from within a running task to publish progress
    /// (`current` must be non-decreasing per spec; callers own that).
    pub async fn update_job_progress(&self, id: &str, progress: JobProgress) {
        let mut guard = self.slot.lock().await;
        if let Some(slot) = guard.as_mut() {
            if slot.record.id == id {
                slot.record.progress = Some(progress);
            }
        }
    }

    /// Returns the job's record, or `None` if unknown or TTL-expired.
    pub async fn get_job_status(&self, id: &str) -> Option<JobRecord> {
        let mut guard = self.slot.lock().await;
        if let Some(slot) = guard.as_ref() {
            if slot.record.id != id {
                return None;
            }
            if slot.record.status != JobStatus::Running {
                if let Some(finished_at) = slot.record.finished_at {
                    if finished_at.elapsed() > COMPLETED_TTL {
                        *guard = None;
                        return None;
                    }
                }
            }
            return Some(slot.record.clone());
        }
        None
    }

    /// True if a job is currently running (used by front-ends to
    /// short-circuit before even attempting `start_job`).
    pub async fn is_busy(&self) -> bool {
        let guard = self.slot.lock().await;
        matches!(guard.as_ref(), Some(s) if s.record.status == JobStatus::Running)
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_job_while_running_conflicts() {
        let tracker = Arc::new(JobTracker::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let gate2 = Arc::clone(&gate);

        tracker
            .start_job(JobType::Sync, move |_t, _id| async move {
                gate2.notified().await;
                Ok(serde_json::json!({}))
            })
            .await
            .unwrap();

        let err = tracker
            .start_job(JobType::Sync, |_t, _id| async { Ok(serde_json::json!({})) })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        gate.notify_one();
    }

    #[tokio::test]
    async fn job_completes_and_frees_slot() {
        let tracker = Arc::new(JobTracker::new());
        let id = tracker
            .start_job(JobType::Embed, |_t, _id| async { Ok(serde_json::json!({"done": true})) })
            .await
            .unwrap();

        for _ in 0..50 {
            if let Some(rec) = tracker.get_job_status(&id).await {
                if rec.status != JobStatus::Running {
                    assert_eq!(rec.status, JobStatus::Completed);
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never completed");
    }

    #[tokio::test]
    async fn failing_task_frees_slot_with_error() {
        let tracker = Arc::new(JobTracker::new());
        let id = tracker
            .start_job(JobType::Add, |_t, _id| async {
                Err(EngineError::Runtime("boom".into()))
            })
            .await
            .unwrap();

        for _ in 0..50 {
            if let Some(rec) = tracker.get_job_status(&id).await {
                if rec.status != JobStatus::Running {
                    assert_eq!(rec.status, JobStatus::Failed);
                    assert!(rec.error.is_some());
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never finished");
    }

    #[tokio::test]
    async fn panicking_task_frees_slot_instead_of_wedging_it() {
        let tracker = Arc::new(JobTracker::new());
        let id = tracker
            .start_job(JobType::Sync, |_t, _id| async { panic!("boom") })
            .await
            .unwrap();

        for _ in 0..50 {
            if let Some(rec) = tracker.get_job_status(&id).await {
                if rec.status != JobStatus::Running {
                    assert_eq!(rec.status, JobStatus::Failed);
                    assert!(rec.error.as_deref().unwrap_or_default().contains("panicked"));
                    assert!(!tracker.is_busy().await);
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never finished after panicking");
    }

    #[tokio::test]
    async fn unknown_job_id_is_none() {
        let tracker = JobTracker::new();
        assert!(tracker.get_job_status("nonexistent").await.is_none());
    }
}
