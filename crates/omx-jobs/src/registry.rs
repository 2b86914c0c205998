//! In-memory job table and lifecycle state machine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{JobError, JobFailure, JobResult};

/// Lifecycle state for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Returns the stable snake_case wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns true when no further transition happens without a resubmission.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true while an orchestration task owns the job id.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Returns true when this state can move to `next`. States only move forward.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    fn ensure_transition(self, id: &str, next: Self) -> JobResult<()> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(JobError::InvalidTransition {
            id: id.to_string(),
            from: self,
            to: next,
        })
    }
}

/// Tracked state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JobFailure>,
    #[serde(default)]
    pub diagnostics: Option<String>,
}

impl JobRecord {
    /// Creates a record in the pending state.
    pub fn pending(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
            diagnostics: None,
        }
    }

    /// Creates a terminal completed record, as reconstructed from disk.
    pub fn completed_at(id: impl Into<String>, result: Value, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            state: JobState::Completed,
            created_at: at,
            updated_at: at,
            result: Some(result),
            error: None,
            diagnostics: None,
        }
    }
}

/// Observable handle on a spawned orchestration task.
#[derive(Debug)]
pub struct JobHandle {
    id: String,
    join: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits until the orchestration task exits.
    pub async fn wait(self) -> JobResult<()> {
        self.join.await.map_err(|error| {
            JobError::Storage(format!(
                "orchestration task for '{}' aborted: {error}",
                self.id
            ))
        })
    }
}

/// Pending record plus the handle of the task that will drive it.
#[derive(Debug)]
pub struct SubmittedJob {
    pub record: JobRecord,
    pub handle: JobHandle,
}

/// Registry of job records keyed by job id.
///
/// Every mutation runs under one lock with no await point held, so readers
/// never observe a partially updated record.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    records: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending job and spawns `work` as an independent task.
    ///
    /// Fails with `Conflict` while a record for `id` is pending or running;
    /// the existing record is left untouched in that case.
    pub fn submit<F>(&self, id: &str, work: F) -> JobResult<SubmittedJob>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|error| {
            JobError::Storage(format!("no async runtime available to run '{id}': {error}"))
        })?;

        let record = {
            let mut records = lock_unpoisoned(&self.records);
            if let Some(existing) = records.get(id) {
                if existing.state.is_active() {
                    return Err(JobError::Conflict(id.to_string()));
                }
            }
            let record = JobRecord::pending(id);
            records.insert(id.to_string(), record.clone());
            record
        };
        info!(job_id = id, "job submitted");

        let join = runtime.spawn(work);
        Ok(SubmittedJob {
            record,
            handle: JobHandle {
                id: id.to_string(),
                join,
            },
        })
    }

    /// Pending -> Running.
    pub fn mark_running(&self, id: &str) -> JobResult<JobRecord> {
        self.transition(id, JobState::Running, |_| {})
    }

    /// Running -> Completed, storing the engine result.
    pub fn complete(
        &self,
        id: &str,
        result: Value,
        diagnostics: Option<String>,
    ) -> JobResult<JobRecord> {
        self.transition(id, JobState::Completed, move |record| {
            record.result = Some(result);
            record.error = None;
            record.diagnostics = diagnostics;
        })
    }

    /// Pending|Running -> Failed, storing the classified error.
    pub fn fail(
        &self,
        id: &str,
        failure: JobFailure,
        diagnostics: Option<String>,
    ) -> JobResult<JobRecord> {
        self.transition(id, JobState::Failed, move |record| {
            record.result = None;
            record.error = Some(failure);
            if diagnostics.is_some() {
                record.diagnostics = diagnostics;
            }
        })
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        lock_unpoisoned(&self.records).get(id).cloned()
    }

    /// Number of records, terminal ones included.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pending or running jobs.
    pub fn active_count(&self) -> usize {
        lock_unpoisoned(&self.records)
            .values()
            .filter(|record| record.state.is_active())
            .count()
    }

    fn transition<F>(&self, id: &str, next: JobState, apply: F) -> JobResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut records = lock_unpoisoned(&self.records);
        let record = records
            .get_mut(id)
            .ok_or_else(|| JobError::UnknownJob(id.to_string()))?;
        let previous = record.state;
        previous.ensure_transition(id, next)?;
        record.state = next;
        record.updated_at = Utc::now();
        apply(record);
        debug!(
            job_id = id,
            from = previous.as_str(),
            to = next.as_str(),
            "job transition"
        );
        Ok(record.clone())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::{JobRegistry, JobState};
    use crate::error::{JobError, JobErrorKind, JobFailure};
    use serde_json::json;
    use tokio::sync::oneshot;

    fn failure(kind: JobErrorKind) -> JobFailure {
        JobFailure {
            kind,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn unit_state_machine_only_moves_forward() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Running));
        assert!(!JobState::Failed.can_transition_to(JobState::Pending));
        assert!(!JobState::Running.can_transition_to(JobState::Pending));
    }

    #[tokio::test]
    async fn functional_submit_returns_pending_and_runs_work_independently() {
        let registry = JobRegistry::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let worker_registry = registry.clone();
        let submitted = registry
            .submit("U1_S1", async move {
                worker_registry.mark_running("U1_S1").expect("mark running");
                let _ = release_rx.await;
                worker_registry
                    .complete("U1_S1", json!({"success": true}), None)
                    .expect("complete");
            })
            .expect("submit");
        assert_eq!(submitted.record.state, JobState::Pending);
        assert_eq!(submitted.handle.id(), "U1_S1");

        release_tx.send(()).expect("release worker");
        submitted.handle.wait().await.expect("task exits");
        let record = registry.get("U1_S1").expect("record");
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.result, Some(json!({"success": true})));
        assert!(record.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn regression_submit_conflicts_while_active_and_keeps_existing_record() {
        let registry = JobRegistry::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let submitted = registry
            .submit("U1_S1", async move {
                let _ = release_rx.await;
            })
            .expect("first submit");
        registry.mark_running("U1_S1").expect("mark running");
        let before = registry.get("U1_S1").expect("record");

        let error = registry
            .submit("U1_S1", async {})
            .expect_err("second submit must conflict");
        assert_eq!(error, JobError::Conflict("U1_S1".to_string()));
        assert_eq!(registry.get("U1_S1").expect("record"), before);

        release_tx.send(()).expect("release");
        submitted.handle.wait().await.expect("wait");
    }

    #[tokio::test]
    async fn functional_resubmit_after_terminal_state_replaces_record() {
        let registry = JobRegistry::new();
        let first = registry.submit("U1_S1", async {}).expect("submit");
        first.handle.wait().await.expect("wait");
        registry
            .fail("U1_S1", failure(JobErrorKind::ProcessFailure), None)
            .expect("fail from pending");
        assert_eq!(registry.get("U1_S1").expect("record").state, JobState::Failed);

        let second = registry.submit("U1_S1", async {}).expect("resubmit");
        second.handle.wait().await.expect("wait");
        let record = registry.get("U1_S1").expect("record");
        assert_eq!(record.state, JobState::Pending);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn regression_terminal_records_reject_further_transitions() {
        let registry = JobRegistry::new();
        let submitted = registry.submit("A_B", async {}).expect("submit");
        submitted.handle.wait().await.expect("wait");
        registry.mark_running("A_B").expect("running");
        registry
            .complete("A_B", json!({"success": true}), Some("note".to_string()))
            .expect("complete");

        let error = registry
            .fail("A_B", failure(JobErrorKind::StorageError), None)
            .expect_err("completed job cannot fail");
        assert!(matches!(
            error,
            JobError::InvalidTransition {
                from: JobState::Completed,
                to: JobState::Failed,
                ..
            }
        ));
        let record = registry.get("A_B").expect("record");
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.diagnostics.as_deref(), Some("note"));

        assert_eq!(
            registry.mark_running("missing"),
            Err(JobError::UnknownJob("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn unit_active_count_tracks_non_terminal_records() {
        let registry = JobRegistry::new();
        registry.submit("A_1", async {}).expect("submit a");
        registry.submit("B_1", async {}).expect("submit b");
        registry.mark_running("B_1").expect("running");
        registry
            .complete("B_1", json!({}), None)
            .expect("complete");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_count(), 1);
    }
}
