use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    store::{job_key, Store, StoreExt, JOBS_KEY},
};

/// Lifecycle of a job: `scheduled -> assigned -> running -> (success | failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Assigned,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    /// Terminal jobs are removed from the pending sorted set.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// One scheduled execution of one command.
///
/// The id is deterministic: `{command_id}_{unix_seconds(scheduled_at)}`.
/// Any two replicas materializing the same occurrence therefore produce the
/// same id, and the sorted set's set-semantics deduplicate on insert. This
/// is what makes re-materialization idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command_id: String,
    pub params: Vec<String>,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Pod id, or empty when unassigned.
    #[serde(default)]
    pub assigned_to: String,
}

impl Job {
    pub fn new(command_id: &str, params: Vec<String>, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Self::id_for(command_id, scheduled_at),
            command_id: command_id.to_string(),
            params,
            status: JobStatus::Scheduled,
            scheduled_at,
            started_at: None,
            finished_at: None,
            error: None,
            assigned_to: String::new(),
        }
    }

    /// Deterministic job id for one occurrence of one command.
    pub fn id_for(command_id: &str, scheduled_at: DateTime<Utc>) -> String {
        format!("{}_{}", command_id, scheduled_at.timestamp())
    }

    /// Recover the scheduled unix time from a job id without reading the
    /// detail record. Returns `None` for ids not produced by [`Job::id_for`].
    pub fn scheduled_secs_from_id(job_id: &str) -> Option<i64> {
        let (_, secs) = job_id.rsplit_once('_')?;
        secs.parse().ok()
    }

    pub fn assign(&mut self, pod_id: &str) {
        self.assigned_to = pod_id.to_string();
        self.status = JobStatus::Assigned;
    }

    pub fn unassign(&mut self) {
        self.assigned_to.clear();
        self.status = JobStatus::Scheduled;
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        self.status = JobStatus::Running;
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
        self.status = JobStatus::Success;
    }

    pub fn fail(&mut self, now: DateTime<Utc>, message: String) {
        self.finished_at = Some(now);
        self.status = JobStatus::Failed;
        self.error = Some(message);
    }

    /// Read a job's detail record. `None` when it has expired or never existed.
    pub async fn load<S: Store>(store: &S, job_id: &str) -> Result<Option<Job>> {
        store.get_json(&job_key(job_id)).await
    }

    /// Enqueue a freshly materialized job: add it to the pending sorted set
    /// and create the detail record if absent. An existing record is left
    /// untouched so assignment and status survive re-materialization.
    /// Returns whether the detail record was created.
    pub async fn save_new<S: Store>(&self, store: &S, record_ttl: Duration) -> Result<bool> {
        store
            .zadd(JOBS_KEY, self.scheduled_at.timestamp() as f64, &self.id)
            .await?;
        let key = job_key(&self.id);
        if store.get(&key).await?.is_some() {
            return Ok(false);
        }
        store.set_json(&key, self, Some(record_ttl)).await?;
        Ok(true)
    }

    /// Persist the current state, removing terminal jobs from the pending set.
    pub async fn update<S: Store>(&self, store: &S, record_ttl: Duration) -> Result<()> {
        store
            .set_json(&job_key(&self.id), self, Some(record_ttl))
            .await?;
        if self.status.is_terminal() {
            store.zrem(JOBS_KEY, &self.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_impls::MemoryStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    const TTL: Duration = Duration::from_secs(24 * 60 * 60);

    // ── identity ──────────────────────────────────────────────────────────────

    #[test]
    fn id_is_command_and_unix_seconds() {
        let job = Job::new("echo", vec![], at(1_700_000_000));
        assert_eq!(job.id, "echo_1700000000");
    }

    #[test]
    fn id_is_a_pure_function_of_command_and_floored_time() {
        let t = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        assert_eq!(Job::id_for("du", t), Job::id_for("du", at(1_700_000_000)));
    }

    #[test]
    fn scheduled_secs_roundtrips_through_the_id() {
        let id = Job::id_for("disk_usage", at(1_700_000_042));
        assert_eq!(Job::scheduled_secs_from_id(&id), Some(1_700_000_042));
        assert_eq!(Job::scheduled_secs_from_id("garbage"), None);
    }

    // ── status machine ────────────────────────────────────────────────────────

    #[test]
    fn assign_then_unassign_restores_scheduled() {
        let mut job = Job::new("echo", vec![], at(1_700_000_000));
        job.assign("pod-a");
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.assigned_to, "pod-a");
        job.unassign();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.assigned_to, "");
    }

    #[test]
    fn fail_records_message_and_finish_time() {
        let mut job = Job::new("echo", vec![], at(1_700_000_000));
        job.start(at(1_700_000_001));
        job.fail(at(1_700_000_002), "boom".to_string());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.finished_at, Some(at(1_700_000_002)));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn serde_roundtrip_yields_equal_job() {
        let mut job = Job::new("ping", vec!["example.com".to_string()], at(1_700_000_000));
        job.assign("pod-a");
        job.start(at(1_700_000_001));
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn optional_fields_are_omitted_until_set() {
        let job = Job::new("echo", vec![], at(1_700_000_000));
        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("started_at"));
        assert!(!json.contains("finished_at"));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"assigned_to\":\"\""));
    }

    // ── persistence ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn save_new_enqueues_and_creates_record() {
        let store = MemoryStore::new();
        let job = Job::new("echo", vec![], at(1_700_000_000));
        assert!(job.save_new(&store, TTL).await.unwrap());
        assert_eq!(
            store.zrange(JOBS_KEY, 0, -1).await.unwrap(),
            vec![job.id.clone()]
        );
        let loaded = Job::load(&store, &job.id).await.unwrap().unwrap();
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn save_new_does_not_clobber_an_assigned_record() {
        let store = MemoryStore::new();
        let mut job = Job::new("echo", vec![], at(1_700_000_000));
        job.save_new(&store, TTL).await.unwrap();
        job.assign("pod-a");
        job.update(&store, TTL).await.unwrap();

        // A later materializer tick re-saves the same occurrence.
        let again = Job::new("echo", vec![], at(1_700_000_000));
        assert!(!again.save_new(&store, TTL).await.unwrap());

        let loaded = Job::load(&store, &job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Assigned);
        assert_eq!(loaded.assigned_to, "pod-a");
    }

    #[tokio::test]
    async fn terminal_update_removes_from_pending_set() {
        let store = MemoryStore::new();
        let mut job = Job::new("echo", vec![], at(1_700_000_000));
        job.save_new(&store, TTL).await.unwrap();
        job.start(at(1_700_000_001));
        job.update(&store, TTL).await.unwrap();
        assert_eq!(store.zrange(JOBS_KEY, 0, -1).await.unwrap().len(), 1);

        job.complete(at(1_700_000_002));
        job.update(&store, TTL).await.unwrap();
        assert!(store.zrange(JOBS_KEY, 0, -1).await.unwrap().is_empty());
        // The detail record survives for later inspection.
        assert!(Job::load(&store, &job.id).await.unwrap().is_some());
    }
}
