use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    command::CommandRegistry,
    config::Config,
    error::{Error, Result},
    job::{Job, JobStatus},
    store::{job_lock_key, Store, JOBS_KEY},
};

/// Claims and runs the jobs assigned to the local pod.
///
/// The per-job `SETNX` lock is acquired *before* the assignment check. That
/// closes the race where the assigner moves the job between this pod's read
/// and its lock attempt, at the cost of occasionally locking a job only to
/// discover it belongs to someone else and releasing without work.
///
/// The lock TTL bounds the duplicate-execution window: a job whose executor
/// died holding the lock becomes claimable again once the TTL lapses, and a
/// later assignee may re-run it.
pub struct Executor<S> {
    store: S,
    registry: Arc<CommandRegistry>,
    pod_id: String,
    lock_ttl: Duration,
    record_ttl: Duration,
}

impl<S: Store> Executor<S> {
    pub fn new(store: S, registry: Arc<CommandRegistry>, pod_id: String, config: &Config) -> Self {
        Self {
            store,
            registry,
            pod_id,
            lock_ttl: config.lock_ttl,
            record_ttl: config.job_record_ttl,
        }
    }

    /// One pass over the pending set in schedule order, executing every due
    /// job assigned to this pod. Returns how many jobs ran to a terminal
    /// state.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let ids = self.store.zrange(JOBS_KEY, 0, -1).await?;

        let mut executed = 0usize;
        for id in ids {
            // Ids embed the scheduled second, so jobs staged in the future
            // can be skipped without touching their lock.
            if Job::scheduled_secs_from_id(&id).is_some_and(|secs| secs > now.timestamp()) {
                continue;
            }

            let lock = job_lock_key(&id);
            if !self
                .store
                .set_nx(&lock, self.pod_id.clone(), self.lock_ttl)
                .await?
            {
                // Another pod holds the execution lock.
                continue;
            }

            match self.claim(&id, now).await {
                Ok(Some(job)) => {
                    self.run_job(job).await;
                    executed += 1;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(job_id = %id, error = %e, "claim failed"),
            }

            if let Err(e) = self.store.del(&lock).await {
                tracing::warn!(job_id = %id, error = %e, "failed to release execution lock");
            }
        }

        Ok(executed)
    }

    /// Post-lock validation. Only the current assignee holding a fresh lock
    /// may proceed, and never for a job that is already running or done:
    /// even a split-brain leader that double-assigns cannot make a job
    /// execute twice.
    async fn claim(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let Some(job) = Job::load(&self.store, id).await? else {
            tracing::warn!(job_id = %id, "pending job has no readable record");
            return Ok(None);
        };
        if job.scheduled_at > now {
            return Ok(None);
        }
        if job.assigned_to != self.pod_id {
            return Ok(None);
        }
        if matches!(job.status, JobStatus::Running | JobStatus::Success) {
            return Ok(None);
        }
        Ok(Some(job))
    }

    /// Drive one claimed job through `running` to a terminal state. Failures
    /// are captured into the record; a job is never retried.
    async fn run_job(&self, mut job: Job) {
        job.start(Utc::now());
        if let Err(e) = job.update(&self.store, self.record_ttl).await {
            // The job record still says `assigned`; a later tick will retry
            // the claim from scratch.
            tracing::error!(job_id = %job.id, error = %e, "failed to persist running state");
            return;
        }

        tracing::info!(job_id = %job.id, command_id = %job.command_id, "executing job");
        let result = match self.registry.get(&job.command_id) {
            Some(registered) => registered.command.execute(&job.params).await,
            None => Err(Error::UnknownCommand(job.command_id.clone())),
        };

        let finished = Utc::now();
        match result {
            Ok(()) => {
                job.complete(finished);
                tracing::info!(job_id = %job.id, "job succeeded");
            }
            Err(e) => {
                job.fail(finished, e.to_string());
                tracing::warn!(job_id = %job.id, error = %e, "job failed");
            }
        }

        if let Err(e) = job.update(&self.store, self.record_ttl).await {
            tracing::error!(job_id = %job.id, error = %e, "failed to persist terminal state");
        }
    }
}

/// Executor loop: tick every `period` until cancelled. Runs on every pod;
/// assignment and locking decide what actually executes here.
pub async fn run<S: Store>(executor: Executor<S>, token: CancellationToken, period: Duration) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tick.tick() => {
                match executor.tick(Utc::now()).await {
                    Ok(count) if count > 0 => tracing::debug!(count, "executed jobs"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "executor tick failed"),
                }
            }
        }
    }
}
