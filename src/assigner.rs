use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    error::Result,
    job::{Job, JobStatus},
    membership::{Membership, PodInfo},
    store::{Store, JOBS_KEY},
};

/// Maps pending jobs to live pods and reclaims jobs orphaned by pod death.
///
/// Runs on every pod, acts only on the leader. Assignment is round-robin
/// over the sorted live pod ids: stateless, no per-pod load counters, and
/// balanced in expectation over time. A job may be reassigned across ticks
/// until some pod observes and executes it; the executor lock, not the
/// assignment, is what serializes execution.
pub struct Assigner<S> {
    store: S,
    next_job_count: i64,
    record_ttl: Duration,
}

impl<S: Store> Assigner<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            next_job_count: config.next_job_count,
            record_ttl: config.job_record_ttl,
        }
    }

    /// One assignment pass over the next `next_job_count` pending jobs in
    /// schedule order. With no live pods the store is left untouched.
    /// Returns how many jobs were (re)assigned.
    pub async fn tick(&self, members: &HashMap<String, PodInfo>) -> Result<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut pods: Vec<&String> = members.keys().collect();
        pods.sort();

        let ids = self
            .store
            .zrange(JOBS_KEY, 0, self.next_job_count - 1)
            .await?;

        let mut assigned = 0usize;
        for id in &ids {
            let mut job = match Job::load(&self.store, id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tracing::warn!(job_id = %id, "pending job has no detail record, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "malformed job record, skipping");
                    continue;
                }
            };

            if job.status == JobStatus::Running {
                continue;
            }
            // The pending set should only hold live states; repair it if a
            // terminal record slipped through.
            if job.status.is_terminal() {
                self.store.zrem(JOBS_KEY, id).await?;
                continue;
            }
            if !job.assigned_to.is_empty() {
                if members.contains_key(&job.assigned_to) {
                    continue;
                }
                tracing::info!(
                    job_id = %job.id,
                    pod_id = %job.assigned_to,
                    "reclaiming job from dead pod"
                );
                job.unassign();
            }

            let target = pods[assigned % pods.len()].as_str();
            job.assign(target);
            if let Err(e) = job.update(&self.store, self.record_ttl).await {
                tracing::error!(job_id = %job.id, error = %e, "failed to persist assignment");
                continue;
            }
            tracing::debug!(job_id = %job.id, pod_id = %target, "job assigned");
            assigned += 1;
        }

        Ok(assigned)
    }
}

/// Assigner loop: tick every `period` until cancelled, acting only while
/// this pod is leader. Membership is snapshotted once per tick.
pub async fn run<S: Store>(
    assigner: Assigner<S>,
    membership: Membership<S>,
    token: CancellationToken,
    period: Duration,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tick.tick() => {
                match membership.is_leader().await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "leader check failed");
                        continue;
                    }
                }
                let members = match membership.live_members().await {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to snapshot membership");
                        continue;
                    }
                };
                match assigner.tick(&members).await {
                    Ok(count) if count > 0 => tracing::info!(count, "assigned jobs"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "assigner tick failed"),
                }
            }
        }
    }
}
