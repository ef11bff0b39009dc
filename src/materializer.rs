use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{
    command::CommandRegistry,
    config::Config,
    error::Result,
    job::Job,
    membership::Membership,
    store::{Store, JOBS_KEY},
};

/// Expands cron schedules into concrete future jobs inside a rolling window.
///
/// Runs on every pod but only acts on the one that currently computes itself
/// leader. Job ids are deterministic, so re-materializing the same window on
/// every tick (or from a freshly promoted leader) is idempotent: the sorted
/// set deduplicates members and existing detail records are left untouched.
pub struct Materializer<S> {
    store: S,
    registry: Arc<CommandRegistry>,
    window: chrono::Duration,
    record_ttl: Duration,
}

impl<S: Store> Materializer<S> {
    pub fn new(store: S, registry: Arc<CommandRegistry>, config: &Config) -> Self {
        let window = chrono::Duration::from_std(config.scheduling_window)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            store,
            registry,
            window,
            record_ttl: config.job_record_ttl,
        }
    }

    /// Stage every firing of every registered command inside
    /// `(now, now + window)`. The window end is exclusive. Returns how many
    /// new detail records were created.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let end = now + self.window;
        let mut created = 0usize;

        for registered in self.registry.iter() {
            let command = &registered.command;
            for fire_at in registered.schedule.after(&now) {
                if fire_at >= end {
                    break;
                }
                let job = Job::new(command.id(), command.default_params(), fire_at);
                match job.save_new(&self.store, self.record_ttl).await {
                    Ok(true) => created += 1,
                    Ok(false) => {}
                    // One bad write must not abort the rest of the window.
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "failed to stage job")
                    }
                }
            }
        }

        Ok(created)
    }

    /// Log the next few pending jobs for operator visibility.
    pub async fn log_upcoming(&self) {
        match self.store.zrange(JOBS_KEY, 0, 9).await {
            Ok(ids) if !ids.is_empty() => {
                tracing::debug!(upcoming = ?ids, "next scheduled jobs")
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "failed to read upcoming jobs"),
        }
    }
}

/// Materializer loop: tick every `period` until cancelled, acting only while
/// this pod is leader. Leadership transitions are logged once per change.
pub async fn run<S: Store>(
    materializer: Materializer<S>,
    membership: Membership<S>,
    token: CancellationToken,
    period: Duration,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut was_leader = false;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tick.tick() => {
                let is_leader = match membership.is_leader().await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::error!(error = %e, "leader check failed");
                        continue;
                    }
                };
                if is_leader != was_leader {
                    if is_leader {
                        tracing::info!(pod_id = %membership.pod_id(), "assumed scheduling leadership");
                    } else {
                        tracing::info!(pod_id = %membership.pod_id(), "scheduling leadership moved elsewhere");
                    }
                    was_leader = is_leader;
                }
                if !is_leader {
                    continue;
                }
                match materializer.tick(Utc::now()).await {
                    Ok(created) if created > 0 => {
                        tracing::info!(created, "materialized jobs");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "materializer tick failed"),
                }
                materializer.log_upcoming().await;
            }
        }
    }
}
