use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::Config,
    error::Result,
    store::{Store, StoreExt, PODS_KEY},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodStatus {
    Active,
}

/// One replica's entry in the shared membership map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: PodStatus,
}

/// Pod registration, heartbeats, liveness pruning, and the computed leader.
///
/// The membership map lives under a single well-known key that every pod
/// reads, mutates, and writes back. There is no consensus round: the map is
/// eventually consistent, and the leader is a deterministic function of the
/// pruned live set, so every pod looking at the same snapshot agrees.
/// Brief split-brain windows are tolerated; the per-job execution lock is
/// the safety net that keeps them from causing duplicate execution.
#[derive(Clone)]
pub struct Membership<S> {
    store: S,
    info: PodInfo,
    pod_ttl: Duration,
    members_ttl: Duration,
}

impl<S: Store> Membership<S> {
    pub fn new(store: S, config: &Config) -> Self {
        let id = config
            .pod_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        Self {
            store,
            info: PodInfo {
                id,
                start_time: now,
                last_seen: now,
                status: PodStatus::Active,
            },
            pod_ttl: config.pod_ttl,
            members_ttl: config.members_ttl,
        }
    }

    pub fn pod_id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &PodInfo {
        &self.info
    }

    /// Insert this pod into the membership map. Called once at startup;
    /// failure here is fatal for the process.
    pub async fn register(&self) -> Result<()> {
        let mut members = self.members().await?;
        members.insert(self.info.id.clone(), self.entry(Utc::now()));
        self.store
            .set_json(PODS_KEY, &members, Some(self.members_ttl))
            .await?;
        tracing::info!(pod_id = %self.info.id, "pod registered");
        Ok(())
    }

    /// One heartbeat: read the map, prune dead entries, refresh self, write
    /// back. Pruning on every heartbeat is what gives membership liveness.
    ///
    /// The read-modify-write is deliberately not a CAS loop: a lost update
    /// costs one late heartbeat and is corrected on the next tick.
    pub async fn heartbeat(&self) -> Result<()> {
        let now = Utc::now();
        let mut members = self.members().await?;
        prune(&mut members, now, self.pod_ttl);
        members.insert(self.info.id.clone(), self.entry(now));
        self.store
            .set_json(PODS_KEY, &members, Some(self.members_ttl))
            .await?;

        let leader = leader_of(&members).map(|p| p.id.clone()).unwrap_or_default();
        tracing::debug!(
            pod_id = %self.info.id,
            live = members.len(),
            leader = %leader,
            "membership heartbeat"
        );
        Ok(())
    }

    /// Raw membership map as stored, possibly containing dead entries.
    pub async fn members(&self) -> Result<HashMap<String, PodInfo>> {
        Ok(self
            .store
            .get_json(PODS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Pruned view of the membership map. Read-only with respect to the
    /// store; only the heartbeat writes pruning back.
    pub async fn live_members(&self) -> Result<HashMap<String, PodInfo>> {
        let mut members = self.members().await?;
        prune(&mut members, Utc::now(), self.pod_ttl);
        Ok(members)
    }

    /// Id of the current leader, if any pod is live.
    pub async fn leader_id(&self) -> Result<Option<String>> {
        let members = self.live_members().await?;
        Ok(leader_of(&members).map(|p| p.id.clone()))
    }

    /// Whether this pod currently computes itself as the leader.
    pub async fn is_leader(&self) -> Result<bool> {
        Ok(self.leader_id().await?.as_deref() == Some(self.info.id.as_str()))
    }

    fn entry(&self, last_seen: DateTime<Utc>) -> PodInfo {
        PodInfo {
            last_seen,
            ..self.info.clone()
        }
    }
}

/// Drop entries not seen within `pod_ttl`. An entry with `last_seen` in the
/// future (clock skew) counts as live.
fn prune(members: &mut HashMap<String, PodInfo>, now: DateTime<Utc>, pod_ttl: Duration) {
    members.retain(|_, p| {
        now.signed_duration_since(p.last_seen)
            .to_std()
            .map_or(true, |elapsed| elapsed <= pod_ttl)
    });
}

/// The leader is the live pod with the smallest `(start_time, id)`.
/// Total and deterministic on any non-empty set.
pub fn leader_of(members: &HashMap<String, PodInfo>) -> Option<&PodInfo> {
    members
        .values()
        .min_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)))
}

/// Heartbeat loop: refresh membership every `period` until cancelled.
/// A failed heartbeat is logged and retried on the next tick.
pub async fn run_heartbeat<S: Store>(
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
                if let Err(e) = membership.heartbeat().await {
                    tracing::error!(error = %e, "heartbeat failed");
                }
            }
        }
    }
}
