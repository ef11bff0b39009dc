//! # schedulerx
//!
//! Distributed cron-style job scheduler. A fleet of identical replicas
//! (pods) coordinates exclusively through a shared key-value store to run
//! registered commands on their cron schedules, executing each scheduled
//! occurrence at most once, and ideally exactly once.
//!
//! ## How it works
//!
//! - Every pod heartbeats into a shared membership map and prunes dead
//!   peers; the leader is computed, not elected: the live pod with the
//!   smallest `(start_time, id)`.
//! - The leader materializes cron schedules into concrete jobs over a
//!   rolling window. Job ids are deterministic
//!   (`{command_id}_{unix_seconds}`), so re-materialization is idempotent.
//! - The leader assigns pending jobs round-robin over live pods and
//!   reclaims jobs orphaned by pod death.
//! - Every pod executes the due jobs assigned to it, guarded by a per-job
//!   `SETNX` lock with a TTL. The lock, not the assignment, is what makes
//!   execution single-flight even across leader split-brain.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use schedulerx::{CommandRegistry, Config, RedisStore, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> schedulerx::Result<()> {
//!     let config = Config::default();
//!     let store = RedisStore::connect(&config).await?;
//!     let registry = CommandRegistry::with_builtins();
//!     Scheduler::new(store, config, registry).run().await
//! }
//! ```

pub mod assigner;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod materializer;
pub mod membership;
pub mod memory_impls;
pub mod redis_impls;
pub mod scheduler;
pub mod store;

pub use command::{Command, CommandRegistry};
pub use config::Config;
pub use error::{Error, Result};
pub use job::{Job, JobStatus};
pub use membership::{Membership, PodInfo, PodStatus};
pub use memory_impls::MemoryStore;
pub use redis_impls::RedisStore;
pub use scheduler::Scheduler;
pub use store::{Store, StoreExt};
