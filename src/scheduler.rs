use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    assigner::{self, Assigner},
    command::CommandRegistry,
    config::Config,
    error::Result,
    executor::{self, Executor},
    materializer::{self, Materializer},
    membership::{self, Membership},
    store::Store,
};

/// Wires the subsystems together and owns their tick loops.
///
/// One `Scheduler` is one pod. `run` blocks until SIGINT/SIGTERM; on signal
/// the root cancellation token is cancelled, every loop observes it and
/// returns, heartbeats stop, and the surviving pods prune this one from the
/// membership map within the pod TTL. Jobs already `running` locally are
/// not rolled back; they finish (or die with the process) and the lock TTL
/// bounds the fallout.
pub struct Scheduler<S> {
    store: S,
    config: Config,
    registry: Arc<CommandRegistry>,
}

impl<S: Store> Scheduler<S> {
    pub fn new(store: S, config: Config, registry: CommandRegistry) -> Self {
        Self {
            store,
            config,
            registry: Arc::new(registry),
        }
    }

    /// Run until the process receives a termination signal.
    pub async fn run(self) -> Result<()> {
        let token = CancellationToken::new();
        let signal_token = token.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        });
        self.run_until_cancelled(token).await
    }

    /// Run until `token` is cancelled. Registration failure is fatal; after
    /// that, every loop is individually fault-tolerant and one tick's error
    /// never terminates it.
    pub async fn run_until_cancelled(self, token: CancellationToken) -> Result<()> {
        let membership = Membership::new(self.store.clone(), &self.config);
        membership.register().await?;

        tracing::info!(
            pod_id = %membership.pod_id(),
            commands = self.registry.len(),
            "scheduler starting"
        );

        let materializer =
            Materializer::new(self.store.clone(), Arc::clone(&self.registry), &self.config);
        let assigner = Assigner::new(self.store.clone(), &self.config);
        let executor = Executor::new(
            self.store.clone(),
            Arc::clone(&self.registry),
            membership.pod_id().to_string(),
            &self.config,
        );

        let heartbeat_loop = tokio::spawn(membership::run_heartbeat(
            membership.clone(),
            token.clone(),
            self.config.heartbeat_interval,
        ));
        let materializer_loop = tokio::spawn(materializer::run(
            materializer,
            membership.clone(),
            token.clone(),
            self.config.materializer_interval,
        ));
        let assigner_loop = tokio::spawn(assigner::run(
            assigner,
            membership.clone(),
            token.clone(),
            self.config.assigner_interval,
        ));
        let executor_loop = tokio::spawn(executor::run(
            executor,
            token.clone(),
            self.config.executor_interval,
        ));

        let _ = tokio::join!(
            heartbeat_loop,
            materializer_loop,
            assigner_loop,
            executor_loop
        );

        tracing::info!(pod_id = %membership.pod_id(), "scheduler stopped");
        Ok(())
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
///
/// On Unix both signals are handled so container orchestrators
/// (`docker stop`, Kubernetes pod termination) trigger a clean shutdown.
/// On non-Unix only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c  => {}
        _ = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory_impls::MemoryStore;

    fn fast_config(pod_id: &str) -> Config {
        Config {
            pod_id: Some(pod_id.to_string()),
            heartbeat_interval: Duration::from_millis(20),
            materializer_interval: Duration::from_millis(20),
            assigner_interval: Duration::from_millis(20),
            executor_interval: Duration::from_millis(20),
            ..Config::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loops_stop_promptly_on_cancellation() {
        let store = MemoryStore::new();
        let scheduler = Scheduler::new(
            store,
            fast_config("pod-test"),
            CommandRegistry::with_builtins(),
        );

        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run_until_cancelled(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }
}
