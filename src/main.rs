use clap::Parser;
use tracing_subscriber::EnvFilter;

use schedulerx::{CommandRegistry, Config, RedisStore, Scheduler};

/// Distributed cron-style job scheduler.
#[derive(Parser)]
#[command(name = "schedulerx", version)]
struct Cli {
    /// Pod identity; generated when omitted
    #[arg(long, env = "POD_ID")]
    pod_id: Option<String>,

    /// Store URL scheme (redis or rediss)
    #[arg(long, env = "CACHE_URL_SCHEME", default_value = "redis")]
    cache_url_scheme: String,

    /// Store host
    #[arg(long, env = "CACHE_CLUSTER_URL", default_value = "localhost")]
    cache_cluster_url: String,

    #[arg(long, env = "CACHE_USERNAME", default_value = "")]
    cache_username: String,

    #[arg(long, env = "CACHE_PASSWORD", default_value = "", hide_env_values = true)]
    cache_password: String,

    /// TLS server name override for rediss connections
    #[arg(long, env = "CACHE_TLS_DOMAIN", default_value = "")]
    cache_tls_domain: String,

    /// Max jobs considered per assigner tick
    #[arg(long, env = "NEXT_JOB_COUNT", default_value_t = 1000)]
    next_job_count: i64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = Config {
        pod_id: cli.pod_id,
        cache_url_scheme: cli.cache_url_scheme,
        cache_cluster_url: cli.cache_cluster_url,
        cache_username: cli.cache_username,
        cache_password: cli.cache_password,
        cache_tls_domain: cli.cache_tls_domain,
        next_job_count: cli.next_job_count,
        ..Config::default()
    };

    let registry = CommandRegistry::with_builtins();
    for (id, description) in registry.descriptions() {
        tracing::info!(command = %id, %description, "registered command");
    }

    let store = match RedisStore::connect(&config).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to store");
            std::process::exit(1);
        }
    };

    if let Err(e) = Scheduler::new(store, config, registry).run().await {
        tracing::error!(error = %e, "scheduler exited with error");
        std::process::exit(1);
    }
}

/// `LOG_LEVEL` selects the filter; `DGN` selects the format: human-readable
/// output for `local`, JSON lines everywhere else.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let local = std::env::var("DGN").map(|v| v == "local").unwrap_or(false);
    if local {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }
}
