//! Pipeline worker process.
//!
//! Hosts the recovery sweeper over the production stores: Postgres for
//! delivery records and coverage, the real partner HTTP client for
//! submissions. The web tier calls the submission gateway in its own
//! process; this worker is what makes retries survive restarts.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use telarx_infra::stores::postgres::{
    PostgresCoverageStore, PostgresDeliveryStore, PostgresOrderReader, PostgresPatientReader,
};
use telarx_infra::{CoverageResolver, RecoverySweeper, RetryCoordinator, Submitter, SweepConfig};
use telarx_partner::{HttpPartnerClient, PartnerConfig};

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_secs))
}

#[tokio::main]
async fn main() {
    telarx_observability::init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("failed to connect to Postgres");

    let deliveries = Arc::new(PostgresDeliveryStore::new(pool.clone()));
    deliveries
        .ensure_schema()
        .await
        .expect("failed to ensure delivery schema");
    let coverage = Arc::new(PostgresCoverageStore::new(pool.clone()));
    coverage
        .ensure_schema()
        .await
        .expect("failed to ensure coverage schema");

    let partner = HttpPartnerClient::new(PartnerConfig::from_env())
        .expect("failed to build partner client");

    let submitter = Arc::new(Submitter::new(
        Arc::new(PostgresOrderReader::new(pool.clone())),
        Arc::new(PostgresPatientReader::new(pool)),
        CoverageResolver::new(coverage),
        Arc::new(partner),
    ));

    // The sweep is the authoritative retry path in this process; in-process
    // timers would be redundant next to a short sweep interval.
    let coordinator = RetryCoordinator::without_timers(deliveries.clone(), submitter);

    let sweep_config = SweepConfig::default()
        .with_interval(env_duration_secs("TELARX_SWEEP_INTERVAL_SECS", 60))
        .with_min_age(env_duration_secs("TELARX_SWEEP_MIN_AGE_SECS", 120));
    let sweeper = RecoverySweeper::new(deliveries, coordinator, sweep_config);
    let shutdown = sweeper.shutdown_handle();
    let handle = sweeper.start();

    tracing::info!("pipeline worker running; ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");

    shutdown.notify_one();
    let _ = handle.await;
    tracing::info!("pipeline worker stopped");
}
