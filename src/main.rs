//! Promotion and rate relay: binary entrypoint.
//! Loads config, wires the cache and crawl jobs, starts the daily timetable
//! and serves cached payloads over Axum.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use promo_relay::api::{create_router, AppState};
use promo_relay::context::ServiceContext;
use promo_relay::ingest::config::load_config_default;
use promo_relay::ingest::providers::{default_jobs, EVENT_SOURCES, RATE_SOURCE};
use promo_relay::ingest::scheduler::{spawn_scheduler, timetable, JobRunner};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("promo_relay=info,warn"));

    // A host runtime may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = load_config_default().context("loading crawler config")?;
    let schedule = config.schedule.clone();
    let ctx = ServiceContext::from_config(config).await;

    let jobs = default_jobs(&ctx).context("building crawl jobs")?;
    let runner = Arc::new(JobRunner::new(jobs));
    info!(sources = ?runner.sources(), hot = ?ctx.cache().hot_backend(), "crawl jobs registered");

    if schedule.enabled {
        let table = timetable(&schedule, &EVENT_SOURCES, &[RATE_SOURCE]);
        spawn_scheduler(runner.clone(), table);
    } else {
        info!(target: "scheduler", "daily timetable disabled; manual triggers only");
    }

    let router = create_router(AppState { runner });
    Ok(router.into())
}
