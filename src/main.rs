use clickhouse::Client;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use parkpulse::Pipeline;
use parkpulse::config::PipelineConfig;
use parkpulse::migrations;
use parkpulse::models::job::AggregationType;
use parkpulse::scheduler;
use parkpulse::snapshot_store::ClickHouseStore;
use parkpulse::stats_db::StatsDb;
use parkpulse::time::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parkpulse=debug")),
        )
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "parkpulse".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    // Run migrations before creating the database-scoped client so the
    // snapshot tables exist on every startup.
    migrations::run(&clickhouse_url, &clickhouse_user, &clickhouse_password).await?;

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let stats_db_path =
        std::env::var("PARKPULSE_STATS_DB").unwrap_or_else(|_| "./parkpulse_stats.db".to_string());
    let db = Arc::new(StatsDb::open(&stats_db_path)?);
    tracing::info!("stats db opened at {stats_db_path}");

    let config_path =
        std::env::var("PARKPULSE_CONFIG").unwrap_or_else(|_| "./parkpulse.toml".to_string());
    let config = PipelineConfig::load(&config_path)?;

    let pipeline = Pipeline::new(
        Arc::new(ClickHouseStore::new(ch)),
        db,
        Arc::new(SystemClock),
        config,
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        // One-shot mode for cron-driven deployments:
        //   parkpulse-pipeline run 2025-06-01 daily [timezone] [--force]
        Some("run") => {
            let date = args
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("usage: run <date> <type> [timezone] [--force]"))?
                .parse::<chrono::NaiveDate>()?;
            let agg_type = args
                .get(2)
                .map(String::as_str)
                .unwrap_or("daily")
                .parse::<AggregationType>()
                .map_err(|e| anyhow::anyhow!(e))?;
            let timezone_filter = args.get(3).filter(|a| !a.starts_with("--")).cloned();
            let force = args.iter().any(|a| a == "--force");

            let outcome = pipeline
                .aggregation()
                .run(date, agg_type, timezone_filter.as_deref(), force)
                .await?;
            tracing::info!(
                "{agg_type} aggregation for {date}: {:?} ({} parks, {} rides, until {:?})",
                outcome.status,
                outcome.parks_processed,
                outcome.rides_processed,
                outcome.aggregated_until_ts
            );
        }
        // Service mode: keep the rollup scheduler running.
        None => {
            let reporting_tz = pipeline.config.reporting_tz()?;
            scheduler::spawn_rollup_scheduler(
                Arc::new(pipeline.aggregation()),
                pipeline.clock.clone(),
                pipeline.config.scheduler.clone(),
                reporting_tz,
            );
            tracing::info!("parkpulse-pipeline running; ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutting down");
        }
        Some(other) => {
            anyhow::bail!("unknown command '{other}' (expected 'run' or no argument)");
        }
    }

    Ok(())
}
