use clickhouse::Client;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use parkpulse::Pipeline;
use parkpulse::config::PipelineConfig;
use parkpulse::migrations;
use parkpulse::snapshot_store::ClickHouseStore;
use parkpulse::stats_db::StatsDb;
use parkpulse::time::SystemClock;

/// Audit entry point for CI gates and operators.
///
///   parkpulse-audit <date> [--table ride_stats|park_stats] [--full] [--backfill <days>]
///
/// Exit codes: 0 = pass, 1 = critical failures present, 2 = warnings only.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parkpulse=info")),
        )
        .init();

    let clickhouse_url =
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "http://localhost:8123".to_string());
    let clickhouse_db =
        std::env::var("CLICKHOUSE_DATABASE").unwrap_or_else(|_| "parkpulse".to_string());
    let clickhouse_user =
        std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string());
    let clickhouse_password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();

    migrations::run(&clickhouse_url, &clickhouse_user, &clickhouse_password).await?;

    let ch = Client::default()
        .with_url(&clickhouse_url)
        .with_database(&clickhouse_db)
        .with_user(&clickhouse_user)
        .with_password(&clickhouse_password);

    let stats_db_path =
        std::env::var("PARKPULSE_STATS_DB").unwrap_or_else(|_| "./parkpulse_stats.db".to_string());
    let db = Arc::new(StatsDb::open(&stats_db_path)?);

    let config_path =
        std::env::var("PARKPULSE_CONFIG").unwrap_or_else(|_| "./parkpulse.toml".to_string());
    let config = PipelineConfig::load(&config_path)?;

    let pipeline = Pipeline::new(
        Arc::new(ClickHouseStore::new(ch)),
        db,
        Arc::new(SystemClock),
        config,
    );
    let verifier = pipeline.verifier();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let date = args
        .first()
        .ok_or_else(|| {
            anyhow::anyhow!("usage: parkpulse-audit <date> [--table t] [--full] [--backfill days]")
        })?
        .parse::<chrono::NaiveDate>()?;
    let table = args
        .iter()
        .position(|a| a == "--table")
        .and_then(|i| args.get(i + 1))
        .cloned();
    let full = args.iter().any(|a| a == "--full");
    let backfill_days = args
        .iter()
        .position(|a| a == "--backfill")
        .and_then(|i| args.get(i + 1))
        .and_then(|d| d.parse::<u32>().ok());

    let summary = if let Some(days) = backfill_days {
        verifier.backfill_audit(date, days).await?
    } else if full {
        verifier.full_audit(date).await?
    } else {
        verifier.audit(date, table.as_deref()).await?
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    std::process::exit(summary.exit_code())
}
