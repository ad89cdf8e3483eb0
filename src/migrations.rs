use clickhouse::Client;

/// Ordered list of DDL statements to ensure the snapshot schema exists.
/// Every statement is idempotent (`IF NOT EXISTS`) so safe to run on every startup.
///
/// Note there is deliberately no table-level TTL on the snapshot tables:
/// raw rows may only be deleted by the external cleanup job, below the
/// aggregated-until high-water mark of the latest successful daily job.
const MIGRATIONS: &[&str] = &[
    // ── Database ──
    "CREATE DATABASE IF NOT EXISTS parkpulse",

    // ── Ride snapshots (collector target, append-only) ──
    r"CREATE TABLE IF NOT EXISTS parkpulse.ride_snapshots
(
    recorded_at        DateTime('UTC') CODEC(Delta, ZSTD(1)),
    ride_id            Int64 CODEC(ZSTD(1)),
    park_id            Int64 CODEC(ZSTD(1)),
    wait_time          Nullable(Int32) CODEC(ZSTD(1)),
    status             LowCardinality(String) CODEC(ZSTD(1)),
    is_open            Nullable(UInt8) CODEC(ZSTD(1)),
    computed_is_open   UInt8 CODEC(ZSTD(1))
)
ENGINE = MergeTree
PARTITION BY toDate(recorded_at)
ORDER BY (park_id, ride_id, recorded_at)
SETTINGS index_granularity = 8192",

    // ── Park activity snapshots (derived by the collector) ──
    r"CREATE TABLE IF NOT EXISTS parkpulse.park_snapshots
(
    recorded_at        DateTime('UTC') CODEC(Delta, ZSTD(1)),
    park_id            Int64 CODEC(ZSTD(1)),
    park_appears_open  UInt8 CODEC(ZSTD(1)),
    rides_open         UInt32 CODEC(ZSTD(1)),
    rides_total        UInt32 CODEC(ZSTD(1))
)
ENGINE = MergeTree
PARTITION BY toDate(recorded_at)
ORDER BY (park_id, recorded_at)
SETTINGS index_granularity = 8192",

    // ── Detected status transitions (derived, append-only) ──
    // ReplacingMergeTree keyed by (ride_id, changed_at): re-detecting the
    // same transitions under an aggregation retry collapses to one row.
    r"CREATE TABLE IF NOT EXISTS parkpulse.status_changes
(
    changed_at                  DateTime('UTC') CODEC(Delta, ZSTD(1)),
    ride_id                     Int64 CODEC(ZSTD(1)),
    park_id                     Int64 CODEC(ZSTD(1)),
    previous_status             LowCardinality(String) CODEC(ZSTD(1)),
    new_status                  LowCardinality(String) CODEC(ZSTD(1)),
    new_is_open                 UInt8 CODEC(ZSTD(1)),
    downtime_duration_minutes   Nullable(Int64) CODEC(ZSTD(1))
)
ENGINE = ReplacingMergeTree
PARTITION BY toDate(changed_at)
ORDER BY (ride_id, changed_at)
SETTINGS index_granularity = 8192",
];

/// Run all migrations against ClickHouse.
///
/// Connects **without** a default database so that `CREATE DATABASE` succeeds
/// even on a fresh instance. Every statement uses `IF NOT EXISTS` so this is
/// safe to call on every startup.
pub async fn run(url: &str, user: &str, password: &str) -> anyhow::Result<()> {
    let client = Client::default()
        .with_url(url)
        .with_user(user)
        .with_password(password);

    tracing::info!("running clickhouse migrations ({} statements)", MIGRATIONS.len());

    for (i, sql) in MIGRATIONS.iter().enumerate() {
        let preview: String = sql.chars().take(80).collect();
        tracing::debug!("migration {}/{}: {}...", i + 1, MIGRATIONS.len(), preview);
        client.query(sql).execute().await.map_err(|e| {
            tracing::error!("migration {}/{} failed: {e}", i + 1, MIGRATIONS.len());
            e
        })?;
    }

    tracing::info!("clickhouse migrations complete");
    Ok(())
}
