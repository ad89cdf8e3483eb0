use thiserror::Error;

/// Error taxonomy for the aggregation pipeline.
///
/// Expected "no data" outcomes (no session found, zero park weight, park
/// never open) are *not* errors; they are `None`/empty returns on the
/// component APIs. Everything here aborts the current attempt and is left
/// to the external scheduler to retry.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("snapshot store error: {0}")]
    Store(#[from] clickhouse::error::Error),

    #[error("stats db error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("unknown timezone '{0}'")]
    Timezone(String),

    #[error("bad stored value: {0}")]
    Decode(String),

    #[error("aggregation job conflict: {0}")]
    Job(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
