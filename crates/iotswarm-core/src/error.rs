use thiserror::Error;

/// Errors raised while constructing or validating a [`crate::device::Device`] or
/// [`crate::swarm::Swarm`]. Always fatal at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`no_send_probability` must be between 0 and 100 inclusive, got {0}")]
    InvalidNoSendProbability(u8),
    #[error("device id must not be empty")]
    EmptyDeviceId,
    #[error("data source requires a `table` but none was provided")]
    MissingTable,
    #[error("swarm must contain at least one device")]
    EmptySwarm,
    #[error("invalid table name: {0}")]
    UnknownTable(String),
}

/// Transient failure reading from a [`crate::datasource::DataSource`]. The device
/// absorbs these: it logs, skips the cycle, and does not advance `cycle`.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("database connection error: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("failed to read CSV source: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure publishing a payload. Retried internally with backoff up to a 60s budget;
/// once that budget is exhausted `Publisher::send` returns `Ok(false)` rather than
/// propagating, so this variant only ever surfaces a genuinely unrecoverable
/// configuration problem (e.g. a malformed certificate).
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to read TLS credential: {0}")]
    Io(#[from] std::io::Error),
}

/// Corruption or I/O failure reading/writing a swarm snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] bincode::Error),
    #[error("swarm snapshot not found: {0}")]
    NotFound(String),
    #[error("swarm snapshot already exists: {0}")]
    AlreadyExists(String),
}

/// Contract violations in how a payload was assembled: these propagate to the
/// `Swarm` and out to the caller rather than being absorbed.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("rows in a batch payload must all have the same set of keys")]
    UnequalRowShape,
    #[error("payload batch must contain at least one row")]
    EmptyBatch,
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures from the `LiveUploader` sibling subsystem.
#[derive(Debug, Error)]
pub enum LiveUploadError {
    #[error("relational source query failed: {0}")]
    Source(String),
    #[error("object store write failed: {0}")]
    ObjectStore(String),
    #[error("payload adaptation failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("state corruption: {0}")]
    StateCorruption(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode/decode state: {0}")]
    Codec(#[from] bincode::Error),
}

/// What can come out of [`crate::device::Device::run`]. Everything else - transient
/// data-source and publish failures - is absorbed inside the run loop and never
/// reaches this type.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device run cancelled")]
    Cancelled,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
