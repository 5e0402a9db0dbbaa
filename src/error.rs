//! The top-level error taxonomy, aggregating every component's error type.

use crate::key::MalformedKey;
use crate::record::RecordError;

/// Top-level error type returned by store, replicated-store, merge, and
/// reconciler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Key(#[from] MalformedKey),

    #[error("batch contains overlapping records at indices {0} and {1}")]
    InvalidBatch(usize, usize),

    #[error("record for range {start}..{end} is signed by '{claimed}' but existing range owner is '{existing}'")]
    OwnerMismatch {
        start: String,
        end: String,
        claimed: String,
        existing: String,
    },

    #[error("signature verification failed for range {start}..{end}")]
    BadSignature { start: String, end: String },

    #[error("local database has unexported changes; refusing to import")]
    DatabaseDirty,

    #[error("import left overlapping ranges in the local store")]
    OverlapPostImport,

    #[error("inconsistent data between stores: both older and newer conflicting ranges present")]
    InconsistentData,

    #[error("pre-merge sanity check failed: {0} store already has internal overlaps")]
    InconsistentState(&'static str),

    #[error("merge conflict in '{0}' could not be resolved")]
    MergeConflict(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("remote '{name}' already registered with a different URL")]
    RemoteConflict { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;
