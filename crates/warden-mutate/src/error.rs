use std::path::PathBuf;

use thiserror::Error;

use warden_health::ProcessError;

#[derive(Debug, Error)]
pub enum MutateError {
    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("document is not valid JSON: {0}")]
    Parse(String),

    #[error("backup failed, nothing was changed: {0}")]
    Backup(String),

    #[error("no backup with id {0}")]
    UnknownBackup(String),

    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("nothing matches {0}")]
    NotFound(String),

    #[error("an outbound tagged {0:?} already exists")]
    DuplicateTag(String),

    #[error("aggregation outbound {0:?} not found")]
    AggregationMissing(String),

    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    #[error("validation failed; restore from {backup}:\n{output}")]
    ValidationFailed { backup: PathBuf, output: String },

    #[error("validator could not run: {0}")]
    Validator(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error(transparent)]
    Reload(#[from] ProcessError),
}

pub type MutateResult<T> = Result<T, MutateError>;
