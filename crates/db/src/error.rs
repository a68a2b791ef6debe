use mongodb::error::{ErrorKind, WriteFailure};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0} already exists")]
    DuplicateKey(String),
    #[error("{0}")]
    ChildAmbiguity(String),
    #[error("unknown model type `{0}`")]
    UnknownType(String),
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("node has not been persisted yet")]
    Unsaved,
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
}

impl DbError {
    /// Map a driver error on insert into the uniqueness conflict the
    /// `(path, slug)` index surfaces.
    pub fn from_insert(err: mongodb::error::Error, url: &str) -> Self {
        if is_duplicate_key(&err) {
            DbError::DuplicateKey(url.to_string())
        } else {
            DbError::Mongo(err)
        }
    }
}

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
        ErrorKind::Command(command) => command.code == 11000,
        _ => false,
    }
}
