//! Business rules. Every operation takes an open connection and, when it
//! changes shared state, the publisher used to notify subscribers.

use chrono::{NaiveDateTime, Utc};
use thiserror::Error;

pub mod annotations;
pub mod decisions;
pub mod documents;
pub mod export;
pub mod sessions;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Locked(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}
