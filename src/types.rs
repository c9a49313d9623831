use std::collections::HashMap;
use std::fmt;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::SqliteConnection;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome taxonomy for every core operation. The caller (route layer)
/// maps these onto its wire format; the core never retries and never
/// swallows a failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid input: {0}")]
    InvalidInput(ValidationError),

    #[error("database error: {0}")]
    Database(DieselError),

    #[error("connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("missing configuration: {0}")]
    Config(String),
}

impl From<DieselError> for Error {
    fn from(err: DieselError) -> Error {
        match err {
            DieselError::NotFound => Error::NotFound("record"),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Error::Conflict(info.message().to_owned())
            }
            other => Error::Database(other),
        }
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Error {
        Error::InvalidInput(err)
    }
}

/// Field name to messages, accumulated across checks so the caller sees
/// every problem at once instead of the first one.
#[derive(Debug, Serialize, Default)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

pub trait Validate
where
    Self: Sized,
{
    fn validate(self, connection: &mut SqliteConnection) -> Result<Self>;
}

/// Identity forwarded by the authentication adapter. The core trusts the
/// id as already verified; `None` means the request carried no identity.
pub type Caller = Option<i32>;

pub fn require_caller(caller: Caller) -> Result<i32> {
    caller.ok_or(Error::Unauthenticated)
}

/// Zero-based page index plus page size, bounds-checked on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    page: i64,
    size: i64,
}

impl Page {
    pub const DEFAULT_SIZE: i64 = 10;
    pub const MAX_SIZE: i64 = 100;

    pub fn new(page: Option<i64>, size: Option<i64>) -> Result<Page> {
        let page = page.unwrap_or(0);
        let size = size.unwrap_or(Self::DEFAULT_SIZE);
        let mut error = ValidationError::default();
        if page < 0 {
            error.add_error("page", format!("page index must be >= 0, got {}", page));
        }
        if size < 1 || size > Self::MAX_SIZE {
            error.add_error(
                "size",
                format!("page size must be within 1..={}, got {}", Self::MAX_SIZE, size),
            );
        }
        if error.is_empty() {
            Ok(Page { page, size })
        } else {
            Err(error.into())
        }
    }

    pub fn offset(&self) -> i64 {
        self.page * self.size
    }

    pub fn limit(&self) -> i64 {
        self.size
    }
}

impl Default for Page {
    fn default() -> Self {
        Page {
            page: 0,
            size: Self::DEFAULT_SIZE,
        }
    }
}

/// One page of a filtered listing. `total` counts the whole filtered
/// result, not the page, so callers can derive page counts.
#[derive(Debug, Serialize, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults() {
        let page = Page::new(None, None).expect("default page");
        assert_eq!(page.offset(), 0);
        assert_eq!(page.limit(), Page::DEFAULT_SIZE);
    }

    #[test]
    fn page_offset_is_index_times_size() {
        let page = Page::new(Some(3), Some(7)).expect("page");
        assert_eq!(page.offset(), 21);
        assert_eq!(page.limit(), 7);
    }

    #[test]
    fn page_rejects_negative_index_and_oversized_pages() {
        assert!(matches!(Page::new(Some(-1), None), Err(Error::InvalidInput(_))));
        assert!(matches!(Page::new(None, Some(0)), Err(Error::InvalidInput(_))));
        assert!(matches!(
            Page::new(None, Some(Page::MAX_SIZE + 1)),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn validation_errors_merge_per_field() {
        let mut error = ValidationError::from("title", "empty title");
        error.merge(ValidationError::from("title", "title too long"));
        error.merge(ValidationError::from("body", "empty body"));
        assert_eq!(error.len(), 2);
        assert!(!error.is_empty());
    }
}
