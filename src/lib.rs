//! Storage core for a social content platform: users write articles, tag
//! them, comment on them, favorite them, and follow each other. Feeds are
//! filtered, sorted, paginated views over that graph.
//!
//! Engagement counters (favorites, comments) are derived from the
//! relation tables at read time rather than cached, so they can never
//! drift from the underlying edge sets. Every operation takes an explicit
//! connection; multi-write operations run inside a single transaction.
//!
//! HTTP routing, token issuance, password hashing and media storage live
//! outside this crate; they hand in a verified caller id, a password
//! hash, or an opaque media reference and get typed outcomes back.

pub mod article;
pub mod comment;
pub mod db;
pub mod profile;
pub mod tag;
pub mod types;
pub mod users;
pub mod utils;

pub use types::{Caller, Error, Page, Paged, Result};
