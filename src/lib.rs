//! docuseek: catalog synchronization pipeline for a documentary video
//! site.
//!
//! The pipeline crawls curated platform sources, validates and normalizes
//! what it finds, reconciles the result against a SQLite catalog, and
//! keeps a Tantivy search index trailing the database.

pub mod config;
pub mod enrich;
pub mod error;
pub mod models;
pub mod platform;
pub mod repository;
pub mod schema;
pub mod search;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};
