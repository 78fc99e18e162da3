//! Storage for messages that have been fully processed.
//!
//! [`SeaOrmProcessedStore`] backs `messaging`'s deduplication guard with the
//! `processed_events` table and owns its retention sweep.

pub mod entity;
mod store;

pub use store::{SeaOrmProcessedStore, DEFAULT_RETENTION_DAYS};
