//! Common utilities shared across the database modules

pub mod error;

pub use error::{DatabaseError, DatabaseResult};
