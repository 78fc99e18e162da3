//! Container fixtures for integration tests
//!
//! - `TestDatabase`: PostgreSQL with the `processed_events` migrations applied (feature: "postgres")
//! - `TestNats`: NATS server with JetStream enabled (feature: "nats")
//!
//! Containers are removed when the fixture is dropped. Tests using them need
//! Docker and are marked `#[ignore]`.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["nats"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::TestNats;
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_jetstream_test() {
//!     let nats = TestNats::new().await;
//!     let session = NatsSession::from_client(nats.client());
//! }
//! ```

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "nats")]
mod nats;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "nats")]
pub use nats::TestNats;
