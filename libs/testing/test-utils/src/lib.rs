//! Shared test infrastructure
//!
//! - `TestNats`: JetStream-enabled NATS container with automatic cleanup
//!
//! The container tests need a running Docker daemon; they are `#[ignore]`d so
//! `cargo test` stays hermetic. Run them with `cargo test -- --ignored`.
//!
//! ```rust,no_run
//! use test_utils::TestNats;
//!
//! # async fn example() {
//! let nats = TestNats::new().await;
//! let url = nats.connection_string();
//! # }
//! ```

mod nats;

pub use nats::TestNats;
