//! # Course Progress Testing
//!
//! Testing utilities for the course-progress projection.
//!
//! This crate provides:
//! - In-memory implementations of the storage traits
//!   ([`InMemoryProgressStore`], [`InMemoryCorrelationIndex`])
//! - Domain-event builders ([`fixtures`])
//! - Expectation polling for eventually-consistent reads ([`poll`])
//!
//! ## Example
//!
//! ```ignore
//! use course_progress_projections::ProjectionEngine;
//! use course_progress_testing::{
//!     InMemoryCorrelationIndex, InMemoryProgressStore, fixtures, poll::eventually,
//! };
//!
//! #[tokio::test]
//! async fn tracks_completions() {
//!     let store = InMemoryProgressStore::new();
//!     let engine = ProjectionEngine::new(store.clone(), InMemoryCorrelationIndex::new());
//!
//!     engine.event_occurred(fixtures::url_generated(1, "user-1", "lm-1")).await.unwrap();
//!
//!     let probe = store.clone();
//!     let progress = eventually(move || {
//!         let store = probe.clone();
//!         async move { store.snapshot("lm-1") }
//!     })
//!     .await;
//!     assert_eq!(progress.completed_tasks, 0);
//! }
//! ```

pub mod fixtures;
pub mod poll;
pub mod projection_mocks;

// Re-export commonly used items
pub use poll::{eventually, eventually_with};
pub use projection_mocks::{InMemoryCorrelationIndex, InMemoryProgressStore};

/// Install an env-filtered fmt subscriber for test logs.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
