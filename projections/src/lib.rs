//! Projection engine and storage adapters for the course-progress read model.
//!
//! # Overview
//!
//! This crate provides:
//! - **[`ProjectionEngine`]**: consumes domain events in per-stream version
//!   order, correlates the two differently-keyed streams, and maintains the
//!   `CourseProgress` read model with idempotent, clamped counter mutations
//! - **`PostgreSQL` adapters**: persistent implementations of the
//!   `ProgressStore` and `CorrelationIndex` traits
//!
//! # CQRS Separation
//!
//! The event store (write side) and the read model are separate concerns;
//! for true CQRS, keep them in separate databases:
//!
//! ```text
//! Event Store DB (Write)  →  delivery  →  Read-Model DB (course_progress)
//! ```
//!
//! # Consuming events
//!
//! ```ignore
//! use course_progress_projections::ProjectionEngine;
//!
//! let engine = ProjectionEngine::new(store, index);
//!
//! // Invoked once per delivered event, at-least-once.
//! engine.event_occurred(event).await?;
//!
//! // Readers poll independently; reads are eventually consistent.
//! let progress = engine.find_by_learning_materials_id("lm-1").await?;
//! ```

pub mod engine;
pub mod postgres;

// Re-export main types for convenience
pub use engine::{ApplyOutcome, ProjectionEngine};
pub use postgres::{PostgresCorrelationIndex, PostgresProgressStore};
