//! # Course Progress Core
//!
//! Core types and traits for the course-progress read-model projection.
//!
//! The projection consumes two independent event streams (per-user
//! learning-materials URL issuance and per-materials task completion) and
//! folds them into one queryable [`CourseProgress`] record per
//! learning-materials id.
//!
//! This crate defines the seams the engine works through:
//!
//! - [`stream`]: stream addressing ([`EventStreamName`]) and per-stream
//!   versioning ([`Version`])
//! - [`event`]: the [`DomainEvent`] envelope and the closed
//!   [`CourseEvent`] payload enum
//! - [`projection`]: the [`CourseProgress`] read model and the
//!   [`ProgressStore`] / [`CorrelationIndex`] storage traits
//!
//! The engine itself lives in `course-progress-projections`; in-memory trait
//! implementations for tests live in `course-progress-testing`.

pub mod event;
pub mod projection;
pub mod stream;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub use event::{CourseEvent, DomainEvent, Event, EventError, EventMetadata};
pub use projection::{CorrelationIndex, CourseProgress, ProgressStore, ProjectionError};
pub use stream::{EventStreamName, Version};
