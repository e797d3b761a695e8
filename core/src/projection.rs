//! Read-model types and the storage traits the projection engine writes
//! through.
//!
//! # Overview
//!
//! The engine maintains one [`CourseProgress`] record per learning-materials
//! id. All mutation goes through two narrow, injected abstractions:
//!
//! - [`ProgressStore`]: keyed record storage with an atomic per-key
//!   read-modify-write ([`ProgressStore::upsert`]) and point lookup.
//! - [`CorrelationIndex`]: the user-id ↔ materials-id mapping built from
//!   `LearningMaterialsUrlWasGenerated` events, so events from either stream
//!   can be routed to the same record.
//!
//! Both traits have in-memory implementations (testing crate) and PostgreSQL
//! implementations (projections crate). Keeping the store injected rather
//! than a process-wide singleton is what makes the engine testable with an
//! in-memory fake.

use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Error type for projection operations.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// Storage backend unreachable or a query failed.
    ///
    /// Propagated to the delivery caller; the event is not marked applied,
    /// so the upstream's retry redelivers it.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The correlation index observed a second, different identifier for an
    /// already-mapped key (in either direction).
    ///
    /// This indicates a violated upstream invariant. The existing mapping is
    /// never silently overwritten.
    #[error("Conflicting correlation mapping for {key}: kept '{existing}', refused '{incoming}'")]
    ConflictingMapping {
        /// The already-mapped key, e.g. `course-user user-1`.
        key: String,
        /// The identifier already recorded for that key.
        existing: String,
        /// The conflicting identifier carried by the incoming event.
        incoming: String,
    },
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Denormalized course-progress record, one per learning-materials id.
///
/// # Lifecycle
///
/// Created on the first event observed for its key and never deleted by the
/// projection. `course_user_id` is `None` only while the record is a
/// placeholder: a task event arrived before the correlating
/// `LearningMaterialsUrlWasGenerated` event, which later fills the user id
/// without touching the counter.
///
/// # Invariant
///
/// `completed_tasks` is the net of completions minus uncompletions applied
/// so far, clamped at zero. [`CourseProgress::uncomplete_task`] can never
/// drive it negative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseProgress {
    /// Primary key.
    pub learning_materials_id: String,
    /// The user the materials were issued to; `None` while unresolved.
    pub course_user_id: Option<String>,
    /// Net number of completed tasks, never negative.
    pub completed_tasks: u64,
}

impl CourseProgress {
    /// A fresh record for materials issued to a known user.
    #[must_use]
    pub fn new(
        learning_materials_id: impl Into<String>,
        course_user_id: impl Into<String>,
    ) -> Self {
        Self {
            learning_materials_id: learning_materials_id.into(),
            course_user_id: Some(course_user_id.into()),
            completed_tasks: 0,
        }
    }

    /// A placeholder record created by a task event that outran its
    /// correlating `LearningMaterialsUrlWasGenerated` event.
    #[must_use]
    pub fn unresolved(learning_materials_id: impl Into<String>) -> Self {
        Self {
            learning_materials_id: learning_materials_id.into(),
            course_user_id: None,
            completed_tasks: 0,
        }
    }

    /// Record one completed task.
    pub const fn complete_task(&mut self) {
        self.completed_tasks = self.completed_tasks.saturating_add(1);
    }

    /// Record one uncompleted task, clamped at a floor of zero.
    ///
    /// Uncompleting with a counter already at zero is a no-op on the stored
    /// value, not an error.
    pub const fn uncomplete_task(&mut self) {
        self.completed_tasks = self.completed_tasks.saturating_sub(1);
    }

    /// Fill in the course-user id if it is still unresolved.
    ///
    /// An already-resolved record is left untouched, which keeps replayed
    /// `LearningMaterialsUrlWasGenerated` events from regressing state.
    pub fn resolve_course_user(&mut self, course_user_id: impl Into<String>) {
        if self.course_user_id.is_none() {
            self.course_user_id = Some(course_user_id.into());
        }
    }
}

/// Keyed storage for [`CourseProgress`] records.
///
/// # Atomicity
///
/// [`ProgressStore::upsert`] is the only write path and must apply the
/// mutator as an atomic read-modify-write for its key: two concurrent
/// upserts of the same key may not lose an update. Different keys must not
/// block each other beyond what the backend requires. No cross-key
/// transactions exist.
pub trait ProgressStore: Send + Sync {
    /// Atomically read, mutate, and write the record for one key.
    ///
    /// The mutator receives the current record (`None` if the key is new)
    /// and returns the record to store. The stored record is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend is unreachable or
    /// the write fails; in that case nothing was stored.
    fn upsert<F>(
        &self,
        learning_materials_id: &str,
        mutate: F,
    ) -> impl Future<Output = Result<CourseProgress>> + Send
    where
        F: FnOnce(Option<CourseProgress>) -> CourseProgress + Send;

    /// Point lookup of the latest committed record for one key.
    ///
    /// Reads are eventually consistent with respect to event delivery:
    /// a write that has not yet been applied is not observed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend is unreachable.
    fn get(
        &self,
        learning_materials_id: &str,
    ) -> impl Future<Output = Result<Option<CourseProgress>>> + Send;
}

/// Bidirectional course-user ↔ learning-materials mapping.
///
/// Built exclusively from `LearningMaterialsUrlWasGenerated` events and used
/// only to resolve identifiers; it never touches the read-model store.
pub trait CorrelationIndex: Send + Sync {
    /// Record a user → materials mapping.
    ///
    /// Idempotent: re-recording the same pair is a no-op, so replay is safe.
    /// The read-then-write must be atomic per pair so two concurrent
    /// recordings cannot create duplicate mappings.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::ConflictingMapping`] if either identifier
    /// is already mapped to a different counterpart, and
    /// [`ProjectionError::Storage`] if the backend fails.
    fn record_mapping(
        &self,
        course_user_id: &str,
        learning_materials_id: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Resolve the learning-materials id issued to a course user.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn resolve_by_user(
        &self,
        course_user_id: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Resolve the course user a set of learning materials was issued to.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the backend fails.
    fn resolve_by_materials(
        &self,
        learning_materials_id: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}
