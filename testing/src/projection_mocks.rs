//! In-memory projection testing utilities
//!
//! Fast, deterministic implementations of the storage traits:
//! - [`InMemoryProgressStore`]: HashMap-backed record storage
//! - [`InMemoryCorrelationIndex`]: HashMap-backed bidirectional mapping
//!
//! Both hold their lock across the whole read-modify-write, giving the same
//! per-key atomicity the PostgreSQL adapters get from row locks.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use course_progress_core::projection::{
    CorrelationIndex, CourseProgress, ProgressStore, ProjectionError, Result,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory [`ProgressStore`] for fast, deterministic testing.
///
/// Cloning shares the underlying map, so a test can keep a handle for
/// assertions while the engine owns another.
///
/// # Example
///
/// ```
/// use course_progress_testing::InMemoryProgressStore;
/// use course_progress_core::projection::ProgressStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryProgressStore::new();
///
/// store.upsert("lm-1", |existing| {
///     let mut progress = existing
///         .unwrap_or_else(|| course_progress_core::CourseProgress::new("lm-1", "user-1"));
///     progress.complete_task();
///     progress
/// }).await?;
///
/// assert_eq!(store.snapshot("lm-1").map(|p| p.completed_tasks), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProgressStore {
    data: Arc<RwLock<HashMap<String, CourseProgress>>>,
}

impl InMemoryProgressStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all records (for test isolation).
    pub fn clear(&self) {
        self.data.write().unwrap().clear();
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().is_empty()
    }

    /// Check if a record exists without going through the trait.
    #[must_use]
    pub fn contains_key(&self, learning_materials_id: &str) -> bool {
        self.data.read().unwrap().contains_key(learning_materials_id)
    }

    /// All record keys, for inspection in tests.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().unwrap().keys().cloned().collect()
    }

    /// Synchronous snapshot of one record, for assertions.
    #[must_use]
    pub fn snapshot(&self, learning_materials_id: &str) -> Option<CourseProgress> {
        self.data.read().unwrap().get(learning_materials_id).cloned()
    }
}

impl ProgressStore for InMemoryProgressStore {
    async fn upsert<F>(&self, learning_materials_id: &str, mutate: F) -> Result<CourseProgress>
    where
        F: FnOnce(Option<CourseProgress>) -> CourseProgress + Send,
    {
        // Write lock held across the mutator: atomic read-modify-write.
        let mut data = self.data.write().unwrap();
        let updated = mutate(data.get(learning_materials_id).cloned());
        data.insert(learning_materials_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn get(&self, learning_materials_id: &str) -> Result<Option<CourseProgress>> {
        Ok(self.data.read().unwrap().get(learning_materials_id).cloned())
    }
}

#[derive(Debug, Default)]
struct Mappings {
    by_user: HashMap<String, String>,
    by_materials: HashMap<String, String>,
}

/// In-memory [`CorrelationIndex`] with both-direction conflict detection.
///
/// # Example
///
/// ```
/// use course_progress_testing::InMemoryCorrelationIndex;
/// use course_progress_core::projection::CorrelationIndex;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let index = InMemoryCorrelationIndex::new();
///
/// index.record_mapping("user-1", "lm-1").await?;
/// index.record_mapping("user-1", "lm-1").await?; // idempotent
///
/// assert_eq!(index.resolve_by_user("user-1").await?, Some("lm-1".to_string()));
/// assert!(index.record_mapping("user-1", "lm-2").await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCorrelationIndex {
    inner: Arc<RwLock<Mappings>>,
}

impl InMemoryCorrelationIndex {
    /// Create a new empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all mappings (for test isolation).
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.by_user.clear();
        inner.by_materials.clear();
    }

    /// Number of recorded mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_user.len()
    }

    /// Check if no mappings are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().by_user.is_empty()
    }
}

impl CorrelationIndex for InMemoryCorrelationIndex {
    async fn record_mapping(&self, course_user_id: &str, learning_materials_id: &str) -> Result<()> {
        // Write lock held across check-then-insert: atomic per pair.
        let mut inner = self.inner.write().unwrap();

        if let Some(existing) = inner.by_user.get(course_user_id) {
            if existing != learning_materials_id {
                return Err(ProjectionError::ConflictingMapping {
                    key: format!("course-user {course_user_id}"),
                    existing: existing.clone(),
                    incoming: learning_materials_id.to_string(),
                });
            }
        }
        if let Some(existing) = inner.by_materials.get(learning_materials_id) {
            if existing != course_user_id {
                return Err(ProjectionError::ConflictingMapping {
                    key: format!("learning-materials {learning_materials_id}"),
                    existing: existing.clone(),
                    incoming: course_user_id.to_string(),
                });
            }
        }

        inner
            .by_user
            .insert(course_user_id.to_string(), learning_materials_id.to_string());
        inner
            .by_materials
            .insert(learning_materials_id.to_string(), course_user_id.to_string());
        Ok(())
    }

    async fn resolve_by_user(&self, course_user_id: &str) -> Result<Option<String>> {
        Ok(self.inner.read().unwrap().by_user.get(course_user_id).cloned())
    }

    async fn resolve_by_materials(&self, learning_materials_id: &str) -> Result<Option<String>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .by_materials
            .get(learning_materials_id)
            .cloned())
    }
}
