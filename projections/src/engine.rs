//! The course-progress projection engine.
//!
//! # Overview
//!
//! [`ProjectionEngine`] consumes [`DomainEvent`]s one at a time via
//! [`ProjectionEngine::event_occurred`] and folds them into one
//! [`CourseProgress`] record per learning-materials id. It owns all writes to
//! the [`ProgressStore`] and the [`CorrelationIndex`]; readers query the
//! store independently and see eventually-consistent state.
//!
//! # Delivery contract
//!
//! The upstream event source delivers at-least-once, with order preserved
//! within a stream and no ordering across streams. The engine keeps a version
//! cursor per stream:
//!
//! - an event at or below the cursor is a replay and is ignored
//!   ([`ApplyOutcome::Duplicate`]);
//! - an event beyond the cursor's immediate successor is a gap; it is held
//!   back, never applied out of order and never dropped
//!   ([`ApplyOutcome::Buffered`]);
//! - the exact successor is applied, and any held-back successors are then
//!   drained in version order.
//!
//! # Concurrency
//!
//! Each stream has its own async mutex, so delivery workers for distinct
//! streams proceed in parallel; there is no engine-wide lock. Two streams
//! feeding the same record (the URL stream is keyed by user, the task stream
//! by materials id) are serialized by the store's atomic per-key upsert, not
//! by the engine.
//!
//! # Early task events
//!
//! A task event whose `LearningMaterialsUrlWasGenerated` event has not been
//! observed yet creates a placeholder record with an unresolved user id and
//! the counter initialized from that event. The generating event later fills
//! in the user id and leaves the counter untouched, so no event is ever
//! silently dropped and replaying the generating event cannot regress state.

use course_progress_core::event::{CourseEvent, DomainEvent};
use course_progress_core::projection::{
    CorrelationIndex, CourseProgress, ProgressStore, Result,
};
use course_progress_core::stream::{EventStreamName, Version};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// How the engine disposed of one delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event (and possibly buffered successors) mutated the read model.
    Applied,
    /// The event's version is at or below the stream cursor; redelivery of
    /// something already applied. No observable change.
    Duplicate,
    /// The event's version leaves a gap; it is held back until its
    /// predecessor arrives. No observable change yet.
    Buffered,
}

/// Per-stream application progress: the last applied version plus any
/// events that arrived beyond a gap, keyed by version.
#[derive(Debug, Default)]
struct StreamCursor {
    last_applied: Option<Version>,
    held_back: BTreeMap<u64, DomainEvent>,
}

impl StreamCursor {
    fn next_expected(&self) -> Version {
        self.last_applied.map_or(Version::FIRST, Version::next)
    }
}

/// Event-sourced projection engine for the course-progress read model.
///
/// Generic over the record store and correlation index so production code
/// can run against PostgreSQL while tests use the in-memory fakes from
/// `course-progress-testing`.
///
/// # Example
///
/// ```ignore
/// let engine = ProjectionEngine::new(store, index);
///
/// engine.event_occurred(event).await?;
///
/// let progress = engine.find_by_learning_materials_id("lm-1").await?;
/// ```
pub struct ProjectionEngine<S, C>
where
    S: ProgressStore,
    C: CorrelationIndex,
{
    store: S,
    index: C,
    streams: Mutex<HashMap<EventStreamName, Arc<Mutex<StreamCursor>>>>,
}

impl<S, C> ProjectionEngine<S, C>
where
    S: ProgressStore,
    C: CorrelationIndex,
{
    /// Create an engine with empty stream cursors (fresh consumer).
    #[must_use]
    pub fn new(store: S, index: C) -> Self {
        Self {
            store,
            index,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Create an engine resuming from previously applied stream versions.
    ///
    /// A restarted consumer seeds the cursors it had persisted; redelivered
    /// events at or below a seeded version are treated as duplicates, so no
    /// effect is processed twice.
    #[must_use]
    pub fn resume(
        store: S,
        index: C,
        cursors: impl IntoIterator<Item = (EventStreamName, Version)>,
    ) -> Self {
        let streams = cursors
            .into_iter()
            .map(|(stream, version)| {
                (
                    stream,
                    Arc::new(Mutex::new(StreamCursor {
                        last_applied: Some(version),
                        held_back: BTreeMap::new(),
                    })),
                )
            })
            .collect();
        Self {
            store,
            index,
            streams: Mutex::new(streams),
        }
    }

    /// Consume one delivered event.
    ///
    /// This is the inbound delivery function invoked by the event source,
    /// at-least-once per event. Callers get no read-after-write guarantee;
    /// readers needing confirmation poll the read accessors with a bounded
    /// retry.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Storage`]: the store or index was unreachable.
    ///   The event is not marked applied; the caller's retry redelivers it.
    /// - [`ProjectionError::ConflictingMapping`]: the event carries a
    ///   mapping that contradicts the correlation index. The read model is
    ///   left unmodified and the stream cursor is not advanced.
    ///
    /// [`ProjectionError::Storage`]: course_progress_core::projection::ProjectionError::Storage
    /// [`ProjectionError::ConflictingMapping`]: course_progress_core::projection::ProjectionError::ConflictingMapping
    pub async fn event_occurred(&self, event: DomainEvent) -> Result<ApplyOutcome> {
        let cursor = self.stream_cursor(&event.stream_name).await;
        let mut cursor = cursor.lock().await;

        let expected = cursor.next_expected();
        if event.stream_version < expected {
            tracing::debug!(
                event_id = %event.id,
                event_type = event.event_type(),
                stream = %event.stream_name,
                version = %event.stream_version,
                "Ignoring redelivery of already-applied event"
            );
            return Ok(ApplyOutcome::Duplicate);
        }
        if event.stream_version > expected {
            tracing::warn!(
                event_id = %event.id,
                event_type = event.event_type(),
                stream = %event.stream_name,
                version = %event.stream_version,
                expected = %expected,
                "Version gap detected, holding event back"
            );
            cursor.held_back.insert(event.stream_version.value(), event);
            return Ok(ApplyOutcome::Buffered);
        }

        self.apply(&event).await?;
        cursor.last_applied = Some(event.stream_version);
        self.drain_held_back(&mut cursor).await?;
        Ok(ApplyOutcome::Applied)
    }

    /// Latest committed record for a learning-materials id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store is unreachable.
    pub async fn find_by_learning_materials_id(
        &self,
        learning_materials_id: &str,
    ) -> Result<Option<CourseProgress>> {
        self.store.get(learning_materials_id).await
    }

    /// Latest committed record for a course user, resolved through the
    /// correlation index.
    ///
    /// Returns `None` if no `LearningMaterialsUrlWasGenerated` event has
    /// been observed for this user yet.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the index or store is unreachable.
    pub async fn find_by_course_user_id(
        &self,
        course_user_id: &str,
    ) -> Result<Option<CourseProgress>> {
        match self.index.resolve_by_user(course_user_id).await? {
            Some(learning_materials_id) => self.store.get(&learning_materials_id).await,
            None => Ok(None),
        }
    }

    /// Last applied version for a stream, if any event has been applied.
    ///
    /// This is the value a consumer persists as its checkpoint and feeds
    /// back into [`ProjectionEngine::resume`] after a restart.
    pub async fn last_applied(&self, stream: &EventStreamName) -> Option<Version> {
        let cursor = self.stream_cursor(stream).await;
        let cursor = cursor.lock().await;
        cursor.last_applied
    }

    /// Number of events currently held back behind a version gap.
    pub async fn held_back(&self, stream: &EventStreamName) -> usize {
        let cursor = self.stream_cursor(stream).await;
        let cursor = cursor.lock().await;
        cursor.held_back.len()
    }

    async fn stream_cursor(&self, stream: &EventStreamName) -> Arc<Mutex<StreamCursor>> {
        let mut streams = self.streams.lock().await;
        streams.entry(stream.clone()).or_default().clone()
    }

    /// Apply buffered direct successors after a gap closed.
    ///
    /// If the store fails mid-drain, the failing event goes back into the
    /// buffer; the upstream's redelivery of it will retry the application.
    async fn drain_held_back(&self, cursor: &mut StreamCursor) -> Result<()> {
        // Drop buffered copies the cursor has already passed; they exist
        // when a redelivery of a rebuffered event was applied directly.
        let next = cursor.next_expected().value();
        cursor.held_back = cursor.held_back.split_off(&next);

        while let Some(event) = cursor.held_back.remove(&cursor.next_expected().value()) {
            match self.apply(&event).await {
                Ok(()) => {
                    tracing::debug!(
                        event_id = %event.id,
                        stream = %event.stream_name,
                        version = %event.stream_version,
                        "Applied held-back successor"
                    );
                    cursor.last_applied = Some(event.stream_version);
                }
                Err(err) => {
                    cursor.held_back.insert(event.stream_version.value(), event);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Dispatch one event to its handler. Each handler's store mutation is a
    /// single atomic upsert, so an event's effect is never partially applied.
    async fn apply(&self, event: &DomainEvent) -> Result<()> {
        match &event.payload {
            CourseEvent::LearningMaterialsUrlWasGenerated {
                learning_materials_id,
                course_user_id,
                materials_url: _,
            } => {
                // Conflicts surface here, before the record is touched.
                self.index
                    .record_mapping(course_user_id, learning_materials_id)
                    .await?;

                let key = learning_materials_id.clone();
                let user = course_user_id.clone();
                let stored = self
                    .store
                    .upsert(learning_materials_id, move |existing| match existing {
                        // First observation: fresh record, counter at zero.
                        None => CourseProgress::new(key, user),
                        // Replay or placeholder: fill the user id if it is
                        // still unresolved, never reset the counter.
                        Some(mut progress) => {
                            progress.resolve_course_user(user);
                            progress
                        }
                    })
                    .await?;

                tracing::info!(
                    event_id = %event.id,
                    learning_materials_id = %stored.learning_materials_id,
                    course_user_id = %course_user_id,
                    completed_tasks = stored.completed_tasks,
                    "Applied LearningMaterialsUrlWasGenerated"
                );
            }

            CourseEvent::TaskWasCompleted {
                learning_materials_id,
                task_id,
            } => {
                let key = learning_materials_id.clone();
                let stored = self
                    .store
                    .upsert(learning_materials_id, move |existing| {
                        let mut progress =
                            existing.unwrap_or_else(|| CourseProgress::unresolved(key));
                        progress.complete_task();
                        progress
                    })
                    .await?;

                tracing::info!(
                    event_id = %event.id,
                    learning_materials_id = %stored.learning_materials_id,
                    task_id = %task_id,
                    completed_tasks = stored.completed_tasks,
                    unresolved = stored.course_user_id.is_none(),
                    "Applied TaskWasCompleted"
                );
            }

            CourseEvent::TaskWasUncompleted {
                learning_materials_id,
                task_id,
            } => {
                let key = learning_materials_id.clone();
                let stored = self
                    .store
                    .upsert(learning_materials_id, move |existing| {
                        let mut progress =
                            existing.unwrap_or_else(|| CourseProgress::unresolved(key));
                        // Clamped at zero; uncompleting at zero is a no-op.
                        progress.uncomplete_task();
                        progress
                    })
                    .await?;

                tracing::info!(
                    event_id = %event.id,
                    learning_materials_id = %stored.learning_materials_id,
                    task_id = %task_id,
                    completed_tasks = stored.completed_tasks,
                    "Applied TaskWasUncompleted"
                );
            }
        }
        Ok(())
    }
}
