//! Behavioral tests for the projection engine against the in-memory fakes.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use course_progress_core::projection::{
    CourseProgress, ProgressStore, ProjectionError, Result,
};
use course_progress_core::stream::{EventStreamName, Version};
use course_progress_projections::{ApplyOutcome, ProjectionEngine};
use course_progress_testing::{
    InMemoryCorrelationIndex, InMemoryProgressStore, fixtures, poll::eventually,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_test::assert_ok;

/// Store wrapper with a budget of upserts it allows before failing, for
/// exercising storage-outage paths.
#[derive(Clone)]
struct FlakyStore {
    inner: InMemoryProgressStore,
    successes_left: Arc<AtomicUsize>,
}

impl FlakyStore {
    fn reliable() -> Self {
        Self {
            inner: InMemoryProgressStore::new(),
            successes_left: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }

    fn allow(&self, upserts: usize) {
        self.successes_left.store(upserts, Ordering::SeqCst);
    }

    fn snapshot(&self, learning_materials_id: &str) -> Option<CourseProgress> {
        self.inner.snapshot(learning_materials_id)
    }
}

impl ProgressStore for FlakyStore {
    async fn upsert<F>(&self, learning_materials_id: &str, mutate: F) -> Result<CourseProgress>
    where
        F: FnOnce(Option<CourseProgress>) -> CourseProgress + Send,
    {
        let left = self.successes_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(ProjectionError::Storage("simulated outage".to_string()));
        }
        if left != usize::MAX {
            self.successes_left.store(left - 1, Ordering::SeqCst);
        }
        self.inner.upsert(learning_materials_id, mutate).await
    }

    async fn get(&self, learning_materials_id: &str) -> Result<Option<CourseProgress>> {
        self.inner.get(learning_materials_id).await
    }
}

fn engine_with_store() -> (
    ProjectionEngine<InMemoryProgressStore, InMemoryCorrelationIndex>,
    InMemoryProgressStore,
    InMemoryCorrelationIndex,
) {
    let store = InMemoryProgressStore::new();
    let index = InMemoryCorrelationIndex::new();
    let engine = ProjectionEngine::new(store.clone(), index.clone());
    (engine, store, index)
}

#[tokio::test]
async fn generating_url_creates_record_at_zero_then_completion_increments() {
    course_progress_testing::init_tracing();
    let (engine, _, _) = engine_with_store();

    let outcome = assert_ok!(
        engine
            .event_occurred(fixtures::url_generated(1, "user-1", "lm-1"))
            .await
    );
    assert_eq!(outcome, ApplyOutcome::Applied);

    let progress = engine
        .find_by_learning_materials_id("lm-1")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(progress.course_user_id.as_deref(), Some("user-1"));
    assert_eq!(progress.completed_tasks, 0);

    assert_ok!(
        engine
            .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
            .await
    );

    let progress = engine
        .find_by_learning_materials_id("lm-1")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(progress.completed_tasks, 1);
}

#[tokio::test]
async fn complete_then_uncomplete_nets_to_zero() {
    let (engine, _, _) = engine_with_store();

    engine
        .event_occurred(fixtures::url_generated(1, "user-1", "lm-1"))
        .await
        .unwrap();
    engine
        .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
        .await
        .unwrap();
    engine
        .event_occurred(fixtures::task_uncompleted(2, "lm-1", "task-1"))
        .await
        .unwrap();

    let progress = engine
        .find_by_learning_materials_id("lm-1")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(progress.course_user_id.as_deref(), Some("user-1"));
    assert_eq!(progress.completed_tasks, 0);
}

#[tokio::test]
async fn uncompleting_with_no_prior_completion_clamps_at_zero() {
    let (engine, _, _) = engine_with_store();

    engine
        .event_occurred(fixtures::url_generated(1, "user-2", "lm-2"))
        .await
        .unwrap();
    let outcome = engine
        .event_occurred(fixtures::task_uncompleted(1, "lm-2", "task-1"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);

    let progress = engine
        .find_by_learning_materials_id("lm-2")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(progress.course_user_id.as_deref(), Some("user-2"));
    assert_eq!(progress.completed_tasks, 0);
}

#[tokio::test]
async fn early_task_event_creates_placeholder_reconciled_by_url_event() {
    let (engine, _, _) = engine_with_store();

    // Task stream outruns the URL stream: placeholder with unresolved user.
    engine
        .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
        .await
        .unwrap();

    let placeholder = engine
        .find_by_learning_materials_id("lm-1")
        .await
        .unwrap()
        .expect("placeholder should exist");
    assert_eq!(placeholder.course_user_id, None);
    assert_eq!(placeholder.completed_tasks, 1);

    // The generating event fills the user id and keeps the counter.
    engine
        .event_occurred(fixtures::url_generated(1, "user-1", "lm-1"))
        .await
        .unwrap();

    let progress = engine
        .find_by_learning_materials_id("lm-1")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(progress.course_user_id.as_deref(), Some("user-1"));
    assert_eq!(progress.completed_tasks, 1);
}

#[tokio::test]
async fn replaying_url_event_after_task_events_does_not_reset_counter() {
    let (engine, _, _) = engine_with_store();

    let url_event = fixtures::url_generated(1, "user-1", "lm-1");
    engine.event_occurred(url_event.clone()).await.unwrap();
    engine
        .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
        .await
        .unwrap();
    engine
        .event_occurred(fixtures::task_completed(2, "lm-1", "task-2"))
        .await
        .unwrap();

    // Redelivery of the creation event, after the counter moved.
    let outcome = engine.event_occurred(url_event).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::Duplicate);

    let progress = engine
        .find_by_learning_materials_id("lm-1")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(progress.completed_tasks, 2);
    assert_eq!(progress.course_user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn redelivering_any_applied_event_changes_nothing() {
    let (engine, store, _) = engine_with_store();

    let events = vec![
        fixtures::url_generated(1, "user-1", "lm-1"),
        fixtures::task_completed(1, "lm-1", "task-1"),
        fixtures::task_completed(2, "lm-1", "task-2"),
        fixtures::task_uncompleted(3, "lm-1", "task-1"),
    ];
    for event in &events {
        engine.event_occurred(event.clone()).await.unwrap();
    }
    let before = store.snapshot("lm-1").expect("record should exist");

    for event in events {
        let outcome = engine.event_occurred(event).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Duplicate);
    }
    assert_eq!(store.snapshot("lm-1"), Some(before));
}

#[tokio::test]
async fn version_gap_is_buffered_and_drained_in_order() {
    let (engine, _, _) = engine_with_store();
    let tasks_stream = EventStreamName::materials_tasks("lm-1").unwrap();

    engine
        .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
        .await
        .unwrap();

    // Version 3 arrives before version 2: held back, not applied.
    let outcome = engine
        .event_occurred(fixtures::task_completed(3, "lm-1", "task-3"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Buffered);
    assert_eq!(engine.held_back(&tasks_stream).await, 1);
    assert_eq!(
        engine
            .find_by_learning_materials_id("lm-1")
            .await
            .unwrap()
            .map(|p| p.completed_tasks),
        Some(1)
    );

    // The gap closes: version 2 applies, then the buffered version 3.
    let outcome = engine
        .event_occurred(fixtures::task_completed(2, "lm-1", "task-2"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);
    assert_eq!(engine.held_back(&tasks_stream).await, 0);
    assert_eq!(engine.last_applied(&tasks_stream).await, Some(Version::new(3)));
    assert_eq!(
        engine
            .find_by_learning_materials_id("lm-1")
            .await
            .unwrap()
            .map(|p| p.completed_tasks),
        Some(3)
    );
}

#[tokio::test]
async fn resumed_engine_treats_checkpointed_versions_as_duplicates() {
    let store = InMemoryProgressStore::new();
    let index = InMemoryCorrelationIndex::new();
    let tasks_stream = EventStreamName::materials_tasks("lm-1").unwrap();

    // Consumer restarted after having applied versions 1 and 2.
    let engine = ProjectionEngine::resume(
        store.clone(),
        index,
        vec![(tasks_stream.clone(), Version::new(2))],
    );

    let outcome = engine
        .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Duplicate);
    let outcome = engine
        .event_occurred(fixtures::task_completed(2, "lm-1", "task-2"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Duplicate);

    let outcome = engine
        .event_occurred(fixtures::task_completed(3, "lm-1", "task-3"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);
    assert_eq!(engine.last_applied(&tasks_stream).await, Some(Version::new(3)));
}

#[tokio::test]
async fn conflicting_materials_for_known_user_is_an_error_and_advances_nothing() {
    let (engine, store, _) = engine_with_store();
    let url_stream = EventStreamName::materials_url("user-1").unwrap();

    engine
        .event_occurred(fixtures::url_generated(1, "user-1", "lm-1"))
        .await
        .unwrap();

    let conflicting = fixtures::url_generated(2, "user-1", "lm-2");
    let err = engine
        .event_occurred(conflicting.clone())
        .await
        .expect_err("conflicting mapping must surface");
    assert!(matches!(err, ProjectionError::ConflictingMapping { .. }));

    // The cursor did not advance and the read model is untouched, so the
    // upstream's redelivery hits the same integrity error.
    assert_eq!(engine.last_applied(&url_stream).await, Some(Version::new(1)));
    assert!(store.snapshot("lm-2").is_none());
    assert!(engine.event_occurred(conflicting).await.is_err());
}

#[tokio::test]
async fn conflicting_user_for_known_materials_is_an_error() {
    let (engine, _, _) = engine_with_store();

    engine
        .event_occurred(fixtures::url_generated(1, "user-1", "lm-1"))
        .await
        .unwrap();

    // A different user's stream claims the same materials.
    let err = engine
        .event_occurred(fixtures::url_generated(1, "user-2", "lm-1"))
        .await
        .expect_err("conflicting mapping must surface");
    assert!(matches!(err, ProjectionError::ConflictingMapping { .. }));
}

#[tokio::test]
async fn storage_failure_leaves_the_event_unapplied_and_redeliverable() {
    let store = FlakyStore::reliable();
    let engine = ProjectionEngine::new(store.clone(), InMemoryCorrelationIndex::new());
    let tasks_stream = EventStreamName::materials_tasks("lm-1").unwrap();
    let event = fixtures::task_completed(1, "lm-1", "task-1");

    store.allow(0);
    let err = engine
        .event_occurred(event.clone())
        .await
        .expect_err("outage must propagate to the delivery caller");
    assert!(matches!(err, ProjectionError::Storage(_)));

    // Nothing was applied: cursor unmoved, no record created.
    assert_eq!(engine.last_applied(&tasks_stream).await, None);
    assert!(store.snapshot("lm-1").is_none());

    // The upstream's redelivery applies normally once storage recovers.
    store.allow(usize::MAX);
    let outcome = assert_ok!(engine.event_occurred(event).await);
    assert_eq!(outcome, ApplyOutcome::Applied);
    assert_eq!(store.snapshot("lm-1").map(|p| p.completed_tasks), Some(1));
}

#[tokio::test]
async fn storage_failure_mid_drain_rebuffers_the_successor() {
    let store = FlakyStore::reliable();
    let engine = ProjectionEngine::new(store.clone(), InMemoryCorrelationIndex::new());
    let tasks_stream = EventStreamName::materials_tasks("lm-1").unwrap();

    engine
        .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
        .await
        .unwrap();
    let outcome = engine
        .event_occurred(fixtures::task_completed(3, "lm-1", "task-3"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Buffered);

    // Version 2 applies, then the outage hits while draining version 3.
    store.allow(1);
    let err = engine
        .event_occurred(fixtures::task_completed(2, "lm-1", "task-2"))
        .await
        .expect_err("drain failure must propagate");
    assert!(matches!(err, ProjectionError::Storage(_)));
    assert_eq!(engine.last_applied(&tasks_stream).await, Some(Version::new(2)));
    assert_eq!(engine.held_back(&tasks_stream).await, 1);
    assert_eq!(store.snapshot("lm-1").map(|p| p.completed_tasks), Some(2));

    // Redelivery of version 3 applies directly and clears the buffer.
    store.allow(usize::MAX);
    let outcome = engine
        .event_occurred(fixtures::task_completed(3, "lm-1", "task-3"))
        .await
        .unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);
    assert_eq!(engine.held_back(&tasks_stream).await, 0);
    assert_eq!(engine.last_applied(&tasks_stream).await, Some(Version::new(3)));
    assert_eq!(store.snapshot("lm-1").map(|p| p.completed_tasks), Some(3));
}

#[tokio::test]
async fn find_by_course_user_resolves_through_the_index() {
    let (engine, _, _) = engine_with_store();

    assert_eq!(engine.find_by_course_user_id("user-1").await.unwrap(), None);

    engine
        .event_occurred(fixtures::url_generated(1, "user-1", "lm-1"))
        .await
        .unwrap();
    engine
        .event_occurred(fixtures::task_completed(1, "lm-1", "task-1"))
        .await
        .unwrap();

    let progress = engine
        .find_by_course_user_id("user-1")
        .await
        .unwrap()
        .expect("record should resolve");
    assert_eq!(progress.learning_materials_id, "lm-1");
    assert_eq!(progress.completed_tasks, 1);
}

#[tokio::test]
async fn readers_observe_writes_by_polling() {
    let (engine, _, _) = engine_with_store();
    let engine = Arc::new(engine);

    // Delivery happens on its own task; the reader only polls.
    let delivering = Arc::clone(&engine);
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        delivering
            .event_occurred(fixtures::url_generated(1, "user-1", "lm-1"))
            .await
            .unwrap();
    });

    let progress = eventually(|| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .find_by_learning_materials_id("lm-1")
                .await
                .ok()
                .flatten()
        }
    })
    .await;
    assert_eq!(progress.course_user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn distinct_streams_progress_independently() {
    let (engine, _, _) = engine_with_store();
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for materials in ["lm-a", "lm-b", "lm-c"] {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for version in 1..=10_u64 {
                engine
                    .event_occurred(fixtures::task_completed(version, materials, "task"))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for materials in ["lm-a", "lm-b", "lm-c"] {
        assert_eq!(
            engine
                .find_by_learning_materials_id(materials)
                .await
                .unwrap()
                .map(|p| p.completed_tasks),
            Some(10)
        );
    }
}
