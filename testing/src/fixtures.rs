//! Builders for well-formed domain events.
//!
//! Each builder produces a [`DomainEvent`] with a fresh v4 UUID, the current
//! timestamp, fresh causal metadata, and the stream name the payload type
//! belongs on. Tests control only what matters: the ids and the per-stream
//! version.

#![allow(clippy::expect_used)] // Fixture inputs are test-controlled and non-empty
#![allow(clippy::missing_panics_doc)]

use course_progress_core::event::{CourseEvent, DomainEvent, EventMetadata};
use course_progress_core::stream::{EventStreamName, Version};
use chrono::Utc;
use uuid::Uuid;

fn envelope(payload: CourseEvent, stream_name: EventStreamName, version: u64) -> DomainEvent {
    DomainEvent {
        id: Uuid::new_v4(),
        payload,
        occurred_at: Utc::now(),
        metadata: EventMetadata::new(Uuid::new_v4().to_string(), Uuid::new_v4().to_string()),
        stream_name,
        stream_version: Version::new(version),
    }
}

/// A `LearningMaterialsUrlWasGenerated` event on the user's materials-url
/// stream.
#[must_use]
pub fn url_generated(
    stream_version: u64,
    course_user_id: &str,
    learning_materials_id: &str,
) -> DomainEvent {
    let stream_name =
        EventStreamName::materials_url(course_user_id).expect("fixture user id is non-empty");
    envelope(
        CourseEvent::LearningMaterialsUrlWasGenerated {
            learning_materials_id: learning_materials_id.to_string(),
            course_user_id: course_user_id.to_string(),
            materials_url: format!("https://materials.example/{learning_materials_id}"),
        },
        stream_name,
        stream_version,
    )
}

/// A `TaskWasCompleted` event on the materials-tasks stream.
#[must_use]
pub fn task_completed(
    stream_version: u64,
    learning_materials_id: &str,
    task_id: &str,
) -> DomainEvent {
    let stream_name = EventStreamName::materials_tasks(learning_materials_id)
        .expect("fixture materials id is non-empty");
    envelope(
        CourseEvent::TaskWasCompleted {
            learning_materials_id: learning_materials_id.to_string(),
            task_id: task_id.to_string(),
        },
        stream_name,
        stream_version,
    )
}

/// A `TaskWasUncompleted` event on the materials-tasks stream.
#[must_use]
pub fn task_uncompleted(
    stream_version: u64,
    learning_materials_id: &str,
    task_id: &str,
) -> DomainEvent {
    let stream_name = EventStreamName::materials_tasks(learning_materials_id)
        .expect("fixture materials id is non-empty");
    envelope(
        CourseEvent::TaskWasUncompleted {
            learning_materials_id: learning_materials_id.to_string(),
            task_id: task_id.to_string(),
        },
        stream_name,
        stream_version,
    )
}
