//! Domain events for course progress.
//!
//! Events are immutable facts produced by the upstream event store and are
//! only ever read by the projection engine. The payload is a closed enum
//! ([`CourseEvent`]), so adding an event type is a compile-time-checked
//! extension of every dispatch site.
//!
//! # Wire format
//!
//! Events are serialized with `bincode`, matching the rest of the stack:
//! binary, compact, and fast for all-Rust producers and consumers.
//!
//! # Example
//!
//! ```
//! use course_progress_core::event::{CourseEvent, Event};
//!
//! let payload = CourseEvent::TaskWasCompleted {
//!     learning_materials_id: "lm-1".to_string(),
//!     task_id: "task-1".to_string(),
//! };
//! assert_eq!(payload.event_type(), "TaskWasCompleted.v1");
//! ```

use crate::stream::{EventStreamName, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

/// Error types for event serialization.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize an event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// An immutable fact that can be stored in an event stream and replayed.
///
/// # Event Naming Convention
///
/// [`Event::event_type`] returns a stable string identifier with a version
/// suffix (`"TaskWasCompleted.v1"`), used for logging, routing, and schema
/// evolution.
pub trait Event: Send + Sync + 'static {
    /// Stable type identifier for this event, including a schema version.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the event cannot be
    /// serialized; rare with bincode.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are
    /// corrupted or encode a different event type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// The closed set of course-progress event payloads.
///
/// `LearningMaterialsUrlWasGenerated` events arrive on `materials-url`
/// streams (keyed by course-user id); the two task events arrive on
/// `materials-tasks` streams (keyed by learning-materials id). Every variant
/// carries the learning-materials id, so a payload always identifies the
/// read-model record it targets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseEvent {
    /// A per-user learning-materials access URL was issued.
    ///
    /// The only event that carries both identifiers, and therefore the only
    /// source of correlation-index entries.
    LearningMaterialsUrlWasGenerated {
        /// Primary key of the read-model record.
        learning_materials_id: String,
        /// The user the materials were issued to.
        course_user_id: String,
        /// The issued access URL.
        materials_url: String,
    },

    /// A task within the learning materials was completed.
    TaskWasCompleted {
        /// Primary key of the read-model record.
        learning_materials_id: String,
        /// The completed task.
        task_id: String,
    },

    /// A previously completed task was marked not completed again.
    TaskWasUncompleted {
        /// Primary key of the read-model record.
        learning_materials_id: String,
        /// The uncompleted task.
        task_id: String,
    },
}

impl CourseEvent {
    /// The learning-materials id this payload targets.
    #[must_use]
    pub fn learning_materials_id(&self) -> &str {
        match self {
            Self::LearningMaterialsUrlWasGenerated {
                learning_materials_id,
                ..
            }
            | Self::TaskWasCompleted {
                learning_materials_id,
                ..
            }
            | Self::TaskWasUncompleted {
                learning_materials_id,
                ..
            } => learning_materials_id,
        }
    }
}

impl Event for CourseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::LearningMaterialsUrlWasGenerated { .. } => {
                "LearningMaterialsUrlWasGenerated.v1"
            }
            Self::TaskWasCompleted { .. } => "TaskWasCompleted.v1",
            Self::TaskWasUncompleted { .. } => "TaskWasUncompleted.v1",
        }
    }
}

/// Causal metadata linking an event to the chain that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Links related events across aggregates.
    pub correlation_id: String,
    /// Links this event to the command or event that caused it.
    pub causation_id: String,
}

impl EventMetadata {
    /// Create metadata from a correlation id and a causation id.
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, causation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            causation_id: causation_id.into(),
        }
    }
}

/// The canonical event envelope delivered to the projection engine.
///
/// Carries identity, causal metadata, and per-stream position around a typed
/// payload. `stream_version` is strictly increasing within a single
/// `stream_name`; no ordering holds across distinct streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Globally unique event id.
    pub id: Uuid,
    /// The typed event payload.
    pub payload: CourseEvent,
    /// When the fact occurred, as recorded by the producer.
    pub occurred_at: DateTime<Utc>,
    /// Causal metadata.
    pub metadata: EventMetadata,
    /// The stream this event belongs to.
    pub stream_name: EventStreamName,
    /// Position within `stream_name`, starting at 1.
    pub stream_version: Version,
}

impl DomainEvent {
    /// Stable type identifier of the payload.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// The learning-materials id the payload targets.
    #[must_use]
    pub fn learning_materials_id(&self) -> &str {
        self.payload.learning_materials_id()
    }
}
