//! Event stream identification and versioning types.
//!
//! An [`EventStreamName`] addresses one logical event stream by category and
//! owning-entity identifier. Two categories matter for course progress:
//! `materials-url` streams are keyed by a course-user id, `materials-tasks`
//! streams by a learning-materials id. [`Version`] is the per-stream sequence
//! number assigned by the upstream store; it is strictly increasing within a
//! stream and carries no ordering meaning across streams.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stream category for per-user learning-materials URL issuance.
///
/// Streams in this category are keyed by a course-user id.
pub const MATERIALS_URL_CATEGORY: &str = "materials-url";

/// Stream category for per-task completion state.
///
/// Streams in this category are keyed by a learning-materials id.
pub const MATERIALS_TASKS_CATEGORY: &str = "materials-tasks";

/// Error type for constructing or parsing an [`EventStreamName`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid stream name: {0}")]
pub struct InvalidStreamName(String);

/// Identifies a logical event stream by category and owning-entity id.
///
/// The string form is `"{category}:{entity_id}"`. A colon separates the two
/// parts because both relevant categories contain `-` and entity ids may as
/// well (UUIDs do), so the conventional dash-separated form would be
/// ambiguous to parse.
///
/// Equality and hashing are by `(category, entity_id)`, so stream names can
/// key routing tables directly.
///
/// # Examples
///
/// ```
/// use course_progress_core::stream::EventStreamName;
///
/// let stream = EventStreamName::materials_tasks("lm-42").unwrap();
/// assert_eq!(stream.to_string(), "materials-tasks:lm-42");
///
/// let parsed: EventStreamName = "materials-url:user-7".parse().unwrap();
/// assert_eq!(parsed.entity_id(), "user-7");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventStreamName {
    category: String,
    entity_id: String,
}

impl EventStreamName {
    /// Create a stream name from a category and owning-entity id.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStreamName`] if `entity_id` is empty. This is the
    /// only failure mode; categories are application-controlled constants.
    pub fn new(
        category: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Result<Self, InvalidStreamName> {
        let entity_id = entity_id.into();
        if entity_id.is_empty() {
            return Err(InvalidStreamName(
                "entity id cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            category: category.into(),
            entity_id,
        })
    }

    /// Stream name for the materials-URL stream of one course user.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStreamName`] if `course_user_id` is empty.
    pub fn materials_url(course_user_id: impl Into<String>) -> Result<Self, InvalidStreamName> {
        Self::new(MATERIALS_URL_CATEGORY, course_user_id)
    }

    /// Stream name for the task stream of one set of learning materials.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStreamName`] if `learning_materials_id` is empty.
    pub fn materials_tasks(
        learning_materials_id: impl Into<String>,
    ) -> Result<Self, InvalidStreamName> {
        Self::new(MATERIALS_TASKS_CATEGORY, learning_materials_id)
    }

    /// The stream category.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The owning-entity identifier.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl fmt::Display for EventStreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.entity_id)
    }
}

impl FromStr for EventStreamName {
    type Err = InvalidStreamName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, entity_id) = s
            .split_once(':')
            .ok_or_else(|| InvalidStreamName(format!("missing ':' separator in '{s}'")))?;
        if category.is_empty() {
            return Err(InvalidStreamName(format!("empty category in '{s}'")));
        }
        Self::new(category, entity_id)
    }
}

/// Per-stream event sequence number.
///
/// The upstream store assigns versions starting at 1, incrementing by 1 for
/// each event appended to a stream. The projection engine uses them to detect
/// replays (version at or below the cursor) and gaps (version beyond the
/// cursor's successor). Versions from different streams are not comparable in
/// any meaningful way.
///
/// # Examples
///
/// ```
/// use course_progress_core::stream::Version;
///
/// let first = Version::FIRST;
/// assert_eq!(first.value(), 1);
/// assert_eq!(first.next(), Version::new(2));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of the first event in any stream.
    pub const FIRST: Self = Self(1);

    /// Create a `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The next version (current + 1).
    ///
    /// Uses plain arithmetic; `u64::MAX` events in a single stream is not a
    /// realistic concern.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
