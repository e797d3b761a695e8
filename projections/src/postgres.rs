//! `PostgreSQL` implementations of the read-model storage traits.
//!
//! # Overview
//!
//! Persistent adapters for deployments keeping the course-progress read
//! model in `PostgreSQL`:
//!
//! - [`PostgresProgressStore`]: `course_progress` table, one row per
//!   learning-materials id
//! - [`PostgresCorrelationIndex`]: `course_correlations` table, unique in
//!   both directions
//!
//! The read side can (and for true CQRS should) live on a separate database
//! from the event store; both types offer a `new_with_separate_db`
//! constructor for that.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE course_progress (
//!     learning_materials_id TEXT PRIMARY KEY,
//!     course_user_id TEXT,
//!     completed_tasks BIGINT NOT NULL DEFAULT 0,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE course_correlations (
//!     course_user_id TEXT PRIMARY KEY,
//!     learning_materials_id TEXT NOT NULL UNIQUE,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! # Atomicity
//!
//! `upsert` runs `SELECT … FOR UPDATE` plus an `ON CONFLICT` upsert inside
//! one transaction, so concurrent upserts of the same key serialize on the
//! row lock and no update is lost. `record_mapping` checks both mapping
//! directions under the same row locks before inserting; an insert that
//! loses a race with a concurrent competing pair re-reads the committed
//! winner and surfaces the conflict.

use course_progress_core::projection::{
    CorrelationIndex, CourseProgress, ProgressStore, ProjectionError, Result,
};
use sqlx::postgres::{PgPool, PgPoolOptions};

type ProgressRow = (String, Option<String>, i64);

#[allow(clippy::cast_sign_loss)] // Counter is clamped non-negative before storage
fn row_to_progress(row: ProgressRow) -> CourseProgress {
    let (learning_materials_id, course_user_id, completed_tasks) = row;
    CourseProgress {
        learning_materials_id,
        course_user_id,
        completed_tasks: completed_tasks as u64,
    }
}

/// PostgreSQL-backed [`ProgressStore`].
///
/// # Example
///
/// ```ignore
/// use course_progress_projections::postgres::PostgresProgressStore;
///
/// let store = PostgresProgressStore::new_with_separate_db(
///     "postgres://localhost/read_models",
/// ).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresProgressStore {
    pool: PgPool,
}

impl PostgresProgressStore {
    /// Create a store using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store with its own connection to a (typically separate)
    /// read-model database.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn new_with_separate_db(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10) // Reasonable default for projection traffic
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run database migrations for the read-model tables.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool, for custom queries.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl ProgressStore for PostgresProgressStore {
    async fn upsert<F>(&self, learning_materials_id: &str, mutate: F) -> Result<CourseProgress>
    where
        F: FnOnce(Option<CourseProgress>) -> CourseProgress + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to begin upsert: {e}")))?;

        // Row lock serializes concurrent upserts of the same key.
        let existing: Option<ProgressRow> = sqlx::query_as(
            "SELECT learning_materials_id, course_user_id, completed_tasks
             FROM course_progress
             WHERE learning_materials_id = $1
             FOR UPDATE",
        )
        .bind(learning_materials_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to read for upsert: {e}")))?;

        let updated = mutate(existing.map(row_to_progress));

        // Counter fits BIGINT; wrapping would need 2^63 completions.
        #[allow(clippy::cast_possible_wrap)]
        let completed_tasks = updated.completed_tasks as i64;

        sqlx::query(
            "INSERT INTO course_progress
             (learning_materials_id, course_user_id, completed_tasks, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (learning_materials_id) DO UPDATE
             SET course_user_id = EXCLUDED.course_user_id,
                 completed_tasks = EXCLUDED.completed_tasks,
                 updated_at = now()",
        )
        .bind(&updated.learning_materials_id)
        .bind(&updated.course_user_id)
        .bind(completed_tasks)
        .execute(&mut *tx)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to write upsert: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to commit upsert: {e}")))?;

        Ok(updated)
    }

    async fn get(&self, learning_materials_id: &str) -> Result<Option<CourseProgress>> {
        let row: Option<ProgressRow> = sqlx::query_as(
            "SELECT learning_materials_id, course_user_id, completed_tasks
             FROM course_progress
             WHERE learning_materials_id = $1",
        )
        .bind(learning_materials_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to get course progress: {e}")))?;

        Ok(row.map(row_to_progress))
    }
}

/// PostgreSQL-backed [`CorrelationIndex`].
#[derive(Clone)]
pub struct PostgresCorrelationIndex {
    pool: PgPool,
}

impl PostgresCorrelationIndex {
    /// Create an index using an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an index with its own connection to a separate database.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn new_with_separate_db(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5) // Mappings are low-volume
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CorrelationIndex for PostgresCorrelationIndex {
    async fn record_mapping(&self, course_user_id: &str, learning_materials_id: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to begin mapping: {e}")))?;

        // Lock any row touching either side of the pair, then check both
        // directions before inserting.
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT course_user_id, learning_materials_id
             FROM course_correlations
             WHERE course_user_id = $1 OR learning_materials_id = $2
             FOR UPDATE",
        )
        .bind(course_user_id)
        .bind(learning_materials_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to read mappings: {e}")))?;

        for (existing_user, existing_materials) in &rows {
            if existing_user == course_user_id && existing_materials != learning_materials_id {
                return Err(ProjectionError::ConflictingMapping {
                    key: format!("course-user {course_user_id}"),
                    existing: existing_materials.clone(),
                    incoming: learning_materials_id.to_string(),
                });
            }
            if existing_materials == learning_materials_id && existing_user != course_user_id {
                return Err(ProjectionError::ConflictingMapping {
                    key: format!("learning-materials {learning_materials_id}"),
                    existing: existing_user.clone(),
                    incoming: course_user_id.to_string(),
                });
            }
        }
        if rows
            .iter()
            .any(|(user, materials)| user == course_user_id && materials == learning_materials_id)
        {
            // Replay of an already-recorded pair.
            return Ok(());
        }

        let inserted = sqlx::query(
            "INSERT INTO course_correlations (course_user_id, learning_materials_id, created_at)
             VALUES ($1, $2, now())
             ON CONFLICT DO NOTHING",
        )
        .bind(course_user_id)
        .bind(learning_materials_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to record mapping: {e}")))?;

        // `FOR UPDATE` cannot lock rows that do not exist yet, so a
        // concurrent transaction can commit a competing pair between the
        // check above and this insert. Zero rows affected means the insert
        // hit such a row; re-read and compare against the committed winner.
        if inserted.rows_affected() == 0 {
            let winner: Option<(String,)> = sqlx::query_as(
                "SELECT learning_materials_id FROM course_correlations WHERE course_user_id = $1",
            )
            .bind(course_user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to re-check mapping: {e}")))?;

            match winner {
                Some((existing_materials,)) if existing_materials == learning_materials_id => {
                    // The race recorded the identical pair.
                }
                Some((existing_materials,)) => {
                    return Err(ProjectionError::ConflictingMapping {
                        key: format!("course-user {course_user_id}"),
                        existing: existing_materials,
                        incoming: learning_materials_id.to_string(),
                    });
                }
                None => {
                    let (existing_user,): (String,) = sqlx::query_as(
                        "SELECT course_user_id FROM course_correlations
                         WHERE learning_materials_id = $1",
                    )
                    .bind(learning_materials_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| {
                        ProjectionError::Storage(format!("Failed to re-check mapping: {e}"))
                    })?;
                    return Err(ProjectionError::ConflictingMapping {
                        key: format!("learning-materials {learning_materials_id}"),
                        existing: existing_user,
                        incoming: course_user_id.to_string(),
                    });
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to commit mapping: {e}")))?;

        Ok(())
    }

    async fn resolve_by_user(&self, course_user_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT learning_materials_id FROM course_correlations WHERE course_user_id = $1",
        )
        .bind(course_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to resolve by user: {e}")))?;

        Ok(row.map(|(learning_materials_id,)| learning_materials_id))
    }

    async fn resolve_by_materials(&self, learning_materials_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT course_user_id FROM course_correlations WHERE learning_materials_id = $1",
        )
        .bind(learning_materials_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProjectionError::Storage(format!("Failed to resolve by materials: {e}")))?;

        Ok(row.map(|(course_user_id,)| course_user_id))
    }
}
