//! Shared error types for the services crate.

use thiserror::Error;

use course_core::model::{CourseId, ProgressError, UserId};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::config::ConfigError;

/// Errors emitted by `ProgressLedger`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressLedgerError {
    /// The record or catalog store could not be reached. Nothing was committed.
    #[error("progress store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    /// Stored data could not be decoded.
    #[error("stored progress is unreadable: {0}")]
    CorruptRecord(String),

    #[error("course not found: {0}")]
    CourseNotFound(CourseId),

    #[error("invalid lesson reference for course {course_id}: {source}")]
    InvalidLessonIndex {
        course_id: CourseId,
        #[source]
        source: ProgressError,
    },

    #[error("progress for {user_id} in {course_id} kept changing; gave up after {attempts} attempts")]
    ConcurrentUpdateConflict {
        user_id: UserId,
        course_id: CourseId,
        attempts: u32,
    },
}

impl From<StorageError> for ProgressLedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(msg) => Self::CorruptRecord(msg),
            other => Self::StoreUnavailable(other),
        }
    }
}

impl ProgressLedgerError {
    /// True when trying the same call again later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::ConcurrentUpdateConflict { .. }
        )
    }

    /// Message suitable for showing to a learner.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) | Self::ConcurrentUpdateConflict { .. } => {
                "We couldn't save your progress right now. Check your connection and try again."
            }
            Self::CorruptRecord(_) => {
                "Your saved progress could not be read. Please contact support."
            }
            Self::CourseNotFound(_) => "This course is no longer available.",
            Self::InvalidLessonIndex { .. } => {
                "That lesson doesn't exist in this course. Reload the course and pick a lesson from the list."
            }
        }
    }
}

/// Errors emitted by `CatalogService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogServiceError {
    #[error("course not found: {0}")]
    CourseNotFound(CourseId),
    #[error(transparent)]
    Invalid(#[from] course_core::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while building learner-facing views.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ViewError {
    #[error("please log in to access this course")]
    Unauthenticated,
    #[error(transparent)]
    Catalog(#[from] CatalogServiceError),
    #[error(transparent)]
    Progress(#[from] ProgressLedgerError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error("no signed-in user")]
    Unauthenticated,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Catalog(#[from] CatalogServiceError),
    #[error(transparent)]
    Progress(#[from] ProgressLedgerError),
}
