use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{CourseCatalogEntry, CourseId, CourseProgress, ProgressRecord, UserId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A course sub-record together with the version it was read at.
///
/// The version feeds back into `save_course_progress` as the expected
/// version, so a write only lands if nobody else wrote in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedProgress {
    pub progress: CourseProgress,
    pub version: u64,
}

/// Repository contract for the course catalog.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Persist or replace a course and its lessons.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn upsert_course(&self, course: &CourseCatalogEntry) -> Result<(), StorageError>;

    /// Fetch a course by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing course is `Ok(None)`.
    async fn get_course(&self, id: &CourseId) -> Result<Option<CourseCatalogEntry>, StorageError>;

    /// All courses ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_courses(&self) -> Result<Vec<CourseCatalogEntry>, StorageError>;
}

/// Repository contract for per-user progress documents.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Read a user's full record without creating it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing record is `Ok(None)`.
    async fn get_record(&self, user_id: &UserId) -> Result<Option<ProgressRecord>, StorageError>;

    /// Create an empty record if none exists.
    ///
    /// Returns `true` when this call created the record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn create_record(
        &self,
        user_id: &UserId,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Read one course sub-record with its version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn load_course_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<VersionedProgress>, StorageError>;

    /// Atomically write the whole course sub-record if the stored version
    /// still matches `expected_version` (`None` = must not exist yet).
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another writer got there first,
    /// `StorageError::NotFound` if the user record does not exist.
    async fn save_course_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        progress: &CourseProgress,
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError>;
}

#[derive(Debug, Clone)]
struct UserDocument {
    created_at: DateTime<Utc>,
    enrolled_courses: BTreeMap<CourseId, VersionedProgress>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    courses: Arc<Mutex<BTreeMap<CourseId, CourseCatalogEntry>>>,
    users: Arc<Mutex<HashMap<UserId, UserDocument>>>,
    progress_writes: Arc<AtomicU64>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of course sub-records written so far.
    #[must_use]
    pub fn progress_writes(&self) -> u64 {
        self.progress_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn upsert_course(&self, course: &CourseCatalogEntry) -> Result<(), StorageError> {
        let mut guard = self
            .courses
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(course.id().clone(), course.clone());
        Ok(())
    }

    async fn get_course(&self, id: &CourseId) -> Result<Option<CourseCatalogEntry>, StorageError> {
        let guard = self
            .courses
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<CourseCatalogEntry>, StorageError> {
        let guard = self
            .courses
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.values().cloned().collect())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_record(&self, user_id: &UserId) -> Result<Option<ProgressRecord>, StorageError> {
        let guard = self
            .users
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user_id).map(|doc| {
            let courses = doc
                .enrolled_courses
                .iter()
                .map(|(id, v)| (id.clone(), v.progress.clone()))
                .collect();
            ProgressRecord::from_persisted(user_id.clone(), doc.created_at, courses)
        }))
    }

    async fn create_record(
        &self,
        user_id: &UserId,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut guard = self
            .users
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        if guard.contains_key(user_id) {
            return Ok(false);
        }
        guard.insert(
            user_id.clone(),
            UserDocument {
                created_at,
                enrolled_courses: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn load_course_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<VersionedProgress>, StorageError> {
        let guard = self
            .users
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(user_id)
            .and_then(|doc| doc.enrolled_courses.get(course_id))
            .cloned())
    }

    async fn save_course_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        progress: &CourseProgress,
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError> {
        let mut guard = self
            .users
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let doc = guard.get_mut(user_id).ok_or(StorageError::NotFound)?;

        let current = doc.enrolled_courses.get(course_id).map(|v| v.version);
        if current != expected_version {
            return Err(StorageError::Conflict);
        }

        let version = current.map_or(1, |v| v + 1);
        doc.enrolled_courses.insert(
            course_id.clone(),
            VersionedProgress {
                progress: progress.clone(),
                version,
            },
        );
        self.progress_writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }
}

/// Aggregates catalog and progress repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn CatalogRepository>,
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    /// Wrap an existing in-memory repository, keeping a handle for inspection.
    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        let catalog: Arc<dyn CatalogRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo);
        Self { catalog, progress }
    }
}
