use std::sync::Arc;

use course_core::model::{
    Completion, CourseCatalogEntry, CourseId, CourseProgress, LessonIndex, ProgressRecord,
    TotalLessonsPolicy, UserId, compute_percent, percent_for, resolve_resume_position,
};
use storage::repository::{CatalogRepository, ProgressRepository, StorageError};
use tracing::{debug, info, warn};

use crate::Clock;
use crate::config::LedgerConfig;
use crate::error::ProgressLedgerError;

//
// ─── RESULT ────────────────────────────────────────────────────────────────────
//

/// Outcome of `ProgressLedger::mark_lesson_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonCompletion {
    /// The lesson was newly completed and the write committed.
    Recorded { percent: u8 },
    /// The lesson was already complete; nothing was written.
    AlreadyCompleted { percent: u8 },
    /// The course is not in the catalog; nothing was written.
    CourseNotFound { prior_percent: u8 },
}

impl LessonCompletion {
    /// Percentage to show after the call.
    #[must_use]
    pub fn percent(&self) -> u8 {
        match self {
            Self::Recorded { percent } | Self::AlreadyCompleted { percent } => *percent,
            Self::CourseNotFound { prior_percent } => *prior_percent,
        }
    }

    #[must_use]
    pub fn wrote(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Owns the mapping from (user, course) to completion state.
///
/// Writes go through an optimistic read-version / write-if-unchanged loop, so
/// completions from several sessions for the same user all survive.
#[derive(Clone)]
pub struct ProgressLedger {
    clock: Clock,
    config: LedgerConfig,
    catalog: Arc<dyn CatalogRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl ProgressLedger {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: LedgerConfig,
        catalog: Arc<dyn CatalogRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            config,
            catalog,
            progress,
        }
    }

    #[must_use]
    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    /// Current record for `user_id`, or an empty one if none was ever stored.
    ///
    /// Never writes.
    ///
    /// # Errors
    ///
    /// Returns `ProgressLedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn get_progress(&self, user_id: &UserId) -> Result<ProgressRecord, ProgressLedgerError> {
        let record = self.progress.get_record(user_id).await?;
        Ok(record.unwrap_or_else(|| ProgressRecord::empty(user_id.clone())))
    }

    /// Like [`ProgressLedger::get_progress`], but stores an empty record first
    /// if the user has none. Used on sign-in.
    ///
    /// # Errors
    ///
    /// Returns `ProgressLedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn get_or_create_progress(
        &self,
        user_id: &UserId,
    ) -> Result<ProgressRecord, ProgressLedgerError> {
        self.ensure_record(user_id).await?;
        self.progress
            .get_record(user_id)
            .await?
            .ok_or(ProgressLedgerError::StoreUnavailable(StorageError::NotFound))
    }

    /// Progress for a single course, if the user has touched it.
    ///
    /// # Errors
    ///
    /// Returns `ProgressLedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn course_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<CourseProgress>, ProgressLedgerError> {
        let stored = self.progress.load_course_progress(user_id, course_id).await?;
        Ok(stored.map(|v| v.progress))
    }

    /// Percentage for a course's progress bar.
    ///
    /// # Errors
    ///
    /// Returns `ProgressLedgerError::StoreUnavailable` if the store cannot be reached.
    pub async fn percent_for(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<u8, ProgressLedgerError> {
        let record = self.get_progress(user_id).await?;
        if self.config.totals_policy() == TotalLessonsPolicy::Live {
            if let Some(course) = self.catalog.get_course(course_id).await? {
                return Ok(self.percent_against(record.course(course_id), &course));
            }
        }
        Ok(percent_for(course_id, &record))
    }

    /// Mark a lesson complete and return the resulting percentage.
    ///
    /// - Unknown course: `CourseNotFound`, no write.
    /// - Lesson already complete: `AlreadyCompleted`, no write. Under the
    ///   `Live` policy a stored total that no longer matches the catalog is
    ///   rewritten once, so the returned percentage is the stored one.
    /// - Otherwise the whole course sub-record is written in one conditional
    ///   write. If another session wrote first, the latest state is reloaded
    ///   and the lesson reapplied, up to `max_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLessonIndex` if the index is outside the course,
    /// `StoreUnavailable` if a read or write fails, and
    /// `ConcurrentUpdateConflict` once retries are exhausted.
    pub async fn mark_lesson_complete(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        lesson: LessonIndex,
    ) -> Result<LessonCompletion, ProgressLedgerError> {
        let Some(course) = self.catalog.get_course(course_id).await? else {
            let prior_percent = self
                .course_progress(user_id, course_id)
                .await?
                .map_or(0, |p| p.progress_percent());
            warn!(
                user_id = %user_id,
                course_id = %course_id,
                lesson = lesson.value(),
                "completion for unknown course ignored"
            );
            return Ok(LessonCompletion::CourseNotFound { prior_percent });
        };

        let attempts = self.config.max_attempts();
        for attempt in 1..=attempts {
            let stored = self.progress.load_course_progress(user_id, course_id).await?;
            let now = self.clock.now();
            let (mut current, expected_version) = match stored {
                Some(v) => (v.progress, Some(v.version)),
                None => (CourseProgress::seeded(course.total_lessons(), now), None),
            };
            let refreshed = self.apply_totals_policy(&mut current, &course);

            let completion = current.record_completion(lesson, now).map_err(|source| {
                ProgressLedgerError::InvalidLessonIndex {
                    course_id: course_id.clone(),
                    source,
                }
            })?;
            let percent = current.progress_percent();

            if completion == Completion::AlreadyCompleted && !refreshed {
                debug!(user_id = %user_id, course_id = %course_id, lesson = lesson.value(), "lesson already completed");
                return Ok(LessonCompletion::AlreadyCompleted { percent });
            }

            if expected_version.is_none() {
                self.ensure_record(user_id).await?;
            }

            match self
                .progress
                .save_course_progress(user_id, course_id, &current, expected_version)
                .await
            {
                Ok(version) if completion == Completion::AlreadyCompleted => {
                    info!(
                        user_id = %user_id,
                        course_id = %course_id,
                        total = current.total_lessons(),
                        percent,
                        version,
                        "stored lesson total refreshed"
                    );
                    return Ok(LessonCompletion::AlreadyCompleted { percent });
                }
                Ok(version) => {
                    info!(
                        user_id = %user_id,
                        course_id = %course_id,
                        lesson = lesson.value(),
                        percent,
                        version,
                        "lesson completed"
                    );
                    return Ok(LessonCompletion::Recorded { percent });
                }
                Err(StorageError::Conflict) => {
                    debug!(
                        user_id = %user_id,
                        course_id = %course_id,
                        attempt,
                        "concurrent progress write, reloading"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(
            user_id = %user_id,
            course_id = %course_id,
            attempts,
            "giving up on contended progress write"
        );
        Err(ProgressLedgerError::ConcurrentUpdateConflict {
            user_id: user_id.clone(),
            course_id: course_id.clone(),
            attempts,
        })
    }

    /// Lesson a returning user should land on.
    ///
    /// # Errors
    ///
    /// Returns `CourseNotFound` if the course is not in the catalog, or
    /// `StoreUnavailable` if the store cannot be reached.
    pub async fn resume_position(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<LessonIndex, ProgressLedgerError> {
        let course = self
            .catalog
            .get_course(course_id)
            .await?
            .ok_or_else(|| ProgressLedgerError::CourseNotFound(course_id.clone()))?;
        let progress = self.course_progress(user_id, course_id).await?;
        Ok(self.resume_for(progress.as_ref(), &course))
    }

    /// Resume position for already-loaded progress, honouring the totals policy.
    #[must_use]
    pub fn resume_for(
        &self,
        progress: Option<&CourseProgress>,
        course: &CourseCatalogEntry,
    ) -> LessonIndex {
        let Some(progress) = progress else {
            return LessonIndex::new(0);
        };
        resolve_resume_position(progress, self.total_for(progress, course))
    }

    /// Percentage for already-loaded progress, against the same total
    /// [`ProgressLedger::resume_for`] uses.
    #[must_use]
    pub fn percent_against(
        &self,
        progress: Option<&CourseProgress>,
        course: &CourseCatalogEntry,
    ) -> u8 {
        let Some(progress) = progress else {
            return 0;
        };
        match self.config.totals_policy() {
            TotalLessonsPolicy::Snapshot => progress.progress_percent(),
            TotalLessonsPolicy::Live => {
                compute_percent(progress.completed_lessons(), course.total_lessons())
            }
        }
    }

    fn total_for(&self, progress: &CourseProgress, course: &CourseCatalogEntry) -> u32 {
        match self.config.totals_policy() {
            TotalLessonsPolicy::Snapshot => progress.total_lessons(),
            TotalLessonsPolicy::Live => course.total_lessons(),
        }
    }

    /// Returns true when the stored total was replaced.
    fn apply_totals_policy(&self, progress: &mut CourseProgress, course: &CourseCatalogEntry) -> bool {
        let total = self.total_for(progress, course);
        if progress.total_lessons() == total {
            return false;
        }
        debug!(
            course_id = %course.id(),
            stored = progress.total_lessons(),
            live = total,
            "refreshing lesson total from catalog"
        );
        progress.refresh_total(total);
        true
    }

    async fn ensure_record(&self, user_id: &UserId) -> Result<(), ProgressLedgerError> {
        if self.progress.create_record(user_id, self.clock.now()).await? {
            info!(user_id = %user_id, "created progress record");
        }
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use course_core::model::{LessonSpec, ProgressError};
    use course_core::time::{fixed_clock, fixed_now};
    use storage::repository::{InMemoryRepository, Storage, VersionedProgress};

    fn user() -> UserId {
        UserId::new("u").unwrap()
    }

    fn cid(id: &str) -> CourseId {
        CourseId::new(id).unwrap()
    }

    fn idx(i: u32) -> LessonIndex {
        LessonIndex::new(i)
    }

    fn course(id: &str, lessons: usize) -> CourseCatalogEntry {
        CourseCatalogEntry::new(
            cid(id),
            "Course",
            None,
            (0..lessons)
                .map(|i| LessonSpec::new(format!("Lesson {i}"), format!("v/{i}.mp4"), ""))
                .collect(),
        )
        .unwrap()
    }

    async fn ledger_with(
        repo: &InMemoryRepository,
        config: LedgerConfig,
    ) -> ProgressLedger {
        repo.upsert_course(&course("intro-html", 5)).await.unwrap();
        let storage = Storage::from_in_memory(repo.clone());
        ProgressLedger::new(fixed_clock(), config, storage.catalog, storage.progress)
    }

    #[tokio::test]
    async fn scenario_a_counts_each_lesson_once() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;

        let first = ledger
            .mark_lesson_complete(&user(), &cid("intro-html"), idx(0))
            .await
            .unwrap();
        assert_eq!(first, LessonCompletion::Recorded { percent: 20 });
        assert_eq!(repo.progress_writes(), 1);

        let again = ledger
            .mark_lesson_complete(&user(), &cid("intro-html"), idx(0))
            .await
            .unwrap();
        assert_eq!(again, LessonCompletion::AlreadyCompleted { percent: 20 });
        assert_eq!(repo.progress_writes(), 1);

        let second = ledger
            .mark_lesson_complete(&user(), &cid("intro-html"), idx(1))
            .await
            .unwrap();
        assert_eq!(second.percent(), 40);
        assert_eq!(repo.progress_writes(), 2);
    }

    #[tokio::test]
    async fn percent_tracks_distinct_completions() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;

        let mut last = 0;
        for (n, lesson) in [4, 2, 0, 3, 1].into_iter().enumerate() {
            let pct = ledger
                .mark_lesson_complete(&user(), &cid("intro-html"), idx(lesson))
                .await
                .unwrap()
                .percent();
            let expected = u8::try_from((n + 1) * 20).unwrap();
            assert_eq!(pct, expected);
            assert!(pct >= last);
            last = pct;
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn out_of_range_lesson_is_rejected_without_state_change() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;

        let err = ledger
            .mark_lesson_complete(&user(), &cid("intro-html"), idx(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressLedgerError::InvalidLessonIndex {
                source: ProgressError::InvalidLessonIndex { total_lessons: 5, .. },
                ..
            }
        ));
        assert_eq!(repo.progress_writes(), 0);
        assert!(!ledger.get_progress(&user()).await.unwrap().is_persisted());
    }

    #[tokio::test]
    async fn scenario_b_unknown_course_touches_nothing() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;

        let outcome = ledger
            .mark_lesson_complete(&user(), &cid("unknown-course"), idx(0))
            .await
            .unwrap();
        assert_eq!(outcome, LessonCompletion::CourseNotFound { prior_percent: 0 });
        assert!(!outcome.wrote());
        assert_eq!(repo.progress_writes(), 0);
        assert!(repo.get_record(&user()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_course_reports_prior_percent_for_retired_course() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;
        repo.create_record(&user(), fixed_now()).await.unwrap();
        let retired = CourseProgress::from_persisted([idx(0)], 4, fixed_now());
        repo.save_course_progress(&user(), &cid("retired"), &retired, None)
            .await
            .unwrap();

        let outcome = ledger
            .mark_lesson_complete(&user(), &cid("retired"), idx(1))
            .await
            .unwrap();
        assert_eq!(outcome, LessonCompletion::CourseNotFound { prior_percent: 25 });
        assert_eq!(repo.progress_writes(), 1);
    }

    #[tokio::test]
    async fn get_progress_is_pure_and_get_or_create_is_not() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;

        let empty = ledger.get_progress(&user()).await.unwrap();
        assert_eq!(empty.course_count(), 0);
        assert!(repo.get_record(&user()).await.unwrap().is_none());

        let created = ledger.get_or_create_progress(&user()).await.unwrap();
        assert_eq!(created.created_at(), Some(fixed_now()));
        assert!(repo.get_record(&user()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn get_progress_reflects_latest_write() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;

        ledger
            .mark_lesson_complete(&user(), &cid("intro-html"), idx(3))
            .await
            .unwrap();
        let record = ledger.get_progress(&user()).await.unwrap();
        let progress = record.course(&cid("intro-html")).unwrap();
        assert!(progress.is_completed(idx(3)));
        assert_eq!(progress.progress_percent(), 20);
        assert_eq!(progress.total_lessons(), 5);
        assert_eq!(ledger.percent_for(&user(), &cid("intro-html")).await.unwrap(), 20);
        assert_eq!(ledger.percent_for(&user(), &cid("course2")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resume_position_clamps_to_last_lesson() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;
        let course_id = cid("intro-html");

        assert_eq!(ledger.resume_position(&user(), &course_id).await.unwrap(), idx(0));

        for lesson in [0, 1] {
            ledger.mark_lesson_complete(&user(), &course_id, idx(lesson)).await.unwrap();
        }
        assert_eq!(ledger.resume_position(&user(), &course_id).await.unwrap(), idx(2));

        for lesson in [2, 3, 4] {
            ledger.mark_lesson_complete(&user(), &course_id, idx(lesson)).await.unwrap();
        }
        assert_eq!(ledger.resume_position(&user(), &course_id).await.unwrap(), idx(4));

        let err = ledger
            .resume_position(&user(), &cid("unknown-course"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressLedgerError::CourseNotFound(_)));
    }

    #[tokio::test]
    async fn snapshot_policy_keeps_first_write_total() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;
        let course_id = cid("intro-html");

        ledger.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();
        repo.upsert_course(&course("intro-html", 10)).await.unwrap();

        let outcome = ledger.mark_lesson_complete(&user(), &course_id, idx(1)).await.unwrap();
        assert_eq!(outcome.percent(), 40);

        let err = ledger
            .mark_lesson_complete(&user(), &course_id, idx(7))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressLedgerError::InvalidLessonIndex { .. }));
    }

    #[tokio::test]
    async fn live_policy_refreshes_total_from_catalog() {
        let repo = InMemoryRepository::new();
        let config = LedgerConfig::default().with_totals_policy(TotalLessonsPolicy::Live);
        let ledger = ledger_with(&repo, config).await;
        let course_id = cid("intro-html");

        ledger.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();
        repo.upsert_course(&course("intro-html", 10)).await.unwrap();

        let outcome = ledger.mark_lesson_complete(&user(), &course_id, idx(7)).await.unwrap();
        assert_eq!(outcome, LessonCompletion::Recorded { percent: 20 });

        let stored = ledger.course_progress(&user(), &course_id).await.unwrap().unwrap();
        assert_eq!(stored.total_lessons(), 10);
        assert_eq!(ledger.resume_position(&user(), &course_id).await.unwrap(), idx(2));
    }

    #[tokio::test]
    async fn live_policy_repeat_completion_matches_stored_state() {
        let repo = InMemoryRepository::new();
        let config = LedgerConfig::default().with_totals_policy(TotalLessonsPolicy::Live);
        let ledger = ledger_with(&repo, config).await;
        let course_id = cid("intro-html");

        let first = ledger.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();
        assert_eq!(first, LessonCompletion::Recorded { percent: 20 });
        repo.upsert_course(&course("intro-html", 10)).await.unwrap();

        // The stale total is rewritten once so the answer matches storage.
        let again = ledger.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();
        assert_eq!(again, LessonCompletion::AlreadyCompleted { percent: 10 });
        assert_eq!(repo.progress_writes(), 2);

        let stored = ledger.course_progress(&user(), &course_id).await.unwrap().unwrap();
        assert_eq!(stored.total_lessons(), 10);
        assert_eq!(stored.progress_percent(), again.percent());
        assert_eq!(ledger.percent_for(&user(), &course_id).await.unwrap(), 10);
        assert_eq!(ledger.resume_position(&user(), &course_id).await.unwrap(), idx(1));

        let third = ledger.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();
        assert_eq!(third, again);
        assert_eq!(repo.progress_writes(), 2);
    }

    #[tokio::test]
    async fn snapshot_policy_repeat_completion_never_writes() {
        let repo = InMemoryRepository::new();
        let ledger = ledger_with(&repo, LedgerConfig::default()).await;
        let course_id = cid("intro-html");

        ledger.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();
        repo.upsert_course(&course("intro-html", 10)).await.unwrap();

        let again = ledger.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();
        assert_eq!(again, LessonCompletion::AlreadyCompleted { percent: 20 });
        assert_eq!(repo.progress_writes(), 1);
        assert_eq!(ledger.percent_for(&user(), &course_id).await.unwrap(), 20);
    }

    /// Progress store whose writes always lose the race.
    struct AlwaysConflicting {
        inner: InMemoryRepository,
    }

    #[async_trait]
    impl ProgressRepository for AlwaysConflicting {
        async fn get_record(&self, user_id: &UserId) -> Result<Option<ProgressRecord>, StorageError> {
            self.inner.get_record(user_id).await
        }

        async fn create_record(
            &self,
            user_id: &UserId,
            created_at: DateTime<Utc>,
        ) -> Result<bool, StorageError> {
            self.inner.create_record(user_id, created_at).await
        }

        async fn load_course_progress(
            &self,
            user_id: &UserId,
            course_id: &CourseId,
        ) -> Result<Option<VersionedProgress>, StorageError> {
            self.inner.load_course_progress(user_id, course_id).await
        }

        async fn save_course_progress(
            &self,
            _user_id: &UserId,
            _course_id: &CourseId,
            _progress: &CourseProgress,
            _expected_version: Option<u64>,
        ) -> Result<u64, StorageError> {
            Err(StorageError::Conflict)
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&course("intro-html", 5)).await.unwrap();
        let ledger = ProgressLedger::new(
            fixed_clock(),
            LedgerConfig::new(3, TotalLessonsPolicy::Snapshot).unwrap(),
            Arc::new(repo.clone()),
            Arc::new(AlwaysConflicting { inner: repo.clone() }),
        );

        let err = ledger
            .mark_lesson_complete(&user(), &cid("intro-html"), idx(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressLedgerError::ConcurrentUpdateConflict { attempts: 3, .. }
        ));
        assert!(err.is_retryable());
    }

    /// Progress store that cannot be reached at all.
    struct Offline;

    #[async_trait]
    impl ProgressRepository for Offline {
        async fn get_record(&self, _user_id: &UserId) -> Result<Option<ProgressRecord>, StorageError> {
            Err(StorageError::Connection("offline".into()))
        }

        async fn create_record(
            &self,
            _user_id: &UserId,
            _created_at: DateTime<Utc>,
        ) -> Result<bool, StorageError> {
            Err(StorageError::Connection("offline".into()))
        }

        async fn load_course_progress(
            &self,
            _user_id: &UserId,
            _course_id: &CourseId,
        ) -> Result<Option<VersionedProgress>, StorageError> {
            Err(StorageError::Connection("offline".into()))
        }

        async fn save_course_progress(
            &self,
            _user_id: &UserId,
            _course_id: &CourseId,
            _progress: &CourseProgress,
            _expected_version: Option<u64>,
        ) -> Result<u64, StorageError> {
            Err(StorageError::Connection("offline".into()))
        }
    }

    #[tokio::test]
    async fn offline_store_surfaces_store_unavailable() {
        let repo = InMemoryRepository::new();
        repo.upsert_course(&course("intro-html", 5)).await.unwrap();
        let ledger = ProgressLedger::new(
            fixed_clock(),
            LedgerConfig::default(),
            Arc::new(repo),
            Arc::new(Offline),
        );

        let err = ledger
            .mark_lesson_complete(&user(), &cid("intro-html"), idx(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressLedgerError::StoreUnavailable(_)));

        let err = ledger.get_progress(&user()).await.unwrap_err();
        assert!(matches!(err, ProgressLedgerError::StoreUnavailable(_)));
    }

    /// Progress store that reads fine but cannot commit.
    struct WritesFail {
        inner: InMemoryRepository,
    }

    #[async_trait]
    impl ProgressRepository for WritesFail {
        async fn get_record(&self, user_id: &UserId) -> Result<Option<ProgressRecord>, StorageError> {
            self.inner.get_record(user_id).await
        }

        async fn create_record(
            &self,
            user_id: &UserId,
            created_at: DateTime<Utc>,
        ) -> Result<bool, StorageError> {
            self.inner.create_record(user_id, created_at).await
        }

        async fn load_course_progress(
            &self,
            user_id: &UserId,
            course_id: &CourseId,
        ) -> Result<Option<VersionedProgress>, StorageError> {
            self.inner.load_course_progress(user_id, course_id).await
        }

        async fn save_course_progress(
            &self,
            _user_id: &UserId,
            _course_id: &CourseId,
            _progress: &CourseProgress,
            _expected_version: Option<u64>,
        ) -> Result<u64, StorageError> {
            Err(StorageError::Connection("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_prior_state_committed() {
        let repo = InMemoryRepository::new();
        let healthy = ledger_with(&repo, LedgerConfig::default()).await;
        let course_id = cid("intro-html");
        healthy.mark_lesson_complete(&user(), &course_id, idx(0)).await.unwrap();

        let failing = ProgressLedger::new(
            fixed_clock(),
            LedgerConfig::default(),
            Arc::new(repo.clone()),
            Arc::new(WritesFail { inner: repo.clone() }),
        );
        let err = failing
            .mark_lesson_complete(&user(), &course_id, idx(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressLedgerError::StoreUnavailable(_)));
        assert!(err.is_retryable());

        let stored = repo.load_course_progress(&user(), &course_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.progress.is_completed(idx(0)));
        assert!(!stored.progress.is_completed(idx(1)));
        assert_eq!(stored.progress.progress_percent(), 20);
        assert_eq!(repo.progress_writes(), 1);
    }
}
