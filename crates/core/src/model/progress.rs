use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{CourseId, LessonIndex, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("lesson {index} is outside the course (total lessons: {total_lessons})")]
    InvalidLessonIndex {
        index: LessonIndex,
        total_lessons: u32,
    },
    #[error("lesson {index} is outside the course (positions start at 0)")]
    NegativeLessonIndex { index: i64 },
}

//
// ─── LESSON STATE ──────────────────────────────────────────────────────────────
//

/// Per-lesson state. `Completed` is terminal; there is no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonState {
    NotStarted,
    Completed,
}

impl LessonState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Completed => "completed",
        }
    }
}

/// What `CourseProgress::record_completion` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The lesson moved `NotStarted -> Completed`; the record must be persisted.
    Recorded,
    /// The lesson was already completed; nothing changed.
    AlreadyCompleted,
}

//
// ─── TOTAL LESSONS POLICY ──────────────────────────────────────────────────────
//

/// How the stored `total_lessons` relates to the live catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TotalLessonsPolicy {
    /// Keep the total captured on the first write for that course.
    /// Percentages are versioned against the catalog as it was.
    #[default]
    Snapshot,
    /// Refresh the total from the catalog on every write and bounds-check
    /// against the catalog's current lesson count.
    Live,
}

impl TotalLessonsPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Live => "live",
        }
    }
}

impl fmt::Display for TotalLessonsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown total-lessons policy: {0} (expected `snapshot` or `live`)")]
pub struct ParsePolicyError(String);

impl FromStr for TotalLessonsPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snapshot" => Ok(Self::Snapshot),
            "live" => Ok(Self::Live),
            other => Err(ParsePolicyError(other.to_owned())),
        }
    }
}

//
// ─── PERCENTAGE ────────────────────────────────────────────────────────────────
//

/// `round(100 * n / total)` with halves rounded up, where `n` counts only the
/// completed indexes that still fall inside `[0, total)`.
///
/// Returns 0 when `total == 0`. Never exceeds 100.
#[must_use]
pub fn compute_percent(completed: &BTreeSet<LessonIndex>, total_lessons: u32) -> u8 {
    if total_lessons == 0 {
        return 0;
    }
    let in_range = completed.range(..LessonIndex::new(total_lessons)).count();
    let n = u64::try_from(in_range).unwrap_or(u64::MAX);
    let total = u64::from(total_lessons);
    let pct = (200 * n + total) / (2 * total);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

//
// ─── COURSE PROGRESS ───────────────────────────────────────────────────────────
//

/// Completion state for one (user, course) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseProgress {
    completed_lessons: BTreeSet<LessonIndex>,
    total_lessons: u32,
    progress_percent: u8,
    updated_at: DateTime<Utc>,
}

impl CourseProgress {
    /// Fresh progress for a course, seeded with the catalog's current total.
    #[must_use]
    pub fn seeded(total_lessons: u32, now: DateTime<Utc>) -> Self {
        Self {
            completed_lessons: BTreeSet::new(),
            total_lessons,
            progress_percent: 0,
            updated_at: now,
        }
    }

    /// Rebuild progress from storage. The percentage is recomputed rather
    /// than trusted.
    #[must_use]
    pub fn from_persisted(
        completed_lessons: impl IntoIterator<Item = LessonIndex>,
        total_lessons: u32,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let completed_lessons: BTreeSet<LessonIndex> = completed_lessons.into_iter().collect();
        let progress_percent = compute_percent(&completed_lessons, total_lessons);
        Self {
            completed_lessons,
            total_lessons,
            progress_percent,
            updated_at,
        }
    }

    #[must_use]
    pub fn completed_lessons(&self) -> &BTreeSet<LessonIndex> {
        &self.completed_lessons
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed_lessons.len()
    }

    #[must_use]
    pub fn total_lessons(&self) -> u32 {
        self.total_lessons
    }

    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub fn is_completed(&self, index: LessonIndex) -> bool {
        self.completed_lessons.contains(&index)
    }

    #[must_use]
    pub fn lesson_state(&self, index: LessonIndex) -> LessonState {
        if self.is_completed(index) {
            LessonState::Completed
        } else {
            LessonState::NotStarted
        }
    }

    /// Mark `index` complete against the stored total.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::InvalidLessonIndex` if `index >= total_lessons`;
    /// the progress is left untouched.
    pub fn record_completion(
        &mut self,
        index: LessonIndex,
        now: DateTime<Utc>,
    ) -> Result<Completion, ProgressError> {
        if index.value() >= self.total_lessons {
            return Err(ProgressError::InvalidLessonIndex {
                index,
                total_lessons: self.total_lessons,
            });
        }
        if !self.completed_lessons.insert(index) {
            return Ok(Completion::AlreadyCompleted);
        }
        self.progress_percent = compute_percent(&self.completed_lessons, self.total_lessons);
        self.updated_at = now;
        Ok(Completion::Recorded)
    }

    /// Replace the stored total with the catalog's current one.
    ///
    /// Completed lessons are kept even if they now fall outside the course;
    /// they simply stop counting towards the percentage.
    pub fn refresh_total(&mut self, total_lessons: u32) {
        self.total_lessons = total_lessons;
        self.progress_percent = compute_percent(&self.completed_lessons, total_lessons);
    }

    /// Lesson a returning user should land on. See [`resolve_resume_position`].
    #[must_use]
    pub fn resume_position(&self) -> LessonIndex {
        resolve_resume_position(self, self.total_lessons)
    }
}

/// Resume at the lesson right after the number of completed lessons, clamped
/// to the last valid index.
///
/// Assumes completions are contiguous from the start: completing lesson 4
/// alone resumes at lesson 1, not lesson 5.
#[must_use]
pub fn resolve_resume_position(progress: &CourseProgress, total_lessons: u32) -> LessonIndex {
    if progress.completed_lessons.is_empty() || total_lessons == 0 {
        return LessonIndex::new(0);
    }
    let count = u32::try_from(progress.completed_lessons.len()).unwrap_or(u32::MAX);
    LessonIndex::new(count.min(total_lessons - 1))
}

//
// ─── PROGRESS RECORD ───────────────────────────────────────────────────────────
//

/// Everything a user has completed, keyed by course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressRecord {
    user_id: UserId,
    created_at: Option<DateTime<Utc>>,
    enrolled_courses: BTreeMap<CourseId, CourseProgress>,
}

impl ProgressRecord {
    /// An unpersisted record with no courses.
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            created_at: None,
            enrolled_courses: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_persisted(
        user_id: UserId,
        created_at: DateTime<Utc>,
        enrolled_courses: BTreeMap<CourseId, CourseProgress>,
    ) -> Self {
        Self {
            user_id,
            created_at: Some(created_at),
            enrolled_courses,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// When the record was first stored; `None` if it never was.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.created_at.is_some()
    }

    #[must_use]
    pub fn course(&self, course_id: &CourseId) -> Option<&CourseProgress> {
        self.enrolled_courses.get(course_id)
    }

    pub fn courses(&self) -> impl Iterator<Item = (&CourseId, &CourseProgress)> {
        self.enrolled_courses.iter()
    }

    #[must_use]
    pub fn course_count(&self) -> usize {
        self.enrolled_courses.len()
    }
}

/// Percentage to draw in a progress bar; 0 for courses never touched.
#[must_use]
pub fn percent_for(course_id: &CourseId, record: &ProgressRecord) -> u8 {
    record
        .course(course_id)
        .map_or(0, CourseProgress::progress_percent)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
