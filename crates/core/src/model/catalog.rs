use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::CourseId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("lesson title cannot be empty (lesson {0})")]
    EmptyLessonTitle(usize),

    #[error("course declares {declared} lessons but lists {actual}")]
    LessonCountMismatch { declared: u32, actual: usize },

    #[error("course has too many lessons: {0}")]
    TooManyLessons(usize),
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// One entry in a course's ordered lesson sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSpec {
    pub title: String,
    pub media_ref: String,
    pub notes: String,
}

impl LessonSpec {
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        media_ref: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            media_ref: media_ref.into(),
            notes: notes.into(),
        }
    }
}

//
// ─── CATALOG ENTRY ─────────────────────────────────────────────────────────────
//

/// Read-only description of a course as published in the catalog.
///
/// `total_lessons` always equals `lessons.len()` for entries built through
/// [`CourseCatalogEntry::new`]; persisted entries are checked on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseCatalogEntry {
    id: CourseId,
    title: String,
    description: Option<String>,
    total_lessons: u32,
    lessons: Vec<LessonSpec>,
}

impl CourseCatalogEntry {
    /// Build a catalog entry, deriving the lesson count from `lessons`.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError` if the title or any lesson title is blank, or
    /// if the lesson count does not fit in a `u32`.
    pub fn new(
        id: CourseId,
        title: impl Into<String>,
        description: Option<String>,
        lessons: Vec<LessonSpec>,
    ) -> Result<Self, CatalogError> {
        let total_lessons =
            u32::try_from(lessons.len()).map_err(|_| CatalogError::TooManyLessons(lessons.len()))?;
        Self::from_persisted(id, title, description, total_lessons, lessons)
    }

    /// Rebuild an entry from storage, where the declared total is stored
    /// separately from the lesson rows.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::LessonCountMismatch` when the declared total
    /// drifted from the stored lessons.
    pub fn from_persisted(
        id: CourseId,
        title: impl Into<String>,
        description: Option<String>,
        total_lessons: u32,
        lessons: Vec<LessonSpec>,
    ) -> Result<Self, CatalogError> {
        let title = title.into().trim().to_owned();
        if title.is_empty() {
            return Err(CatalogError::EmptyTitle);
        }
        if let Some(pos) = lessons.iter().position(|l| l.title.trim().is_empty()) {
            return Err(CatalogError::EmptyLessonTitle(pos));
        }
        if usize::try_from(total_lessons).ok() != Some(lessons.len()) {
            return Err(CatalogError::LessonCountMismatch {
                declared: total_lessons,
                actual: lessons.len(),
            });
        }

        let description = description
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());

        Ok(Self {
            id,
            title,
            description,
            total_lessons,
            lessons,
        })
    }

    #[must_use]
    pub fn id(&self) -> &CourseId {
        &self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn total_lessons(&self) -> u32 {
        self.total_lessons
    }

    #[must_use]
    pub fn lessons(&self) -> &[LessonSpec] {
        &self.lessons
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn lessons(n: usize) -> Vec<LessonSpec> {
        (0..n)
            .map(|i| LessonSpec::new(format!("Lesson {}", i + 1), format!("media/{i}.mp4"), ""))
            .collect()
    }

    #[test]
    fn new_derives_total_from_lessons() {
        let course = CourseCatalogEntry::new(
            CourseId::new("intro-html").unwrap(),
            "Introduction to HTML",
            Some("Learn the basics of web structure.".into()),
            lessons(5),
        )
        .unwrap();

        assert_eq!(course.total_lessons(), 5);
        assert_eq!(course.lessons()[1].title, "Lesson 2");
    }

    #[test]
    fn persisted_entry_rejects_count_drift() {
        let err = CourseCatalogEntry::from_persisted(
            CourseId::new("course1").unwrap(),
            "Introduction to HTML",
            None,
            10,
            lessons(1),
        )
        .unwrap_err();

        assert_eq!(
            err,
            CatalogError::LessonCountMismatch {
                declared: 10,
                actual: 1
            }
        );
    }

    #[test]
    fn blank_titles_are_rejected() {
        let err = CourseCatalogEntry::new(CourseId::new("c").unwrap(), "  ", None, lessons(1))
            .unwrap_err();
        assert_eq!(err, CatalogError::EmptyTitle);

        let mut bad = lessons(2);
        bad[1].title = " ".into();
        let err =
            CourseCatalogEntry::new(CourseId::new("c").unwrap(), "Course", None, bad).unwrap_err();
        assert_eq!(err, CatalogError::EmptyLessonTitle(1));
    }

    #[test]
    fn empty_course_is_allowed() {
        let course =
            CourseCatalogEntry::new(CourseId::new("empty").unwrap(), "Empty", Some("  ".into()), vec![])
                .unwrap();
        assert_eq!(course.total_lessons(), 0);
        assert_eq!(course.description(), None);
        assert!(course.lessons().is_empty());
    }
}
