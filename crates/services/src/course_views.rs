use serde::Serialize;

use course_core::model::{
    CourseCatalogEntry, CourseId, CourseProgress, LessonIndex, LessonState, UserId,
};

use crate::catalog_service::CatalogService;
use crate::error::ViewError;
use crate::identity::IdentityProvider;
use crate::progress_ledger::ProgressLedger;

/// One course on the learner's dashboard.
///
/// Presentation-agnostic: no markup, no pre-formatted strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseCard {
    pub course_id: CourseId,
    pub title: String,
    pub description: Option<String>,
    pub total_lessons: u32,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonRow {
    pub index: LessonIndex,
    pub title: String,
    pub media_ref: String,
    pub notes: String,
    pub state: LessonState,
}

/// Everything a course page needs: lesson list, completion marks, progress bar
/// value and the lesson to open first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoursePage {
    pub course_id: CourseId,
    pub title: String,
    pub description: Option<String>,
    pub lessons: Vec<LessonRow>,
    pub percent: u8,
    pub resume_at: LessonIndex,
}

/// Read-only views combining the catalog with a learner's progress.
#[derive(Clone)]
pub struct CourseViews {
    catalog: CatalogService,
    ledger: ProgressLedger,
}

impl CourseViews {
    #[must_use]
    pub fn new(catalog: CatalogService, ledger: ProgressLedger) -> Self {
        Self { catalog, ledger }
    }

    /// Course cards for the signed-in user, in catalog order.
    ///
    /// # Errors
    ///
    /// Returns `ViewError::Unauthenticated` when nobody is signed in, otherwise
    /// propagates catalog and ledger failures.
    pub async fn dashboard(
        &self,
        identity: &dyn IdentityProvider,
    ) -> Result<Vec<CourseCard>, ViewError> {
        let user_id = require_user(identity)?;
        let courses = self.catalog.list_courses().await?;
        let record = self.ledger.get_progress(&user_id).await?;

        Ok(courses
            .iter()
            .map(|course| CourseCard {
                course_id: course.id().clone(),
                title: course.title().to_owned(),
                description: course.description().map(str::to_owned),
                total_lessons: course.total_lessons(),
                percent: self.ledger.percent_against(record.course(course.id()), course),
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns `ViewError::Unauthenticated` when nobody is signed in and
    /// `CatalogServiceError::CourseNotFound` (wrapped) for unknown courses.
    pub async fn course_page(
        &self,
        identity: &dyn IdentityProvider,
        course_id: &CourseId,
    ) -> Result<CoursePage, ViewError> {
        let user_id = require_user(identity)?;
        let course = self.catalog.get_course(course_id).await?;
        let progress = self.ledger.course_progress(&user_id, course_id).await?;
        Ok(self.build_page(&course, progress.as_ref()))
    }

    fn build_page(&self, course: &CourseCatalogEntry, progress: Option<&CourseProgress>) -> CoursePage {
        let lessons = course
            .lessons()
            .iter()
            .zip(0u32..)
            .map(|(lesson, i)| {
                let index = LessonIndex::new(i);
                LessonRow {
                    index,
                    title: lesson.title.clone(),
                    media_ref: lesson.media_ref.clone(),
                    notes: lesson.notes.clone(),
                    state: progress.map_or(LessonState::NotStarted, |p| p.lesson_state(index)),
                }
            })
            .collect();

        CoursePage {
            course_id: course.id().clone(),
            title: course.title().to_owned(),
            description: course.description().map(str::to_owned),
            lessons,
            percent: self.ledger.percent_against(progress, course),
            resume_at: self.ledger.resume_for(progress, course),
        }
    }
}

fn require_user(identity: &dyn IdentityProvider) -> Result<UserId, ViewError> {
    identity.current_user().ok_or(ViewError::Unauthenticated)
}
