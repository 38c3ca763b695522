use std::sync::Arc;

use course_core::model::{CourseCatalogEntry, CourseId, LessonSpec};
use storage::repository::CatalogRepository;
use tracing::info;

use crate::error::CatalogServiceError;

/// Read access to the course catalog, plus seeding of the built-in courses.
#[derive(Clone)]
pub struct CatalogService {
    catalog: Arc<dyn CatalogRepository>,
}

impl CatalogService {
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }

    /// Fetch a course, treating a missing course as an error.
    ///
    /// # Errors
    ///
    /// Returns `CatalogServiceError::CourseNotFound` if the course is absent.
    /// Returns `CatalogServiceError::Storage` if repository access fails.
    pub async fn get_course(
        &self,
        course_id: &CourseId,
    ) -> Result<CourseCatalogEntry, CatalogServiceError> {
        self.catalog
            .get_course(course_id)
            .await?
            .ok_or_else(|| CatalogServiceError::CourseNotFound(course_id.clone()))
    }

    /// List all courses ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns `CatalogServiceError::Storage` if repository access fails.
    pub async fn list_courses(&self) -> Result<Vec<CourseCatalogEntry>, CatalogServiceError> {
        Ok(self.catalog.list_courses().await?)
    }

    /// Publish (or replace) a course.
    ///
    /// # Errors
    ///
    /// Returns `CatalogServiceError::Storage` if persistence fails.
    pub async fn publish(&self, course: &CourseCatalogEntry) -> Result<(), CatalogServiceError> {
        self.catalog.upsert_course(course).await?;
        info!(course_id = %course.id(), lessons = course.total_lessons(), "published course");
        Ok(())
    }

    /// Write the built-in courses. Returns how many were written.
    ///
    /// # Errors
    ///
    /// Returns `CatalogServiceError` if a built-in course fails validation or
    /// persistence fails.
    pub async fn seed_defaults(&self) -> Result<usize, CatalogServiceError> {
        let courses = default_catalog()?;
        for course in &courses {
            self.publish(course).await?;
        }
        Ok(courses.len())
    }

    /// Seed the built-in courses only when the catalog is empty.
    ///
    /// # Errors
    ///
    /// Returns `CatalogServiceError` on validation or repository failures.
    pub async fn seed_if_empty(&self) -> Result<bool, CatalogServiceError> {
        if !self.catalog.list_courses().await?.is_empty() {
            return Ok(false);
        }
        self.seed_defaults().await?;
        Ok(true)
    }
}

/// The courses shipped with the platform.
///
/// # Errors
///
/// Returns `course_core::Error` if an entry fails validation.
pub fn default_catalog() -> Result<Vec<CourseCatalogEntry>, course_core::Error> {
    let html_titles = [
        "What is HTML?",
        "Document structure",
        "Headings and paragraphs",
        "Links and navigation",
        "Images and media",
        "Lists",
        "Tables",
        "Forms and inputs",
        "Semantic elements",
        "Accessibility basics",
    ];
    let css_titles = [
        "Selectors",
        "The box model",
        "Colors and typography",
        "Flexbox",
        "Grid",
        "Responsive design",
        "Transitions and animations",
        "Organizing stylesheets",
    ];

    Ok(vec![
        course(
            "course1",
            "Introduction to HTML",
            "Learn the basics of web structure.",
            &html_titles,
        )?,
        course(
            "course2",
            "Mastering CSS",
            "Design beautiful, responsive websites.",
            &css_titles,
        )?,
        course(
            "intro-html",
            "HTML in Five Lessons",
            "A short tour of the essentials.",
            &html_titles[..5],
        )?,
    ])
}

fn course(
    id: &str,
    title: &str,
    description: &str,
    lesson_titles: &[&str],
) -> Result<CourseCatalogEntry, course_core::Error> {
    let lessons = lesson_titles
        .iter()
        .enumerate()
        .map(|(i, lesson)| {
            LessonSpec::new(
                *lesson,
                format!("videos/{id}/lesson-{:02}.mp4", i + 1),
                String::new(),
            )
        })
        .collect();
    Ok(CourseCatalogEntry::new(
        CourseId::new(id)?,
        title,
        Some(description.to_owned()),
        lessons,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::repository::InMemoryRepository;

    #[test]
    fn default_catalog_matches_declared_sizes() {
        let courses = default_catalog().unwrap();
        let sizes: Vec<(&str, u32)> = courses
            .iter()
            .map(|c| (c.id().as_str(), c.total_lessons()))
            .collect();
        assert_eq!(sizes, [("course1", 10), ("course2", 8), ("intro-html", 5)]);
        assert_eq!(
            courses[1].lessons()[0].media_ref,
            "videos/course2/lesson-01.mp4"
        );
    }

    #[tokio::test]
    async fn get_course_reports_missing_course() {
        let service = CatalogService::new(Arc::new(InMemoryRepository::new()));
        let err = service
            .get_course(&CourseId::new("unknown-course").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogServiceError::CourseNotFound(id) if id.as_str() == "unknown-course"));
    }

    #[tokio::test]
    async fn seed_if_empty_runs_once() {
        let service = CatalogService::new(Arc::new(InMemoryRepository::new()));
        assert!(service.seed_if_empty().await.unwrap());
        assert!(!service.seed_if_empty().await.unwrap());
        assert_eq!(service.list_courses().await.unwrap().len(), 3);
    }
}
