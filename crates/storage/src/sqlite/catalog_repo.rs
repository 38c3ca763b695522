use std::collections::BTreeMap;

use course_core::model::{CourseCatalogEntry, CourseId, LessonSpec};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{conn, map_lesson_row, ser, u32_from_i64};
use crate::repository::{CatalogRepository, StorageError};

#[async_trait::async_trait]
impl CatalogRepository for SqliteRepository {
    async fn upsert_course(&self, course: &CourseCatalogEntry) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO courses (id, title, description, total_lessons)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                total_lessons = excluded.total_lessons
            ",
        )
        .bind(course.id().as_str())
        .bind(course.title())
        .bind(course.description())
        .bind(i64::from(course.total_lessons()))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        // Lesson rows are replaced wholesale so a shrinking course leaves no stragglers.
        sqlx::query("DELETE FROM lessons WHERE course_id = ?1")
            .bind(course.id().as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, lesson) in course.lessons().iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| StorageError::Serialization("lesson position overflow".into()))?;
            sqlx::query(
                r"
                INSERT INTO lessons (course_id, position, title, media_ref, notes)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(course.id().as_str())
            .bind(position)
            .bind(lesson.title.as_str())
            .bind(lesson.media_ref.as_str())
            .bind(lesson.notes.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_course(&self, id: &CourseId) -> Result<Option<CourseCatalogEntry>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, title, description, total_lessons
            FROM courses WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lesson_rows = sqlx::query(
            r"
            SELECT title, media_ref, notes
            FROM lessons
            WHERE course_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut lessons = Vec::with_capacity(lesson_rows.len());
        for lesson in &lesson_rows {
            lessons.push(map_lesson_row(lesson)?);
        }

        course_from_row(&row, lessons).map(Some)
    }

    async fn list_courses(&self) -> Result<Vec<CourseCatalogEntry>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, title, description, total_lessons
            FROM courses
            ORDER BY id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let lesson_rows = sqlx::query(
            r"
            SELECT course_id, title, media_ref, notes
            FROM lessons
            ORDER BY course_id ASC, position ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut by_course: BTreeMap<String, Vec<LessonSpec>> = BTreeMap::new();
        for lesson in &lesson_rows {
            let course_id: String = lesson.try_get("course_id").map_err(ser)?;
            by_course
                .entry(course_id)
                .or_default()
                .push(map_lesson_row(lesson)?);
        }

        let mut courses = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(ser)?;
            let lessons = by_course.remove(&id).unwrap_or_default();
            courses.push(course_from_row(row, lessons)?);
        }
        Ok(courses)
    }
}

fn course_from_row(row: &SqliteRow, lessons: Vec<LessonSpec>) -> Result<CourseCatalogEntry, StorageError> {
    let id = CourseId::new(row.try_get::<String, _>("id").map_err(ser)?).map_err(ser)?;
    let total_lessons = u32_from_i64(
        "total_lessons",
        row.try_get::<i64, _>("total_lessons").map_err(ser)?,
    )?;

    CourseCatalogEntry::from_persisted(
        id,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<Option<String>, _>("description").map_err(ser)?,
        total_lessons,
        lessons,
    )
    .map_err(ser)
}
