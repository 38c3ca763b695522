use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use course_core::model::{CourseId, CourseProgress, ProgressRecord, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, encode_completed, i64_from_u64, map_course_progress_row, ser};
use crate::repository::{ProgressRepository, StorageError, VersionedProgress};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_record(&self, user_id: &UserId) -> Result<Option<ProgressRecord>, StorageError> {
        let row = sqlx::query("SELECT created_at FROM users WHERE user_id = ?1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(ser)?;

        let rows = sqlx::query(
            r"
            SELECT course_id, completed_lessons, total_lessons, updated_at, version
            FROM course_progress
            WHERE user_id = ?1
            ORDER BY course_id ASC
            ",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut courses = BTreeMap::new();
        for row in &rows {
            let course_id =
                CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?).map_err(ser)?;
            courses.insert(course_id, map_course_progress_row(row)?.progress);
        }

        Ok(Some(ProgressRecord::from_persisted(
            user_id.clone(),
            created_at,
            courses,
        )))
    }

    async fn create_record(
        &self,
        user_id: &UserId,
        created_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO users (user_id, created_at)
            VALUES (?1, ?2)
            ON CONFLICT(user_id) DO NOTHING
            ",
        )
        .bind(user_id.as_str())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(res.rows_affected() == 1)
    }

    async fn load_course_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<VersionedProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT completed_lessons, total_lessons, updated_at, version
            FROM course_progress
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(user_id.as_str())
        .bind(course_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_course_progress_row).transpose()
    }

    async fn save_course_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        progress: &CourseProgress,
        expected_version: Option<u64>,
    ) -> Result<u64, StorageError> {
        let completed = encode_completed(progress.completed_lessons())?;
        let total_lessons = i64::from(progress.total_lessons());
        let percent = i64::from(progress.progress_percent());

        let user_exists = sqlx::query("SELECT 1 FROM users WHERE user_id = ?1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .is_some();
        if !user_exists {
            return Err(StorageError::NotFound);
        }

        // Each branch is a single conditional statement on the version we
        // read, so a concurrent writer turns it into zero affected rows.
        let (affected, new_version) = match expected_version {
            None => {
                let res = sqlx::query(
                    r"
                    INSERT INTO course_progress (
                        user_id, course_id, completed_lessons, total_lessons,
                        progress_percent, updated_at, version
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
                    ON CONFLICT(user_id, course_id) DO NOTHING
                    ",
                )
                .bind(user_id.as_str())
                .bind(course_id.as_str())
                .bind(completed)
                .bind(total_lessons)
                .bind(percent)
                .bind(progress.updated_at())
                .execute(&self.pool)
                .await
                .map_err(conn)?;
                (res.rows_affected(), 1)
            }
            Some(expected) => {
                let res = sqlx::query(
                    r"
                    UPDATE course_progress SET
                        completed_lessons = ?3,
                        total_lessons = ?4,
                        progress_percent = ?5,
                        updated_at = ?6,
                        version = version + 1
                    WHERE user_id = ?1 AND course_id = ?2 AND version = ?7
                    ",
                )
                .bind(user_id.as_str())
                .bind(course_id.as_str())
                .bind(completed)
                .bind(total_lessons)
                .bind(percent)
                .bind(progress.updated_at())
                .bind(i64_from_u64("version", expected)?)
                .execute(&self.pool)
                .await
                .map_err(conn)?;
                (res.rows_affected(), expected + 1)
            }
        };

        if affected == 0 {
            tracing::debug!(
                user_id = %user_id,
                course_id = %course_id,
                ?expected_version,
                "course progress version moved underneath writer"
            );
            return Err(StorageError::Conflict);
        }

        Ok(new_version)
    }
}
