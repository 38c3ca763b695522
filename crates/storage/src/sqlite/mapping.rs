use std::collections::BTreeSet;

use course_core::model::{CourseProgress, LessonIndex, LessonSpec};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::{StorageError, VersionedProgress};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} out of range: {v}")))
}

pub(crate) fn u64_from_i64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn i64_from_u64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

/// Completed lessons are stored as a sorted JSON array, e.g. `[0,1,4]`.
pub(crate) fn encode_completed(completed: &BTreeSet<LessonIndex>) -> Result<String, StorageError> {
    serde_json::to_string(completed).map_err(ser)
}

pub(crate) fn decode_completed(raw: &str) -> Result<Vec<LessonIndex>, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn map_course_progress_row(row: &SqliteRow) -> Result<VersionedProgress, StorageError> {
    let completed_raw: String = row.try_get("completed_lessons").map_err(ser)?;
    let completed = decode_completed(&completed_raw)?;
    let total_lessons = u32_from_i64(
        "total_lessons",
        row.try_get::<i64, _>("total_lessons").map_err(ser)?,
    )?;
    let updated_at = row.try_get("updated_at").map_err(ser)?;
    let version = u64_from_i64("version", row.try_get::<i64, _>("version").map_err(ser)?)?;

    Ok(VersionedProgress {
        progress: CourseProgress::from_persisted(completed, total_lessons, updated_at),
        version,
    })
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<LessonSpec, StorageError> {
    Ok(LessonSpec {
        title: row.try_get("title").map_err(ser)?,
        media_ref: row.try_get("media_ref").map_err(ser)?,
        notes: row.try_get("notes").map_err(ser)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_lessons_encode_sorted() {
        let set: BTreeSet<LessonIndex> = [4, 0, 2].into_iter().map(LessonIndex::new).collect();
        assert_eq!(encode_completed(&set).unwrap(), "[0,2,4]");
    }

    #[test]
    fn decode_rejects_negative_indexes() {
        assert!(decode_completed("[0,-1]").is_err());
        assert_eq!(
            decode_completed("[3,1]").unwrap(),
            vec![LessonIndex::new(3), LessonIndex::new(1)]
        );
    }
}
