mod catalog;
mod ids;
mod progress;

pub use ids::{CourseId, LessonIndex, ParseIdError, UserId};

pub use catalog::{CatalogError, CourseCatalogEntry, LessonSpec};
pub use progress::{
    Completion, CourseProgress, LessonState, ParsePolicyError, ProgressError, ProgressRecord,
    TotalLessonsPolicy, compute_percent, percent_for, resolve_resume_position,
};
