#![forbid(unsafe_code)]

pub mod app_services;
pub mod catalog_service;
pub mod config;
pub mod course_views;
pub mod error;
pub mod identity;
pub mod progress_ledger;

pub use course_core::Clock;

pub use app_services::AppServices;
pub use catalog_service::{CatalogService, default_catalog};
pub use config::{ConfigError, LedgerConfig};
pub use course_views::{CourseCard, CoursePage, CourseViews, LessonRow};
pub use error::{AppServicesError, CatalogServiceError, ProgressLedgerError, ViewError};
pub use identity::{IdentityProvider, StaticIdentity};
pub use progress_ledger::{LessonCompletion, ProgressLedger};
