use std::sync::Arc;

use course_core::model::{ProgressRecord, UserId};
use storage::repository::Storage;
use tracing::info;

use crate::Clock;
use crate::catalog_service::CatalogService;
use crate::config::LedgerConfig;
use crate::course_views::CourseViews;
use crate::error::AppServicesError;
use crate::identity::IdentityProvider;
use crate::progress_ledger::ProgressLedger;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    catalog: Arc<CatalogService>,
    ledger: Arc<ProgressLedger>,
    views: Arc<CourseViews>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage, seeding the built-in
    /// courses into an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization or catalog seeding fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: LedgerConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let services = Self::from_storage(&storage, clock, config);
        if services.catalog.seed_if_empty().await? {
            info!(db_url, "seeded default catalog");
        }
        Ok(services)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: LedgerConfig) -> Self {
        let catalog = CatalogService::new(Arc::clone(&storage.catalog));
        let ledger = ProgressLedger::new(
            clock,
            config,
            Arc::clone(&storage.catalog),
            Arc::clone(&storage.progress),
        );
        let views = CourseViews::new(catalog.clone(), ledger.clone());

        Self {
            catalog: Arc::new(catalog),
            ledger: Arc::new(ledger),
            views: Arc::new(views),
        }
    }

    /// Resolve the signed-in user and make sure they have a progress record.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Unauthenticated` when nobody is signed in,
    /// or a ledger error if the record cannot be loaded or created.
    pub async fn sign_in(
        &self,
        identity: &dyn IdentityProvider,
    ) -> Result<(UserId, ProgressRecord), AppServicesError> {
        let user_id = identity
            .current_user()
            .ok_or(AppServicesError::Unauthenticated)?;
        let record = self.ledger.get_or_create_progress(&user_id).await?;
        Ok((user_id, record))
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<CatalogService> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn ledger(&self) -> Arc<ProgressLedger> {
        Arc::clone(&self.ledger)
    }

    #[must_use]
    pub fn views(&self) -> Arc<CourseViews> {
        Arc::clone(&self.views)
    }
}
