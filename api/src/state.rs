use approval_engine::ApprovalEngine;
use auth::AuthService;
use deadline_scheduler::SchedulerHandle;
use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    cache::InvariantCache,
    config::AppConfig,
    repositories::{
        CatalogRepository, CollectionRepository, DailyRecordRepository, ExpenseRepository,
        PendingRepository, ReturnRepository, SaleRepository, SessionRepository, ShopRepository,
        StockRepository, UserRepository,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: PgPool,
    pub auth: Arc<dyn AuthService>,
    pub engine: Arc<ApprovalEngine>,
    pub scheduler: SchedulerHandle,
    pub cache: Arc<InvariantCache>,
    pub user_repo: Arc<dyn UserRepository>,
    pub shop_repo: Arc<dyn ShopRepository>,
    pub session_repo: Arc<dyn SessionRepository>,
    pub catalog_repo: Arc<dyn CatalogRepository>,
    pub stock_repo: Arc<dyn StockRepository>,
    pub daily_record_repo: Arc<dyn DailyRecordRepository>,
    pub sale_repo: Arc<dyn SaleRepository>,
    pub return_repo: Arc<dyn ReturnRepository>,
    pub collection_repo: Arc<dyn CollectionRepository>,
    pub expense_repo: Arc<dyn ExpenseRepository>,
    pub pending_repo: Arc<dyn PendingRepository>,
}

// Ensure critical dependencies uphold Send/Sync for Axum state usage.
#[allow(dead_code)]
fn _assert_state_types_are_send_sync()
where
    AppConfig: Send + Sync + 'static,
    PgPool: Send + Sync + 'static,
    dyn AuthService: Send + Sync,
    ApprovalEngine: Send + Sync,
    SchedulerHandle: Send + Sync,
    InvariantCache: Send + Sync,
    dyn UserRepository: Send + Sync,
    dyn ShopRepository: Send + Sync,
    dyn SessionRepository: Send + Sync,
    dyn CatalogRepository: Send + Sync,
    dyn StockRepository: Send + Sync,
    dyn DailyRecordRepository: Send + Sync,
    dyn SaleRepository: Send + Sync,
    dyn ReturnRepository: Send + Sync,
    dyn CollectionRepository: Send + Sync,
    dyn ExpenseRepository: Send + Sync,
    dyn PendingRepository: Send + Sync,
{
}

#[allow(dead_code)]
fn _assert_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
