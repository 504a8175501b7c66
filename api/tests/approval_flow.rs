use std::{sync::Arc, time::Duration};

use approval_engine::{
    Actor, ApprovalAction, ApprovalEngine, EngineError, NoopInvalidator, NoopTimers,
    TransitionOutcome,
};
use chrono::{Duration as ChronoDuration, Utc};
use deadline_scheduler::DeadlineScheduler;
use domain::{ApprovalStatus, EntityKind, Role};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

fn dec(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn engine(pool: &PgPool) -> Arc<ApprovalEngine> {
    ApprovalEngine::new(
        pool.clone(),
        Arc::new(NoopTimers),
        Arc::new(NoopInvalidator),
    )
}

struct Fixture {
    tenant_id: Uuid,
    shop_id: Uuid,
    salesman_id: Uuid,
    manager_id: Uuid,
    product_id: Uuid,
}

async fn seed_fixture(pool: &PgPool) -> Fixture {
    let tenant_id = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, $2)")
        .bind(tenant_id)
        .bind(format!("tenant-{tenant_id}"))
        .execute(pool)
        .await
        .expect("tenant");

    let mut users = Vec::new();
    for role in [Role::Salesman, Role::Manager, Role::AssistantManager] {
        let user_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (id, tenant_id, username, email, password_hash, role)
             VALUES ($1, $2, $3, $4, 'x', $5)",
        )
        .bind(user_id)
        .bind(tenant_id)
        .bind(format!("{}-{user_id}", role.as_str()))
        .bind(format!("{user_id}@example.com"))
        .bind(role.as_str())
        .execute(pool)
        .await
        .expect("user");
        users.push(user_id);
    }

    let shop_id = Uuid::new_v4();
    sqlx::query("INSERT INTO shops (id, tenant_id, name) VALUES ($1, $2, $3)")
        .bind(shop_id)
        .bind(tenant_id)
        .bind(format!("shop-{shop_id}"))
        .execute(pool)
        .await
        .expect("shop");

    let product_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO products (id, tenant_id, name, sku, unit_price) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(product_id)
    .bind(tenant_id)
    .bind("House Red")
    .bind(format!("SKU-{product_id}"))
    .bind(dec(50_000))
    .execute(pool)
    .await
    .expect("product");

    Fixture {
        tenant_id,
        shop_id,
        salesman_id: users[0],
        manager_id: users[1],
        product_id,
    }
}

async fn seed_daily_record(
    pool: &PgPool,
    fx: &Fixture,
    item_total_cents: i64,
    declared_total_cents: i64,
) -> Uuid {
    let record_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO daily_sales_records
             (id, tenant_id, shop_id, salesman_id, record_date, cash_amount, total_sales_amount, created_by)
         VALUES ($1, $2, $3, $4, CURRENT_DATE, $5, $5, $6)",
    )
    .bind(record_id)
    .bind(fx.tenant_id)
    .bind(fx.shop_id)
    .bind(fx.salesman_id)
    .bind(dec(declared_total_cents))
    .bind(fx.salesman_id)
    .execute(pool)
    .await
    .expect("record");

    sqlx::query(
        "INSERT INTO daily_sales_items (id, record_id, product_id, quantity, unit_price, total_amount)
         VALUES ($1, $2, $3, 1, $4, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(record_id)
    .bind(fx.product_id)
    .bind(dec(item_total_cents))
    .execute(pool)
    .await
    .expect("item");

    record_id
}

async fn seed_collection(pool: &PgPool, fx: &Fixture, deadline_offset_secs: i64) -> Uuid {
    let collection_id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO money_collections
             (id, tenant_id, shop_id, originator_id, counterparty_id, amount,
              collection_type, submitted_at, deadline_at)
         VALUES ($1, $2, $3, $4, $5, $6, 'daily_sales', $7, $8)",
    )
    .bind(collection_id)
    .bind(fx.tenant_id)
    .bind(fx.shop_id)
    .bind(fx.salesman_id)
    .bind(fx.manager_id)
    .bind(dec(2_500_000))
    .bind(now)
    .bind(now + ChronoDuration::seconds(deadline_offset_secs))
    .execute(pool)
    .await
    .expect("collection");
    collection_id
}

async fn collection_status(pool: &PgPool, id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM money_collections WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("status")
}

fn manager_actor(fx: &Fixture) -> Actor {
    Actor::User {
        id: fx.manager_id,
        role: Role::Manager,
    }
}

#[sqlx::test(migrations = "../migrations")]
async fn daily_record_totals_mismatch_blocks_approval(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let engine = engine(&pool);

    // Items sum to 24,900 against a declared 25,000. Creation succeeded;
    // approval must not.
    let record_id = seed_daily_record(&pool, &fx, 2_490_000, 2_500_000).await;

    let err = engine
        .transition(
            EntityKind::DailyRecord,
            record_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Precondition { .. }));

    let status: String =
        sqlx::query_scalar("SELECT status FROM daily_sales_records WHERE id = $1")
            .bind(record_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "pending");
}

#[sqlx::test(migrations = "../migrations")]
async fn daily_record_approval_is_idempotent(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let engine = engine(&pool);
    let record_id = seed_daily_record(&pool, &fx, 2_500_000, 2_500_000).await;

    let outcome = engine
        .transition(
            EntityKind::DailyRecord,
            record_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap();
    let first = match outcome {
        TransitionOutcome::Applied(head) => head,
        TransitionOutcome::NotModified(_) => panic!("first approval must apply"),
    };
    assert_eq!(first.status, ApprovalStatus::Approved);
    assert_eq!(first.approved_by, Some(fx.manager_id));

    // A repeat approve is a no-op that preserves approver and timestamp.
    let outcome = engine
        .transition(
            EntityKind::DailyRecord,
            record_id,
            Some(fx.tenant_id),
            Actor::User {
                id: fx.salesman_id,
                role: Role::Manager,
            },
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap();
    let repeat = match outcome {
        TransitionOutcome::NotModified(head) => head,
        TransitionOutcome::Applied(_) => panic!("repeat approval must not re-apply"),
    };
    assert_eq!(repeat.approved_by, Some(fx.manager_id));
    // Postgres stores microseconds; compare at millisecond precision.
    assert_eq!(
        repeat.approved_at.unwrap().timestamp_millis(),
        first.approved_at.unwrap().timestamp_millis()
    );

    // A reject after approval is a real error.
    let err = engine
        .transition(
            EntityKind::DailyRecord,
            record_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Reject,
            Some("too late"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
}

#[sqlx::test(migrations = "../migrations")]
async fn collection_approval_after_deadline_fails(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let engine = engine(&pool);

    // Deadline already one second in the past.
    let collection_id = seed_collection(&pool, &fx, -1).await;

    let err = engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DeadlineExceeded));

    // The failed approve did not flip the row; it is pending until the
    // scheduler expires it.
    assert_eq!(collection_status(&pool, collection_id).await, "pending");

    // The system expiry lands, and a later approve is an invalid transition.
    engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            None,
            Actor::System,
            ApprovalAction::Expire,
            None,
        )
        .await
        .unwrap();
    assert_eq!(collection_status(&pool, collection_id).await, "expired");

    let err = engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));

    let approver: Option<Uuid> =
        sqlx::query_scalar("SELECT approved_by FROM money_collections WHERE id = $1")
            .bind(collection_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(approver, None);
}

#[sqlx::test(migrations = "../migrations")]
async fn collection_rejection_requires_reason_before_deadline(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let engine = engine(&pool);
    let collection_id = seed_collection(&pool, &fx, 600).await;

    let err = engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Reject,
            Some("  "),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Precondition { .. }));

    engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Reject,
            Some("short by 400"),
        )
        .await
        .unwrap();
    assert_eq!(collection_status(&pool, collection_id).await, "rejected");
}

#[sqlx::test(migrations = "../migrations")]
async fn expire_does_not_fire_before_deadline(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let engine = engine(&pool);
    let collection_id = seed_collection(&pool, &fx, 600).await;

    // A premature fire (backwards clock jump) must not expire the record.
    let err = engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            None,
            Actor::System,
            ApprovalAction::Expire,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Precondition { .. }));
    assert_eq!(collection_status(&pool, collection_id).await, "pending");
}

async fn seed_sale_with_return(
    pool: &PgPool,
    fx: &Fixture,
    sold_qty: i64,
    prior_approved_return_qty: i64,
    new_return_qty: i64,
) -> (Uuid, Uuid) {
    let sale_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO sales (id, tenant_id, shop_id, cash_amount, total_amount, paid_amount, due_amount, status, created_by)
         VALUES ($1, $2, $3, $4, $4, $4, 0, 'approved', $5)",
    )
    .bind(sale_id)
    .bind(fx.tenant_id)
    .bind(fx.shop_id)
    .bind(dec(5_000_000))
    .bind(fx.salesman_id)
    .execute(pool)
    .await
    .expect("sale");

    let sale_item_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO sale_items (id, sale_id, product_id, quantity, unit_price, total_amount)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(sale_item_id)
    .bind(sale_id)
    .bind(fx.product_id)
    .bind(sold_qty)
    .bind(dec(50_000))
    .bind(dec(50_000 * sold_qty))
    .execute(pool)
    .await
    .expect("sale item");

    if prior_approved_return_qty > 0 {
        let prior_return_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO sale_returns (id, tenant_id, sale_id, total_refund, status, created_by)
             VALUES ($1, $2, $3, $4, 'approved', $5)",
        )
        .bind(prior_return_id)
        .bind(fx.tenant_id)
        .bind(sale_id)
        .bind(dec(50_000 * prior_approved_return_qty))
        .bind(fx.salesman_id)
        .execute(pool)
        .await
        .expect("prior return");
        sqlx::query(
            "INSERT INTO sale_return_items (id, return_id, sale_item_id, quantity, refund_amount)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(prior_return_id)
        .bind(sale_item_id)
        .bind(prior_approved_return_qty)
        .bind(dec(50_000 * prior_approved_return_qty))
        .execute(pool)
        .await
        .expect("prior return item");
    }

    let return_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO sale_returns (id, tenant_id, sale_id, total_refund, created_by)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(return_id)
    .bind(fx.tenant_id)
    .bind(sale_id)
    .bind(dec(50_000 * new_return_qty))
    .bind(fx.salesman_id)
    .execute(pool)
    .await
    .expect("new return");
    sqlx::query(
        "INSERT INTO sale_return_items (id, return_id, sale_item_id, quantity, refund_amount)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(return_id)
    .bind(sale_item_id)
    .bind(new_return_qty)
    .bind(dec(50_000 * new_return_qty))
    .execute(pool)
    .await
    .expect("new return item");

    (sale_id, return_id)
}

#[sqlx::test(migrations = "../migrations")]
async fn return_quantity_cap_counts_prior_approved_returns(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let engine = engine(&pool);

    // Sold 10, 3 already returned and approved; an 8-unit return must fail
    // with the remaining quantity in the details.
    let (_sale_id, return_id) = seed_sale_with_return(&pool, &fx, 10, 3, 8).await;

    let err = engine
        .transition(
            EntityKind::SaleReturn,
            return_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap_err();
    match err {
        EngineError::Precondition { details, .. } => {
            assert_eq!(details["remaining_returnable"], serde_json::json!(7));
            assert_eq!(details["requested"], serde_json::json!(8));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[sqlx::test(migrations = "../migrations")]
async fn return_within_cap_is_approved_and_restocks(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let engine = engine(&pool);
    let (sale_id, return_id) = seed_sale_with_return(&pool, &fx, 10, 3, 7).await;

    // Seed a stock row so the restock side effect has a target.
    sqlx::query(
        "INSERT INTO stock_levels (id, tenant_id, shop_id, product_id, quantity)
         VALUES ($1, $2, $3, $4, 100)",
    )
    .bind(Uuid::new_v4())
    .bind(fx.tenant_id)
    .bind(fx.shop_id)
    .bind(fx.product_id)
    .execute(&pool)
    .await
    .unwrap();

    engine
        .transition(
            EntityKind::SaleReturn,
            return_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap();

    let quantity: i64 = sqlx::query_scalar(
        "SELECT quantity FROM stock_levels WHERE shop_id = $1 AND product_id = $2",
    )
    .bind(fx.shop_id)
    .bind(fx.product_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(quantity, 107);

    let status: String = sqlx::query_scalar("SELECT status FROM sale_returns WHERE id = $1")
        .bind(return_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "approved");

    let _ = sale_id;
}

#[sqlx::test(migrations = "../migrations")]
async fn cross_tenant_transition_sees_not_found(pool: PgPool) {
    let fx = seed_fixture(&pool).await;
    let other = seed_fixture(&pool).await;
    let engine = engine(&pool);
    let record_id = seed_daily_record(&pool, &fx, 2_500_000, 2_500_000).await;

    let err = engine
        .transition(
            EntityKind::DailyRecord,
            record_id,
            Some(other.tenant_id),
            Actor::User {
                id: other.manager_id,
                role: Role::Manager,
            },
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound));
}

#[sqlx::test(migrations = "../migrations")]
async fn scheduler_expires_overdue_collections_on_startup(pool: PgPool) {
    let fx = seed_fixture(&pool).await;

    // Two overdue rows and one with time left, as found after a restart.
    let overdue_a = seed_collection(&pool, &fx, -120).await;
    let overdue_b = seed_collection(&pool, &fx, -60).await;
    let live = seed_collection(&pool, &fx, 3600).await;

    let (scheduler, handle) = DeadlineScheduler::new(pool.clone(), Duration::from_secs(60));
    let engine = ApprovalEngine::new(
        pool.clone(),
        Arc::new(handle.clone()),
        Arc::new(NoopInvalidator),
    );
    scheduler.spawn(engine.clone());

    // The startup scan runs asynchronously; give it a moment.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(collection_status(&pool, overdue_a).await, "expired");
    assert_eq!(collection_status(&pool, overdue_b).await, "expired");
    assert_eq!(collection_status(&pool, live).await, "pending");
}

#[sqlx::test(migrations = "../migrations")]
async fn scheduler_fires_registered_deadline(pool: PgPool) {
    let fx = seed_fixture(&pool).await;

    let (scheduler, handle) = DeadlineScheduler::new(pool.clone(), Duration::from_secs(60));
    let engine = ApprovalEngine::new(
        pool.clone(),
        Arc::new(handle.clone()),
        Arc::new(NoopInvalidator),
    );
    scheduler.spawn(engine.clone());

    // A very short deadline registered through the handle, as creation does.
    let collection_id = seed_collection(&pool, &fx, 1).await;
    let deadline: chrono::DateTime<Utc> =
        sqlx::query_scalar("SELECT deadline_at FROM money_collections WHERE id = $1")
            .bind(collection_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    handle.register(collection_id, deadline).unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(collection_status(&pool, collection_id).await, "expired");
}

#[sqlx::test(migrations = "../migrations")]
async fn cancelled_deadline_does_not_expire_approved_collection(pool: PgPool) {
    let fx = seed_fixture(&pool).await;

    let (scheduler, handle) = DeadlineScheduler::new(pool.clone(), Duration::from_secs(60));
    let engine = ApprovalEngine::new(
        pool.clone(),
        Arc::new(handle.clone()),
        Arc::new(NoopInvalidator),
    );
    scheduler.spawn(engine.clone());

    let collection_id = seed_collection(&pool, &fx, 2).await;
    let deadline: chrono::DateTime<Utc> =
        sqlx::query_scalar("SELECT deadline_at FROM money_collections WHERE id = $1")
            .bind(collection_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    handle.register(collection_id, deadline).unwrap();

    // Approval inside the window cancels the timer through the engine.
    engine
        .transition(
            EntityKind::MoneyCollection,
            collection_id,
            Some(fx.tenant_id),
            manager_actor(&fx),
            ApprovalAction::Approve,
            None,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(collection_status(&pool, collection_id).await, "approved");
}
