use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use domain::{Brand, Category, Product, Role, StockLevel};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth_middleware::CurrentUser,
    error::{ApiError, ApiResult},
    repositories::StockAdjustOutcome,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/inventory/products",
            get(list_products).post(create_product),
        )
        .route("/inventory/products/:product_id", get(get_product))
        .route(
            "/inventory/categories",
            get(list_categories).post(create_category),
        )
        .route("/inventory/brands", get(list_brands).post(create_brand))
        .route("/inventory/brands/:brand_id", get(get_brand))
        .route("/inventory/stock", get(list_stock))
        .route("/inventory/stock/adjust", post(adjust_stock))
}

async fn list_products(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Product>>> {
    let products = state.catalog_repo.list_products(user.tenant_id).await?;
    Ok(Json(products))
}

async fn get_product(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<Product>> {
    let product = state
        .catalog_repo
        .find_product(user.tenant_id, product_id)
        .await?;
    product.map(Json).ok_or_else(|| ApiError::not_found("product"))
}

#[derive(Debug, Deserialize)]
struct CreateProductPayload {
    name: String,
    sku: String,
    category_id: Option<Uuid>,
    brand_id: Option<Uuid>,
    unit_price: Decimal,
}

async fn create_product(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<CreateProductPayload>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("name", "must not be empty"));
    }
    if payload.sku.trim().is_empty() {
        return Err(ApiError::validation("sku", "must not be empty"));
    }
    if payload.unit_price < Decimal::ZERO {
        return Err(ApiError::validation("unit_price", "must be non-negative"));
    }

    let product = Product {
        id: Uuid::new_v4(),
        tenant_id: user.tenant_id,
        name: payload.name.trim().to_string(),
        sku: payload.sku.trim().to_string(),
        category_id: payload.category_id,
        brand_id: payload.brand_id,
        unit_price: payload.unit_price,
        active: true,
    };
    state.catalog_repo.create_product(&product).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn list_categories(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Category>>> {
    let categories = state.catalog_repo.list_categories(user.tenant_id).await?;
    Ok(Json(categories))
}

#[derive(Debug, Deserialize)]
struct NamePayload {
    name: String,
}

async fn create_category(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<NamePayload>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("name", "must not be empty"));
    }
    let category = Category {
        id: Uuid::new_v4(),
        tenant_id: user.tenant_id,
        name: payload.name.trim().to_string(),
    };
    state.catalog_repo.create_category(&category).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn list_brands(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Vec<Brand>>> {
    let brands = state.catalog_repo.list_brands(user.tenant_id).await?;
    Ok(Json(brands))
}

async fn get_brand(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(brand_id): Path<Uuid>,
) -> ApiResult<Json<Brand>> {
    let brand = state.catalog_repo.find_brand(user.tenant_id, brand_id).await?;
    brand.map(Json).ok_or_else(|| ApiError::not_found("brand"))
}

async fn create_brand(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<NamePayload>,
) -> ApiResult<(StatusCode, Json<Brand>)> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("name", "must not be empty"));
    }
    let brand = Brand {
        id: Uuid::new_v4(),
        tenant_id: user.tenant_id,
        name: payload.name.trim().to_string(),
    };
    state.catalog_repo.create_brand(&brand).await?;
    Ok((StatusCode::CREATED, Json(brand)))
}

#[derive(Debug, Deserialize)]
struct StockQuery {
    shop_id: Uuid,
}

async fn list_stock(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<StockQuery>,
) -> ApiResult<Json<Vec<StockLevel>>> {
    let levels = state.stock_repo.list(user.tenant_id, query.shop_id).await?;
    Ok(Json(levels))
}

#[derive(Debug, Deserialize)]
struct AdjustStockPayload {
    shop_id: Uuid,
    product_id: Uuid,
    delta: i64,
}

async fn adjust_stock(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<AdjustStockPayload>,
) -> ApiResult<Json<StockLevel>> {
    user.ensure_at_least(Role::Manager)?;
    if payload.delta == 0 {
        return Err(ApiError::validation("delta", "must not be zero"));
    }

    state
        .shop_repo
        .find(user.tenant_id, payload.shop_id)
        .await?
        .ok_or_else(|| ApiError::not_found("shop"))?;
    state
        .catalog_repo
        .find_product(user.tenant_id, payload.product_id)
        .await?
        .ok_or_else(|| ApiError::not_found("product"))?;

    match state
        .stock_repo
        .adjust(
            user.tenant_id,
            payload.shop_id,
            payload.product_id,
            payload.delta,
        )
        .await?
    {
        StockAdjustOutcome::Adjusted(level) => Ok(Json(level)),
        StockAdjustOutcome::WouldGoNegative { current } => Err(ApiError::new(
            domain::ErrorKind::PreconditionFailed,
            "stock cannot go negative",
        )
        .with_details(json!({ "current_quantity": current, "delta": payload.delta }))),
    }
}
