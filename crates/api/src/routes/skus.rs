//! Stock ledger administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use checkout_store::{CheckoutStore, StockLevel};
use common::{Money, SkuId};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::carts::AppState;

#[derive(Deserialize)]
pub struct UpsertSkuRequest {
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct StockLevelResponse {
    pub sku_id: String,
    pub available: u32,
    pub version: i64,
    pub unit_price_cents: i64,
}

fn stock_response(level: StockLevel) -> StockLevelResponse {
    StockLevelResponse {
        sku_id: level.sku.to_string(),
        available: level.available,
        version: level.version,
        unit_price_cents: level.unit_price.cents(),
    }
}

/// PUT /skus/{sku_id} — create or replace a ledger row.
#[tracing::instrument(skip(state, req))]
pub async fn upsert<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku_id): Path<String>,
    Json(req): Json<UpsertSkuRequest>,
) -> Result<Json<StockLevelResponse>, ApiError> {
    let level = state
        .checkout
        .upsert_sku(
            &SkuId::new(sku_id),
            req.quantity,
            Money::from_cents(req.unit_price_cents),
        )
        .await?;
    Ok(Json(stock_response(level)))
}

/// GET /skus/{sku_id} — current ledger state for one SKU.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(sku_id): Path<String>,
) -> Result<Json<StockLevelResponse>, ApiError> {
    let sku = SkuId::new(sku_id);
    let level = state
        .checkout
        .stock_level(&sku)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown SKU: {sku}")))?;
    Ok(Json(stock_response(level)))
}
