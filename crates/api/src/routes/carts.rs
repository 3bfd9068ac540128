//! Cart lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use checkout::CheckoutService;
use checkout_store::{CartView, CheckoutStore};
use chrono::{DateTime, Utc};
use common::{CartId, SkuId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: CheckoutStore> {
    pub checkout: CheckoutService<S>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub sku_id: String,
    pub quantity: u32,
}

#[derive(Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartLineResponse {
    pub sku_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub cart_id: Uuid,
    pub lines: Vec<CartLineResponse>,
    pub expires_at: DateTime<Utc>,
    pub seconds_to_expiry: i64,
    pub total_cents: i64,
}

pub(crate) fn cart_response(view: CartView) -> CartResponse {
    let seconds_to_expiry = view.time_to_expiry(Utc::now()).num_seconds();
    CartResponse {
        cart_id: view.cart_id.as_uuid(),
        total_cents: view.total().cents(),
        seconds_to_expiry,
        expires_at: view.expires_at,
        lines: view
            .lines
            .into_iter()
            .map(|line| CartLineResponse {
                sku_id: line.sku.to_string(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                line_total_cents: line.line_total().cents(),
            })
            .collect(),
    }
}

// -- Handlers --

/// POST /carts/{cart_id}/items — reserve stock into the cart.
#[tracing::instrument(skip(state, req))]
pub async fn add_item<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(cart_id): Path<Uuid>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state
        .checkout
        .add_item(CartId::from_uuid(cart_id), &SkuId::new(req.sku_id), req.quantity)
        .await?;
    Ok(Json(cart_response(view)))
}

/// PUT /carts/{cart_id}/items/{sku_id} — set a line to an exact quantity.
#[tracing::instrument(skip(state, req))]
pub async fn update_item<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path((cart_id, sku_id)): Path<(Uuid, String)>,
    Json(req): Json<UpdateQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state
        .checkout
        .update_quantity(CartId::from_uuid(cart_id), &SkuId::new(sku_id), req.quantity)
        .await?;
    Ok(Json(cart_response(view)))
}

/// DELETE /carts/{cart_id}/items/{sku_id} — drop a line entirely.
#[tracing::instrument(skip(state))]
pub async fn remove_item<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path((cart_id, sku_id)): Path<(Uuid, String)>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state
        .checkout
        .remove_item(CartId::from_uuid(cart_id), &SkuId::new(sku_id))
        .await?;
    Ok(Json(cart_response(view)))
}

/// GET /carts/{cart_id} — current contents and time to expiry.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(cart_id): Path<Uuid>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state.checkout.get_cart(CartId::from_uuid(cart_id)).await?;
    Ok(Json(cart_response(view)))
}
