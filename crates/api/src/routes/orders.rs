//! Settlement and order administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use checkout_store::{CheckoutStore, Order, OrderStatus};
use chrono::{DateTime, Utc};
use common::{CartId, OrderId, PaymentReference};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::carts::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct SettleRequest {
    pub payment_reference: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct OrderLookupQuery {
    pub payment_reference: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub sku_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub payment_reference: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
}

fn order_response(order: Order) -> OrderResponse {
    OrderResponse {
        order_id: order.id.as_uuid(),
        payment_reference: order.payment_reference.to_string(),
        status: order.status.to_string(),
        created_at: order.created_at,
        total_cents: order.total().cents(),
        lines: order
            .lines
            .into_iter()
            .map(|line| OrderLineResponse {
                sku_id: line.sku.to_string(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                line_total_cents: line.line_total().cents(),
            })
            .collect(),
    }
}

// -- Handlers --

/// POST /carts/{cart_id}/checkout — convert a paid cart into an order.
///
/// Idempotent per payment reference: duplicate payment webhooks get the
/// original order back.
#[tracing::instrument(skip(state, req))]
pub async fn settle<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(cart_id): Path<Uuid>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .checkout
        .settle(
            CartId::from_uuid(cart_id),
            &PaymentReference::new(req.payment_reference),
        )
        .await?;
    Ok(Json(order_response(order)))
}

/// GET /orders/{order_id} — fetch one order.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = OrderId::from_uuid(order_id);
    let order = state
        .checkout
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order not found: {order_id}")))?;
    Ok(Json(order_response(order)))
}

/// GET /orders?payment_reference=… — look up the order a payment produced.
#[tracing::instrument(skip(state, query))]
pub async fn find_by_reference<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<OrderLookupQuery>,
) -> Result<Json<OrderResponse>, ApiError> {
    let reference = PaymentReference::new(query.payment_reference);
    let order = state
        .checkout
        .find_order_by_reference(&reference)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no order for payment reference {reference}")))?;
    Ok(Json(order_response(order)))
}

/// PATCH /orders/{order_id}/status — advance the fulfillment status.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let status = OrderStatus::parse(&req.status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown order status: {}", req.status)))?;
    let order = state
        .checkout
        .update_order_status(OrderId::from_uuid(order_id), status)
        .await?;
    Ok(Json(order_response(order)))
}
