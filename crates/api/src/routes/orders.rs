//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::{OrderItem, OrderStatus, StatusChangedEvent};
use serde::{Deserialize, Serialize};
use storage::TxManager;

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user: i64,
    pub items: Vec<ItemDto>,
}

/// A line item as it appears on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ItemDto {
    pub sku: u32,
    pub count: u16,
}

impl From<ItemDto> for OrderItem {
    fn from(item: ItemDto) -> Self {
        OrderItem::new(item.sku, item.count)
    }
}

impl From<OrderItem> for ItemDto {
    fn from(item: OrderItem) -> Self {
        Self {
            sku: item.sku.get(),
            count: item.count,
        }
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: i64,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub status: OrderStatus,
    pub user: i64,
    pub items: Vec<ItemDto>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub order_id: i64,
    pub status: OrderStatus,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub id: i64,
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub sent: bool,
}

impl From<StatusChangedEvent> for EventResponse {
    fn from(event: StatusChangedEvent) -> Self {
        Self {
            id: event.id.get(),
            status: event.status,
            at: event.at,
            sent: event.sent,
        }
    }
}

// -- Handlers --

/// POST /orders: create an order and reserve its stock.
#[tracing::instrument(skip(state, req), fields(user = req.user))]
pub async fn create<M: TxManager + 'static>(
    State(state): State<Arc<AppState<M>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let items = req.items.into_iter().map(OrderItem::from).collect();
    let order_id = state
        .order_service
        .order_create(UserId::new(req.user), items)
        .await?;

    let response = OrderCreatedResponse {
        order_id: order_id.get(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders/{id}: status, user and items of an order.
#[tracing::instrument(skip(state))]
pub async fn get<M: TxManager + 'static>(
    State(state): State<Arc<AppState<M>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let info = state.order_service.order_info(order_id).await?;

    Ok(Json(OrderResponse {
        status: info.status,
        user: info.user_id.get(),
        items: info.items.into_iter().map(ItemDto::from).collect(),
    }))
}

/// POST /orders/{id}/pay: pay an order awaiting payment.
#[tracing::instrument(skip(state))]
pub async fn pay<M: TxManager + 'static>(
    State(state): State<Arc<AppState<M>>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.order_service.order_pay(order_id).await?;

    Ok(Json(StatusResponse {
        order_id: order_id.get(),
        status: OrderStatus::Payed,
    }))
}

/// POST /orders/{id}/cancel: cancel an order awaiting payment.
#[tracing::instrument(skip(state))]
pub async fn cancel<M: TxManager + 'static>(
    State(state): State<Arc<AppState<M>>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.order_service.order_cancel(order_id).await?;

    Ok(Json(StatusResponse {
        order_id: order_id.get(),
        status: OrderStatus::Cancelled,
    }))
}

/// GET /orders/{id}/events: status change history of an order.
#[tracing::instrument(skip(state))]
pub async fn events<M: TxManager + 'static>(
    State(state): State<Arc<AppState<M>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let events = state.order_service.order_events(order_id).await?;

    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id '{id}': {e}")))
}
