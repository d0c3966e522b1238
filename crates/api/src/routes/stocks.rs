//! Stock availability endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::Sku;
use serde::Serialize;
use storage::TxManager;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct StockResponse {
    pub sku: u32,
    pub count: u64,
}

/// GET /stocks/{sku}: amount of a SKU that can still be ordered.
#[tracing::instrument(skip(state))]
pub async fn get<M: TxManager + 'static>(
    State(state): State<Arc<AppState<M>>>,
    Path(sku): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let sku: Sku = sku
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid sku '{sku}': {e}")))?;
    let count = state.order_service.stock().stocks_info(sku).await?;

    Ok(Json(StockResponse {
        sku: sku.get(),
        count,
    }))
}
