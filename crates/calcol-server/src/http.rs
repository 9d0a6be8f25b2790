//! HTTP REST handlers

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use log::{debug, info, warn};

use crate::core::ServerCore;
use crate::error::AppError;
use crate::state::{
    CalculationResponse, CalculationUpdate, CalculationsResponse, ColumnsResponse, ErrorResponse,
    ExecutionResponse, NewCalculation, ParseRequest, ParseResponse, VirtualColumnsResponse,
};

/// Parse a formula and report its canonical form and dependencies
#[utoipa::path(
    post,
    path = "/parse",
    request_body = ParseRequest,
    responses(
        (status = 200, description = "Parsed formula", body = ParseResponse),
        (status = 400, description = "Parse error", body = ErrorResponse)
    )
)]
pub async fn parse_formula(
    State(core): State<Arc<ServerCore>>,
    Json(request): Json<ParseRequest>,
) -> Result<Json<ParseResponse>, AppError> {
    info!("POST /parse: {}", request.formula);
    Ok(Json(core.parse_formula(&request.formula)?))
}

/// List calculations in insertion order
#[utoipa::path(
    get,
    path = "/calculations",
    responses(
        (status = 200, description = "All calculations", body = CalculationsResponse)
    )
)]
pub async fn list_calculations(State(core): State<Arc<ServerCore>>) -> Json<CalculationsResponse> {
    info!("GET /calculations");
    Json(CalculationsResponse {
        calculations: core.list_calculations().await,
    })
}

/// Add a calculation; it is computed immediately together with its dependents
#[utoipa::path(
    post,
    path = "/calculations",
    request_body = NewCalculation,
    responses(
        (status = 200, description = "Columns computed by the add", body = ExecutionResponse),
        (status = 400, description = "Invalid formula or column name", body = ErrorResponse),
        (status = 409, description = "Duplicate column or dependency cycle", body = ErrorResponse)
    )
)]
pub async fn add_calculation(
    State(core): State<Arc<ServerCore>>,
    Json(request): Json<NewCalculation>,
) -> Result<Json<ExecutionResponse>, AppError> {
    let start = Instant::now();
    info!("POST /calculations: {} = {}", request.column, request.formula);

    match core.add_calculation(request).await {
        Ok(response) => {
            info!(
                "Added in {:.2?}, {} columns computed",
                start.elapsed(),
                response.affected_columns.len()
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!("Add failed in {:.2?}: {}", start.elapsed(), e);
            Err(e.into())
        }
    }
}

#[utoipa::path(
    get,
    path = "/calculations/{column}",
    params(("column" = String, Path, description = "Result column name")),
    responses(
        (status = 200, description = "The calculation", body = CalculationResponse),
        (status = 404, description = "Unknown calculation", body = ErrorResponse)
    )
)]
pub async fn get_calculation(
    State(core): State<Arc<ServerCore>>,
    Path(column): Path<String>,
) -> Result<Json<CalculationResponse>, AppError> {
    info!("GET /calculations/{}", column);
    core.calculation(&column)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Unknown calculation: {column}")))
}

/// Update a calculation; affected columns stay stale until execute or refresh
#[utoipa::path(
    patch,
    path = "/calculations/{column}",
    params(("column" = String, Path, description = "Result column name")),
    request_body = CalculationUpdate,
    responses(
        (status = 200, description = "The updated calculation", body = CalculationResponse),
        (status = 400, description = "Invalid formula or column name", body = ErrorResponse),
        (status = 404, description = "Unknown calculation", body = ErrorResponse),
        (status = 409, description = "Duplicate column or dependency cycle", body = ErrorResponse)
    )
)]
pub async fn update_calculation(
    State(core): State<Arc<ServerCore>>,
    Path(column): Path<String>,
    Json(update): Json<CalculationUpdate>,
) -> Result<Json<CalculationResponse>, AppError> {
    info!("PATCH /calculations/{}", column);
    match core.update_calculation(&column, update).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!("Update of {} failed: {}", column, e);
            Err(e.into())
        }
    }
}

#[utoipa::path(
    delete,
    path = "/calculations/{column}",
    params(("column" = String, Path, description = "Result column name")),
    responses(
        (status = 200, description = "The removed calculation", body = CalculationResponse),
        (status = 404, description = "Unknown calculation", body = ErrorResponse)
    )
)]
pub async fn remove_calculation(
    State(core): State<Arc<ServerCore>>,
    Path(column): Path<String>,
) -> Result<Json<CalculationResponse>, AppError> {
    info!("DELETE /calculations/{}", column);
    Ok(Json(core.remove_calculation(&column).await?))
}

/// Recompute every active calculation
#[utoipa::path(
    post,
    path = "/execute",
    responses(
        (status = 200, description = "Recomputed columns", body = ExecutionResponse)
    )
)]
pub async fn execute(
    State(core): State<Arc<ServerCore>>,
) -> Result<Json<ExecutionResponse>, AppError> {
    let start = Instant::now();
    info!("POST /execute");
    let response = core.execute_all().await?;
    info!(
        "Executed {} columns in {:.2?}",
        response.affected_columns.len(),
        start.elapsed()
    );
    Ok(Json(response))
}

/// Recompute only stale calculations
#[utoipa::path(
    post,
    path = "/refresh",
    responses(
        (status = 200, description = "Recomputed columns", body = ExecutionResponse)
    )
)]
pub async fn refresh(
    State(core): State<Arc<ServerCore>>,
) -> Result<Json<ExecutionResponse>, AppError> {
    let start = Instant::now();
    info!("POST /refresh");
    let response = core.refresh().await?;
    debug!(
        "Refreshed {:?} in {:.2?}",
        response.affected_columns,
        start.elapsed()
    );
    Ok(Json(response))
}

/// List source and calculated columns
#[utoipa::path(
    get,
    path = "/columns",
    responses(
        (status = 200, description = "Column inventory", body = ColumnsResponse)
    )
)]
pub async fn list_columns(State(core): State<Arc<ServerCore>>) -> Json<ColumnsResponse> {
    info!("GET /columns");
    let columns = core.columns().await;
    debug!("Available columns: {:?}", columns.columns);
    Json(columns)
}

/// Cached results of every active calculation
#[utoipa::path(
    get,
    path = "/virtual-columns",
    responses(
        (status = 200, description = "Column -> row id -> value", body = VirtualColumnsResponse)
    )
)]
pub async fn virtual_columns(State(core): State<Arc<ServerCore>>) -> Json<VirtualColumnsResponse> {
    info!("GET /virtual-columns");
    Json(core.virtual_columns().await)
}
