use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{BulkUpsertOutcome, BulkUpsertRequest, LookupResult, Security, SecurityInput};
use crate::services::security_service;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/get/:identifier", get(get_security))
        .route("/get/company/:name", get(get_by_company))
        .route("/get/industry/:industry", get(get_by_industry))
        .route("/search", get(search_securities))
        .route("/list", get(list_securities))
        .route("/upsert", post(upsert_security))
        .route("/bulk-upsert", post(bulk_upsert_securities))
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<Security>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub success: bool,
    pub message: String,
    pub data: Vec<Security>,
    pub total_count: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkUpsertResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub outcome: BulkUpsertOutcome,
}

fn list_response(data: Vec<Security>, what: &str) -> ListResponse {
    ListResponse {
        success: true,
        message: format!("Found {} securities {}", data.len(), what),
        count: data.len(),
        data,
    }
}

/// Single row is 200 with the row, several rows a list, nothing is 204.
fn lookup_response(result: LookupResult, identifier: &str) -> Response {
    match result {
        LookupResult::Found(security) => Json(ApiResponse {
            success: true,
            message: format!("Security found for '{}'", identifier),
            data: security,
        })
        .into_response(),
        LookupResult::FoundMany(securities) => {
            Json(list_response(securities, &format!("matching '{}'", identifier))).into_response()
        }
        LookupResult::NotFound => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn get_security(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, AppError> {
    info!("GET /security/get/{} - Looking up security", identifier);
    let result = security_service::get_by_identifier(state.repository.as_ref(), &identifier, state.limits())
        .await
        .map_err(|e| {
            error!("Failed to look up security {}: {}", identifier, e);
            e
        })?;
    Ok(lookup_response(result, &identifier))
}

pub async fn get_by_company(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ListResponse>, AppError> {
    info!("GET /security/get/company/{} - Searching by company name", name);
    let securities =
        security_service::search_by_company_name(state.repository.as_ref(), &name, params.limit, state.limits())
            .await
            .map_err(|e| {
                error!("Failed to search company {}: {}", name, e);
                e
            })?;
    Ok(Json(list_response(securities, &format!("for company '{}'", name))))
}

pub async fn get_by_industry(
    State(state): State<AppState>,
    Path(industry): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ListResponse>, AppError> {
    info!("GET /security/get/industry/{} - Searching by industry", industry);
    let securities =
        security_service::search_by_industry(state.repository.as_ref(), &industry, params.limit, state.limits())
            .await
            .map_err(|e| {
                error!("Failed to search industry {}: {}", industry, e);
                e
            })?;
    Ok(Json(list_response(securities, &format!("in industry '{}'", industry))))
}

pub async fn search_securities(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ListResponse>, AppError> {
    info!("GET /security/search?q={} - Free text search", params.q);
    let securities = security_service::search(state.repository.as_ref(), &params.q, params.limit, state.limits())
        .await
        .map_err(|e| {
            error!("Failed to search securities for {}: {}", params.q, e);
            e
        })?;
    Ok(Json(list_response(securities, &format!("matching '{}'", params.q))))
}

pub async fn list_securities(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<PageResponse>, AppError> {
    info!("GET /security/list - Listing securities");
    let page = security_service::list(state.repository.as_ref(), params.limit, params.offset, state.limits())
        .await
        .map_err(|e| {
            error!("Failed to list securities: {}", e);
            e
        })?;
    Ok(Json(PageResponse {
        success: true,
        message: format!("Retrieved {} of {} securities", page.securities.len(), page.total_count),
        data: page.securities,
        total_count: page.total_count,
        limit: page.limit,
        offset: page.offset,
        has_more: page.has_more,
    }))
}

pub async fn upsert_security(
    State(state): State<AppState>,
    Json(input): Json<SecurityInput>,
) -> Result<Json<ApiResponse<Security>>, AppError> {
    info!("POST /security/upsert - Upserting {:?}", input.isin_code);
    let security = security_service::upsert(state.repository.as_ref(), input)
        .await
        .map_err(|e| {
            error!("Failed to upsert security: {}", e);
            e
        })?;
    Ok(Json(ApiResponse {
        success: true,
        message: "Security upserted successfully".to_string(),
        data: security,
    }))
}

pub async fn bulk_upsert_securities(
    State(state): State<AppState>,
    Json(request): Json<BulkUpsertRequest>,
) -> Result<Json<BulkUpsertResponse>, AppError> {
    info!("POST /security/bulk-upsert - {} securities", request.securities.len());
    let outcome = security_service::bulk_upsert(state.repository.as_ref(), request, state.limits())
        .await
        .map_err(|e| {
            error!("Failed to bulk upsert securities: {}", e);
            e
        })?;
    Ok(Json(BulkUpsertResponse {
        success: outcome.failed_count == 0,
        message: format!(
            "Upserted {} securities, {} failed",
            outcome.upserted_count, outcome.failed_count
        ),
        outcome,
    }))
}
