use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use ratings_core::domain::recommendation::{Brokerage, Company, Recommendation};
use ratings_core::error::PersistenceError;
use ratings_core::storage::entities;
use ratings_core::storage::queries::{self, PageRequest, RecommendationFilter};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Limit cap for the general listing.
const MAX_LIMIT: i64 = 100;
/// Limit cap for listings scoped to one company or brokerage.
const MAX_SCOPED_LIMIT: i64 = 1000;

#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: Option<PgPool>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/companies", get(list_companies))
        .route("/companies/:ticker", get(get_company))
        .route("/brokerages", get(list_brokerages))
        .route("/recommendations", get(list_recommendations))
        .route(
            "/recommendations/company/:ticker",
            get(list_recommendations_by_company),
        )
        .route(
            "/recommendations/brokerage/:brokerage_id",
            get(list_recommendations_by_brokerage),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Meta {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

fn success<T: Serialize>(data: T, meta: Option<Meta>) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
        meta,
    })
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "database unavailable".to_string(),
        }
    }
}

impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        let err = anyhow::Error::new(err);
        sentry_anyhow::capture_anyhow(&err);
        let message = format!("{err:#}");
        tracing::error!(error = %message, "storage read failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
            meta: None,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Raw query parameters. Everything is optional text so a bad `limit` falls back to the
/// default instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    limit: Option<String>,
    offset: Option<String>,
    ticker: Option<String>,
    brokerage_id: Option<String>,
}

impl ListParams {
    fn page(&self, max_limit: i64) -> PageRequest {
        PageRequest::clamped(
            parse_int(self.limit.as_deref()),
            parse_int(self.offset.as_deref()),
            max_limit,
        )
    }
}

fn parse_int(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_brokerage_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::bad_request(format!("invalid brokerage_id: {raw}")))
}

fn require_pool(state: &AppState) -> Result<&PgPool, ApiError> {
    state.pool.as_ref().ok_or_else(ApiError::unavailable)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = if state.pool.is_some() {
        "connected"
    } else {
        "unavailable"
    };
    Json(serde_json::json!({
        "status": "ok",
        "message": "Server is running",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "ratings-api",
        "database": database,
    }))
}

async fn list_companies(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Company>>>, ApiError> {
    let pool = require_pool(&state)?;
    let companies = entities::list_companies(pool).await?;
    Ok(success(companies, None))
}

async fn get_company(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<ApiResponse<Company>>, ApiError> {
    let pool = require_pool(&state)?;
    let company = entities::company_by_ticker(pool, &ticker)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("company not found: {ticker}")))?;
    Ok(success(company, None))
}

async fn list_brokerages(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Brokerage>>>, ApiError> {
    let pool = require_pool(&state)?;
    let brokerages = entities::list_brokerages(pool).await?;
    Ok(success(brokerages, None))
}

async fn list_recommendations(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Recommendation>>>, ApiError> {
    let Query(params) = params?;
    let filter = RecommendationFilter {
        ticker: non_blank(params.ticker.as_deref()),
        brokerage_id: non_blank(params.brokerage_id.as_deref())
            .map(|raw| parse_brokerage_id(&raw))
            .transpose()?,
    };
    respond_with_page(&state, params.page(MAX_LIMIT), filter).await
}

async fn list_recommendations_by_company(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Recommendation>>>, ApiError> {
    let Query(params) = params?;
    let filter = RecommendationFilter {
        ticker: Some(ticker),
        brokerage_id: None,
    };
    respond_with_page(&state, params.page(MAX_SCOPED_LIMIT), filter).await
}

async fn list_recommendations_by_brokerage(
    State(state): State<AppState>,
    Path(brokerage_id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Recommendation>>>, ApiError> {
    let Query(params) = params?;
    let filter = RecommendationFilter {
        ticker: None,
        brokerage_id: Some(parse_brokerage_id(&brokerage_id)?),
    };
    respond_with_page(&state, params.page(MAX_SCOPED_LIMIT), filter).await
}

async fn respond_with_page(
    state: &AppState,
    page: PageRequest,
    filter: RecommendationFilter,
) -> Result<Json<ApiResponse<Vec<Recommendation>>>, ApiError> {
    let pool = require_pool(state)?;
    let result = queries::query_recommendations(pool, page, &filter).await?;
    let meta = Meta {
        total: result.total,
        limit: page.limit,
        offset: page.offset,
    };
    Ok(success(result.items, Some(meta)))
}
