use crate::errors::Error;
use crate::model::{DistanceReport, LocationSample, MovementState};
use crate::query::{freshness_label, TrackingQueries, NO_MOTION_LABEL};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Clone)]
struct AppState {
    queries: TrackingQueries,
}

#[derive(Debug, Deserialize)]
pub struct RouteQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct DistanceQuery {
    days: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: MovementState,
    pub last_update: DateTime<Utc>,
    pub last_update_label: String,
    pub last_motion: Option<DateTime<Utc>>,
    pub last_motion_label: String,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub data: Vec<LocationSample>,
    pub total: usize,
}

pub fn create_router(queries: TrackingQueries) -> Router {
    let state = AppState { queries };

    Router::new()
        .route("/api/v1/devices/:device_id/state", get(get_state))
        .route("/api/v1/devices/:device_id/location", get(get_location))
        .route("/api/v1/devices/:device_id/route", get(get_route))
        .route("/api/v1/devices/:device_id/route/range", get(get_route_range))
        .route("/api/v1/devices/:device_id/distance", get(get_distance))
        .with_state(state)
}

async fn get_state(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<Json<StateResponse>, AppError> {
    let current = state.queries.current_state(device_id).await?;
    let now = Utc::now();

    Ok(Json(StateResponse {
        state: current.state,
        last_update: current.last_update,
        last_update_label: freshness_label(current.last_update, now),
        last_motion: current.last_motion,
        last_motion_label: current
            .last_motion
            .map(|at| freshness_label(at, now))
            .unwrap_or_else(|| NO_MOTION_LABEL.to_string()),
    }))
}

async fn get_location(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<Json<LocationSample>, AppError> {
    Ok(Json(state.queries.latest_sample(device_id).await?))
}

async fn get_route(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Query(params): Query<RouteQuery>,
) -> Result<Json<RouteResponse>, AppError> {
    let data = state.queries.recent_samples(device_id, params.limit).await?;
    Ok(Json(RouteResponse {
        total: data.len(),
        data,
    }))
}

async fn get_route_range(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<RouteResponse>, AppError> {
    let data = state
        .queries
        .samples_in_range(device_id, params.start, params.end)
        .await?;
    Ok(Json(RouteResponse {
        total: data.len(),
        data,
    }))
}

async fn get_distance(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
    Query(params): Query<DistanceQuery>,
) -> Result<Json<DistanceReport>, AppError> {
    let days = params.days.unwrap_or(7);
    Ok(Json(state.queries.distance_over_window(device_id, days).await?))
}

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API error: {}", self.0);
            return (status, "Internal server error".to_string()).into_response();
        }
        (status, self.0.to_string()).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}
