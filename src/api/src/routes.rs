//! API route handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::AppConfig;
use crate::optimizer::{optimize_conditional, optimize_global_weights, ConditionalWeights, RaceConditions};
use crate::prediction::{predict_race, PredictionError, RacePrediction, Weights};
use crate::stats::{aggregate, summary, Dimension, FilterParams, RateTable, Summary};
use crate::storage::{ExportBundle, ImportSummary, RaceRepository, StoreError};
use crate::strategy::{recommend, StrategyReport};
use crate::types::{ErrorResponse, HealthResponse, Race, RaceResult};

/// Application state shared across handlers.
pub struct AppState {
    pub repo: Mutex<RaceRepository>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(repo: RaceRepository, config: AppConfig) -> Self {
        Self {
            repo: Mutex::new(repo),
            config,
        }
    }

    fn repo(&self) -> Result<MutexGuard<'_, RaceRepository>, ApiError> {
        self.repo
            .lock()
            .map_err(|_| ApiError::internal("Race repository lock poisoned"))
    }

    fn races(&self) -> Result<Vec<Race>, ApiError> {
        Ok(self.repo()?.list()?)
    }
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::NotFound(_)) => ApiError::not_found(err.to_string()),
            None => {
                tracing::error!("Request failed: {:#}", err);
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<PredictionError> for ApiError {
    fn from(err: PredictionError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Prediction payload: `{raceData, weights?}` or a bare race
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PredictRequest {
    Wrapped {
        #[serde(rename = "raceData")]
        race_data: Race,
        #[serde(default)]
        weights: Option<Weights>,
    },
    Bare(Race),
}

impl PredictRequest {
    fn into_parts(self) -> (Race, Option<Weights>) {
        match self {
            PredictRequest::Wrapped { race_data, weights } => (race_data, weights),
            PredictRequest::Bare(race) => (race, None),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/race", get(list_races).post(create_race))
        .route("/api/race/:id/result", put(update_result))
        .route("/api/race/:id", delete(delete_race))
        .route("/api/statistics/:dimension", get(statistics))
        .route("/api/analysis/summary", get(analysis_summary))
        .route("/api/analysis/predict", post(predict))
        .route("/api/analysis/strategy", post(strategy))
        .route("/api/analysis/weights", get(global_weights))
        .route("/api/analysis/weights/conditional", post(conditional_weights))
        .route("/api/export/json", get(export_json))
        .route("/api/import/json", post(import_json))
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn list_races(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Race>>, ApiError> {
    Ok(Json(state.races()?))
}

pub async fn create_race(
    State(state): State<Arc<AppState>>,
    Json(race): Json<Race>,
) -> Result<(StatusCode, Json<Race>), ApiError> {
    let saved = state.repo()?.save(&race)?;
    tracing::info!("Created race {} ({} {}m)", saved.id, saved.course, saved.distance);
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(result): Json<RaceResult>,
) -> Result<Json<Race>, ApiError> {
    let race = state.repo()?.update_result(&id, &result)?;
    tracing::info!("Updated result for race {}", id);
    Ok(Json(race))
}

pub async fn delete_race(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.repo()?.delete(&id)?;
    Ok(Json(json!({ "deleted": id })))
}

/// Rate table for one dimension, filtered by comma-separated query values.
pub async fn statistics(
    State(state): State<Arc<AppState>>,
    Path(dimension): Path<String>,
    Query(params): Query<FilterParams>,
) -> Result<Json<RateTable>, ApiError> {
    let dimension: Dimension = dimension
        .parse()
        .map_err(|e: anyhow::Error| ApiError::bad_request(e.to_string()))?;
    let races = state.races()?;
    Ok(Json(aggregate(&races, dimension, &params.to_filter())))
}

pub async fn analysis_summary(State(state): State<Arc<AppState>>) -> Result<Json<Summary>, ApiError> {
    Ok(Json(summary(&state.races()?)))
}

fn run_prediction(state: &AppState, req: PredictRequest) -> Result<RacePrediction, ApiError> {
    let (race, weights) = req.into_parts();
    let weights = weights.unwrap_or(state.config.prediction.weights);
    let history = state.races()?;
    Ok(predict_race(
        &race,
        &history,
        Some(&weights),
        &state.config.prediction.options(),
    )?)
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<RacePrediction>, ApiError> {
    Ok(Json(run_prediction(&state, req)?))
}

pub async fn strategy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<StrategyReport>, ApiError> {
    let prediction = run_prediction(&state, req)?;
    Ok(Json(recommend(prediction)))
}

pub async fn global_weights(State(state): State<Arc<AppState>>) -> Result<Json<Weights>, ApiError> {
    Ok(Json(optimize_global_weights(&state.races()?)))
}

pub async fn conditional_weights(
    State(state): State<Arc<AppState>>,
    Json(conditions): Json<RaceConditions>,
) -> Result<Json<ConditionalWeights>, ApiError> {
    Ok(Json(optimize_conditional(&state.races()?, &conditions)))
}

pub async fn export_json(State(state): State<Arc<AppState>>) -> Result<Json<ExportBundle>, ApiError> {
    Ok(Json(state.repo()?.export()?))
}

pub async fn import_json(
    State(state): State<Arc<AppState>>,
    Json(bundle): Json<ExportBundle>,
) -> Result<Json<ImportSummary>, ApiError> {
    Ok(Json(state.repo()?.import(&bundle.data)?))
}
