//! Axum router and handlers
//!
//! `build_router` returns the bare router; `main.rs` attaches tracing so
//! tests can drive the routes directly.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use super::error::ApiError;
use super::state::AppState;
use crate::common::errors::LedgerError;
use crate::common::types::{RewardOutcome, RewardRequest};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reward", post(create_reward))
        .route("/today-stocks/:user_id", get(today_stocks))
        .route("/historical-inr/:user_id", get(historical_inr))
        .route("/stats/:user_id", get(stats))
        .route("/portfolio/:user_id", get(portfolio))
        .route("/ledger/:reward_id", get(ledger_entries))
        .with_state(state)
}

pub(crate) async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

pub(crate) async fn create_reward(
    State(st): State<Arc<AppState>>,
    body: Result<Json<RewardRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| LedgerError::Validation(e.body_text()))?;

    let response = match st.rewards.submit(request).await? {
        RewardOutcome::Created(result) => (StatusCode::CREATED, Json(result)).into_response(),
        RewardOutcome::Duplicate(result) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Duplicate reward request",
                "existing_reward": result,
            })),
        )
            .into_response(),
        RewardOutcome::InFlight { idempotency_key } => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Reward request already in progress",
                "idempotency_key": idempotency_key,
            })),
        )
            .into_response(),
    };
    Ok(response)
}

pub(crate) async fn today_stocks(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let today = st.reports.today_rewards(&user_id).await?;
    Ok(Json(today))
}

pub(crate) async fn historical_inr(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = st.reports.historical_inr(&user_id).await?;
    Ok(Json(history))
}

pub(crate) async fn stats(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = st.reports.stats(&user_id).await?;
    Ok(Json(stats))
}

pub(crate) async fn portfolio(
    State(st): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let portfolio = st.reports.portfolio(&user_id).await?;
    Ok(Json(portfolio))
}

pub(crate) async fn ledger_entries(
    State(st): State<Arc<AppState>>,
    Path(reward_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = st.reports.ledger_entries(&reward_id).await?;
    Ok(Json(json!({
        "reward_id": reward_id,
        "entries": entries,
    })))
}
