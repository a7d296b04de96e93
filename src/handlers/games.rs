//! Game routes. Every handler is a thin call into [`crate::service`].

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{ApiError, PlayerId};
use crate::db::RankedEntry;
use crate::domain::Tool;
use crate::duel::{AnswerOutcome, ToolOutcome};
use crate::service::{self, AttemptView, BatchEntry, ProbeToken};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
    /// Tool applied together with the answer
    #[serde(default)]
    pub tool: Option<Tool>,
}

#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub tool: Tool,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub player_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HighScoreQuery {
    pub count: Option<u32>,
}

/// GET /games/{game_id}/attempt
pub async fn attempt(
    State(state): State<AppState>,
    PlayerId(player_id): PlayerId,
    Path(game_id): Path<i64>,
) -> Result<Json<AttemptView>, ApiError> {
    Ok(Json(service::get_attempt(&state, game_id, player_id)?))
}

/// POST /games/{game_id}/attempts/{attempt_id}/answer
pub async fn answer(
    State(state): State<AppState>,
    PlayerId(player_id): PlayerId,
    Path((game_id, attempt_id)): Path<(i64, i64)>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AnswerOutcome>, ApiError> {
    let outcome = service::submit_answer(
        &state,
        game_id,
        player_id,
        attempt_id,
        &request.answer,
        request.tool,
    )?;
    Ok(Json(outcome))
}

/// POST /games/{game_id}/attempts/{attempt_id}/tool
pub async fn tool(
    State(state): State<AppState>,
    PlayerId(player_id): PlayerId,
    Path((game_id, attempt_id)): Path<(i64, i64)>,
    Json(request): Json<ToolRequest>,
) -> Result<Json<ToolOutcome>, ApiError> {
    Ok(Json(service::use_tool(&state, game_id, player_id, attempt_id, request.tool)?))
}

/// GET /games/{game_id}/highscore?count=N
pub async fn high_score(
    State(state): State<AppState>,
    PlayerId(player_id): PlayerId,
    Path(game_id): Path<i64>,
    Query(query): Query<HighScoreQuery>,
) -> Result<Json<Vec<RankedEntry>>, ApiError> {
    Ok(Json(service::get_high_score(&state, game_id, player_id, query.count)?))
}

/// POST /games/{game_id}/attempts/batch
///
/// Several players sharing one client. The caller must be one of them;
/// after that, failures are reported per player.
pub async fn attempts_batch(
    State(state): State<AppState>,
    PlayerId(player_id): PlayerId,
    Path(game_id): Path<i64>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<Vec<BatchEntry>>, ApiError> {
    let entries = service::get_attempts_batch(&state, game_id, player_id, &request.player_ids)?;
    Ok(Json(entries))
}

/// GET /games/{game_id}/probe
pub async fn probe(
    State(state): State<AppState>,
    PlayerId(player_id): PlayerId,
    Path(game_id): Path<i64>,
) -> Result<Json<ProbeToken>, ApiError> {
    Ok(Json(service::probe(&state, game_id, player_id)?))
}
