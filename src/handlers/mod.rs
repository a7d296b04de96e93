//! JSON transport over the game service.

pub mod games;
pub mod identity;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::error::{DuelError, ErrorBody};
use crate::state::AppState;

pub use games::{answer, attempt, attempts_batch, high_score, probe, tool};
pub use identity::{PlayerId, PLAYER_HEADER};

/// A service error on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub DuelError);

impl From<DuelError> for ApiError {
    fn from(e: DuelError) -> Self {
        Self(e)
    }
}

pub fn status_for(e: &DuelError) -> StatusCode {
    match e {
        DuelError::NoItemsAvailable => StatusCode::NOT_FOUND,
        DuelError::NoOpponentAvailable | DuelError::ToolUnavailable | DuelError::Conflict => {
            StatusCode::CONFLICT
        }
        DuelError::InvalidUser(_) => StatusCode::UNAUTHORIZED,
        DuelError::GameNotFound(_) | DuelError::AttemptNotFound(_) => StatusCode::NOT_FOUND,
        DuelError::AttemptNotOwned(_) | DuelError::NotInBatch(_) => StatusCode::FORBIDDEN,
        DuelError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        DuelError::DbLock | DuelError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = if self.0.is_internal() {
            // storage details stay in the log
            ErrorBody {
                kind: self.0.kind(),
                message: "internal error".to_string(),
            }
        } else {
            ErrorBody::from(&self.0)
        };
        (status_for(&self.0), Json(body)).into_response()
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/games/{game_id}/attempt", get(attempt))
        .route("/games/{game_id}/attempts/batch", post(attempts_batch))
        .route("/games/{game_id}/attempts/{attempt_id}/answer", post(answer))
        .route("/games/{game_id}/attempts/{attempt_id}/tool", post(tool))
        .route("/games/{game_id}/highscore", get(high_score))
        .route("/games/{game_id}/probe", get(probe))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&DuelError::InvalidUser(1)), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&DuelError::AttemptNotOwned(1)), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&DuelError::NotInBatch(1)), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&DuelError::Timeout("late".into())), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(status_for(&DuelError::NoOpponentAvailable), StatusCode::CONFLICT);
        assert_eq!(status_for(&DuelError::DbLock), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
