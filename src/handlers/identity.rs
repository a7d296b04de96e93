//! Player identity extractor.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::ApiError;
use crate::error::DuelError;
use crate::state::AppState;

pub const PLAYER_HEADER: &str = "x-player-id";

/// The calling player, taken from the `x-player-id` header.
/// Whether the player exists is checked by the service call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerId(pub i64);

impl FromRequestParts<AppState> for PlayerId {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(PLAYER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(PlayerId)
            .ok_or(ApiError(DuelError::InvalidUser(0)))
    }
}
