//! Error taxonomy shared by the service, the storage layer and the transport.

use serde::Serialize;
use thiserror::Error;

use crate::db::DbLockError;

pub type Result<T> = std::result::Result<T, DuelError>;

#[derive(Debug, Error)]
pub enum DuelError {
    /// Catalog exhausted for this player under every relaxation pass
    #[error("nothing to play right now")]
    NoItemsAvailable,

    /// Matchmaking could not place the player; poll again shortly
    #[error("no opponent available, try again shortly")]
    NoOpponentAvailable,

    #[error("unknown player {0}")]
    InvalidUser(i64),

    #[error("unknown game {0}")]
    GameNotFound(i64),

    #[error("attempt {0} not found")]
    AttemptNotFound(i64),

    #[error("attempt {0} belongs to another player")]
    AttemptNotOwned(i64),

    /// A shared-client batch must include the player making the request
    #[error("player {0} is not part of this batch")]
    NotInBatch(i64),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("tool already used in this duel")]
    ToolUnavailable,

    /// Lost an optimistic-concurrency race; retried by the unit of work
    #[error("concurrent update conflict")]
    Conflict,

    #[error("database unavailable")]
    DbLock,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<DbLockError> for DuelError {
    fn from(_: DbLockError) -> Self {
        DuelError::DbLock
    }
}

impl DuelError {
    /// Stable machine-readable name used in transport payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoItemsAvailable => "no_items_available",
            Self::NoOpponentAvailable => "no_opponent_available",
            Self::InvalidUser(_) => "invalid_user",
            Self::GameNotFound(_) => "game_not_found",
            Self::AttemptNotFound(_) => "attempt_not_found",
            Self::AttemptNotOwned(_) => "attempt_not_owned",
            Self::NotInBatch(_) => "not_in_batch",
            Self::Timeout(_) => "timeout",
            Self::ToolUnavailable => "tool_unavailable",
            Self::Conflict => "conflict",
            Self::DbLock | Self::Database(_) => "internal",
        }
    }

    /// Whether re-running the unit of work from its read step may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict => true,
            Self::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Storage failures are logged at error level, everything else at warn
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::DbLock | Self::Database(_))
    }
}

/// Structured error payload returned instead of a result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<&DuelError> for ErrorBody {
    fn from(e: &DuelError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
