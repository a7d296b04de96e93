use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Side;

/// Two players sharing one bout, or one player waiting for an opponent.
///
/// Attempts reference the pair by id; the pair holds no attempt list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuelPair {
    pub id: i64,
    pub game_id: i64,
    /// Lineage of bouts opened by `user_a`; sequence numbers are scoped to it
    pub duel_group: i64,
    pub user_a: i64,
    pub user_b: Option<i64>,
    /// Sequence number of the first attempt of this bout
    pub first_seq: i64,
    /// Sequence number at which side A used its tool
    pub tool_a_at: Option<i64>,
    pub tool_b_at: Option<i64>,
    pub closed_a: bool,
    pub closed_b: bool,
    pub time_limit_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl DuelPair {
    pub fn side_of(&self, player_id: i64) -> Option<Side> {
        if self.user_a == player_id {
            Some(Side::A)
        } else if self.user_b == Some(player_id) {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn player_on(&self, side: Side) -> Option<i64> {
        match side {
            Side::A => Some(self.user_a),
            Side::B => self.user_b,
        }
    }

    pub fn is_closed(&self, side: Side) -> bool {
        match side {
            Side::A => self.closed_a,
            Side::B => self.closed_b,
        }
    }

    pub fn tool_marker(&self, side: Side) -> Option<i64> {
        match side {
            Side::A => self.tool_a_at,
            Side::B => self.tool_b_at,
        }
    }

    pub fn has_opponent(&self) -> bool {
        self.user_b.is_some()
    }

    pub fn is_retired(&self) -> bool {
        self.closed_a && self.closed_b
    }
}
