use serde::{Deserialize, Serialize};

use crate::config::Tuning;

/// Which matchmaking/scoring strategy a game instance runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    /// Play alone, no opponent, no duel adjustments
    Solo,
    /// Asynchronous head-to-head against any player of the game
    Duel,
    /// Head-to-head restricted to the player's group
    Split,
}

impl ModeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Duel => "duel",
            Self::Split => "split",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "solo" | "alone" => Some(Self::Solo),
            "duel" | "aduel" => Some(Self::Duel),
            "split" => Some(Self::Split),
            _ => None,
        }
    }
}

/// Per-instance settings. Unset sizes fall back to [`Tuning`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    pub id: i64,
    pub name: String,
    pub mode: ModeKind,
    pub bout_size: Option<u32>,
    pub max_alone_count: Option<u32>,
    pub time_limit_secs: Option<i64>,
    pub negative_grading: bool,
}

impl GameSettings {
    pub fn new(name: &str, mode: ModeKind) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            mode,
            bout_size: None,
            max_alone_count: None,
            time_limit_secs: None,
            negative_grading: true,
        }
    }

    pub fn bout_size(&self, tuning: &Tuning) -> u32 {
        self.bout_size.unwrap_or(tuning.bout_size).max(1)
    }

    pub fn max_alone_count(&self, tuning: &Tuning) -> u32 {
        self.max_alone_count.unwrap_or(tuning.max_alone_count)
    }

    /// Every `2 * bout_size`-th attempt of a duel group is a wizard attempt
    pub fn is_wizard_seq(&self, seq: i64, tuning: &Tuning) -> bool {
        let period = 2 * i64::from(self.bout_size(tuning));
        seq > 0 && seq % period == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub group_name: Option<String>,
}
