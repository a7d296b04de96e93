use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempt lifecycle: NEW (queued in a bout) -> STARTED (first fetch) -> ANSWERED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    New,
    Started,
    Answered,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Started => "started",
            Self::Answered => "answered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "started" => Some(Self::Started),
            "answered" => Some(Self::Answered),
            _ => None,
        }
    }
}

/// Which slot of a duel pair a player occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Special tools: they change scoring, never the item itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// 50/50: keep the correct option and one decoy
    Halve,
    /// Close the attempt with zero grading impact and reveal the answer
    Skip,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Halve => "halve",
            Self::Skip => "skip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "halve" => Some(Self::Halve),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// One player's try at one item inside a bout.
///
/// Owned by `player_id`; the opposing side only ever reads it, except for the
/// retroactive double-or-nothing adjustment of `score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub game_id: i64,
    pub pair_id: i64,
    pub duel_group: i64,
    pub player_id: i64,
    pub side: Side,
    pub seq: i64,
    pub item_id: i64,
    pub state: AttemptState,
    pub tool: Option<Tool>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub raw_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub base_score: Option<i64>,
    pub score: i64,
    pub doubled: bool,
    pub timed_out: bool,
    pub opponent_delta: Option<i64>,
    pub version: i64,
}

impl Attempt {
    pub fn is_answered(&self) -> bool {
        self.state == AttemptState::Answered
    }

    /// Started and waiting for an answer
    pub fn is_open(&self) -> bool {
        self.state == AttemptState::Started
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_answered() && self.deadline.is_some_and(|d| d <= now)
    }

    pub fn is_skipped(&self) -> bool {
        self.is_answered() && self.tool == Some(Tool::Skip)
    }

    /// Answered and actually graded (not skipped)
    pub fn counts_for_duel(&self) -> bool {
        self.is_answered() && !self.is_skipped() && self.is_correct.is_some()
    }
}
