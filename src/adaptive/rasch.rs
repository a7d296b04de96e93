//! Online Rasch (1PL IRT) estimation.
//!
//! After every graded answer the player's ability and the item's difficulty
//! take one gradient step toward the observed outcome:
//!
//! ```text
//! p     = 1 / (1 + e^-(theta - difficulty))
//! err   = observed - p
//! theta      += lr * err
//! difficulty -= lr * err
//! ```

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db;
use crate::error::Result;

/// Ability and difficulty after one update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaschStep {
    pub theta: f64,
    pub difficulty: f64,
}

/// Probability that a player of ability `theta` answers an item of `difficulty` correctly
pub fn probability(theta: f64, difficulty: f64) -> f64 {
    1.0 / (1.0 + (-(theta - difficulty)).exp())
}

pub fn rasch_step(theta: f64, difficulty: f64, correct: bool, learning_rate: f64) -> RaschStep {
    let observed = if correct { 1.0 } else { 0.0 };
    let error = observed - probability(theta, difficulty);
    RaschStep {
        theta: theta + learning_rate * error,
        difficulty: difficulty - learning_rate * error,
    }
}

/// Read the current estimates, step them, and write both back.
///
/// Must run inside the transaction that marks the attempt answered so the
/// steps apply in commit order.
pub fn apply_graded_answer(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    item_id: i64,
    correct: bool,
    learning_rate: f64,
    now: DateTime<Utc>,
) -> Result<RaschStep> {
    let theta = db::get_theta(conn, game_id, player_id)?;
    let difficulty = db::get_difficulty(conn, game_id, item_id)?;
    let step = rasch_step(theta, difficulty, correct, learning_rate);
    db::write_rasch_step(conn, game_id, player_id, item_id, &step, now)?;
    tracing::debug!(
        "Rasch step game={} player={} item={}: theta {:.4} -> {:.4}, difficulty {:.4} -> {:.4}",
        game_id,
        player_id,
        item_id,
        theta,
        step.theta,
        difficulty,
        step.difficulty
    );
    Ok(step)
}
