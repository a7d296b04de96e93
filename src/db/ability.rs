//! Ability (per player) and difficulty (per item) records for one game.
//!
//! `theta` and `difficulty` are written only by [`write_rasch_step`]. The
//! aggregate score and percent-complete feed the ranking.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use std::collections::HashMap;

use super::ts;
use crate::adaptive::RaschStep;

#[derive(Debug, Clone, PartialEq)]
pub struct AbilityRecord {
    pub game_id: i64,
    pub player_id: i64,
    pub theta: f64,
    pub score: i64,
    pub answered: i64,
    pub percent: f64,
}

/// One row of the high score table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub rank: i64,
    pub player_id: i64,
    pub name: String,
    pub score: i64,
    pub percent: f64,
}

/// Create the ability record on a player's first play
pub fn ensure_ability(conn: &Connection, game_id: i64, player_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO abilities (game_id, player_id) VALUES (?1, ?2)",
        params![game_id, player_id],
    )?;
    Ok(())
}

pub fn get_ability(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
) -> Result<Option<AbilityRecord>> {
    conn
        .query_row(
            r#"
            SELECT game_id, player_id, theta, score, answered, percent
            FROM abilities WHERE game_id = ?1 AND player_id = ?2
            "#,
            params![game_id, player_id],
            |row| {
                Ok(AbilityRecord {
                    game_id: row.get(0)?,
                    player_id: row.get(1)?,
                    theta: row.get(2)?,
                    score: row.get(3)?,
                    answered: row.get(4)?,
                    percent: row.get(5)?,
                })
            },
        )
        .optional()
}

/// Current theta, 0.0 for a player never seen
pub fn get_theta(conn: &Connection, game_id: i64, player_id: i64) -> Result<f64> {
    Ok(get_ability(conn, game_id, player_id)?.map_or(0.0, |a| a.theta))
}

/// Create the difficulty record the first time an item is seen
pub fn ensure_difficulty(conn: &Connection, game_id: i64, item_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO difficulties (game_id, item_id) VALUES (?1, ?2)",
        params![game_id, item_id],
    )?;
    Ok(())
}

pub fn get_difficulty(conn: &Connection, game_id: i64, item_id: i64) -> Result<f64> {
    let value: Option<f64> = conn
        .query_row(
            "SELECT difficulty FROM difficulties WHERE game_id = ?1 AND item_id = ?2",
            params![game_id, item_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0.0))
}

/// All known difficulties of a game keyed by item id
pub fn get_difficulties(conn: &Connection, game_id: i64) -> Result<HashMap<i64, f64>> {
    let mut stmt = conn.prepare("SELECT item_id, difficulty FROM difficulties WHERE game_id = ?1")?;
    let rows = stmt
        .query_map(params![game_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<HashMap<i64, f64>>>()?;
    Ok(rows)
}

/// Persist the outcome of one Rasch gradient step
pub fn write_rasch_step(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    item_id: i64,
    step: &RaschStep,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure_ability(conn, game_id, player_id)?;
    ensure_difficulty(conn, game_id, item_id)?;
    conn.execute(
        "UPDATE abilities SET theta = ?1, updated_at = ?2 WHERE game_id = ?3 AND player_id = ?4",
        params![step.theta, ts(now), game_id, player_id],
    )?;
    conn.execute(
        "UPDATE difficulties SET difficulty = ?1, updated_at = ?2 WHERE game_id = ?3 AND item_id = ?4",
        params![step.difficulty, ts(now), game_id, item_id],
    )?;
    Ok(())
}

/// Adjust the aggregate score; `answered` counts graded answers
pub fn add_to_score(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    delta: i64,
    answered: i64,
) -> Result<()> {
    ensure_ability(conn, game_id, player_id)?;
    conn.execute(
        r#"
        UPDATE abilities
        SET score = score + ?1, answered = answered + ?2
        WHERE game_id = ?3 AND player_id = ?4
        "#,
        params![delta, answered, game_id, player_id],
    )?;
    Ok(())
}

/// Recompute percent-complete: distinct items answered correctly over pool size
pub fn refresh_percent(conn: &Connection, game_id: i64, player_id: i64) -> Result<f64> {
    let pool: i64 = conn.query_row(
        "SELECT COUNT(*) FROM game_items WHERE game_id = ?1",
        params![game_id],
        |row| row.get(0),
    )?;
    let mastered: i64 = conn.query_row(
        r#"
        SELECT COUNT(*) FROM stats
        WHERE game_id = ?1 AND player_id = ?2 AND item_id != 0 AND times_correct > 0
        "#,
        params![game_id, player_id],
        |row| row.get(0),
    )?;
    let percent = if pool > 0 {
        (mastered as f64 * 100.0) / pool as f64
    } else {
        0.0
    };
    conn.execute(
        "UPDATE abilities SET percent = ?1 WHERE game_id = ?2 AND player_id = ?3",
        params![percent, game_id, player_id],
    )?;
    Ok(percent)
}

/// Top `limit` players by score, then percent. Equal (score, percent) share a rank.
pub fn high_scores(conn: &Connection, game_id: i64, limit: u32) -> Result<Vec<RankedEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT a.player_id, p.name, a.score, a.percent
        FROM abilities a
        JOIN players p ON p.id = a.player_id
        WHERE a.game_id = ?1
        ORDER BY a.score DESC, a.percent DESC, a.player_id ASC
        LIMIT ?2
        "#,
    )?;
    let rows = stmt
        .query_map(params![game_id, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut entries: Vec<RankedEntry> = Vec::with_capacity(rows.len());
    for (i, (player_id, name, score, percent)) in rows.into_iter().enumerate() {
        let rank = match entries.last() {
            Some(prev) if prev.score == score && prev.percent == percent => prev.rank,
            _ => i as i64 + 1,
        };
        entries.push(RankedEntry {
            rank,
            player_id,
            name,
            score,
            percent,
        });
    }
    Ok(entries)
}

/// Competition rank of one player, `None` before their first play
pub fn rank_of(conn: &Connection, game_id: i64, player_id: i64) -> Result<Option<i64>> {
    let Some(me) = get_ability(conn, game_id, player_id)? else {
        return Ok(None);
    };
    let better: i64 = conn.query_row(
        r#"
        SELECT COUNT(*) FROM abilities
        WHERE game_id = ?1 AND (score > ?2 OR (score = ?2 AND percent > ?3))
        "#,
        params![game_id, me.score, me.percent],
        |row| row.get(0),
    )?;
    Ok(Some(better + 1))
}
