//! Stat buckets: rolling usage/correctness counters.
//!
//! A bucket is keyed by (game, player or 0, item or 0); zero stands for
//! "everyone" / "every item". Buckets are created lazily and never deleted.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::collections::HashMap;

use super::{parse_ts, ts};

/// Sentinel id of the global player/item rollup
pub const GLOBAL: i64 = 0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatBucket {
    pub game_id: i64,
    pub player_id: i64,
    pub item_id: i64,
    pub times_used: i64,
    pub times_correct: i64,
    pub times_wrong: i64,
    /// Current streak of consecutive correct answers
    pub serial_correct: i64,
    pub running_score: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Question number from which the item is due again for this player
    pub due_no: i64,
}

/// Graded result to fold into the buckets
#[derive(Debug, Clone, Copy)]
pub struct ResultBump {
    pub correct: bool,
    pub score: i64,
    /// New scheduling offset for the (player, item) bucket
    pub due_no: Option<i64>,
}

/// The four buckets one (player, item) event touches
fn bucket_keys(player_id: i64, item_id: i64) -> [(i64, i64); 4] {
    [
        (player_id, item_id),
        (GLOBAL, item_id),
        (player_id, GLOBAL),
        (GLOBAL, GLOBAL),
    ]
}

fn ensure_bucket(conn: &Connection, game_id: i64, player_id: i64, item_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO stats (game_id, player_id, item_id) VALUES (?1, ?2, ?3)",
        params![game_id, player_id, item_id],
    )?;
    Ok(())
}

/// Count one selection of `item_id` for `player_id`
pub fn bump_used(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    item_id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    for (player, item) in bucket_keys(player_id, item_id) {
        ensure_bucket(conn, game_id, player, item)?;
        conn.execute(
            r#"
            UPDATE stats
            SET times_used = times_used + 1, last_used_at = ?1
            WHERE game_id = ?2 AND player_id = ?3 AND item_id = ?4
            "#,
            params![ts(now), game_id, player, item],
        )?;
    }
    Ok(())
}

/// Fold a graded answer into every bucket it belongs to
pub fn record_result(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    item_id: i64,
    bump: &ResultBump,
) -> Result<()> {
    for (player, item) in bucket_keys(player_id, item_id) {
        ensure_bucket(conn, game_id, player, item)?;
        conn.execute(
            r#"
            UPDATE stats
            SET times_correct = times_correct + ?1,
                    times_wrong = times_wrong + ?2,
                    serial_correct = CASE WHEN ?1 = 1 THEN serial_correct + 1 ELSE 0 END,
                    running_score = running_score + ?3
            WHERE game_id = ?4 AND player_id = ?5 AND item_id = ?6
            "#,
            params![
                bump.correct as i64,
                (!bump.correct) as i64,
                bump.score,
                game_id,
                player,
                item
            ],
        )?;
    }

    if let Some(due_no) = bump.due_no {
        conn.execute(
            "UPDATE stats SET due_no = ?1 WHERE game_id = ?2 AND player_id = ?3 AND item_id = ?4",
            params![due_no, game_id, player_id, item_id],
        )?;
    }
    Ok(())
}

/// Apply a retroactive score change to a player's buckets
pub fn adjust_running_score(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    item_id: i64,
    delta: i64,
) -> Result<()> {
    for (player, item) in [(player_id, item_id), (player_id, GLOBAL)] {
        ensure_bucket(conn, game_id, player, item)?;
        conn.execute(
            r#"
            UPDATE stats SET running_score = running_score + ?1
            WHERE game_id = ?2 AND player_id = ?3 AND item_id = ?4
            "#,
            params![delta, game_id, player, item],
        )?;
    }
    Ok(())
}

pub fn get_bucket(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    item_id: i64,
) -> Result<Option<StatBucket>> {
    conn
        .query_row(
            r#"
            SELECT game_id, player_id, item_id, times_used, times_correct, times_wrong,
                          serial_correct, running_score, last_used_at, due_no
            FROM stats WHERE game_id = ?1 AND player_id = ?2 AND item_id = ?3
            "#,
            params![game_id, player_id, item_id],
            row_to_bucket,
        )
        .optional()
}

/// A player's per-item buckets keyed by item id
pub fn get_player_item_buckets(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
) -> Result<HashMap<i64, StatBucket>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT game_id, player_id, item_id, times_used, times_correct, times_wrong,
                      serial_correct, running_score, last_used_at, due_no
        FROM stats WHERE game_id = ?1 AND player_id = ?2 AND item_id != 0
        "#,
    )?;
    let buckets = stmt
        .query_map(params![game_id, player_id], row_to_bucket)?
        .map(|b| b.map(|b| (b.item_id, b)))
        .collect::<Result<HashMap<_, _>>>()?;
    Ok(buckets)
}

/// Global usage count per item (the starvation-avoidance signal)
pub fn get_global_item_usage(conn: &Connection, game_id: i64) -> Result<HashMap<i64, i64>> {
    let mut stmt = conn.prepare(
        "SELECT item_id, times_used FROM stats WHERE game_id = ?1 AND player_id = 0 AND item_id != 0",
    )?;
    let usage = stmt
        .query_map(params![game_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<HashMap<i64, i64>>>()?;
    Ok(usage)
}

fn row_to_bucket(row: &rusqlite::Row) -> Result<StatBucket> {
    Ok(StatBucket {
        game_id: row.get(0)?,
        player_id: row.get(1)?,
        item_id: row.get(2)?,
        times_used: row.get(3)?,
        times_correct: row.get(4)?,
        times_wrong: row.get(5)?,
        serial_correct: row.get(6)?,
        running_score: row.get(7)?,
        last_used_at: parse_ts(row.get(8)?),
        due_no: row.get(9)?,
    })
}
