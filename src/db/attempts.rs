//! Attempt records.
//!
//! State transitions are conditional on the row's `version` so a racing
//! request that read a stale row gets zero affected rows instead of
//! overwriting a newer state.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};

use super::{parse_ts, ts};
use crate::domain::{Attempt, AttemptState, Side, Tool};

const ATTEMPT_COLUMNS: &str = r#"
    id, game_id, pair_id, duel_group, player_id, side, seq, item_id, state, tool,
    created_at, started_at, answered_at, deadline, raw_answer, is_correct, base_score,
    score, doubled, timed_out, opponent_delta, version
"#;

/// Fields of an attempt at creation time
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub game_id: i64,
    pub pair_id: i64,
    pub duel_group: i64,
    pub player_id: i64,
    pub side: Side,
    pub seq: i64,
    pub item_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Everything written by the ANSWERED transition
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub raw_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub base_score: Option<i64>,
    pub score: i64,
    pub doubled: bool,
    pub timed_out: bool,
    pub opponent_delta: Option<i64>,
    pub tool: Option<Tool>,
    pub answered_at: DateTime<Utc>,
}

pub fn insert_attempt(conn: &Connection, new: &NewAttempt) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO attempts (game_id, pair_id, duel_group, player_id, side, seq, item_id, state, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'new', ?8)
        "#,
        params![
            new.game_id,
            new.pair_id,
            new.duel_group,
            new.player_id,
            new.side.as_str(),
            new.seq,
            new.item_id,
            ts(new.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_attempt(conn: &Connection, id: i64) -> Result<Option<Attempt>> {
    conn
        .query_row(
            &format!("SELECT {} FROM attempts WHERE id = ?1", ATTEMPT_COLUMNS),
            params![id],
            row_to_attempt,
        )
        .optional()
}

/// All attempts of one side of a pair, in sequence order
pub fn list_side_attempts(conn: &Connection, pair_id: i64, side: Side) -> Result<Vec<Attempt>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM attempts WHERE pair_id = ?1 AND side = ?2 ORDER BY seq ASC",
        ATTEMPT_COLUMNS
    ))?;
    let attempts = stmt
        .query_map(params![pair_id, side.as_str()], row_to_attempt)?
        .collect::<Result<Vec<_>>>()?;
    Ok(attempts)
}

/// The side's attempt at `seq`, answered or not
pub fn get_matching_attempt(
    conn: &Connection,
    pair_id: i64,
    side: Side,
    seq: i64,
) -> Result<Option<Attempt>> {
    conn
        .query_row(
            &format!(
                "SELECT {} FROM attempts WHERE pair_id = ?1 AND side = ?2 AND seq = ?3",
                ATTEMPT_COLUMNS
            ),
            params![pair_id, side.as_str(), seq],
            row_to_attempt,
        )
        .optional()
}

/// Attempts of a side not yet answered
pub fn count_unanswered(conn: &Connection, pair_id: i64, side: Side) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM attempts WHERE pair_id = ?1 AND side = ?2 AND state != 'answered'",
        params![pair_id, side.as_str()],
        |row| row.get(0),
    )
}

pub fn count_answered(conn: &Connection, pair_id: i64, side: Side) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM attempts WHERE pair_id = ?1 AND side = ?2 AND state = 'answered'",
        params![pair_id, side.as_str()],
        |row| row.get(0),
    )
}

/// Item ids already assigned to a side
pub fn side_item_ids(conn: &Connection, pair_id: i64, side: Side) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT item_id FROM attempts WHERE pair_id = ?1 AND side = ?2 ORDER BY seq")?;
    let ids = stmt
        .query_map(params![pair_id, side.as_str()], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<i64>>>()?;
    Ok(ids)
}

/// Highest sequence number a player holds in a duel group, 0 if none
pub fn max_seq_in_group(
    conn: &Connection,
    game_id: i64,
    duel_group: i64,
    player_id: i64,
) -> Result<i64> {
    conn.query_row(
        r#"
        SELECT COALESCE(MAX(seq), 0) FROM attempts
        WHERE game_id = ?1 AND duel_group = ?2 AND player_id = ?3
        "#,
        params![game_id, duel_group, player_id],
        |row| row.get(0),
    )
}

/// Number of questions ever assigned to a player in a game
pub fn count_player_attempts(conn: &Connection, game_id: i64, player_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM attempts WHERE game_id = ?1 AND player_id = ?2",
        params![game_id, player_id],
        |row| row.get(0),
    )
}

/// Items a player has been assigned while nobody held side B of their pair
pub fn count_alone_items(conn: &Connection, game_id: i64, player_id: i64) -> Result<i64> {
    conn.query_row(
        r#"
        SELECT COUNT(*) FROM attempts a
        JOIN duel_pairs p ON p.id = a.pair_id
        WHERE a.game_id = ?1 AND a.player_id = ?2 AND p.user_a = ?2 AND p.user_b IS NULL
        "#,
        params![game_id, player_id],
        |row| row.get(0),
    )
}

/// Attempts ever created for an item in a game
pub fn count_attempts_for_item(conn: &Connection, game_id: i64, item_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM attempts WHERE game_id = ?1 AND item_id = ?2",
        params![game_id, item_id],
        |row| row.get(0),
    )
}

/// Attempts started and not yet answered, per duel group
pub fn count_open_attempts(
    conn: &Connection,
    game_id: i64,
    duel_group: i64,
    player_id: i64,
) -> Result<i64> {
    conn.query_row(
        r#"
        SELECT COUNT(*) FROM attempts
        WHERE game_id = ?1 AND duel_group = ?2 AND player_id = ?3 AND state = 'started'
        "#,
        params![game_id, duel_group, player_id],
        |row| row.get(0),
    )
}

/// NEW -> STARTED. Returns false if the row changed since it was read.
pub fn start_attempt(
    conn: &Connection,
    id: i64,
    version: i64,
    started_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE attempts
        SET state = 'started', started_at = ?1, deadline = ?2, version = version + 1
        WHERE id = ?3 AND version = ?4 AND state = 'new'
        "#,
        params![ts(started_at), deadline.map(ts), id, version],
    )?;
    Ok(updated == 1)
}

/// Record a tool on an unanswered attempt
pub fn set_attempt_tool(conn: &Connection, id: i64, version: i64, tool: Tool) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE attempts SET tool = ?1, version = version + 1
        WHERE id = ?2 AND version = ?3 AND state != 'answered'
        "#,
        params![tool.as_str(), id, version],
    )?;
    Ok(updated == 1)
}

/// Transition to ANSWERED. Returns false if already answered or changed since read.
pub fn mark_answered(
    conn: &Connection,
    id: i64,
    version: i64,
    record: &AnswerRecord,
) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE attempts
        SET state = 'answered', raw_answer = ?1, is_correct = ?2, base_score = ?3, score = ?4,
                doubled = ?5, timed_out = ?6, opponent_delta = ?7, tool = ?8, answered_at = ?9,
                started_at = COALESCE(started_at, ?9), version = version + 1
        WHERE id = ?10 AND version = ?11 AND state != 'answered'
        "#,
        params![
            record.raw_answer,
            record.is_correct,
            record.base_score,
            record.score,
            record.doubled,
            record.timed_out,
            record.opponent_delta,
            record.tool.map(|t| t.as_str()),
            ts(record.answered_at),
            id,
            version,
        ],
    )?;
    Ok(updated == 1)
}

/// Retroactive double-or-nothing on an already answered attempt
pub fn set_doubled_score(conn: &Connection, id: i64, version: i64, score: i64) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE attempts SET score = ?1, doubled = 1, version = version + 1
        WHERE id = ?2 AND version = ?3 AND state = 'answered' AND doubled = 0
        "#,
        params![score, id, version],
    )?;
    Ok(updated == 1)
}

fn row_to_attempt(row: &rusqlite::Row) -> Result<Attempt> {
    let side: String = row.get(5)?;
    let state: String = row.get(8)?;
    let tool: Option<String> = row.get(9)?;
    let created_at: Option<String> = row.get(10)?;

    Ok(Attempt {
        id: row.get(0)?,
        game_id: row.get(1)?,
        pair_id: row.get(2)?,
        duel_group: row.get(3)?,
        player_id: row.get(4)?,
        side: Side::from_str(&side).unwrap_or(Side::A),
        seq: row.get(6)?,
        item_id: row.get(7)?,
        state: AttemptState::from_str(&state).unwrap_or(AttemptState::New),
        tool: tool.as_deref().and_then(Tool::from_str),
        created_at: parse_ts(created_at).unwrap_or_else(Utc::now),
        started_at: parse_ts(row.get(11)?),
        answered_at: parse_ts(row.get(12)?),
        deadline: parse_ts(row.get(13)?),
        raw_answer: row.get(14)?,
        is_correct: row.get(15)?,
        base_score: row.get(16)?,
        score: row.get(17)?,
        doubled: row.get(18)?,
        timed_out: row.get(19)?,
        opponent_delta: row.get(20)?,
        version: row.get(21)?,
    })
}
