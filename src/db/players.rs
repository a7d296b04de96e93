//! Players and game instances

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};

use super::ts;
use crate::domain::{GameSettings, ModeKind, Player};

pub fn insert_player(conn: &Connection, name: &str, group_name: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO players (name, group_name, created_at) VALUES (?1, ?2, ?3)",
        params![name, group_name, ts(Utc::now())],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_player(conn: &Connection, id: i64) -> Result<Option<Player>> {
    conn
        .query_row(
            "SELECT id, name, group_name FROM players WHERE id = ?1",
            params![id],
            |row| {
                Ok(Player {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    group_name: row.get(2)?,
                })
            },
        )
        .optional()
}

/// Ids of every player sharing `group_name`
pub fn get_group_member_ids(conn: &Connection, group_name: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM players WHERE group_name = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![group_name], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<i64>>>()?;
    Ok(ids)
}

pub fn insert_game(conn: &Connection, game: &GameSettings) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO games (name, mode, bout_size, max_alone_count, time_limit_secs, negative_grading, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            game.name,
            game.mode.as_str(),
            game.bout_size,
            game.max_alone_count,
            game.time_limit_secs,
            game.negative_grading,
            ts(Utc::now()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_game(conn: &Connection, id: i64) -> Result<Option<GameSettings>> {
    conn
        .query_row(
            r#"
            SELECT id, name, mode, bout_size, max_alone_count, time_limit_secs, negative_grading
            FROM games WHERE id = ?1
            "#,
            params![id],
            |row| {
                let mode: String = row.get(2)?;
                Ok(GameSettings {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    mode: ModeKind::from_str(&mode).unwrap_or(ModeKind::Duel),
                    bout_size: row.get(3)?,
                    max_alone_count: row.get(4)?,
                    time_limit_secs: row.get(5)?,
                    negative_grading: row.get(6)?,
                })
            },
        )
        .optional()
}
