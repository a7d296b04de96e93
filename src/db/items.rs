//! Item store: question content plus aggregate usage counters

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Result};

use super::{parse_ts, ts};
use crate::domain::{AnswerOption, Item, ItemKind};

pub fn insert_item(conn: &Connection, item: &Item) -> Result<i64> {
    let answers = serde_json::to_string(&item.answers)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO items (kind, question, answers) VALUES (?1, ?2, ?3)",
        params![item.kind.as_str(), item.question, answers],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_item(conn: &Connection, id: i64) -> Result<Option<Item>> {
    conn
        .query_row(
            r#"
            SELECT id, kind, question, answers, times_used, times_correct, times_wrong, last_used_at
            FROM items WHERE id = ?1
            "#,
            params![id],
            row_to_item,
        )
        .optional()
}

pub fn add_item_to_game(conn: &Connection, game_id: i64, item_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO game_items (game_id, item_id) VALUES (?1, ?2)",
        params![game_id, item_id],
    )?;
    Ok(())
}

/// Every item id in a game's pool
pub fn game_item_ids(conn: &Connection, game_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT item_id FROM game_items WHERE game_id = ?1 ORDER BY item_id")?;
    let ids = stmt
        .query_map(params![game_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<i64>>>()?;
    Ok(ids)
}

pub fn game_pool_size(conn: &Connection, game_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM game_items WHERE game_id = ?1",
        params![game_id],
        |row| row.get(0),
    )
}

/// Usage update at selection time, before the player answers
pub fn record_item_selected(conn: &Connection, item_id: i64, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE items SET times_used = times_used + 1, last_used_at = ?1 WHERE id = ?2",
        params![ts(now), item_id],
    )?;
    Ok(())
}

pub fn record_item_result(conn: &Connection, item_id: i64, correct: bool) -> Result<()> {
    conn.execute(
        r#"
        UPDATE items
        SET times_correct = times_correct + ?1,
                times_wrong = times_wrong + ?2
        WHERE id = ?3
        "#,
        params![correct as i64, (!correct) as i64, item_id],
    )?;
    Ok(())
}

fn row_to_item(row: &rusqlite::Row) -> Result<Item> {
    let kind_str: String = row.get(1)?;
    let answers_json: String = row.get(3)?;
    let answers: Vec<AnswerOption> = serde_json::from_str(&answers_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Item {
        id: row.get(0)?,
        kind: ItemKind::from_str(&kind_str).unwrap_or(ItemKind::ShortAnswer),
        question: row.get(2)?,
        answers,
        times_used: row.get(4)?,
        times_correct: row.get(5)?,
        times_wrong: row.get(6)?,
        last_used_at: parse_ts(row.get(7)?),
    })
}
