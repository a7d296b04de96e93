//! Duel pair records

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};

use super::{parse_ts, ts};
use crate::domain::{DuelPair, Side};

const PAIR_COLUMNS: &str = r#"
    id, game_id, duel_group, user_a, user_b, first_seq, tool_a_at, tool_b_at,
    closed_a, closed_b, time_limit_secs, created_at, retired_at, version
"#;

#[derive(Debug, Clone)]
pub struct NewPair {
    pub game_id: i64,
    pub duel_group: i64,
    pub user_a: i64,
    pub first_seq: i64,
    pub time_limit_secs: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert a pair with an empty side B, unless `user_a` already holds an
/// unclosed side in this game. Returns the new id, or `None` if the player
/// was busy.
pub fn insert_pair_if_idle(conn: &Connection, new: &NewPair) -> Result<Option<i64>> {
    let inserted = conn.execute(
        r#"
        INSERT INTO duel_pairs (game_id, duel_group, user_a, first_seq, time_limit_secs, created_at)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6
        WHERE NOT EXISTS (
            SELECT 1 FROM duel_pairs
            WHERE game_id = ?1
                AND ((user_a = ?3 AND closed_a = 0) OR (user_b = ?3 AND closed_b = 0))
        )
        "#,
        params![
            new.game_id,
            new.duel_group,
            new.user_a,
            new.first_seq,
            new.time_limit_secs,
            ts(new.created_at),
        ],
    )?;
    Ok((inserted == 1).then(|| conn.last_insert_rowid()))
}

pub fn get_pair(conn: &Connection, id: i64) -> Result<Option<DuelPair>> {
    conn
        .query_row(
            &format!("SELECT {} FROM duel_pairs WHERE id = ?1", PAIR_COLUMNS),
            params![id],
            row_to_pair,
        )
        .optional()
}

/// The pair in which the player's own side is still open
pub fn find_active_pair(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
) -> Result<Option<DuelPair>> {
    conn
        .query_row(
            &format!(
                r#"
                SELECT {} FROM duel_pairs
                WHERE game_id = ?1
                    AND ((user_a = ?2 AND closed_a = 0) OR (user_b = ?2 AND closed_b = 0))
                ORDER BY id ASC LIMIT 1
                "#,
                PAIR_COLUMNS
            ),
            params![game_id, player_id],
            row_to_pair,
        )
        .optional()
}

/// The player's most recent pair, open or not
pub fn find_latest_pair(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
) -> Result<Option<DuelPair>> {
    conn
        .query_row(
            &format!(
                r#"
                SELECT {} FROM duel_pairs
                WHERE game_id = ?1 AND (user_a = ?2 OR user_b = ?2)
                ORDER BY id DESC LIMIT 1
                "#,
                PAIR_COLUMNS
            ),
            params![game_id, player_id],
            row_to_pair,
        )
        .optional()
}

/// Pairs whose side B is empty, oldest first, excluding the player's own.
/// `pool` restricts the side-A players considered.
pub fn find_waiting_pairs(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    pool: Option<&[i64]>,
) -> Result<Vec<DuelPair>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM duel_pairs
        WHERE game_id = ?1 AND user_b IS NULL AND user_a != ?2 AND retired_at IS NULL
        ORDER BY id ASC
        "#,
        PAIR_COLUMNS
    ))?;
    let pairs = stmt
        .query_map(params![game_id, player_id], row_to_pair)?
        .collect::<Result<Vec<_>>>()?;
    Ok(match pool {
        Some(pool) => pairs.into_iter().filter(|p| pool.contains(&p.user_a)).collect(),
        None => pairs,
    })
}

/// Claim the empty side B. Succeeds only if the slot is still empty and the
/// pair unchanged since `version` was read.
pub fn claim_side_b(conn: &Connection, pair_id: i64, player_id: i64, version: i64) -> Result<bool> {
    let updated = conn.execute(
        r#"
        UPDATE duel_pairs SET user_b = ?1, version = version + 1
        WHERE id = ?2 AND user_b IS NULL AND version = ?3
        "#,
        params![player_id, pair_id, version],
    )?;
    Ok(updated == 1)
}

/// Close one side; the pair is retired when the other side is closed too
pub fn mark_side_closed(
    conn: &Connection,
    pair_id: i64,
    side: Side,
    version: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let (mine, other) = match side {
        Side::A => ("closed_a", "closed_b"),
        Side::B => ("closed_b", "closed_a"),
    };
    let updated = conn.execute(
        &format!(
            r#"
            UPDATE duel_pairs
            SET {mine} = 1,
                    retired_at = CASE WHEN {other} = 1 THEN ?1 ELSE retired_at END,
                    version = version + 1
            WHERE id = ?2 AND version = ?3 AND {mine} = 0
            "#
        ),
        params![ts(now), pair_id, version],
    )?;
    Ok(updated == 1)
}

/// Record the sequence number at which a side used its one tool
pub fn set_tool_marker(
    conn: &Connection,
    pair_id: i64,
    side: Side,
    seq: i64,
    version: i64,
) -> Result<bool> {
    let column = match side {
        Side::A => "tool_a_at",
        Side::B => "tool_b_at",
    };
    let updated = conn.execute(
        &format!(
            r#"
            UPDATE duel_pairs SET {column} = ?1, version = version + 1
            WHERE id = ?2 AND version = ?3 AND {column} IS NULL
            "#
        ),
        params![seq, pair_id, version],
    )?;
    Ok(updated == 1)
}

fn row_to_pair(row: &rusqlite::Row) -> Result<DuelPair> {
    let created_at: Option<String> = row.get(11)?;
    Ok(DuelPair {
        id: row.get(0)?,
        game_id: row.get(1)?,
        duel_group: row.get(2)?,
        user_a: row.get(3)?,
        user_b: row.get(4)?,
        first_seq: row.get(5)?,
        tool_a_at: row.get(6)?,
        tool_b_at: row.get(7)?,
        closed_a: row.get(8)?,
        closed_b: row.get(9)?,
        time_limit_secs: row.get(10)?,
        created_at: parse_ts(created_at).unwrap_or_else(Utc::now),
        retired_at: parse_ts(row.get(12)?),
        version: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;

    fn new_pair(user_a: i64) -> NewPair {
        NewPair {
            game_id: 1,
            duel_group: user_a,
            user_a,
            first_seq: 1,
            time_limit_secs: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_refused_while_player_busy() {
        let env = TestEnv::new().unwrap();
        let conn = env.conn();
        let first = insert_pair_if_idle(&conn, &new_pair(5)).unwrap();
        assert!(first.is_some());
        assert!(insert_pair_if_idle(&conn, &new_pair(5)).unwrap().is_none());

        let pair = get_pair(&conn, first.unwrap()).unwrap().unwrap();
        assert!(mark_side_closed(&conn, pair.id, Side::A, pair.version, Utc::now()).unwrap());
        assert!(insert_pair_if_idle(&conn, &new_pair(5)).unwrap().is_some());
    }

    #[test]
    fn test_claim_is_atomic() {
        let env = TestEnv::new().unwrap();
        let conn = env.conn();
        let id = insert_pair_if_idle(&conn, &new_pair(5)).unwrap().unwrap();
        let seen = get_pair(&conn, id).unwrap().unwrap();

        // two claimers read the same version; only the first wins
        assert!(claim_side_b(&conn, id, 6, seen.version).unwrap());
        assert!(!claim_side_b(&conn, id, 7, seen.version).unwrap());

        let pair = get_pair(&conn, id).unwrap().unwrap();
        assert_eq!(pair.user_b, Some(6));
        assert_eq!(pair.version, seen.version + 1);
    }

    #[test]
    fn test_waiting_pairs_filtering() {
        let env = TestEnv::new().unwrap();
        let conn = env.conn();
        let p5 = insert_pair_if_idle(&conn, &new_pair(5)).unwrap().unwrap();
        let p6 = insert_pair_if_idle(&conn, &new_pair(6)).unwrap().unwrap();

        let all: Vec<i64> = find_waiting_pairs(&conn, 1, 9, None)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(all, vec![p5, p6]);

        let own_excluded: Vec<i64> = find_waiting_pairs(&conn, 1, 5, None)
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(own_excluded, vec![p6]);

        let pooled: Vec<i64> = find_waiting_pairs(&conn, 1, 9, Some(&[6]))
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(pooled, vec![p6]);
    }

    #[test]
    fn test_retired_when_both_sides_close() {
        let env = TestEnv::new().unwrap();
        let conn = env.conn();
        let id = insert_pair_if_idle(&conn, &new_pair(5)).unwrap().unwrap();
        let pair = get_pair(&conn, id).unwrap().unwrap();
        claim_side_b(&conn, id, 6, pair.version).unwrap();

        let pair = get_pair(&conn, id).unwrap().unwrap();
        mark_side_closed(&conn, id, Side::B, pair.version, Utc::now()).unwrap();
        let pair = get_pair(&conn, id).unwrap().unwrap();
        assert!(pair.retired_at.is_none());
        assert!(find_active_pair(&conn, 1, 6).unwrap().is_none());
        assert_eq!(find_active_pair(&conn, 1, 5).unwrap().map(|p| p.id), Some(id));

        mark_side_closed(&conn, id, Side::A, pair.version, Utc::now()).unwrap();
        let pair = get_pair(&conn, id).unwrap().unwrap();
        assert!(pair.is_retired());
        assert!(pair.retired_at.is_some());
        assert_eq!(find_latest_pair(&conn, 1, 6).unwrap().map(|p| p.id), Some(id));
    }

    #[test]
    fn test_tool_marker_set_once_per_side() {
        let env = TestEnv::new().unwrap();
        let conn = env.conn();
        let id = insert_pair_if_idle(&conn, &new_pair(5)).unwrap().unwrap();
        let pair = get_pair(&conn, id).unwrap().unwrap();
        assert!(set_tool_marker(&conn, id, Side::A, 3, pair.version).unwrap());
        let pair = get_pair(&conn, id).unwrap().unwrap();
        assert!(!set_tool_marker(&conn, id, Side::A, 4, pair.version).unwrap());
        assert_eq!(pair.tool_marker(Side::A), Some(3));
        assert_eq!(pair.tool_marker(Side::B), None);
    }
}
