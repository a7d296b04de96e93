//! Matchmaker: continue the player's pair, claim a waiting side B, or open
//! a new pair as side A.
//!
//! Claims are conditional updates on the slot still being empty, retried a
//! bounded number of times against a fresh read of the waiting list.

use rusqlite::Connection;

use super::mode::PlayContext;
use crate::db::{self, NewPair};
use crate::domain::DuelPair;
use crate::error::{DuelError, Result};

/// Who a player may be paired with
#[derive(Debug, Clone, PartialEq)]
pub enum PairingRule {
    /// Always play alone, no cap
    Never,
    Open {
        /// Restrict opponents to these players
        pool: Option<Vec<i64>>,
        /// Items a player may play without an opponent
        alone_cap: i64,
        /// At the cap, search every waiting pair in the game
        widen_at_cap: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Pairing {
    pub pair: DuelPair,
    pub is_new_side_a: bool,
    pub is_new_side_b: bool,
}

impl Pairing {
    fn existing(pair: DuelPair) -> Self {
        Self {
            pair,
            is_new_side_a: false,
            is_new_side_b: false,
        }
    }
}

pub fn resolve_pairing(
    conn: &Connection,
    ctx: &PlayContext<'_>,
    rule: &PairingRule,
) -> Result<Pairing> {
    if let Some(pair) = db::find_active_pair(conn, ctx.game.id, ctx.player_id)? {
        return Ok(Pairing::existing(pair));
    }

    match rule {
        PairingRule::Never => open_pair(conn, ctx),
        PairingRule::Open {
            pool,
            alone_cap,
            widen_at_cap,
        } => {
            if let Some(pairing) = claim_waiting(conn, ctx, pool.as_deref())? {
                return Ok(pairing);
            }
            let alone = db::count_alone_items(conn, ctx.game.id, ctx.player_id)?;
            if alone < *alone_cap {
                return open_pair(conn, ctx);
            }
            if *widen_at_cap && pool.is_some() {
                if let Some(pairing) = claim_waiting(conn, ctx, None)? {
                    return Ok(pairing);
                }
            }
            tracing::debug!(
                "Player {} at alone cap ({}/{}) in game {}",
                ctx.player_id,
                alone,
                alone_cap,
                ctx.game.id
            );
            Err(DuelError::NoOpponentAvailable)
        }
    }
}

/// Take the oldest waiting side B. `Ok(None)` when nobody is waiting.
fn claim_waiting(
    conn: &Connection,
    ctx: &PlayContext<'_>,
    pool: Option<&[i64]>,
) -> Result<Option<Pairing>> {
    claim_waiting_with(conn, ctx, pool, |conn, candidate| {
        db::claim_side_b(conn, candidate.id, ctx.player_id, candidate.version)
    })
}

/// `claim_waiting` with the conditional update supplied by the caller.
/// A `false` claim means another request took the slot first.
fn claim_waiting_with<F>(
    conn: &Connection,
    ctx: &PlayContext<'_>,
    pool: Option<&[i64]>,
    mut claim: F,
) -> Result<Option<Pairing>>
where
    F: FnMut(&Connection, &DuelPair) -> rusqlite::Result<bool>,
{
    for _ in 0..ctx.tuning.max_claim_retries.max(1) {
        let waiting = db::find_waiting_pairs(conn, ctx.game.id, ctx.player_id, pool)?;
        let Some(candidate) = waiting.into_iter().next() else {
            return Ok(None);
        };
        if claim(conn, &candidate)? {
            let pair = db::get_pair(conn, candidate.id)?.ok_or(DuelError::Conflict)?;
            tracing::info!(
                "Player {} joined pair {} against player {}",
                ctx.player_id,
                pair.id,
                pair.user_a
            );
            return Ok(Some(Pairing {
                pair,
                is_new_side_a: false,
                is_new_side_b: true,
            }));
        }
        tracing::debug!("Lost claim on pair {}, rereading", candidate.id);
    }
    Err(DuelError::Conflict)
}

fn open_pair(conn: &Connection, ctx: &PlayContext<'_>) -> Result<Pairing> {
    let group = ctx.player_id;
    let first_seq = db::max_seq_in_group(conn, ctx.game.id, group, ctx.player_id)? + 1;
    let new = NewPair {
        game_id: ctx.game.id,
        duel_group: group,
        user_a: ctx.player_id,
        first_seq,
        time_limit_secs: ctx.game.time_limit_secs,
        created_at: ctx.now,
    };
    // a concurrent request may have opened a pair for this player already
    let id = db::insert_pair_if_idle(conn, &new)?.ok_or(DuelError::Conflict)?;
    let pair = db::get_pair(conn, id)?.ok_or(DuelError::Conflict)?;
    tracing::debug!("Player {} opened pair {} at seq {}", ctx.player_id, id, first_seq);
    Ok(Pairing {
        pair,
        is_new_side_a: true,
        is_new_side_b: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GameSettings, ModeKind, Side};
    use crate::testing::TestEnv;
    use chrono::Utc;

    fn duel_rule(cap: i64) -> PairingRule {
        PairingRule::Open {
            pool: None,
            alone_cap: cap,
            widen_at_cap: false,
        }
    }

    fn game(env: &TestEnv, mode: ModeKind) -> GameSettings {
        let (id, _) = env.seed_game(mode, 8);
        let conn = env.conn();
        db::get_game(&conn, id).unwrap().unwrap()
    }

    fn ctx<'a>(env: &'a TestEnv, game: &'a GameSettings, player_id: i64) -> PlayContext<'a> {
        PlayContext {
            game,
            player_id,
            tuning: &env.tuning,
            now: Utc::now(),
        }
    }

    /// Claim step that lets `thief` take the slot just before the first claim,
    /// so the first conditional update runs against a stale version
    fn stolen_once(
        thief: i64,
        player_id: i64,
        calls: &mut u32,
    ) -> impl FnMut(&Connection, &DuelPair) -> rusqlite::Result<bool> + '_ {
        move |conn: &Connection, candidate: &DuelPair| {
            *calls += 1;
            if *calls == 1 {
                assert!(db::claim_side_b(conn, candidate.id, thief, candidate.version)?);
            }
            db::claim_side_b(conn, candidate.id, player_id, candidate.version)
        }
    }

    #[test]
    fn test_first_player_opens_second_claims() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Duel);
        let ann = env.add_player("ann", None);
        let bob = env.add_player("bob", None);
        let conn = env.conn();

        let first = resolve_pairing(&conn, &ctx(&env, &g, ann), &duel_rule(8)).unwrap();
        assert!(first.is_new_side_a);
        assert!(!first.is_new_side_b);
        assert_eq!(first.pair.user_a, ann);
        assert_eq!(first.pair.user_b, None);

        let second = resolve_pairing(&conn, &ctx(&env, &g, bob), &duel_rule(8)).unwrap();
        assert!(second.is_new_side_b);
        assert_eq!(second.pair.id, first.pair.id);
        assert_eq!(second.pair.user_b, Some(bob));
        assert_eq!(second.pair.side_of(bob), Some(Side::B));
    }

    #[test]
    fn test_lost_claim_rereads_and_takes_next_pair() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Duel);
        let ann = env.add_player("ann", None);
        let dan = env.add_player("dan", None);
        let bob = env.add_player("bob", None);
        let eve = env.add_player("eve", None);
        let conn = env.conn();

        let oldest = open_pair(&conn, &ctx(&env, &g, ann)).unwrap();
        let newer = open_pair(&conn, &ctx(&env, &g, dan)).unwrap();

        let mut calls = 0;
        let claimed = claim_waiting_with(
            &conn,
            &ctx(&env, &g, bob),
            None,
            stolen_once(eve, bob, &mut calls),
        )
        .unwrap()
        .unwrap();
        assert_eq!(calls, 2);
        assert!(claimed.is_new_side_b);
        assert_eq!(claimed.pair.id, newer.pair.id);
        assert_eq!(claimed.pair.user_b, Some(bob));

        // the first slot went to the other claimant, untouched by the loser
        let first = db::get_pair(&conn, oldest.pair.id).unwrap().unwrap();
        assert_eq!(first.user_b, Some(eve));
    }

    #[test]
    fn test_lost_claim_without_retries_is_a_conflict() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Duel);
        let ann = env.add_player("ann", None);
        let dan = env.add_player("dan", None);
        let bob = env.add_player("bob", None);
        let eve = env.add_player("eve", None);
        let conn = env.conn();
        open_pair(&conn, &ctx(&env, &g, ann)).unwrap();
        open_pair(&conn, &ctx(&env, &g, dan)).unwrap();

        let mut tuning = env.tuning.clone();
        tuning.max_claim_retries = 1;
        let play = PlayContext {
            game: &g,
            player_id: bob,
            tuning: &tuning,
            now: Utc::now(),
        };
        let mut calls = 0;
        let result = claim_waiting_with(&conn, &play, None, stolen_once(eve, bob, &mut calls));
        assert!(matches!(result, Err(DuelError::Conflict)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_active_pair_is_returned_unchanged() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Duel);
        let ann = env.add_player("ann", None);
        let conn = env.conn();
        let first = resolve_pairing(&conn, &ctx(&env, &g, ann), &duel_rule(8)).unwrap();
        let again = resolve_pairing(&conn, &ctx(&env, &g, ann), &duel_rule(8)).unwrap();
        assert_eq!(again.pair.id, first.pair.id);
        assert!(!again.is_new_side_a && !again.is_new_side_b);
    }

    #[test]
    fn test_alone_cap_reports_no_opponent() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Duel);
        let ann = env.add_player("ann", None);
        let conn = env.conn();
        // cap of zero: nothing may be played alone
        let result = resolve_pairing(&conn, &ctx(&env, &g, ann), &duel_rule(0));
        assert!(matches!(result, Err(DuelError::NoOpponentAvailable)));
    }

    #[test]
    fn test_pool_restricts_opponents() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Split);
        let ann = env.add_player("ann", Some("red"));
        let bob = env.add_player("bob", Some("blue"));
        let conn = env.conn();
        let red = PairingRule::Open {
            pool: Some(vec![ann]),
            alone_cap: 8,
            widen_at_cap: true,
        };
        let blue = PairingRule::Open {
            pool: Some(vec![bob]),
            alone_cap: 8,
            widen_at_cap: true,
        };
        let a = resolve_pairing(&conn, &ctx(&env, &g, ann), &red).unwrap();
        let b = resolve_pairing(&conn, &ctx(&env, &g, bob), &blue).unwrap();
        assert!(b.is_new_side_a);
        assert_ne!(a.pair.id, b.pair.id);
    }

    #[test]
    fn test_cap_widens_search_in_split() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Split);
        let ann = env.add_player("ann", Some("red"));
        let bob = env.add_player("bob", Some("blue"));
        let conn = env.conn();
        let opened = resolve_pairing(
            &conn,
            &ctx(&env, &g, ann),
            &PairingRule::Open {
                pool: Some(vec![ann]),
                alone_cap: 8,
                widen_at_cap: true,
            },
        )
        .unwrap();
        let claimed = resolve_pairing(
            &conn,
            &ctx(&env, &g, bob),
            &PairingRule::Open {
                pool: Some(vec![bob]),
                alone_cap: 0,
                widen_at_cap: true,
            },
        )
        .unwrap();
        assert!(claimed.is_new_side_b);
        assert_eq!(claimed.pair.id, opened.pair.id);
    }

    #[test]
    fn test_solo_never_claims() {
        let env = TestEnv::new().unwrap();
        let g = game(&env, ModeKind::Solo);
        let ann = env.add_player("ann", None);
        let bob = env.add_player("bob", None);
        let conn = env.conn();
        let a = resolve_pairing(&conn, &ctx(&env, &g, ann), &PairingRule::Never).unwrap();
        let b = resolve_pairing(&conn, &ctx(&env, &g, bob), &PairingRule::Never).unwrap();
        assert!(a.is_new_side_a && b.is_new_side_a);
        assert_ne!(a.pair.id, b.pair.id);
    }
}
