//! Adaptive item selection.
//!
//! Candidates are ranked by a composite priority key:
//! - items whose running score for the player is strongly negative first,
//!   the stalest of them first
//! - then fewer times seen by the player
//! - then closer difficulty to the player's ability
//! - then lower global usage
//! - then a random tiebreaker
//!
//! Selection runs three relaxation passes. Pass 1 skips mastered items
//! (long correct streak), items not yet due and items claimed elsewhere.
//! Pass 2 forgets the streak rule. Pass 3 draws uniformly from whatever is
//! left, so a small catalog never stalls a player.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::{index, SliceRandom};
use rusqlite::Connection;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::config::Tuning;
use crate::db;
use crate::error::{DuelError, Result};

/// One item of the pool as the selector sees it for one player
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub item_id: i64,
    /// Times this player has been given the item
    pub seen: i64,
    pub serial_correct: i64,
    pub running_score: i64,
    /// Question number from which the item is due again
    pub due_no: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub difficulty: f64,
    pub global_usage: i64,
}

/// Player-side inputs of one selection call
#[derive(Debug, Clone)]
pub struct SelectionContext<'a> {
    pub theta: f64,
    pub count: usize,
    /// Questions already put to the player in this game
    pub asked: i64,
    /// Items claimed by a concurrently forming bout
    pub ignore: &'a HashSet<i64>,
    pub tuning: &'a Tuning,
}

struct Ranked<'c> {
    candidate: &'c Candidate,
    urgent: bool,
    distance: f64,
    tiebreak: f64,
}

impl Ranked<'_> {
    fn cmp_priority(&self, other: &Self) -> Ordering {
        other
            .urgent
            .cmp(&self.urgent)
            .then_with(|| {
                if self.urgent && other.urgent {
                    // never used sorts as stalest
                    self.candidate.last_used_at.cmp(&other.candidate.last_used_at)
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| self.candidate.seen.cmp(&other.candidate.seen))
            .then_with(|| self.distance.total_cmp(&other.distance))
            .then_with(|| self.candidate.global_usage.cmp(&other.candidate.global_usage))
            .then_with(|| self.tiebreak.total_cmp(&other.tiebreak))
    }
}

fn rank<'c, R: Rng + ?Sized>(
    candidates: impl Iterator<Item = &'c Candidate>,
    ctx: &SelectionContext<'_>,
    rng: &mut R,
) -> Vec<Ranked<'c>> {
    let mut ranked: Vec<Ranked<'c>> = candidates
        .map(|c| Ranked {
            candidate: c,
            urgent: c.running_score <= ctx.tuning.negative_score_threshold,
            distance: (ctx.theta - c.difficulty).abs(),
            tiebreak: rng.random::<f64>(),
        })
        .collect();
    ranked.sort_by(|a, b| a.cmp_priority(b));
    ranked
}

/// Keep the best `factor * needed` and sample `needed` of them, in priority order
fn sample_top<R: Rng + ?Sized>(
    ranked: &[Ranked<'_>],
    needed: usize,
    factor: usize,
    rng: &mut R,
) -> Vec<i64> {
    let top = ranked.len().min(needed.saturating_mul(factor.max(1)));
    let amount = needed.min(top);
    let mut picks = index::sample(rng, top, amount).into_vec();
    picks.sort_unstable();
    picks
        .into_iter()
        .map(|i| ranked[i].candidate.item_id)
        .collect()
}

/// Choose up to `ctx.count` distinct items from `candidates`.
///
/// Fails with `NoItemsAvailable` only when there is nothing to choose from
/// at all; ignored items are used as a last resort.
pub fn select<R: Rng + ?Sized>(
    candidates: &[Candidate],
    ctx: &SelectionContext<'_>,
    rng: &mut R,
) -> Result<Vec<i64>> {
    let mut chosen: Vec<i64> = Vec::with_capacity(ctx.count);
    let due = |c: &Candidate| c.due_no <= ctx.asked;
    let free = |c: &Candidate, chosen: &[i64]| {
        !ctx.ignore.contains(&c.item_id) && !chosen.contains(&c.item_id)
    };

    // Pass 1: due, not mastered, not claimed
    let pass1 = rank(
        candidates
            .iter()
            .filter(|&c| {
                free(c, &chosen) && due(c) && c.serial_correct < ctx.tuning.min_serial_correct
            }),
        ctx,
        rng,
    );
    chosen.extend(sample_top(&pass1, ctx.count, ctx.tuning.candidate_factor, rng));

    // Pass 2: streak rule relaxed
    if chosen.len() < ctx.count {
        let pass2 = rank(candidates.iter().filter(|&c| free(c, &chosen) && due(c)), ctx, rng);
        let more = sample_top(&pass2, ctx.count - chosen.len(), ctx.tuning.candidate_factor, rng);
        chosen.extend(more);
    }

    // Pass 3: anything left, uniformly
    if chosen.len() < ctx.count {
        let mut rest: Vec<i64> = candidates
            .iter()
            .filter(|&c| free(c, &chosen))
            .map(|c| c.item_id)
            .collect();
        if rest.is_empty() {
            rest = candidates
                .iter()
                .map(|c| c.item_id)
                .filter(|id| !chosen.contains(id))
                .collect();
        }
        rest.shuffle(rng);
        rest.truncate(ctx.count - chosen.len());
        chosen.extend(rest);
    }

    if chosen.is_empty() {
        return Err(DuelError::NoItemsAvailable);
    }
    Ok(chosen)
}

/// Question number at which an answered item becomes due again.
///
/// A wrong answer on an item easier than the player brings it back sooner
/// than a wrong answer on a harder one.
pub fn next_due(asked: i64, correct: bool, theta: f64, difficulty: f64, tuning: &Tuning) -> i64 {
    let offset = if correct {
        tuning.correct_offset
    } else if difficulty < theta {
        tuning.wrong_easier_offset
    } else {
        tuning.wrong_harder_offset
    };
    asked + offset
}

/// Load the player's view of the game pool, select, and count the usage.
///
/// Usage counters are bumped before the player answers so a concurrent
/// selection sees the items as taken.
#[allow(clippy::too_many_arguments)]
pub fn select_items<R: Rng + ?Sized>(
    conn: &Connection,
    game_id: i64,
    player_id: i64,
    count: usize,
    ignore: &HashSet<i64>,
    tuning: &Tuning,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Vec<i64>> {
    let pool = db::game_item_ids(conn, game_id)?;
    let buckets = db::get_player_item_buckets(conn, game_id, player_id)?;
    let difficulties = db::get_difficulties(conn, game_id)?;
    let usage = db::get_global_item_usage(conn, game_id)?;

    let candidates: Vec<Candidate> = pool
        .iter()
        .map(|&item_id| {
            let bucket = buckets.get(&item_id);
            Candidate {
                item_id,
                seen: bucket.map_or(0, |b| b.times_used),
                serial_correct: bucket.map_or(0, |b| b.serial_correct),
                running_score: bucket.map_or(0, |b| b.running_score),
                due_no: bucket.map_or(0, |b| b.due_no),
                last_used_at: bucket.and_then(|b| b.last_used_at),
                difficulty: difficulties.get(&item_id).copied().unwrap_or(0.0),
                global_usage: usage.get(&item_id).copied().unwrap_or(0),
            }
        })
        .collect();

    let ctx = SelectionContext {
        theta: db::get_theta(conn, game_id, player_id)?,
        count,
        asked: db::count_player_attempts(conn, game_id, player_id)?,
        ignore,
        tuning,
    };
    let chosen = select(&candidates, &ctx, rng)?;

    for &item_id in &chosen {
        db::ensure_difficulty(conn, game_id, item_id)?;
        db::record_item_selected(conn, item_id, now)?;
        db::bump_used(conn, game_id, player_id, item_id, now)?;
    }
    tracing::debug!(
        "Selected {:?} for player {} in game {} (pool {}, asked {})",
        chosen,
        player_id,
        game_id,
        pool.len(),
        ctx.asked
    );
    Ok(chosen)
}
