//! Attempt lifecycle: NEW -> STARTED -> ANSWERED.
//!
//! A bout is created in one go (one attempt per selected item, consecutive
//! sequence numbers). Only the first attempt is started immediately; the
//! rest start lazily when fetched, so a player has at most one STARTED
//! attempt per duel group. Every function here runs inside the caller's
//! transaction and reports lost races as `Conflict`.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;

use super::matchmaker::resolve_pairing;
use super::mode::{GameMode, PlayContext};
use super::scoring::presented_options;
use crate::adaptive::{apply_graded_answer, next_due, select_items};
use crate::db::{self, AnswerRecord, NewAttempt, ResultBump};
use crate::domain::{Attempt, AttemptState, DuelPair, Item, Side, Tool};
use crate::error::{DuelError, Result};

/// Upper bound on resolve steps (expire, close, re-pair) in one request
const MAX_RESOLVE_STEPS: usize = 4;

/// The player's current attempt and where it sits
#[derive(Debug, Clone)]
pub struct Resolved {
    pub pair: DuelPair,
    pub side: Side,
    pub attempt: Attempt,
    pub is_new_side_a: bool,
    pub is_new_side_b: bool,
}

/// Feedback for one answered attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerOutcome {
    pub attempt_id: i64,
    /// `None` when the attempt was skipped
    pub correct: Option<bool>,
    pub score_delta: i64,
    pub correct_answer: String,
    /// Points the opponent gained retroactively because of this answer
    pub opponent_delta: Option<i64>,
    pub timed_out: bool,
    pub skipped: bool,
}

impl AnswerOutcome {
    pub fn from_attempt(attempt: &Attempt, item: &Item) -> Self {
        Self {
            attempt_id: attempt.id,
            correct: attempt.is_correct,
            score_delta: attempt.score,
            correct_answer: item.correct_answer(),
            opponent_delta: attempt.opponent_delta,
            timed_out: attempt.timed_out,
            skipped: attempt.is_skipped(),
        }
    }
}

/// Result of a submit call; `replayed` is set when the attempt was already answered
#[derive(Debug, Clone)]
pub struct Submission {
    pub outcome: AnswerOutcome,
    pub replayed: bool,
}

impl Submission {
    /// A submission that arrived after the deadline and closed the attempt
    pub fn is_late(&self) -> bool {
        self.outcome.timed_out && !self.replayed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub attempt_id: i64,
    pub tool: Tool,
    /// Options presented from now on; empty once the attempt is closed
    pub options: Vec<String>,
    pub answer: Option<AnswerOutcome>,
    #[serde(skip)]
    pub replayed: bool,
}

/// Load an attempt of this game owned by the requesting player
pub fn load_owned(conn: &Connection, ctx: &PlayContext<'_>, attempt_id: i64) -> Result<Attempt> {
    let attempt = db::get_attempt(conn, attempt_id)?
        .filter(|a| a.game_id == ctx.game.id)
        .ok_or(DuelError::AttemptNotFound(attempt_id))?;
    if attempt.player_id != ctx.player_id {
        return Err(DuelError::AttemptNotOwned(attempt_id));
    }
    Ok(attempt)
}

fn load_item(conn: &Connection, item_id: i64) -> Result<Item> {
    Ok(db::get_item(conn, item_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
}

fn load_pair(conn: &Connection, pair_id: i64) -> Result<DuelPair> {
    Ok(db::get_pair(conn, pair_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?)
}

fn deadline_from(pair: &DuelPair, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    pair.time_limit_secs.map(|secs| start + Duration::seconds(secs))
}

/// Create one side's bout and start its first attempt.
///
/// Side A gets a full bout. Side B mirrors side A's sequence numbers and
/// avoids side A's items.
pub fn create_bout(
    conn: &Connection,
    ctx: &PlayContext<'_>,
    pair: &DuelPair,
    side: Side,
    rng: &mut dyn RngCore,
) -> Result<Vec<i64>> {
    let bout_size = ctx.game.bout_size(ctx.tuning) as usize;
    let (count, ignore): (usize, HashSet<i64>) = match side {
        Side::A => (bout_size, HashSet::new()),
        Side::B => {
            let opponent_items = db::side_item_ids(conn, pair.id, Side::A)?;
            let count = if opponent_items.is_empty() {
                bout_size
            } else {
                opponent_items.len()
            };
            (count, opponent_items.into_iter().collect())
        }
    };

    let items = select_items(
        conn,
        ctx.game.id,
        ctx.player_id,
        count,
        &ignore,
        ctx.tuning,
        ctx.now,
        rng,
    )?;

    let mut ids = Vec::with_capacity(items.len());
    for (i, &item_id) in items.iter().enumerate() {
        let id = db::insert_attempt(
            conn,
            &NewAttempt {
                game_id: ctx.game.id,
                pair_id: pair.id,
                duel_group: pair.duel_group,
                player_id: ctx.player_id,
                side,
                seq: pair.first_seq + i as i64,
                item_id,
                created_at: ctx.now,
            },
        )?;
        ids.push(id);
    }

    if let Some(&first) = ids.first() {
        if !db::start_attempt(conn, first, 0, ctx.now, deadline_from(pair, ctx.now))? {
            return Err(DuelError::Conflict);
        }
    }
    db::ensure_ability(conn, ctx.game.id, ctx.player_id)?;
    tracing::info!(
        "Created bout of {} for player {} on side {} of pair {}",
        ids.len(),
        ctx.player_id,
        side.as_str(),
        pair.id
    );
    Ok(ids)
}

fn start_next(
    conn: &Connection,
    attempt: &Attempt,
    pair: &DuelPair,
    now: DateTime<Utc>,
) -> Result<Attempt> {
    if !db::start_attempt(conn, attempt.id, attempt.version, now, deadline_from(pair, now))? {
        return Err(DuelError::Conflict);
    }
    Ok(db::get_attempt(conn, attempt.id)?.ok_or(DuelError::Conflict)?)
}

/// Return the player's open attempt, starting the next queued one or
/// creating a bout (and a pairing) when there is none.
pub fn resolve_attempt<M: GameMode + ?Sized>(
    conn: &Connection,
    mode: &M,
    ctx: &PlayContext<'_>,
    rng: &mut dyn RngCore,
) -> Result<Resolved> {
    for _ in 0..MAX_RESOLVE_STEPS {
        let rule = mode.pairing_rule(conn, ctx)?;
        let pairing = resolve_pairing(conn, ctx, &rule)?;
        let pair = pairing.pair;
        let side = pair.side_of(ctx.player_id).ok_or(DuelError::Conflict)?;

        let mut attempts = db::list_side_attempts(conn, pair.id, side)?;
        if attempts.is_empty() {
            create_bout(conn, ctx, &pair, side, rng)?;
            attempts = db::list_side_attempts(conn, pair.id, side)?;
        }

        let resolved = |attempt: Attempt| Resolved {
            pair: pair.clone(),
            side,
            attempt,
            is_new_side_a: pairing.is_new_side_a,
            is_new_side_b: pairing.is_new_side_b,
        };

        if let Some(open) = attempts.iter().find(|a| a.is_open()) {
            if open.is_expired(ctx.now) {
                tracing::info!("Attempt {} passed its deadline, closing", open.id);
                close_attempt(conn, mode, ctx, open, None, Closing::TimedOut)?;
                continue;
            }
            return Ok(resolved(open.clone()));
        }

        if let Some(queued) = attempts.iter().find(|a| a.state == AttemptState::New) {
            let started = start_next(conn, queued, &pair, ctx.now)?;
            return Ok(resolved(started));
        }

        // every attempt answered but the side was never closed
        mode.close_if_complete(conn, pair.id, side, ctx.now)?;
    }
    Err(DuelError::Conflict)
}

/// Force-close the player's started attempt if its deadline has passed.
/// Touches only the active pair; never pairs or creates a bout.
pub fn expire_open_attempt<M: GameMode + ?Sized>(
    conn: &Connection,
    mode: &M,
    ctx: &PlayContext<'_>,
) -> Result<Option<AnswerOutcome>> {
    let Some(pair) = db::find_active_pair(conn, ctx.game.id, ctx.player_id)? else {
        return Ok(None);
    };
    let Some(side) = pair.side_of(ctx.player_id) else {
        return Ok(None);
    };
    let expired = db::list_side_attempts(conn, pair.id, side)?
        .into_iter()
        .find(|a| a.is_expired(ctx.now));
    match expired {
        Some(attempt) => {
            tracing::info!("Attempt {} passed its deadline, closing", attempt.id);
            close_attempt(conn, mode, ctx, &attempt, None, Closing::TimedOut).map(Some)
        }
        None => Ok(None),
    }
}

/// Grade a submitted answer. Replays of an answered attempt return the
/// stored result; a late answer is discarded and closes the attempt as wrong.
pub fn record_answer<M: GameMode + ?Sized>(
    conn: &Connection,
    mode: &M,
    ctx: &PlayContext<'_>,
    attempt_id: i64,
    raw_answer: &str,
    tool: Option<Tool>,
) -> Result<Submission> {
    let attempt = load_owned(conn, ctx, attempt_id)?;
    if attempt.is_answered() {
        let item = load_item(conn, attempt.item_id)?;
        return Ok(Submission {
            outcome: AnswerOutcome::from_attempt(&attempt, &item),
            replayed: true,
        });
    }
    if attempt.state == AttemptState::New {
        // queued, never presented
        return Err(DuelError::AttemptNotFound(attempt_id));
    }

    if let Some(tool) = tool {
        let applied = apply_tool(conn, mode, ctx, attempt_id, tool)?;
        if let Some(outcome) = applied.answer {
            return Ok(Submission {
                outcome,
                replayed: applied.replayed,
            });
        }
    }

    let attempt = load_owned(conn, ctx, attempt_id)?;
    let closing = if attempt.is_expired(ctx.now) {
        Closing::TimedOut
    } else {
        Closing::Graded
    };
    let outcome = close_attempt(conn, mode, ctx, &attempt, Some(raw_answer), closing)?;
    Ok(Submission {
        outcome,
        replayed: false,
    })
}

/// Use a tool on the player's started attempt. Each side may use one tool
/// per pair; repeating the same tool on the same attempt is a no-op.
pub fn apply_tool<M: GameMode + ?Sized>(
    conn: &Connection,
    mode: &M,
    ctx: &PlayContext<'_>,
    attempt_id: i64,
    tool: Tool,
) -> Result<ToolOutcome> {
    let attempt = load_owned(conn, ctx, attempt_id)?;
    let item = load_item(conn, attempt.item_id)?;
    let pair = load_pair(conn, attempt.pair_id)?;

    let same_tool = attempt.tool == Some(tool);
    if attempt.is_answered() {
        if !same_tool {
            return Err(DuelError::ToolUnavailable);
        }
        return Ok(ToolOutcome {
            attempt_id,
            tool,
            options: Vec::new(),
            answer: Some(AnswerOutcome::from_attempt(&attempt, &item)),
            replayed: true,
        });
    }
    if attempt.state == AttemptState::New {
        return Err(DuelError::AttemptNotFound(attempt_id));
    }
    if attempt.is_expired(ctx.now) {
        let outcome = close_attempt(conn, mode, ctx, &attempt, None, Closing::TimedOut)?;
        return Ok(ToolOutcome {
            attempt_id,
            tool,
            options: Vec::new(),
            answer: Some(outcome),
            replayed: false,
        });
    }

    // halving two options or a typed answer would spend the tool for nothing
    if tool == Tool::Halve && !same_tool && !item.can_halve() {
        return Err(DuelError::ToolUnavailable);
    }

    match pair.tool_marker(attempt.side) {
        Some(seq) if seq != attempt.seq => return Err(DuelError::ToolUnavailable),
        Some(_) if attempt.tool.is_some() && !same_tool => return Err(DuelError::ToolUnavailable),
        Some(_) => {}
        None => {
            if !db::set_tool_marker(conn, pair.id, attempt.side, attempt.seq, pair.version)? {
                return Err(DuelError::Conflict);
            }
        }
    }

    let attempt = if same_tool {
        attempt
    } else {
        if !db::set_attempt_tool(conn, attempt.id, attempt.version, tool)? {
            return Err(DuelError::Conflict);
        }
        load_owned(conn, ctx, attempt_id)?
    };

    match tool {
        Tool::Halve => Ok(ToolOutcome {
            attempt_id,
            tool,
            options: presented_options(&item, &attempt),
            answer: None,
            replayed: false,
        }),
        Tool::Skip => {
            let outcome = close_attempt(conn, mode, ctx, &attempt, None, Closing::Skipped)?;
            Ok(ToolOutcome {
                attempt_id,
                tool,
                options: Vec::new(),
                answer: Some(outcome),
                replayed: false,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Closing {
    Graded,
    TimedOut,
    Skipped,
}

/// The ANSWERED transition with every write it implies, in one transaction:
/// the attempt row, the opponent's retroactive double, the Rasch step, the
/// stat buckets, the aggregate score and the side closure.
fn close_attempt<M: GameMode + ?Sized>(
    conn: &Connection,
    mode: &M,
    ctx: &PlayContext<'_>,
    attempt: &Attempt,
    raw_answer: Option<&str>,
    closing: Closing,
) -> Result<AnswerOutcome> {
    let item = load_item(conn, attempt.item_id)?;
    let pair = load_pair(conn, attempt.pair_id)?;
    let game_id = ctx.game.id;
    let player_id = attempt.player_id;

    if closing == Closing::Skipped {
        let record = AnswerRecord {
            raw_answer: None,
            is_correct: None,
            base_score: Some(0),
            score: 0,
            doubled: false,
            timed_out: false,
            opponent_delta: None,
            tool: Some(Tool::Skip),
            answered_at: ctx.now,
        };
        if !db::mark_answered(conn, attempt.id, attempt.version, &record)? {
            return Err(DuelError::Conflict);
        }
        tracing::debug!("Attempt {} skipped", attempt.id);
    } else {
        let timed_out = closing == Closing::TimedOut;
        let correct = !timed_out && raw_answer.is_some_and(|raw| item.grade(raw));

        let opponent = match pair.player_on(attempt.side.opposite()) {
            Some(_) => {
                db::get_matching_attempt(conn, pair.id, attempt.side.opposite(), attempt.seq)?
                    .filter(|o| o.is_answered())
            }
            None => None,
        };
        let decision = mode.score_answer(&item, attempt, correct, opponent.as_ref(), ctx);

        // scheduling compares against the estimates before this answer's step
        let theta = db::get_theta(conn, game_id, player_id)?;
        let difficulty = db::get_difficulty(conn, game_id, item.id)?;

        let record = AnswerRecord {
            raw_answer: if timed_out { None } else { raw_answer.map(str::to_string) },
            is_correct: Some(correct),
            base_score: Some(decision.base),
            score: decision.score,
            doubled: decision.doubled,
            timed_out,
            opponent_delta: decision.opponent.as_ref().map(|o| o.delta),
            tool: attempt.tool,
            answered_at: ctx.now,
        };
        if !db::mark_answered(conn, attempt.id, attempt.version, &record)? {
            return Err(DuelError::Conflict);
        }

        if let Some(o) = &decision.opponent {
            if !db::set_doubled_score(conn, o.attempt_id, o.version, o.score)? {
                return Err(DuelError::Conflict);
            }
            db::add_to_score(conn, game_id, o.player_id, o.delta, 0)?;
            db::adjust_running_score(conn, game_id, o.player_id, o.item_id, o.delta)?;
            tracing::info!(
                "Attempt {} doubled retroactively by {} (+{})",
                o.attempt_id,
                attempt.id,
                o.delta
            );
        }

        apply_graded_answer(
            conn,
            game_id,
            player_id,
            item.id,
            correct,
            ctx.tuning.learning_rate,
            ctx.now,
        )?;

        let asked = db::count_player_attempts(conn, game_id, player_id)?;
        let bump = ResultBump {
            correct,
            score: decision.score,
            due_no: Some(next_due(asked, correct, theta, difficulty, ctx.tuning)),
        };
        db::record_result(conn, game_id, player_id, item.id, &bump)?;
        db::record_item_result(conn, item.id, correct)?;
        db::add_to_score(conn, game_id, player_id, decision.score, 1)?;
        db::refresh_percent(conn, game_id, player_id)?;

        tracing::debug!(
            "Attempt {} graded: correct={} base={} score={} doubled={} wizard={} timed_out={}",
            attempt.id,
            correct,
            decision.base,
            decision.score,
            decision.doubled,
            decision.wizard,
            timed_out
        );
    }

    mode.close_if_complete(conn, pair.id, attempt.side, ctx.now)?;

    let stored = db::get_attempt(conn, attempt.id)?.ok_or(DuelError::Conflict)?;
    Ok(AnswerOutcome::from_attempt(&stored, &item))
}

/// Close one side of a pair once every attempt of that side is answered.
/// Returns whether this call closed it.
pub fn close_side_if_complete(
    conn: &Connection,
    pair_id: i64,
    side: Side,
    now: DateTime<Utc>,
) -> Result<bool> {
    let pair = load_pair(conn, pair_id)?;
    if pair.is_closed(side) {
        return Ok(false);
    }
    let answered = db::count_answered(conn, pair_id, side)?;
    if answered == 0 || db::count_unanswered(conn, pair_id, side)? > 0 {
        return Ok(false);
    }
    if !db::mark_side_closed(conn, pair_id, side, pair.version, now)? {
        return Err(DuelError::Conflict);
    }
    tracing::info!("Closed side {} of pair {}", side.as_str(), pair_id);
    Ok(true)
}
