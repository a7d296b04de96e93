//! The game's logical operations, independent of transport.
//!
//! Every mutating operation runs in one unit of work (an IMMEDIATE
//! transaction re-run on conflicts). Failures are logged here, at the call
//! boundary, and returned as a [`DuelError`]; nothing panics.

use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{DEFAULT_HIGH_SCORE_COUNT, MAX_HIGH_SCORE_COUNT};
use crate::db::{self, try_lock, unit_of_work, LogOnError, RankedEntry};
use crate::domain::{AttemptState, GameSettings, ItemKind, Player, Side, Tool};
use crate::duel::lifecycle::{self, Resolved};
use crate::duel::{mode_for, presented_options, AnswerOutcome, GameMode, PlayContext, ToolOutcome};
use crate::error::{DuelError, ErrorBody, Result};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct ItemView {
    pub item_id: i64,
    pub kind: ItemKind,
    pub question: String,
    /// Empty for free-text items
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpponentSummary {
    pub player_id: i64,
    pub name: String,
    pub answered: i64,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub state: AttemptState,
    pub attempt_id: i64,
    pub pair_id: i64,
    pub side: Side,
    pub seq: i64,
    pub wizard: bool,
    pub item: ItemView,
    pub deadline: Option<DateTime<Utc>>,
    pub tool_available: bool,
    /// Aggregate score in this game
    pub score: i64,
    pub rank: Option<i64>,
    pub opponent: Option<OpponentSummary>,
    /// The previous attempt, if this fetch closed it for passing its deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<AnswerOutcome>,
}

/// One player's share of a batch fetch
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub player_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeToken {
    pub token: String,
}

fn logged<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_internal() {
            tracing::error!("{} failed: {}", operation, e);
        } else {
            tracing::warn!("{} failed: {}", operation, e);
        }
    }
    result
}

fn require_player(conn: &Connection, player_id: i64) -> Result<Player> {
    db::get_player(conn, player_id)?.ok_or(DuelError::InvalidUser(player_id))
}

fn require_game(conn: &Connection, game_id: i64) -> Result<GameSettings> {
    db::get_game(conn, game_id)?.ok_or(DuelError::GameNotFound(game_id))
}

/// Validate identity and game before any unit of work starts
fn load_game(state: &AppState, game_id: i64, player_id: i64) -> Result<GameSettings> {
    let conn = try_lock(&state.pool)?;
    require_player(&conn, player_id)?;
    require_game(&conn, game_id)
}

// ==================== GetAttempt ====================

/// The player's current attempt, pairing them and creating a bout if needed
pub fn get_attempt(state: &AppState, game_id: i64, player_id: i64) -> Result<AttemptView> {
    let mut rng = rand::rng();
    logged(
        "get_attempt",
        fetch_attempt(state, game_id, player_id, Utc::now(), &mut rng),
    )
}

fn fetch_attempt(
    state: &AppState,
    game_id: i64,
    player_id: i64,
    now: DateTime<Utc>,
    rng: &mut dyn RngCore,
) -> Result<AttemptView> {
    let game = load_game(state, game_id, player_id)?;
    let mode = mode_for(game.mode);
    let ctx = PlayContext {
        game: &game,
        player_id,
        tuning: &state.tuning,
        now,
    };

    // committed on its own so a failed re-pairing cannot undo the closure
    let expired = unit_of_work(&state.pool, state.tuning.max_conflict_retries, |tx| {
        lifecycle::expire_open_attempt(tx, mode, &ctx)
    })?;

    let mut view = unit_of_work(&state.pool, state.tuning.max_conflict_retries, |tx| {
        let resolved = mode.resolve_attempt(tx, &ctx, &mut *rng)?;
        attempt_view(tx, mode, &ctx, &resolved)
    })?;
    view.expired = expired;
    Ok(view)
}

fn attempt_view(
    conn: &Connection,
    mode: &dyn GameMode,
    ctx: &PlayContext<'_>,
    resolved: &Resolved,
) -> Result<AttemptView> {
    let attempt = &resolved.attempt;
    let pair = &resolved.pair;
    let item = db::get_item(conn, attempt.item_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    let ability = db::get_ability(conn, ctx.game.id, ctx.player_id)?;

    let opponent = match pair.player_on(resolved.side.opposite()) {
        Some(opponent_id) => {
            let name = db::get_player(conn, opponent_id)
                .log_warn_default("Failed to load opponent")
                .map(|p| p.name)
                .unwrap_or_default();
            let theirs = db::list_side_attempts(conn, pair.id, resolved.side.opposite())?;
            Some(OpponentSummary {
                player_id: opponent_id,
                name,
                answered: theirs.iter().filter(|a| a.is_answered()).count() as i64,
                score: theirs.iter().filter(|a| a.is_answered()).map(|a| a.score).sum(),
            })
        }
        None => None,
    };

    Ok(AttemptView {
        state: attempt.state,
        attempt_id: attempt.id,
        pair_id: pair.id,
        side: resolved.side,
        seq: attempt.seq,
        wizard: mode.applies_duel_rules() && ctx.game.is_wizard_seq(attempt.seq, ctx.tuning),
        item: ItemView {
            item_id: item.id,
            kind: item.kind,
            question: item.question.clone(),
            options: presented_options(&item, attempt),
        },
        deadline: attempt.deadline,
        tool_available: pair.tool_marker(resolved.side).is_none(),
        score: ability.as_ref().map_or(0, |a| a.score),
        rank: db::rank_of(conn, ctx.game.id, ctx.player_id)
            .log_warn_default("Failed to rank player"),
        opponent,
        expired: None,
    })
}

// ==================== SubmitAnswer / UseTool ====================

/// Grade an answer. Replays return the stored result; an answer after the
/// deadline closes the attempt as wrong and fails with `Timeout`.
pub fn submit_answer(
    state: &AppState,
    game_id: i64,
    player_id: i64,
    attempt_id: i64,
    answer: &str,
    tool: Option<Tool>,
) -> Result<AnswerOutcome> {
    logged(
        "submit_answer",
        submit_answer_at(state, game_id, player_id, attempt_id, answer, tool, Utc::now()),
    )
}

fn submit_answer_at(
    state: &AppState,
    game_id: i64,
    player_id: i64,
    attempt_id: i64,
    answer: &str,
    tool: Option<Tool>,
    now: DateTime<Utc>,
) -> Result<AnswerOutcome> {
    let game = load_game(state, game_id, player_id)?;
    let mode = mode_for(game.mode);
    let ctx = PlayContext {
        game: &game,
        player_id,
        tuning: &state.tuning,
        now,
    };
    let submission = unit_of_work(&state.pool, state.tuning.max_conflict_retries, |tx| {
        lifecycle::record_answer(tx, mode, &ctx, attempt_id, answer, tool)
    })?;
    if submission.is_late() {
        return Err(DuelError::Timeout(format!(
            "attempt {} answered after its deadline",
            attempt_id
        )));
    }
    Ok(submission.outcome)
}

pub fn use_tool(
    state: &AppState,
    game_id: i64,
    player_id: i64,
    attempt_id: i64,
    tool: Tool,
) -> Result<ToolOutcome> {
    logged(
        "use_tool",
        use_tool_at(state, game_id, player_id, attempt_id, tool, Utc::now()),
    )
}

fn use_tool_at(
    state: &AppState,
    game_id: i64,
    player_id: i64,
    attempt_id: i64,
    tool: Tool,
    now: DateTime<Utc>,
) -> Result<ToolOutcome> {
    let game = load_game(state, game_id, player_id)?;
    let mode = mode_for(game.mode);
    let ctx = PlayContext {
        game: &game,
        player_id,
        tuning: &state.tuning,
        now,
    };
    let outcome = unit_of_work(&state.pool, state.tuning.max_conflict_retries, |tx| {
        lifecycle::apply_tool(tx, mode, &ctx, attempt_id, tool)
    })?;
    let late = !outcome.replayed && outcome.answer.as_ref().is_some_and(|a| a.timed_out);
    if late {
        return Err(DuelError::Timeout(format!(
            "attempt {} passed its deadline",
            attempt_id
        )));
    }
    Ok(outcome)
}

// ==================== Read-only queries ====================

/// Top `count` players of a game (default 10, at most 100)
pub fn get_high_score(
    state: &AppState,
    game_id: i64,
    player_id: i64,
    count: Option<u32>,
) -> Result<Vec<RankedEntry>> {
    logged("get_high_score", high_score_table(state, game_id, player_id, count))
}

fn high_score_table(
    state: &AppState,
    game_id: i64,
    player_id: i64,
    count: Option<u32>,
) -> Result<Vec<RankedEntry>> {
    let conn = try_lock(&state.pool)?;
    require_player(&conn, player_id)?;
    require_game(&conn, game_id)?;
    let count = count
        .unwrap_or(DEFAULT_HIGH_SCORE_COUNT)
        .clamp(1, MAX_HIGH_SCORE_COUNT);
    Ok(db::high_scores(&conn, game_id, count)?)
}

/// Current attempts of several local players. Each player is resolved in
/// its own unit of work; one player's failure never affects another's entry.
///
/// The calling player must be a known player and one of `player_ids`,
/// otherwise the whole batch is refused.
pub fn get_attempts_batch(
    state: &AppState,
    game_id: i64,
    caller: i64,
    player_ids: &[i64],
) -> Result<Vec<BatchEntry>> {
    logged("get_attempts_batch", check_batch_caller(state, caller, player_ids))?;
    Ok(player_ids
        .iter()
        .map(|&player_id| match get_attempt(state, game_id, player_id) {
            Ok(view) => BatchEntry {
                player_id,
                attempt: Some(view),
                error: None,
            },
            Err(e) => BatchEntry {
                player_id,
                attempt: None,
                error: Some(ErrorBody::from(&e)),
            },
        })
        .collect())
}

fn check_batch_caller(state: &AppState, caller: i64, player_ids: &[i64]) -> Result<()> {
    if !player_ids.contains(&caller) {
        return Err(DuelError::NotInBatch(caller));
    }
    let conn = try_lock(&state.pool)?;
    require_player(&conn, caller)?;
    Ok(())
}

/// Cheap "has anything changed" token for polling clients. Changes whenever
/// the player's latest pair, either side's progress or their score changes.
pub fn probe(state: &AppState, game_id: i64, player_id: i64) -> Result<ProbeToken> {
    logged("probe", probe_token(state, game_id, player_id))
}

fn probe_token(state: &AppState, game_id: i64, player_id: i64) -> Result<ProbeToken> {
    let conn = try_lock(&state.pool)?;
    require_player(&conn, player_id)?;
    require_game(&conn, game_id)?;

    let score = db::get_ability(&conn, game_id, player_id)?.map_or(0, |a| a.score);
    let fingerprint = match db::find_latest_pair(&conn, game_id, player_id)? {
        Some(pair) => format!(
            "{}:{}:{}:{}:{}",
            pair.id,
            pair.version,
            db::count_answered(&conn, pair.id, Side::A)?,
            db::count_answered(&conn, pair.id, Side::B)?,
            score
        ),
        None => format!("none:{}", score),
    };
    let hash = Sha256::digest(fingerprint.as_bytes());
    Ok(ProbeToken {
        token: hex::encode(&hash[..16]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModeKind;
    use crate::testing::TestEnv;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn correct_answer(env: &TestEnv, attempt_id: i64) -> String {
        let conn = env.conn();
        let attempt = db::get_attempt(&conn, attempt_id).unwrap().unwrap();
        db::get_item(&conn, attempt.item_id).unwrap().unwrap().correct_answer()
    }

    fn play(
        state: &AppState,
        env: &TestEnv,
        game_id: i64,
        player: i64,
        correct: bool,
    ) -> (AttemptView, AnswerOutcome) {
        let view = get_attempt(state, game_id, player).unwrap();
        let answer = if correct {
            correct_answer(env, view.attempt_id)
        } else {
            "definitely wrong".to_string()
        };
        let outcome = submit_answer(
            state,
            game_id,
            player,
            view.attempt_id,
            &answer,
            None,
        )
        .unwrap();
        (view, outcome)
    }

    #[test]
    fn test_unknown_player_and_game() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Duel, 8);
        let ann = env.add_player("ann", None);
        let state = env.state();
        assert!(matches!(get_attempt(&state, game_id, 999), Err(DuelError::InvalidUser(999))));
        assert!(matches!(get_attempt(&state, 999, ann), Err(DuelError::GameNotFound(999))));
    }

    #[test]
    fn test_empty_catalog_is_no_items() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Solo, 0);
        let ann = env.add_player("ann", None);
        let state = env.state();
        assert!(matches!(get_attempt(&state, game_id, ann), Err(DuelError::NoItemsAvailable)));

        // no attempt or pair was left behind
        let conn = env.conn();
        assert_eq!(db::count_player_attempts(&conn, game_id, ann).unwrap(), 0);
        assert!(db::find_latest_pair(&conn, game_id, ann).unwrap().is_none());
    }

    #[test]
    fn test_all_four_duel_outcomes() {
        let cases = [
            (true, true, 3, 3),
            (true, false, 6, -1),
            (false, true, -1, 6),
            (false, false, -1, -1),
        ];
        for (a_correct, b_correct, a_expected, b_expected) in cases {
            let env = TestEnv::new().unwrap();
            let (game_id, _) = env.seed_game(ModeKind::Duel, 12);
            let ann = env.add_player("ann", None);
            let bob = env.add_player("bob", None);
            let state = env.state();

            let a_view = get_attempt(&state, game_id, ann).unwrap();
            let b_view = get_attempt(&state, game_id, bob).unwrap();
            assert_eq!(a_view.pair_id, b_view.pair_id);
            assert_eq!(a_view.seq, b_view.seq);

            let a_answer = if a_correct {
                correct_answer(&env, a_view.attempt_id)
            } else {
                "no".into()
            };
            let b_answer = if b_correct {
                correct_answer(&env, b_view.attempt_id)
            } else {
                "no".into()
            };
            submit_answer(&state, game_id, ann, a_view.attempt_id, &a_answer, None).unwrap();
            submit_answer(&state, game_id, bob, b_view.attempt_id, &b_answer, None).unwrap();

            let conn = env.conn();
            let a = db::get_attempt(&conn, a_view.attempt_id).unwrap().unwrap();
            let b = db::get_attempt(&conn, b_view.attempt_id).unwrap().unwrap();
            assert_eq!(
                (a.score, b.score),
                (a_expected, b_expected),
                "a={} b={}",
                a_correct,
                b_correct,
            );
        }
    }

    #[test]
    fn test_answer_order_does_not_matter() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Duel, 12);
        let ann = env.add_player("ann", None);
        let bob = env.add_player("bob", None);
        let state = env.state();
        let a_view = get_attempt(&state, game_id, ann).unwrap();
        let b_view = get_attempt(&state, game_id, bob).unwrap();

        // B answers wrong first, then A answers right: A is doubled immediately
        submit_answer(&state, game_id, bob, b_view.attempt_id, "no", None).unwrap();
        let answer = correct_answer(&env, a_view.attempt_id);
        let outcome = submit_answer(
            &state,
            game_id,
            ann,
            a_view.attempt_id,
            &answer,
            None,
        )
        .unwrap();
        assert_eq!(outcome.score_delta, 6);
        assert_eq!(outcome.opponent_delta, None);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Solo, 8);
        let ann = env.add_player("ann", None);
        let state = env.state();
        let (view, first) = play(&state, &env, game_id, ann, true);

        let theta_before = db::get_theta(&env.conn(), game_id, ann).unwrap();
        let second = submit_answer(
            &state,
            game_id,
            ann,
            view.attempt_id,
            "anything",
            None,
        )
        .unwrap();
        assert_eq!(first, second);
        assert_eq!(db::get_theta(&env.conn(), game_id, ann).unwrap(), theta_before);
    }

    #[test]
    fn test_first_correct_answer_moves_theta_by_learning_rate() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Solo, 8);
        let ann = env.add_player("ann", None);
        let state = env.state();
        play(&state, &env, game_id, ann, true);
        let theta = db::get_theta(&env.conn(), game_id, ann).unwrap();
        assert!((theta - 0.025).abs() < 1e-9);
    }

    #[test]
    fn test_at_most_one_open_attempt() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Duel, 10);
        let players: Vec<i64> = (0..3).map(|i| env.add_player(&format!("p{}", i), None)).collect();
        let state = env.state();

        for round in 0..6 {
            for &p in &players {
                let view = get_attempt(&state, game_id, p).unwrap();
                let conn = env.conn();
                let attempt = db::get_attempt(&conn, view.attempt_id).unwrap().unwrap();
                assert_eq!(
                    db::count_open_attempts(&conn, game_id, attempt.duel_group, p).unwrap(),
                    1,
                );
                drop(conn);
                let answer = if (round + p) % 2 == 0 {
                    correct_answer(&env, view.attempt_id)
                } else {
                    "x".into()
                };
                submit_answer(&state, game_id, p, view.attempt_id, &answer, None).unwrap();
            }
        }
    }

    #[test]
    fn test_usage_matches_attempts_created() {
        let env = TestEnv::new().unwrap();
        let (game_id, items) = env.seed_game(ModeKind::Duel, 6);
        let players: Vec<i64> = (0..3).map(|i| env.add_player(&format!("p{}", i), None)).collect();
        let state = env.state();
        for _ in 0..5 {
            for &p in &players {
                play(&state, &env, game_id, p, false);
            }
        }

        let conn = env.conn();
        for item_id in items {
            let created = db::count_attempts_for_item(&conn, game_id, item_id).unwrap();
            let used = db::get_bucket(&conn, game_id, db::GLOBAL, item_id)
                .unwrap()
                .map_or(0, |b| b.times_used);
            assert_eq!(used, created, "item {}", item_id);
        }
    }

    #[test]
    fn test_usage_matches_attempts_created_across_threads() {
        let env = TestEnv::new().unwrap();
        let (game_id, items) = env.seed_game(ModeKind::Duel, 8);
        let players: Vec<i64> = (0..4).map(|i| env.add_player(&format!("p{}", i), None)).collect();
        let shared = env.state();

        std::thread::scope(|scope| {
            for &p in &players {
                let state = shared.clone();
                let env = &env;
                scope.spawn(move || {
                    for round in 0..6 {
                        let view = match get_attempt(&state, game_id, p) {
                            Ok(view) => view,
                            Err(DuelError::NoOpponentAvailable) => continue,
                            Err(e) => panic!("player {} fetch failed: {}", p, e),
                        };
                        let answer = if (round + p) % 2 == 0 {
                            correct_answer(env, view.attempt_id)
                        } else {
                            "x".into()
                        };
                        submit_answer(&state, game_id, p, view.attempt_id, &answer, None).unwrap();
                    }
                });
            }
        });

        let conn = env.conn();
        let mut total = 0;
        for item_id in items {
            let created = db::count_attempts_for_item(&conn, game_id, item_id).unwrap();
            let used = db::get_bucket(&conn, game_id, db::GLOBAL, item_id)
                .unwrap()
                .map_or(0, |b| b.times_used);
            assert_eq!(used, created, "item {}", item_id);
            total += created;
        }
        assert!(total > 0);
    }

    #[test]
    fn test_sequence_numbers_unique_per_group() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Solo, 10);
        let ann = env.add_player("ann", None);
        let state = env.state();
        let mut seqs = Vec::new();
        for _ in 0..9 {
            let (view, _) = play(&state, &env, game_id, ann, true);
            seqs.push(view.seq);
        }
        assert_eq!(seqs, (1..=9).collect::<Vec<i64>>());
    }

    #[test]
    fn test_wizard_attempt_without_opponent_costs_penalty() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Duel, 12);
        let ann = env.add_player("ann", None);
        let state = env.state();
        let wizard_seq = 2 * i64::from(env.tuning.bout_size);
        for seq in 1..=wizard_seq {
            let (view, outcome) = play(&state, &env, game_id, ann, true);
            assert_eq!(view.seq, seq);
            assert_eq!(view.wizard, seq == wizard_seq);
            let expected = if seq == wizard_seq { 3 - env.tuning.wizard_penalty } else { 3 };
            assert_eq!(outcome.score_delta, expected, "seq {}", seq);
        }
    }

    #[test]
    fn test_alone_cap_then_no_opponent() {
        let env = TestEnv::new().unwrap();
        let mut settings = GameSettings::new("capped", ModeKind::Duel);
        settings.bout_size = Some(2);
        settings.max_alone_count = Some(2);
        let (game_id, _) = env.seed_game_with(settings, 10);
        let ann = env.add_player("ann", None);
        let state = env.state();
        play(&state, &env, game_id, ann, true);
        play(&state, &env, game_id, ann, true);
        assert!(matches!(
            get_attempt(&state, game_id, ann),
            Err(DuelError::NoOpponentAvailable)
        ));

        // another player takes the waiting side B, which frees ann
        let bob = env.add_player("bob", None);
        let view = get_attempt(&state, game_id, bob).unwrap();
        assert_eq!(view.side, Side::B);
        assert!(get_attempt(&state, game_id, ann).is_ok());
    }

    #[test]
    fn test_late_submit_times_out_then_replays() {
        let env = TestEnv::new().unwrap();
        let mut settings = GameSettings::new("timed", ModeKind::Solo);
        settings.time_limit_secs = Some(20);
        let (game_id, _) = env.seed_game_with(settings, 6);
        let ann = env.add_player("ann", None);
        let state = env.state();
        let view = get_attempt(&state, game_id, ann).unwrap();
        let answer = correct_answer(&env, view.attempt_id);

        let late = Utc::now() + Duration::seconds(60);
        let result = submit_answer_at(&state, game_id, ann, view.attempt_id, &answer, None, late);
        assert!(matches!(result, Err(DuelError::Timeout(_))));

        let replay = submit_answer(&state, game_id, ann, view.attempt_id, &answer, None).unwrap();
        assert!(replay.timed_out);
        assert_eq!(replay.correct, Some(false));
    }

    #[test]
    fn test_fetch_after_deadline_reports_expired() {
        let env = TestEnv::new().unwrap();
        let mut settings = GameSettings::new("timed", ModeKind::Solo);
        settings.time_limit_secs = Some(20);
        let (game_id, _) = env.seed_game_with(settings, 6);
        let ann = env.add_player("ann", None);
        let state = env.state();
        let first = get_attempt(&state, game_id, ann).unwrap();

        let late = Utc::now() + Duration::seconds(60);
        let mut rng = StdRng::seed_from_u64(3);
        let next = fetch_attempt(&state, game_id, ann, late, &mut rng).unwrap();
        assert_eq!(next.expired.map(|e| e.attempt_id), Some(first.attempt_id));
        assert_ne!(next.attempt_id, first.attempt_id);
    }

    #[test]
    fn test_tool_flow() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Duel, 8);
        let ann = env.add_player("ann", None);
        let state = env.state();
        let view = get_attempt(&state, game_id, ann).unwrap();
        assert!(view.tool_available);

        let halved = use_tool(&state, game_id, ann, view.attempt_id, Tool::Halve).unwrap();
        assert_eq!(halved.options.len(), 2);
        let again = get_attempt(&state, game_id, ann).unwrap();
        assert_eq!(again.item.options, halved.options);
        assert!(!again.tool_available);

        let answer = correct_answer(&env, view.attempt_id);
        let outcome = submit_answer(&state, game_id, ann, view.attempt_id, &answer, None).unwrap();
        assert_eq!(outcome.score_delta, 1);

        let next = get_attempt(&state, game_id, ann).unwrap();
        assert!(matches!(
            use_tool(&state, game_id, ann, next.attempt_id, Tool::Skip),
            Err(DuelError::ToolUnavailable)
        ));
    }

    #[test]
    fn test_high_score_ranking() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Solo, 8);
        let ann = env.add_player("ann", None);
        let bob = env.add_player("bob", None);
        let state = env.state();
        play(&state, &env, game_id, ann, true);
        play(&state, &env, game_id, bob, false);

        let table = get_high_score(&state, game_id, ann, Some(5)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].player_id, ann);
        assert_eq!(table[0].rank, 1);
        assert!((table[0].percent - 12.5).abs() < 1e-9);
        assert_eq!(table[1].score, -1);
    }

    #[test]
    fn test_batch_isolates_players() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Solo, 8);
        let ann = env.add_player("ann", None);
        let bob = env.add_player("bob", None);
        let state = env.state();
        let batch = get_attempts_batch(&state, game_id, ann, &[ann, 404, bob]).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch[0].attempt.is_some());
        assert_eq!(batch[1].error.as_ref().map(|e| e.kind), Some("invalid_user"));
        assert!(batch[2].attempt.is_some());

        let ids: HashSet<i64> = batch
            .iter()
            .filter_map(|b| b.attempt.as_ref().map(|a| a.pair_id))
            .collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_batch_requires_caller_among_players() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Solo, 8);
        let ann = env.add_player("ann", None);
        let bob = env.add_player("bob", None);
        let eve = env.add_player("eve", None);
        let state = env.state();

        let result = get_attempts_batch(&state, game_id, eve, &[ann, bob]);
        assert!(matches!(result, Err(DuelError::NotInBatch(id)) if id == eve));
        // an unknown caller cannot vouch for itself either
        let result = get_attempts_batch(&state, game_id, 404, &[404, ann]);
        assert!(matches!(result, Err(DuelError::InvalidUser(404))));

        // nothing was opened on behalf of the other players
        let conn = env.conn();
        assert_eq!(db::count_player_attempts(&conn, game_id, ann).unwrap(), 0);
        assert_eq!(db::count_player_attempts(&conn, game_id, bob).unwrap(), 0);
    }

    #[test]
    fn test_probe_changes_with_progress() {
        let env = TestEnv::new().unwrap();
        let (game_id, _) = env.seed_game(ModeKind::Duel, 8);
        let ann = env.add_player("ann", None);
        let bob = env.add_player("bob", None);
        let state = env.state();

        let before = probe(&state, game_id, ann).unwrap();
        let view = get_attempt(&state, game_id, ann).unwrap();
        let opened = probe(&state, game_id, ann).unwrap();
        assert_ne!(before, opened);
        assert_eq!(opened, probe(&state, game_id, ann).unwrap());

        // the opponent joining is visible without fetching
        get_attempt(&state, game_id, bob).unwrap();
        let joined = probe(&state, game_id, ann).unwrap();
        assert_ne!(opened, joined);

        submit_answer(&state, game_id, ann, view.attempt_id, "x", None).unwrap();
        assert_ne!(joined, probe(&state, game_id, ann).unwrap());
        assert_eq!(before.token.len(), 32);
    }
}
