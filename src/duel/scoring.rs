//! Scoring engine.
//!
//! Base score, double-or-nothing duel adjustment, wizard positions and the
//! halve-choices tool. Everything here is pure; the lifecycle writes the
//! results.

use sha2::{Digest, Sha256};

use crate::config::Tuning;
use crate::domain::{Attempt, GameSettings, Item, Tool};

/// Seed for the decoy kept by the halve tool. Derived from the attempt id so
/// repeated requests present the same two options.
pub fn halve_seed(attempt_id: i64) -> u64 {
    let hash = Sha256::digest(format!("halve:{}", attempt_id).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(bytes)
}

/// The options shown to the player for this attempt
pub fn presented_options(item: &Item, attempt: &Attempt) -> Vec<String> {
    if attempt.tool == Some(Tool::Halve) {
        item.halved_options(halve_seed(attempt.id))
    } else {
        item.options()
    }
}

/// `n - 1` for a correct multiple choice answer out of `n` presented options
/// (so a lone option is worth nothing), `-1` for a wrong one under negative
/// grading. Other kinds score 1/0.
pub fn base_score(item: &Item, presented: usize, correct: bool, negative_grading: bool) -> i64 {
    if !item.is_multichoice() {
        return i64::from(correct);
    }
    if correct {
        presented as i64 - 1
    } else if negative_grading {
        -1
    } else {
        0
    }
}

/// Score of an answer after doubling and the wizard rule.
///
/// A correct wizard answer loses `wizard_penalty`, or `wizard_double_penalty`
/// when it was doubled.
pub fn final_score(base: i64, correct: bool, doubled: bool, wizard: bool, tuning: &Tuning) -> i64 {
    if !correct {
        return base;
    }
    match (doubled, wizard) {
        (true, true) => 2 * base - tuning.wizard_double_penalty,
        (true, false) => 2 * base,
        (false, true) => base - tuning.wizard_penalty,
        (false, false) => base,
    }
}

/// Retroactive doubling of the opponent's already recorded score
#[derive(Debug, Clone, PartialEq)]
pub struct OpponentDouble {
    pub attempt_id: i64,
    pub version: i64,
    pub player_id: i64,
    pub item_id: i64,
    pub score: i64,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDecision {
    pub base: i64,
    pub score: i64,
    pub doubled: bool,
    pub wizard: bool,
    pub opponent: Option<OpponentDouble>,
}

/// Grade-independent part of scoring: given correctness, the opponent's
/// matching attempt (if any) and the game, decide every score change.
pub fn score_answer(
    item: &Item,
    attempt: &Attempt,
    correct: bool,
    opponent: Option<&Attempt>,
    game: &GameSettings,
    tuning: &Tuning,
    duel_rules: bool,
) -> ScoreDecision {
    let presented = presented_options(item, attempt).len();
    let base = base_score(item, presented, correct, game.negative_grading);
    let wizard = duel_rules && game.is_wizard_seq(attempt.seq, tuning);

    let rival = opponent.filter(|o| duel_rules && o.counts_for_duel());
    let rival_correct = rival.and_then(|o| o.is_correct);

    let doubled = correct && rival_correct == Some(false);
    let score = final_score(base, correct, doubled, wizard, tuning);

    let opponent = match rival {
        Some(o) if !correct && rival_correct == Some(true) && !o.doubled => {
            let o_base = o.base_score.unwrap_or(o.score);
            let o_wizard = game.is_wizard_seq(o.seq, tuning);
            let o_score = final_score(o_base, true, true, o_wizard, tuning);
            Some(OpponentDouble {
                attempt_id: o.id,
                version: o.version,
                player_id: o.player_id,
                item_id: o.item_id,
                score: o_score,
                delta: o_score - o.score,
            })
        }
        _ => None,
    };

    ScoreDecision {
        base,
        score,
        doubled,
        wizard,
        opponent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnswerOption, AttemptState, ItemKind, ModeKind, Side};
    use chrono::Utc;

    fn four_options() -> Item {
        let mut item = Item::new(
            ItemKind::MultiChoice,
            "2 + 2?".into(),
            vec![
                AnswerOption::wrong("3"),
                AnswerOption::right("4"),
                AnswerOption::wrong("5"),
                AnswerOption::wrong("22"),
            ],
        );
        item.id = 1;
        item
    }

    fn attempt(id: i64, side: Side, seq: i64) -> Attempt {
        Attempt {
            id,
            game_id: 1,
            pair_id: 1,
            duel_group: 1,
            player_id: if side == Side::A { 10 } else { 20 },
            side,
            seq,
            item_id: 1,
            state: AttemptState::Started,
            tool: None,
            created_at: Utc::now(),
            started_at: None,
            answered_at: None,
            deadline: None,
            raw_answer: None,
            is_correct: None,
            base_score: None,
            score: 0,
            doubled: false,
            timed_out: false,
            opponent_delta: None,
            version: 1,
        }
    }

    fn answered(mut a: Attempt, correct: bool) -> Attempt {
        a.state = AttemptState::Answered;
        a.is_correct = Some(correct);
        a.base_score = Some(if correct { 3 } else { -1 });
        a.score = a.base_score.unwrap_or(0);
        a
    }

    fn game() -> GameSettings {
        GameSettings::new("g", ModeKind::Duel)
    }

    #[test]
    fn test_base_scores() {
        let item = four_options();
        assert_eq!(base_score(&item, 4, true, true), 3);
        assert_eq!(base_score(&item, 4, false, true), -1);
        assert_eq!(base_score(&item, 4, false, false), 0);
        assert_eq!(base_score(&item, 2, true, true), 1);
        assert_eq!(base_score(&item, 1, true, true), 0);
        assert_eq!(base_score(&item, 1, false, true), -1);

        let short = Item::new(
            ItemKind::ShortAnswer,
            "Capital of Peru?".into(),
            vec![AnswerOption::right("Lima")],
        );
        assert_eq!(base_score(&short, 0, true, true), 1);
        assert_eq!(base_score(&short, 0, false, true), 0);
    }

    #[test]
    fn test_halve_seed_is_stable() {
        assert_eq!(halve_seed(42), halve_seed(42));
        assert_ne!(halve_seed(42), halve_seed(43));

        let item = four_options();
        let mut a = attempt(42, Side::A, 1);
        a.tool = Some(Tool::Halve);
        let shown = presented_options(&item, &a);
        assert_eq!(shown.len(), 2);
        assert!(shown.contains(&"4".to_string()));
        assert_eq!(shown, presented_options(&item, &a));
    }

    #[test]
    fn test_halved_correct_answer_scores_one() {
        let tuning = Tuning::default();
        let mut a = attempt(5, Side::A, 1);
        a.tool = Some(Tool::Halve);
        let d = score_answer(&four_options(), &a, true, None, &game(), &tuning, true);
        assert_eq!(d.score, 1);
    }

    /// Every (A, B) correctness combination, B answering second
    #[test]
    fn test_duel_rule_table() {
        let tuning = Tuning::default();
        let item = four_options();
        let cases = [
            // a, b, a final, b final
            (true, true, 3, 3),
            (true, false, 6, -1),
            (false, true, -1, 6),
            (false, false, -1, -1),
        ];
        for (a_correct, b_correct, a_expected, b_expected) in cases {
            let a_decision = score_answer(
                &item,
                &attempt(1, Side::A, 1),
                a_correct,
                None,
                &game(),
                &tuning,
                true,
            );
            let mut a_done = answered(attempt(1, Side::A, 1), a_correct);
            a_done.score = a_decision.score;

            let b_decision = score_answer(
                &item,
                &attempt(2, Side::B, 1),
                b_correct,
                Some(&a_done),
                &game(),
                &tuning,
                true,
            );
            let a_final = a_decision.score + b_decision.opponent.as_ref().map_or(0, |o| o.delta);
            assert_eq!(
                (a_final, b_decision.score),
                (a_expected, b_expected),
                "a={} b={}",
                a_correct,
                b_correct,
            );
        }
    }

    #[test]
    fn test_retroactive_double_only_once() {
        let tuning = Tuning::default();
        let mut a_done = answered(attempt(1, Side::A, 1), true);
        a_done.doubled = true;
        let d = score_answer(
            &four_options(),
            &attempt(2, Side::B, 1),
            false,
            Some(&a_done),
            &game(),
            &tuning,
            true,
        );
        assert!(d.opponent.is_none());
    }

    #[test]
    fn test_skipped_opponent_has_no_effect() {
        let tuning = Tuning::default();
        let mut skipped = answered(attempt(1, Side::A, 1), false);
        skipped.is_correct = None;
        skipped.tool = Some(Tool::Skip);
        let d = score_answer(
            &four_options(),
            &attempt(2, Side::B, 1),
            true,
            Some(&skipped),
            &game(),
            &tuning,
            true,
        );
        assert!(!d.doubled);
        assert_eq!(d.score, 3);
    }

    #[test]
    fn test_wizard_without_opponent_costs_penalty() {
        let tuning = Tuning::default();
        let seq = 2 * i64::from(tuning.bout_size);
        let d = score_answer(
            &four_options(),
            &attempt(1, Side::A, seq),
            true,
            None,
            &game(),
            &tuning,
            true,
        );
        assert!(d.wizard);
        assert_eq!(d.score, 3 - tuning.wizard_penalty);
    }

    #[test]
    fn test_doubled_wizard_costs_double_penalty() {
        let tuning = Tuning::default();
        let seq = 2 * i64::from(tuning.bout_size);
        let wrong = answered(attempt(1, Side::A, seq), false);
        let d = score_answer(
            &four_options(),
            &attempt(2, Side::B, seq),
            true,
            Some(&wrong),
            &game(),
            &tuning,
            true,
        );
        assert!(d.doubled);
        assert_eq!(d.score, 6 - tuning.wizard_double_penalty);
    }

    #[test]
    fn test_wrong_wizard_is_plain_wrong() {
        let tuning = Tuning::default();
        let seq = 2 * i64::from(tuning.bout_size);
        let d = score_answer(
            &four_options(),
            &attempt(1, Side::A, seq),
            false,
            None,
            &game(),
            &tuning,
            true,
        );
        assert_eq!(d.score, -1);
    }

    #[test]
    fn test_no_duel_rules_in_solo() {
        let tuning = Tuning::default();
        let seq = 2 * i64::from(tuning.bout_size);
        let wrong = answered(attempt(1, Side::A, seq), false);
        let d = score_answer(
            &four_options(),
            &attempt(2, Side::B, seq),
            true,
            Some(&wrong),
            &game(),
            &tuning,
            false,
        );
        assert!(!d.doubled);
        assert!(!d.wizard);
        assert_eq!(d.score, 3);
    }
}
