use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// How an item is presented and graded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Closed set of options, strict matching, negative grading applies
    MultiChoice,
    /// Typed answer compared after normalization
    ShortAnswer,
    TrueFalse,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiChoice => "multi_choice",
            Self::ShortAnswer => "short_answer",
            Self::TrueFalse => "true_false",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "multi_choice" => Some(Self::MultiChoice),
            "short_answer" => Some(Self::ShortAnswer),
            "true_false" => Some(Self::TrueFalse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub text: String,
    pub correct: bool,
}

impl AnswerOption {
    pub fn right(text: &str) -> Self {
        Self {
            text: text.to_string(),
            correct: true,
        }
    }

    pub fn wrong(text: &str) -> Self {
        Self {
            text: text.to_string(),
            correct: false,
        }
    }
}

/// A question shared by every player and game. Content is immutable, the
/// counters are aggregate usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub kind: ItemKind,
    pub question: String,
    pub answers: Vec<AnswerOption>,
    pub times_used: i64,
    pub times_correct: i64,
    pub times_wrong: i64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(kind: ItemKind, question: String, answers: Vec<AnswerOption>) -> Self {
        Self {
            id: 0,
            kind,
            question,
            answers,
            times_used: 0,
            times_correct: 0,
            times_wrong: 0,
            last_used_at: None,
        }
    }

    pub fn is_multichoice(&self) -> bool {
        self.kind == ItemKind::MultiChoice
    }

    /// Grade a raw answer. Multiple choice is strict, typed answers are normalized.
    pub fn grade(&self, raw: &str) -> bool {
        match self.kind {
            ItemKind::MultiChoice => {
                let raw = raw.trim();
                self.answers.iter().any(|a| a.correct && a.text == raw)
            }
            ItemKind::ShortAnswer | ItemKind::TrueFalse => {
                let raw = normalize_answer(raw);
                self
                    .answers
                    .iter()
                    .any(|a| a.correct && normalize_answer(&a.text) == raw)
            }
        }
    }

    /// Human-readable correct answer(s) for feedback
    pub fn correct_answer(&self) -> String {
        self
            .answers
            .iter()
            .filter(|a| a.correct)
            .map(|a| a.text.as_str())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    /// Options shown to the player. Typed answers expose none.
    pub fn options(&self) -> Vec<String> {
        match self.kind {
            ItemKind::ShortAnswer => Vec::new(),
            ItemKind::MultiChoice | ItemKind::TrueFalse => {
                self.answers.iter().map(|a| a.text.clone()).collect()
            }
        }
    }

    /// Whether halving would actually take options away
    pub fn can_halve(&self) -> bool {
        self.is_multichoice()
            && self.answers.len() > 2
            && self.answers.iter().any(|a| a.correct)
            && self.answers.iter().any(|a| !a.correct)
    }

    /// The correct option plus one decoy, chosen deterministically from `seed`.
    /// Original option order is preserved.
    pub fn halved_options(&self, seed: u64) -> Vec<String> {
        if !self.can_halve() {
            return self.options();
        }
        let Some(keep_correct) = self.answers.iter().position(|a| a.correct) else {
            return self.options();
        };
        let decoys: Vec<usize> = (0..self.answers.len())
            .filter(|&i| !self.answers[i].correct)
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let Some(&keep_decoy) = decoys.choose(&mut rng) else {
            return self.options();
        };
        self
            .answers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i == keep_correct || *i == keep_decoy)
            .map(|(_, a)| a.text.clone())
            .collect()
    }
}

/// NFC-normalize, trim, collapse inner whitespace and lowercase
pub fn normalize_answer(s: &str) -> String {
    s.nfc()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
