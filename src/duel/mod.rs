//! Duels: matchmaking, the attempt lifecycle and scoring, driven by a
//! per-game [`GameMode`] strategy.

pub mod lifecycle;
pub mod matchmaker;
pub mod mode;
pub mod scoring;

pub use lifecycle::{AnswerOutcome, Resolved, Submission, ToolOutcome};
pub use matchmaker::{resolve_pairing, Pairing, PairingRule};
pub use mode::{mode_for, Duel, GameMode, PlayContext, Solo, Split};
pub use scoring::{base_score, final_score, halve_seed, presented_options, ScoreDecision};
