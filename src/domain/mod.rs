pub mod attempt;
pub mod game;
pub mod item;
pub mod pair;

pub use attempt::{Attempt, AttemptState, Side, Tool};
pub use game::{GameSettings, ModeKind, Player};
pub use item::{AnswerOption, Item, ItemKind};
pub use pair::DuelPair;
