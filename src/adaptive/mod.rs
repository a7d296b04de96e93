pub mod rasch;
pub mod selector;

pub use rasch::{apply_graded_answer, probability, rasch_step, RaschStep};
pub use selector::{next_due, select, select_items, Candidate, SelectionContext};
