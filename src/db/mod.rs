pub mod ability;
pub mod attempts;
pub mod items;
pub mod pairs;
pub mod players;
pub mod schema;
pub mod stats;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::{AnswerOption, GameSettings, Item, ItemKind, ModeKind};
use crate::error::{DuelError, Result};

// Re-export all public items from submodules
pub use ability::*;
pub use attempts::*;
pub use items::*;
pub use pairs::*;
pub use players::*;
pub use schema::run_migrations;
pub use stats::*;

pub type DbPool = Arc<Mutex<Connection>>;

/// Extension trait for logging errors before discarding them
pub trait LogOnError<T> {
    /// Log the error at warn level and return None
    fn log_warn(self, context: &str) -> Option<T>;
    /// Log the error at warn level and return the default
    fn log_warn_default(self, context: &str) -> T
    where
        T: Default;
}

impl<T, E: std::fmt::Display> LogOnError<T> for std::result::Result<T, E> {
    fn log_warn(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", context, e);
                None
            }
        }
    }

    fn log_warn_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("{}: {}", context, e);
                T::default()
            }
        }
    }
}

/// Error returned when database lock cannot be acquired
#[derive(Debug)]
pub struct DbLockError;

impl std::fmt::Display for DbLockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Database unavailable")
    }
}

impl std::error::Error for DbLockError {}

/// Try to acquire the database lock, returning an error if poisoned
pub fn try_lock(pool: &DbPool) -> std::result::Result<MutexGuard<'_, Connection>, DbLockError> {
    pool.lock().map_err(|_: PoisonError<_>| {
        tracing::error!("Database mutex poisoned - a thread panicked while holding the lock");
        DbLockError
    })
}

pub fn init_db(path: &Path) -> rusqlite::Result<DbPool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    // Create backup before migrations if database exists
    if path.exists() {
        let backup_path = path.with_extension("db.backup");
        if let Err(e) = std::fs::copy(path, &backup_path) {
            tracing::warn!("Could not create database backup: {}", e);
        }
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(2))?;
    run_migrations(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Run `work` inside one IMMEDIATE transaction.
///
/// A retryable failure (lost optimistic race, busy database) rolls the whole
/// transaction back and re-runs `work` from its read step. After
/// `max_retries` reruns the failure surfaces as `Timeout`.
pub fn unit_of_work<T, F>(pool: &DbPool, max_retries: u32, mut work: F) -> Result<T>
where
    F: FnMut(&Transaction<'_>) -> Result<T>,
{
    let mut tries = 0;
    loop {
        let mut conn = try_lock(pool)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match work(&tx) {
            Ok(value) => {
                tx.commit()?;
                return Ok(value);
            }
            Err(e) if e.is_retryable() && tries < max_retries => {
                tries += 1;
                tracing::debug!("Retrying unit of work ({}/{}): {}", tries, max_retries, e);
                // dropping the transaction rolls it back
            }
            Err(e) if e.is_retryable() => {
                return Err(DuelError::Timeout(format!(
                    "gave up after {} conflicting retries",
                    max_retries
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Format a timestamp the way every table stores it
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse a stored timestamp, tolerating legacy garbage as `None`
pub(crate) fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Seed a small catalog and a default duel game into an empty database
pub fn seed_demo_game(conn: &Connection) -> rusqlite::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM games", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(());
    }

    let game_id = insert_game(conn, &GameSettings::new("Demo duel", ModeKind::Duel))?;
    for item in get_demo_items() {
        let item_id = insert_item(conn, &item)?;
        add_item_to_game(conn, game_id, item_id)?;
    }
    tracing::info!("Seeded demo game {}", game_id);
    Ok(())
}

// Helper to build a multiple choice item with the first option correct
fn choice(question: &str, correct: &str, wrong: [&str; 3]) -> Item {
    let mut answers = vec![AnswerOption::right(correct)];
    answers.extend(wrong.iter().map(|w| AnswerOption::wrong(w)));
    Item::new(ItemKind::MultiChoice, question.to_string(), answers)
}

fn get_demo_items() -> Vec<Item> {
    let mut items = vec![
        choice("7 x 8 = ?", "56", ["54", "64", "48"]),
        choice("Square root of 81?", "9", ["8", "7", "81"]),
        choice("Chemical symbol for gold?", "Au", ["Ag", "Gd", "Go"]),
        choice("Largest ocean?", "Pacific", ["Atlantic", "Indian", "Arctic"]),
        choice("Planet closest to the sun?", "Mercury", ["Venus", "Mars", "Earth"]),
        choice("Author of Hamlet?", "Shakespeare", ["Marlowe", "Milton", "Chaucer"]),
        choice("Boiling point of water at sea level (C)?", "100", ["90", "110", "212"]),
        choice("Number of sides of a hexagon?", "6", ["5", "7", "8"]),
    ];
    items.push(Item::new(
        ItemKind::ShortAnswer,
        "Capital of Japan?".to_string(),
        vec![AnswerOption::right("Tokyo")],
    ));
    items.push(Item::new(
        ItemKind::TrueFalse,
        "The Great Wall is visible from the Moon with the naked eye.".to_string(),
        vec![AnswerOption::wrong("true"), AnswerOption::right("false")],
    ));
    items
}
