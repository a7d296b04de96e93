//! Test utilities for database setup.
//!
//! Provides helpers that reuse authoritative schema initialization,
//! eliminating schema duplication in test code.

use rusqlite::Connection;
use std::path::Path;
use std::sync::MutexGuard;
use tempfile::TempDir;

use crate::config::Tuning;
use crate::db::{self, DbPool};
use crate::domain::{AnswerOption, GameSettings, Item, ItemKind, ModeKind};
use crate::state::AppState;

/// Test environment with a learning database using the authoritative schema.
///
/// The database file lives in a temporary directory that is removed when
/// the environment is dropped.
pub struct TestEnv {
    /// Temporary directory (kept alive for database file persistence)
    pub temp: TempDir,
    pub pool: DbPool,
    pub tuning: Tuning,
}

impl TestEnv {
    /// Create a test environment with the database initialized via `db::init_db`.
    pub fn new() -> rusqlite::Result<Self> {
        let temp =
            TempDir::new().map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let pool = db::init_db(&temp.path().join("duel_quiz.db"))?;
        Ok(Self {
            temp,
            pool,
            tuning: Tuning::default(),
        })
    }

    /// Lock the shared connection. Drop the guard before calling service code.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.pool.lock().expect("test database lock poisoned")
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.pool.clone(), self.tuning.clone())
    }

    /// Get the temporary directory path for creating test files.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn add_player(&self, name: &str, group: Option<&str>) -> i64 {
        db::insert_player(&self.conn(), name, group).expect("insert player")
    }

    /// Create a game of `mode` with `items` four-option questions.
    /// Question `n` has correct answer `"right n"`.
    pub fn seed_game(&self, mode: ModeKind, items: usize) -> (i64, Vec<i64>) {
        self.seed_game_with(GameSettings::new("test game", mode), items)
    }

    pub fn seed_game_with(&self, game: GameSettings, items: usize) -> (i64, Vec<i64>) {
        let conn = self.conn();
        let game_id = db::insert_game(&conn, &game).expect("insert game");
        let item_ids = seed_choice_items(&conn, game_id, items).expect("seed items");
        (game_id, item_ids)
    }
}

/// Insert `n` multiple choice items into a game's pool
pub fn seed_choice_items(conn: &Connection, game_id: i64, n: usize) -> rusqlite::Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let item = choice_item(i);
        let id = db::insert_item(conn, &item)?;
        db::add_item_to_game(conn, game_id, id)?;
        ids.push(id);
    }
    Ok(ids)
}

/// Four-option question whose correct answer is `"right {n}"`
pub fn choice_item(n: usize) -> Item {
    Item::new(
        ItemKind::MultiChoice,
        format!("Question {}", n),
        vec![
            AnswerOption::wrong(&format!("wrong {} a", n)),
            AnswerOption::right(&format!("right {}", n)),
            AnswerOption::wrong(&format!("wrong {} b", n)),
            AnswerOption::wrong(&format!("wrong {} c", n)),
        ],
    )
}
