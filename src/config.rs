//! Application configuration.
//!
//! Values come from `config.toml` first, then `.env` / environment
//! variables, then the defaults below. The `[tuning]` table carries the
//! empirically chosen constants of the selector, the ability model and the
//! duel scoring rules so they can be adjusted without a rebuild.

use serde::Deserialize;
use std::path::PathBuf;

// ==================== File Configuration ====================

/// Configuration file structure for config.toml
#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    database: Option<DatabaseConfig>,
    server: Option<ServerConfig>,
    tuning: Option<Tuning>,
}

#[derive(Debug, Deserialize)]
struct DatabaseConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    addr: Option<String>,
    port: Option<u16>,
}

const CONFIG_FILE: &str = "config.toml";

fn read_config_file() -> AppConfig {
    let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) else {
        return AppConfig::default();
    };
    match toml::from_str::<AppConfig>(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring malformed {}: {}", CONFIG_FILE, e);
            AppConfig::default()
        }
    }
}

// ==================== Database Configuration ====================

/// Load database path with priority: config.toml > .env > default
pub fn load_database_path() -> PathBuf {
    let _ = dotenvy::dotenv();

    if let Some(path) = read_config_file().database.and_then(|db| db.path) {
        tracing::info!("Using database from {}: {}", CONFIG_FILE, path);
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var("DATABASE_PATH") {
        tracing::info!("Using database from DATABASE_PATH env: {}", path);
        return PathBuf::from(path);
    }

    let default = PathBuf::from(DEFAULT_DB_PATH);
    tracing::info!("Using default database path: {}", default.display());
    default
}

pub const DEFAULT_DB_PATH: &str = "data/duel_quiz.db";

// ==================== Server Configuration ====================

/// Server address to bind to
pub const SERVER_ADDR: &str = "0.0.0.0";

/// Server port
pub const SERVER_PORT: u16 = 3000;

/// Get the full server bind address (config.toml > PORT env > defaults)
pub fn server_bind_addr() -> String {
    let server = read_config_file().server;
    let addr = server
        .as_ref()
        .and_then(|s| s.addr.clone())
        .unwrap_or_else(|| SERVER_ADDR.to_string());
    let port = server
        .and_then(|s| s.port)
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(SERVER_PORT);
    format!("{}:{}", addr, port)
}

// ==================== Tuning ====================

/// Tunable constants for selection, ability estimation and scoring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Step size of the online Rasch gradient update
    pub learning_rate: f64,
    /// Items per bout when the game does not set its own
    pub bout_size: u32,
    /// Items a player may play without an opponent when the game does not set its own
    pub max_alone_count: u32,
    /// Consecutive correct answers after which pass 1 skips an item
    pub min_serial_correct: i64,
    /// Questions an item is deferred after a correct answer
    pub correct_offset: i64,
    /// Questions an item is deferred after a wrong answer on an item easier than the player
    pub wrong_easier_offset: i64,
    /// Questions an item is deferred after a wrong answer on an item harder than the player
    pub wrong_harder_offset: i64,
    /// Keep `candidate_factor * count` best candidates before random pruning
    pub candidate_factor: usize,
    /// Running score at or below which an item jumps the queue
    pub negative_score_threshold: i64,
    /// Points a correct wizard attempt costs
    pub wizard_penalty: i64,
    /// Points a correct wizard attempt costs when it was double-scored
    pub wizard_double_penalty: i64,
    /// Unit-of-work reruns after a lost optimistic race
    pub max_conflict_retries: u32,
    /// Side-B slot claim attempts within one matchmaking call
    pub max_claim_retries: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            bout_size: 4,
            max_alone_count: 8,
            min_serial_correct: 3,
            correct_offset: 10,
            wrong_easier_offset: 5,
            wrong_harder_offset: 7,
            candidate_factor: 3,
            negative_score_threshold: -2,
            wizard_penalty: 1,
            wizard_double_penalty: 2,
            max_conflict_retries: 3,
            max_claim_retries: 3,
        }
    }
}

/// Load tuning from the `[tuning]` table of config.toml, falling back to defaults
pub fn load_tuning() -> Tuning {
    read_config_file().tuning.unwrap_or_default()
}

// ==================== Query Limits ====================

/// Default number of rows returned by the high score query
pub const DEFAULT_HIGH_SCORE_COUNT: u32 = 10;

/// Upper bound on the high score query
pub const MAX_HIGH_SCORE_COUNT: u32 = 100;
