use rusqlite::{Connection, Result};

pub fn run_migrations(conn: &Connection) -> Result<()> {
    // Create tables with COMPLETE schema for new databases
    // Migrations below handle upgrades for existing databases
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            group_name TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS games (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            mode TEXT NOT NULL DEFAULT 'duel',
            bout_size INTEGER,
            max_alone_count INTEGER,
            time_limit_secs INTEGER,
            negative_grading INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            question TEXT NOT NULL,
            answers TEXT NOT NULL,
            times_used INTEGER NOT NULL DEFAULT 0,
            times_correct INTEGER NOT NULL DEFAULT 0,
            times_wrong INTEGER NOT NULL DEFAULT 0,
            last_used_at TEXT
        );

        CREATE TABLE IF NOT EXISTS game_items (
            game_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            PRIMARY KEY (game_id, item_id),
            FOREIGN KEY (game_id) REFERENCES games(id),
            FOREIGN KEY (item_id) REFERENCES items(id)
        );

        -- Rasch estimates, written only by the gradient step
        CREATE TABLE IF NOT EXISTS difficulties (
            game_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            difficulty REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY (game_id, item_id)
        );

        CREATE TABLE IF NOT EXISTS abilities (
            game_id INTEGER NOT NULL,
            player_id INTEGER NOT NULL,
            theta REAL NOT NULL DEFAULT 0,
            score INTEGER NOT NULL DEFAULT 0,
            answered INTEGER NOT NULL DEFAULT 0,
            percent REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY (game_id, player_id)
        );

        CREATE TABLE IF NOT EXISTS duel_pairs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL,
            duel_group INTEGER NOT NULL,
            user_a INTEGER NOT NULL,
            user_b INTEGER,
            first_seq INTEGER NOT NULL DEFAULT 1,
            tool_a_at INTEGER,
            tool_b_at INTEGER,
            closed_a INTEGER NOT NULL DEFAULT 0,
            closed_b INTEGER NOT NULL DEFAULT 0,
            time_limit_secs INTEGER,
            created_at TEXT NOT NULL,
            retired_at TEXT,
            version INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            game_id INTEGER NOT NULL,
            pair_id INTEGER NOT NULL,
            duel_group INTEGER NOT NULL,
            player_id INTEGER NOT NULL,
            side TEXT NOT NULL,
            seq INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            state TEXT NOT NULL DEFAULT 'new',
            tool TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            answered_at TEXT,
            deadline TEXT,
            raw_answer TEXT,
            is_correct INTEGER,
            base_score INTEGER,
            score INTEGER NOT NULL DEFAULT 0,
            doubled INTEGER NOT NULL DEFAULT 0,
            timed_out INTEGER NOT NULL DEFAULT 0,
            opponent_delta INTEGER,
            version INTEGER NOT NULL DEFAULT 0,
            UNIQUE (game_id, duel_group, player_id, seq),
            FOREIGN KEY (pair_id) REFERENCES duel_pairs(id)
        );

        -- player_id = 0 / item_id = 0 are the global rollups
        CREATE TABLE IF NOT EXISTS stats (
            game_id INTEGER NOT NULL,
            player_id INTEGER NOT NULL DEFAULT 0,
            item_id INTEGER NOT NULL DEFAULT 0,
            times_used INTEGER NOT NULL DEFAULT 0,
            times_correct INTEGER NOT NULL DEFAULT 0,
            times_wrong INTEGER NOT NULL DEFAULT 0,
            serial_correct INTEGER NOT NULL DEFAULT 0,
            running_score INTEGER NOT NULL DEFAULT 0,
            last_used_at TEXT,
            due_no INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (game_id, player_id, item_id)
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_attempts_pair_side ON attempts(pair_id, side);
        CREATE INDEX IF NOT EXISTS idx_attempts_player ON attempts(game_id, player_id);
        CREATE INDEX IF NOT EXISTS idx_attempts_item ON attempts(game_id, item_id);
        CREATE INDEX IF NOT EXISTS idx_pairs_user_a ON duel_pairs(game_id, user_a);
        CREATE INDEX IF NOT EXISTS idx_pairs_user_b ON duel_pairs(game_id, user_b);
        CREATE INDEX IF NOT EXISTS idx_pairs_waiting ON duel_pairs(game_id, user_b, retired_at);
        CREATE INDEX IF NOT EXISTS idx_abilities_rank ON abilities(game_id, score DESC, percent DESC);
        CREATE INDEX IF NOT EXISTS idx_players_group ON players(group_name);
        "#,
    )?;

    // ============================================================
    // MIGRATIONS FOR EXISTING DATABASES
    // These are no-ops for new databases (columns already exist)
    // ============================================================

    // Migration: opponent delta is stored so answer replays are identical
    add_column_if_missing(conn, "attempts", "opponent_delta", "INTEGER")?;

    // Migration: per-game grading switch
    add_column_if_missing(conn, "games", "negative_grading", "INTEGER NOT NULL DEFAULT 1")?;

    Ok(())
}

/// Check if a column exists in a table
fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
    conn
        .prepare(&format!("SELECT {} FROM {} LIMIT 1", column, table))
        .is_ok()
}

/// Add a column if it doesn't already exist
fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    column_def: &str,
) -> Result<()> {
    if !column_exists(conn, table, column) {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, column_def),
            [],
        )?;
    }
    Ok(())
}
