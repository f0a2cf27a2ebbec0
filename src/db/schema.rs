//! Database schema definitions

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::GamificationError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), GamificationError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, GamificationError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| GamificationError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Failed to read schema_version: {}", e)))?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

/// Set schema version
fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), GamificationError> {
    diesel::sql_query("DELETE FROM schema_version")
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &mut SqliteConnection) -> Result<(), GamificationError> {
    conn.batch_execute(DIRECTORY_SCHEMA)
        .map_err(|e| GamificationError::Internal(format!("Failed to create directory tables: {}", e)))?;

    conn.batch_execute(LEDGER_SCHEMA)
        .map_err(|e| GamificationError::Internal(format!("Failed to create ledger tables: {}", e)))?;

    conn.batch_execute(CHALLENGE_SCHEMA)
        .map_err(|e| GamificationError::Internal(format!("Failed to create challenge tables: {}", e)))?;

    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| GamificationError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &mut SqliteConnection, from_version: i32) -> Result<(), GamificationError> {
    if from_version < 2 {
        // v2: insertion sequence for stable history order
        conn.batch_execute(
            "ALTER TABLE points_entries ADD COLUMN seq INTEGER NOT NULL DEFAULT 0;
             UPDATE points_entries SET seq = rowid;
             CREATE INDEX IF NOT EXISTS idx_points_user_seq ON points_entries(user_id, seq);",
        )
        .map_err(|e| GamificationError::Internal(format!("Failed to migrate points_entries: {}", e)))?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Users and categories are owned by the portal directory; mirrored here read-mostly
const DIRECTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    email TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS user_categories (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS user_category_assignments (
    user_id TEXT NOT NULL,
    category_id TEXT NOT NULL,
    assigned_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (user_id, category_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (category_id) REFERENCES user_categories(id) ON DELETE CASCADE
);
"#;

/// Settings singleton and the points ledger
const LEDGER_SCHEMA: &str = r#"
-- At most one row; id is pinned to 1
CREATE TABLE IF NOT EXISTS gamification_settings (
    id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
    cycle_start_date TEXT,
    cycle_end_date TEXT,
    annual_start_date TEXT,
    annual_end_date TEXT,
    general_category_id TEXT,
    enabled_category_ids_json TEXT NOT NULL DEFAULT '[]',
    updated_by TEXT,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- Append-only; rows are removed only by explicit revocation
CREATE TABLE IF NOT EXISTS points_entries (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    points INTEGER NOT NULL CHECK (points <> 0),
    description TEXT NOT NULL,
    entry_type TEXT NOT NULL DEFAULT 'manual',

    -- Originating record, e.g. ('challenge_submission', <submission id>)
    source_type TEXT,
    source_id TEXT,

    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    -- Insertion order, assigned on insert; breaks created_at ties
    seq INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
"#;

/// Challenges, submissions and the comment thread
const CHALLENGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS challenges (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    detailed_description TEXT,
    image_url TEXT,
    points INTEGER NOT NULL DEFAULT 0,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    challenge_type TEXT NOT NULL DEFAULT 'periodic',
    is_active INTEGER NOT NULL DEFAULT 1,
    evaluation_type TEXT NOT NULL DEFAULT 'none',
    evaluation_config_json TEXT,
    target_category_ids_json TEXT NOT NULL DEFAULT '[]',
    display_order INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- One row per (challenge, user); a rejected row is reused on resubmission
CREATE TABLE IF NOT EXISTS challenge_submissions (
    id TEXT PRIMARY KEY NOT NULL,
    challenge_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    submission_type TEXT NOT NULL,
    submission_data_json TEXT NOT NULL,
    points INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 1,
    admin_feedback TEXT,
    reviewed_by TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    UNIQUE (challenge_id, user_id),
    FOREIGN KEY (challenge_id) REFERENCES challenges(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS challenge_comments (
    id TEXT PRIMARY KEY NOT NULL,
    challenge_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    content TEXT NOT NULL,
    parent_id TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    FOREIGN KEY (challenge_id) REFERENCES challenges(id),
    FOREIGN KEY (parent_id) REFERENCES challenge_comments(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS challenge_comment_likes (
    user_id TEXT NOT NULL,
    comment_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (user_id, comment_id),
    FOREIGN KEY (comment_id) REFERENCES challenge_comments(id) ON DELETE CASCADE
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_assignments_category ON user_category_assignments(category_id);

CREATE INDEX IF NOT EXISTS idx_points_user_created ON points_entries(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_points_source ON points_entries(source_type, source_id);
CREATE INDEX IF NOT EXISTS idx_points_user_seq ON points_entries(user_id, seq);

CREATE INDEX IF NOT EXISTS idx_challenges_active ON challenges(is_active, start_date, end_date);
CREATE INDEX IF NOT EXISTS idx_submissions_status ON challenge_submissions(status);
CREATE INDEX IF NOT EXISTS idx_comments_challenge ON challenge_comments(challenge_id, created_at);
CREATE INDEX IF NOT EXISTS idx_comments_parent ON challenge_comments(parent_id);
CREATE INDEX IF NOT EXISTS idx_comment_likes_comment ON challenge_comment_likes(comment_id);
"#;
