//! SQLite database module for the gamification bounded context
//!
//! Repository functions live in one module per aggregate and take a
//! `&mut SqliteConnection`, so services decide the transaction boundary.
//!
//! ## Tables
//!
//! - `users`, `user_categories`, `user_category_assignments` - directory mirror
//! - `gamification_settings` - single-row ranking configuration
//! - `points_entries` - append-only points ledger
//! - `challenges`, `challenge_submissions` - challenge lifecycle
//! - `challenge_comments`, `challenge_comment_likes` - comment threads

pub mod schema;
pub mod diesel_schema;
pub mod models;
pub mod users;
pub mod settings;
pub mod points;
pub mod challenges;
pub mod submissions;
pub mod comments;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use tracing::{debug, info};

use crate::error::GamificationError;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Per-connection PRAGMAs applied when r2d2 opens a connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    enable_wal: bool,
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        (|| -> QueryResult<()> {
            if self.enable_wal {
                conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            }
            conn.batch_execute(&format!(
                "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
                self.busy_timeout.as_millis()
            ))?;
            Ok(())
        })()
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database
pub struct Db {
    pool: DbPool,
}

impl Db {
    /// Open or create the gamification database file
    pub fn open(path: &Path, pool_size: u32) -> Result<Self, GamificationError> {
        info!("Opening SQLite database at {:?}", path);

        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_customizer(Box::new(ConnectionOptions {
                enable_wal: true,
                busy_timeout: Duration::from_secs(5),
            }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// is pinned to a single connection.
    pub fn open_in_memory() -> Result<Self, GamificationError> {
        debug!("Opening in-memory SQLite database");

        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_customizer(Box::new(ConnectionOptions {
                enable_wal: false,
                busy_timeout: Duration::from_secs(5),
            }))
            .build(manager)?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), GamificationError> {
        let mut conn = self.pool.get()?;
        schema::init_schema(&mut conn)
    }

    /// Run `f` with a pooled connection, outside any transaction
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, GamificationError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, GamificationError>,
    {
        let mut conn = self.pool.get()?;
        f(&mut conn)
    }

    /// Run `f` inside an IMMEDIATE transaction; any `Err` rolls back every write
    pub fn transaction<F, T>(&self, f: F) -> Result<T, GamificationError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, GamificationError>,
    {
        let mut conn = self.pool.get()?;
        conn.immediate_transaction(f)
    }

    /// Quick liveness check for `/health`
    pub fn ping(&self) -> Result<(), GamificationError> {
        self.with_conn(|conn| {
            conn.batch_execute("SELECT 1")?;
            Ok(())
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, GamificationError> {
        use self::diesel_schema::{challenge_comments, challenge_submissions, challenges, points_entries, users};

        self.with_conn(|conn| {
            let user_count: i64 = users::table.count().get_result(conn)?;
            let challenge_count: i64 = challenges::table.count().get_result(conn)?;
            let submission_count: i64 = challenge_submissions::table.count().get_result(conn)?;
            let points_entry_count: i64 = points_entries::table.count().get_result(conn)?;
            let comment_count: i64 = challenge_comments::table.count().get_result(conn)?;

            Ok(DbStats {
                user_count: user_count as u64,
                challenge_count: challenge_count as u64,
                submission_count: submission_count as u64,
                points_entry_count: points_entry_count as u64,
                comment_count: comment_count as u64,
            })
        })
    }
}

/// `LIKE` pattern matching any text containing `needle`; use with `.escape('\\')`
pub(crate) fn contains_pattern(needle: &str) -> String {
    format!("%{}%", needle.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"))
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub user_count: u64,
    pub challenge_count: u64,
    pub submission_count: u64,
    pub points_entry_count: u64,
    pub comment_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_initializes_schema() {
        let db = Db::open_in_memory().unwrap();
        db.ping().unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.challenge_count, 0);
        assert_eq!(stats.points_entry_count, 0);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Db::open_in_memory().unwrap();

        let result: Result<(), GamificationError> = db.transaction(|conn| {
            users::upsert_user(conn, "u1", "Ana", None)?;
            Err(GamificationError::Internal("boom".into()))
        });
        assert!(result.is_err());

        let found = db.with_conn(|conn| users::get_user(conn, "u1")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_open_file_database_twice() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gamification.db");

        {
            let db = Db::open(&path, 2).unwrap();
            db.with_conn(|conn| users::upsert_user(conn, "u1", "Ana", None)).unwrap();
        }

        let db = Db::open(&path, 2).unwrap();
        assert_eq!(db.stats().unwrap().user_count, 1);
    }
}
