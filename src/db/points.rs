//! Points ledger operations using Diesel
//!
//! Entries are append-only. The only mutation is hard deletion, either of
//! a single entry (admin correction) or of every entry that references a
//! given source record (retraction).

use std::collections::HashMap;

use diesel::prelude::*;

use super::diesel_schema::points_entries;
use super::models::{NewPointsEntry, PointsEntry};
use crate::error::GamificationError;

/// Inclusive `[start, end]` bounds on `created_at`, in stored timestamp format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self { start: start.into(), end: end.into() }
    }
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_entry(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<PointsEntry>, GamificationError> {
    points_entries::table
        .filter(points_entries::id.eq(id))
        .select(PointsEntry::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Sum of a user's entries, optionally restricted to a window
pub fn total_for(
    conn: &mut SqliteConnection,
    user_id: &str,
    window: Option<&TimeWindow>,
) -> Result<i64, GamificationError> {
    let mut query = points_entries::table
        .filter(points_entries::user_id.eq(user_id))
        .into_boxed();

    if let Some(window) = window {
        query = query
            .filter(points_entries::created_at.ge(&window.start))
            .filter(points_entries::created_at.le(&window.end));
    }

    let total: Option<i64> = query
        .select(diesel::dsl::sum(points_entries::points))
        .first(conn)
        .map_err(|e| GamificationError::Internal(format!("Sum query failed: {}", e)))?;

    Ok(total.unwrap_or(0))
}

/// Per-user sums for a set of users; users without entries are absent
pub fn totals_for_users(
    conn: &mut SqliteConnection,
    user_ids: &[String],
    window: Option<&TimeWindow>,
) -> Result<HashMap<String, i64>, GamificationError> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(String, Option<i64>)> = match window {
        Some(window) => points_entries::table
            .filter(points_entries::user_id.eq_any(user_ids))
            .filter(points_entries::created_at.ge(&window.start))
            .filter(points_entries::created_at.le(&window.end))
            .group_by(points_entries::user_id)
            .select((points_entries::user_id, diesel::dsl::sum(points_entries::points)))
            .load(conn),
        None => points_entries::table
            .filter(points_entries::user_id.eq_any(user_ids))
            .group_by(points_entries::user_id)
            .select((points_entries::user_id, diesel::dsl::sum(points_entries::points)))
            .load(conn),
    }
    .map_err(|e| GamificationError::Internal(format!("Sum query failed: {}", e)))?;

    Ok(rows
        .into_iter()
        .map(|(user_id, total)| (user_id, total.unwrap_or(0)))
        .collect())
}

/// Every entry of a user, most recent first
///
/// Entries written in the same second keep their insertion order via `seq`.
pub fn history(conn: &mut SqliteConnection, user_id: &str) -> Result<Vec<PointsEntry>, GamificationError> {
    points_entries::table
        .filter(points_entries::user_id.eq(user_id))
        .order((points_entries::created_at.desc(), points_entries::seq.desc()))
        .select(PointsEntry::as_select())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Entries that reference a source record
pub fn entries_for_source(
    conn: &mut SqliteConnection,
    source_type: &str,
    source_id: &str,
) -> Result<Vec<PointsEntry>, GamificationError> {
    points_entries::table
        .filter(points_entries::source_type.eq(source_type))
        .filter(points_entries::source_id.eq(source_id))
        .select(PointsEntry::as_select())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Append an entry; call inside the writing transaction so `seq` stays unique
pub fn insert_entry(
    conn: &mut SqliteConnection,
    entry: NewPointsEntry<'_>,
) -> Result<PointsEntry, GamificationError> {
    let last_seq: Option<i64> = points_entries::table
        .select(diesel::dsl::max(points_entries::seq))
        .first(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))?;

    diesel::insert_into(points_entries::table)
        .values((&entry, points_entries::seq.eq(last_seq.unwrap_or(0) + 1)))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Insert failed: {}", e)))?;

    get_entry(conn, entry.id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve created entry".into()))
}

/// Delete one entry; returns whether it existed
pub fn delete_entry(conn: &mut SqliteConnection, id: &str) -> Result<bool, GamificationError> {
    let deleted = diesel::delete(points_entries::table.filter(points_entries::id.eq(id)))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Delete failed: {}", e)))?;
    Ok(deleted > 0)
}

/// Delete every entry for `user_id` that references the given source
pub fn delete_for_source(
    conn: &mut SqliteConnection,
    user_id: &str,
    source_type: &str,
    source_id: &str,
) -> Result<usize, GamificationError> {
    diesel::delete(
        points_entries::table
            .filter(points_entries::user_id.eq(user_id))
            .filter(points_entries::source_type.eq(source_type))
            .filter(points_entries::source_id.eq(source_id)),
    )
    .execute(conn)
    .map_err(|e| GamificationError::Internal(format!("Delete failed: {}", e)))
}
