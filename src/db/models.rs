//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! JSON-typed columns carry a `_json` suffix and are decoded by the
//! service layer, never trusted downstream without validation.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Timestamp format used for every TEXT timestamp column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Get current UTC timestamp as ISO 8601 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Format a UTC instant the same way stored timestamps are formatted
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Convert an INTEGER flag column to bool
pub fn flag(value: i32) -> bool {
    value != 0
}

// ============================================================================
// Enumerations stored as TEXT
// ============================================================================

pub mod submission_status {
    pub const PENDING: &str = "pending";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";

    pub const ALL: &[&str] = &[PENDING, APPROVED, REJECTED];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }

    /// Pending and approved rows block a new submission for the same pair
    pub fn is_active(status: &str) -> bool {
        status == PENDING || status == APPROVED
    }
}

pub mod challenge_types {
    pub const PERIODIC: &str = "periodic";
    pub const ANNUAL: &str = "annual";

    pub const ALL: &[&str] = &[PERIODIC, ANNUAL];

    pub fn is_valid(challenge_type: &str) -> bool {
        ALL.contains(&challenge_type)
    }
}

pub mod entry_types {
    pub const CHALLENGE: &str = "challenge";
    pub const MANUAL: &str = "manual";
}

pub mod source_types {
    pub const CHALLENGE_SUBMISSION: &str = "challenge_submission";
}

// ============================================================================
// Directory Models (owned externally)
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
    pub email: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_categories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserCategory {
    pub id: String,
    pub name: String,
    pub is_active: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_categories)]
pub struct NewUserCategory<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub is_active: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_category_assignments)]
pub struct NewCategoryAssignment<'a> {
    pub user_id: &'a str,
    pub category_id: &'a str,
}

// ============================================================================
// Settings Model
// ============================================================================

/// The single `gamification_settings` row
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = gamification_settings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SettingsRow {
    pub id: i32,
    pub cycle_start_date: Option<String>,
    pub cycle_end_date: Option<String>,
    pub annual_start_date: Option<String>,
    pub annual_end_date: Option<String>,
    pub general_category_id: Option<String>,
    pub enabled_category_ids_json: String,
    pub updated_by: Option<String>,
    pub updated_at: String,
}

/// Settings row for INSERT .. ON CONFLICT DO UPDATE
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = gamification_settings)]
#[diesel(treat_none_as_null = true)]
pub struct UpsertSettings<'a> {
    pub id: i32,
    pub cycle_start_date: Option<&'a str>,
    pub cycle_end_date: Option<&'a str>,
    pub annual_start_date: Option<&'a str>,
    pub annual_end_date: Option<&'a str>,
    pub general_category_id: Option<&'a str>,
    pub enabled_category_ids_json: &'a str,
    pub updated_by: Option<&'a str>,
    pub updated_at: &'a str,
}

// ============================================================================
// Ledger Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = points_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PointsEntry {
    pub id: String,
    pub user_id: String,
    pub points: i32,
    pub description: String,
    pub entry_type: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = points_entries)]
pub struct NewPointsEntry<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub points: i32,
    pub description: &'a str,
    pub entry_type: &'a str,
    pub source_type: Option<&'a str>,
    pub source_id: Option<&'a str>,
    pub created_by: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Challenge Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = challenges)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChallengeRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub detailed_description: Option<String>,
    pub image_url: Option<String>,
    pub points: i32,
    pub start_date: String,
    pub end_date: String,
    pub challenge_type: String,
    pub is_active: i32,
    pub evaluation_type: String,
    pub evaluation_config_json: Option<String>,
    pub target_category_ids_json: String,
    pub display_order: i32,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = challenges)]
pub struct NewChallenge<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub detailed_description: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub points: i32,
    pub start_date: &'a str,
    pub end_date: &'a str,
    pub challenge_type: &'a str,
    pub is_active: i32,
    pub evaluation_type: &'a str,
    pub evaluation_config_json: Option<&'a str>,
    pub target_category_ids_json: &'a str,
    pub display_order: i32,
    pub created_by: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Full replacement of the admin-editable challenge columns
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = challenges)]
#[diesel(treat_none_as_null = true)]
pub struct ChallengeChangeset<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub detailed_description: Option<&'a str>,
    pub image_url: Option<&'a str>,
    pub points: i32,
    pub start_date: &'a str,
    pub end_date: &'a str,
    pub challenge_type: &'a str,
    pub is_active: i32,
    pub evaluation_type: &'a str,
    pub evaluation_config_json: Option<&'a str>,
    pub target_category_ids_json: &'a str,
    pub display_order: i32,
    pub updated_at: &'a str,
}

// ============================================================================
// Submission Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = challenge_submissions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SubmissionRow {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub status: String,
    pub submission_type: String,
    pub submission_data_json: String,
    pub points: i32,
    pub attempts: i32,
    pub admin_feedback: Option<String>,
    pub reviewed_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = challenge_submissions)]
pub struct NewSubmission<'a> {
    pub id: &'a str,
    pub challenge_id: &'a str,
    pub user_id: &'a str,
    pub status: &'a str,
    pub submission_type: &'a str,
    pub submission_data_json: &'a str,
    pub points: i32,
    pub attempts: i32,
    pub admin_feedback: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Overwrite of a rejected row when the user submits again
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = challenge_submissions)]
#[diesel(treat_none_as_null = true)]
pub struct SubmissionResubmit<'a> {
    pub status: &'a str,
    pub submission_type: &'a str,
    pub submission_data_json: &'a str,
    pub points: i32,
    pub attempts: i32,
    pub admin_feedback: Option<&'a str>,
    pub reviewed_by: Option<&'a str>,
    pub updated_at: &'a str,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = challenge_submissions)]
#[diesel(treat_none_as_null = true)]
pub struct SubmissionReview<'a> {
    pub status: &'a str,
    /// Amount settled at review time
    pub points: i32,
    pub admin_feedback: Option<&'a str>,
    pub reviewed_by: Option<&'a str>,
    pub updated_at: &'a str,
}

// ============================================================================
// Comment Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = challenge_comments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CommentRow {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub content: String,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = challenge_comments)]
pub struct NewComment<'a> {
    pub id: &'a str,
    pub challenge_id: &'a str,
    pub user_id: &'a str,
    pub content: &'a str,
    pub parent_id: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = challenge_comment_likes)]
pub struct NewCommentLike<'a> {
    pub user_id: &'a str,
    pub comment_id: &'a str,
}
