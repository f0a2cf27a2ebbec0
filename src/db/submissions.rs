//! Challenge submission operations using Diesel
//!
//! The `(challenge_id, user_id)` unique constraint makes the table hold at
//! most one row per pair; status transitions update that row in place.

use std::collections::HashMap;

use diesel::prelude::*;

use super::diesel_schema::challenge_submissions;
use super::models::{NewSubmission, SubmissionResubmit, SubmissionReview, SubmissionRow};
use crate::error::{conflict_on_unique, GamificationError};

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_submission(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<SubmissionRow>, GamificationError> {
    challenge_submissions::table
        .filter(challenge_submissions::id.eq(id))
        .select(SubmissionRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

pub fn find_for_user(
    conn: &mut SqliteConnection,
    challenge_id: &str,
    user_id: &str,
) -> Result<Option<SubmissionRow>, GamificationError> {
    challenge_submissions::table
        .filter(challenge_submissions::challenge_id.eq(challenge_id))
        .filter(challenge_submissions::user_id.eq(user_id))
        .select(SubmissionRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Status of a user's submission for each of the given challenges
pub fn statuses_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    challenge_ids: &[String],
) -> Result<HashMap<String, String>, GamificationError> {
    if challenge_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(String, String)> = challenge_submissions::table
        .filter(challenge_submissions::user_id.eq(user_id))
        .filter(challenge_submissions::challenge_id.eq_any(challenge_ids))
        .select((challenge_submissions::challenge_id, challenge_submissions::status))
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))?;

    Ok(rows.into_iter().collect())
}

/// All submissions of a challenge, oldest first
pub fn list_for_challenge(
    conn: &mut SqliteConnection,
    challenge_id: &str,
) -> Result<Vec<SubmissionRow>, GamificationError> {
    challenge_submissions::table
        .filter(challenge_submissions::challenge_id.eq(challenge_id))
        .order((challenge_submissions::created_at.asc(), challenge_submissions::id.asc()))
        .select(SubmissionRow::as_select())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Review queue across challenges, most recently updated first
pub fn list_by_status(
    conn: &mut SqliteConnection,
    status: Option<&str>,
) -> Result<Vec<SubmissionRow>, GamificationError> {
    let mut query = challenge_submissions::table.into_boxed();

    if let Some(status) = status {
        query = query.filter(challenge_submissions::status.eq(status));
    }

    query
        .order((challenge_submissions::updated_at.desc(), challenge_submissions::id.desc()))
        .select(SubmissionRow::as_select())
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

pub fn count_for_challenge(
    conn: &mut SqliteConnection,
    challenge_id: &str,
) -> Result<i64, GamificationError> {
    challenge_submissions::table
        .filter(challenge_submissions::challenge_id.eq(challenge_id))
        .count()
        .get_result(conn)
        .map_err(|e| GamificationError::Internal(format!("Count failed: {}", e)))
}

/// Whether any remaining submission payload mentions `url`
///
/// Uploads are content-addressed, so two submissions can share one object.
pub fn url_referenced(conn: &mut SqliteConnection, url: &str) -> Result<bool, GamificationError> {
    let pattern = super::contains_pattern(url);

    diesel::select(diesel::dsl::exists(
        challenge_submissions::table
            .filter(challenge_submissions::submission_data_json.like(pattern).escape('\\')),
    ))
    .get_result(conn)
    .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Insert a first submission; a concurrent insert for the same pair is a conflict
pub fn insert_submission(
    conn: &mut SqliteConnection,
    submission: NewSubmission<'_>,
) -> Result<SubmissionRow, GamificationError> {
    diesel::insert_into(challenge_submissions::table)
        .values(&submission)
        .execute(conn)
        .map_err(|e| {
            conflict_on_unique(e, "A submission for this challenge already exists")
        })?;

    get_submission(conn, submission.id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve created submission".into()))
}

/// Overwrite a rejected row in place
///
/// The status guard makes the write a no-op if another request already
/// moved the row out of `rejected`; callers get `Conflict` in that case.
pub fn resubmit(
    conn: &mut SqliteConnection,
    id: &str,
    expected_status: &str,
    changes: SubmissionResubmit<'_>,
) -> Result<SubmissionRow, GamificationError> {
    let updated = diesel::update(
        challenge_submissions::table
            .filter(challenge_submissions::id.eq(id))
            .filter(challenge_submissions::status.eq(expected_status)),
    )
    .set(&changes)
    .execute(conn)
    .map_err(|e| GamificationError::Internal(format!("Update failed: {}", e)))?;

    if updated == 0 {
        return Err(GamificationError::Conflict(
            "Submission changed while resubmitting".into(),
        ));
    }

    get_submission(conn, id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve updated submission".into()))
}

/// Record a review decision on a pending row
pub fn apply_review(
    conn: &mut SqliteConnection,
    id: &str,
    expected_status: &str,
    review: SubmissionReview<'_>,
) -> Result<SubmissionRow, GamificationError> {
    let updated = diesel::update(
        challenge_submissions::table
            .filter(challenge_submissions::id.eq(id))
            .filter(challenge_submissions::status.eq(expected_status)),
    )
    .set(&review)
    .execute(conn)
    .map_err(|e| GamificationError::Internal(format!("Update failed: {}", e)))?;

    if updated == 0 {
        return Err(GamificationError::Conflict(format!(
            "Submission {} is no longer {}",
            id, expected_status
        )));
    }

    get_submission(conn, id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve reviewed submission".into()))
}

pub fn delete_for_challenge(
    conn: &mut SqliteConnection,
    challenge_id: &str,
) -> Result<usize, GamificationError> {
    diesel::delete(
        challenge_submissions::table.filter(challenge_submissions::challenge_id.eq(challenge_id)),
    )
    .execute(conn)
    .map_err(|e| GamificationError::Internal(format!("Delete failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::challenges::{insert_challenge, tests::new_challenge};
    use crate::db::models::submission_status;
    use crate::db::{users, Db};

    fn new_submission<'a>(id: &'a str, user_id: &'a str) -> NewSubmission<'a> {
        NewSubmission {
            id,
            challenge_id: "c1",
            user_id,
            status: submission_status::PENDING,
            submission_type: "none",
            submission_data_json: "{\"type\":\"none\"}",
            points: 100,
            attempts: 1,
            admin_feedback: None,
            created_at: "2026-02-01T00:00:00Z",
            updated_at: "2026-02-01T00:00:00Z",
        }
    }

    fn setup(db: &Db) {
        db.with_conn(|conn| {
            users::upsert_user(conn, "u1", "Ana", None)?;
            users::upsert_user(conn, "u2", "Bruno", None)?;
            insert_challenge(conn, new_challenge("c1", "Run", "2026-01-01T00:00:00Z", "2026-12-31T23:59:59Z"))?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_second_insert_for_pair_is_conflict() {
        let db = Db::open_in_memory().unwrap();
        setup(&db);

        let result = db.with_conn(|conn| {
            insert_submission(conn, new_submission("s1", "u1"))?;
            insert_submission(conn, new_submission("s2", "u1"))
        });

        assert!(matches!(result, Err(GamificationError::Conflict(_))));
    }

    #[test]
    fn test_review_guard_on_status() {
        let db = Db::open_in_memory().unwrap();
        setup(&db);

        db.with_conn(|conn| {
            insert_submission(conn, new_submission("s1", "u1"))?;
            let review = SubmissionReview {
                status: submission_status::APPROVED,
                points: 100,
                admin_feedback: None,
                reviewed_by: Some("admin"),
                updated_at: "2026-02-02T00:00:00Z",
            };
            let row = apply_review(conn, "s1", submission_status::PENDING, review.clone())?;
            assert_eq!(row.status, "approved");

            let again = apply_review(conn, "s1", submission_status::PENDING, review);
            assert!(matches!(again, Err(GamificationError::Conflict(_))));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_counts_and_statuses() {
        let db = Db::open_in_memory().unwrap();
        setup(&db);

        db.with_conn(|conn| {
            insert_submission(conn, new_submission("s1", "u1"))?;
            insert_submission(conn, new_submission("s2", "u2"))?;

            assert_eq!(count_for_challenge(conn, "c1")?, 2);
            assert_eq!(list_by_status(conn, Some("pending"))?.len(), 2);
            assert!(list_by_status(conn, Some("approved"))?.is_empty());

            let statuses = statuses_for_user(conn, "u1", &["c1".to_string()])?;
            assert_eq!(statuses.get("c1").map(String::as_str), Some("pending"));

            assert_eq!(delete_for_challenge(conn, "c1")?, 2);
            assert_eq!(count_for_challenge(conn, "c1")?, 0);
            Ok(())
        })
        .unwrap();
    }
}
