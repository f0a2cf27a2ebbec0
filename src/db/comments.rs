//! Challenge comment and like operations using Diesel
//!
//! Replies reference their root through `parent_id`; the foreign key
//! cascades, so deleting a root removes its replies and every like on them.

use std::collections::{HashMap, HashSet};

use diesel::prelude::*;

use super::diesel_schema::{challenge_comment_likes, challenge_comments, users};
use super::models::{CommentRow, NewComment, NewCommentLike};
use crate::error::GamificationError;

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_comment(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<CommentRow>, GamificationError> {
    challenge_comments::table
        .filter(challenge_comments::id.eq(id))
        .select(CommentRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Every comment on a challenge with its author's display name, oldest first
pub fn list_for_challenge(
    conn: &mut SqliteConnection,
    challenge_id: &str,
) -> Result<Vec<(CommentRow, Option<String>)>, GamificationError> {
    challenge_comments::table
        .left_join(users::table)
        .filter(challenge_comments::challenge_id.eq(challenge_id))
        .order((challenge_comments::created_at.asc(), challenge_comments::id.asc()))
        .select((CommentRow::as_select(), users::display_name.nullable()))
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))
}

/// Like totals per comment; comments without likes are absent
pub fn like_counts(
    conn: &mut SqliteConnection,
    comment_ids: &[String],
) -> Result<HashMap<String, i64>, GamificationError> {
    if comment_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(String, i64)> = challenge_comment_likes::table
        .filter(challenge_comment_likes::comment_id.eq_any(comment_ids))
        .group_by(challenge_comment_likes::comment_id)
        .select((challenge_comment_likes::comment_id, diesel::dsl::count_star()))
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))?;

    Ok(rows.into_iter().collect())
}

/// Subset of `comment_ids` the user has liked
pub fn liked_by(
    conn: &mut SqliteConnection,
    user_id: &str,
    comment_ids: &[String],
) -> Result<HashSet<String>, GamificationError> {
    if comment_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let rows: Vec<String> = challenge_comment_likes::table
        .filter(challenge_comment_likes::user_id.eq(user_id))
        .filter(challenge_comment_likes::comment_id.eq_any(comment_ids))
        .select(challenge_comment_likes::comment_id)
        .load(conn)
        .map_err(|e| GamificationError::Internal(format!("Query failed: {}", e)))?;

    Ok(rows.into_iter().collect())
}

pub fn count_for_challenge(
    conn: &mut SqliteConnection,
    challenge_id: &str,
) -> Result<i64, GamificationError> {
    challenge_comments::table
        .filter(challenge_comments::challenge_id.eq(challenge_id))
        .count()
        .get_result(conn)
        .map_err(|e| GamificationError::Internal(format!("Count failed: {}", e)))
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_comment(
    conn: &mut SqliteConnection,
    comment: NewComment<'_>,
) -> Result<CommentRow, GamificationError> {
    diesel::insert_into(challenge_comments::table)
        .values(&comment)
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Insert failed: {}", e)))?;

    get_comment(conn, comment.id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve created comment".into()))
}

pub fn update_content(
    conn: &mut SqliteConnection,
    id: &str,
    content: &str,
    updated_at: &str,
) -> Result<CommentRow, GamificationError> {
    let updated = diesel::update(challenge_comments::table.filter(challenge_comments::id.eq(id)))
        .set((
            challenge_comments::content.eq(content),
            challenge_comments::updated_at.eq(updated_at),
        ))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Update failed: {}", e)))?;

    if updated == 0 {
        return Err(GamificationError::NotFound(format!("Comment {} not found", id)));
    }

    get_comment(conn, id)?
        .ok_or_else(|| GamificationError::Internal("Failed to retrieve updated comment".into()))
}

/// Delete a comment; replies and likes go with it
pub fn delete_comment(conn: &mut SqliteConnection, id: &str) -> Result<bool, GamificationError> {
    let deleted = diesel::delete(challenge_comments::table.filter(challenge_comments::id.eq(id)))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Delete failed: {}", e)))?;
    Ok(deleted > 0)
}

/// Delete every comment on a challenge; returns how many existed
pub fn delete_for_challenge(
    conn: &mut SqliteConnection,
    challenge_id: &str,
) -> Result<usize, GamificationError> {
    let existing = count_for_challenge(conn, challenge_id)?;

    diesel::delete(challenge_comments::table.filter(challenge_comments::challenge_id.eq(challenge_id)))
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Delete failed: {}", e)))?;

    Ok(existing as usize)
}

/// Flip the user's like on a comment; returns whether it is now liked
pub fn toggle_like(
    conn: &mut SqliteConnection,
    user_id: &str,
    comment_id: &str,
) -> Result<bool, GamificationError> {
    let removed = diesel::delete(
        challenge_comment_likes::table
            .filter(challenge_comment_likes::user_id.eq(user_id))
            .filter(challenge_comment_likes::comment_id.eq(comment_id)),
    )
    .execute(conn)
    .map_err(|e| GamificationError::Internal(format!("Delete failed: {}", e)))?;

    if removed > 0 {
        return Ok(false);
    }

    diesel::insert_into(challenge_comment_likes::table)
        .values(&NewCommentLike { user_id, comment_id })
        .execute(conn)
        .map_err(|e| GamificationError::Internal(format!("Insert failed: {}", e)))?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::challenges::{insert_challenge, tests::new_challenge};
    use crate::db::{users, Db};

    fn comment<'a>(id: &'a str, user_id: &'a str, parent_id: Option<&'a str>, at: &'a str) -> NewComment<'a> {
        NewComment {
            id,
            challenge_id: "c1",
            user_id,
            content: "hello",
            parent_id,
            created_at: at,
            updated_at: at,
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
    fn test_toggle_like() {
        let db = Db::open_in_memory().unwrap();
        setup(&db);

        db.with_conn(|conn| {
            insert_comment(conn, comment("m1", "u1", None, "2026-02-01T00:00:00Z"))?;

            assert!(toggle_like(conn, "u2", "m1")?);
            assert!(toggle_like(conn, "u1", "m1")?);
            assert_eq!(like_counts(conn, &["m1".to_string()])?.get("m1"), Some(&2));

            assert!(!toggle_like(conn, "u2", "m1")?);
            assert_eq!(like_counts(conn, &["m1".to_string()])?.get("m1"), Some(&1));
            assert!(liked_by(conn, "u1", &["m1".to_string()])?.contains("m1"));
            assert!(liked_by(conn, "u2", &["m1".to_string()])?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_root_delete_cascades() {
        let db = Db::open_in_memory().unwrap();
        setup(&db);

        db.with_conn(|conn| {
            insert_comment(conn, comment("m1", "u1", None, "2026-02-01T00:00:00Z"))?;
            insert_comment(conn, comment("m2", "u2", Some("m1"), "2026-02-01T00:01:00Z"))?;
            toggle_like(conn, "u1", "m2")?;

            assert!(delete_comment(conn, "m1")?);
            assert!(get_comment(conn, "m2")?.is_none());
            assert!(like_counts(conn, &["m2".to_string()])?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_resolves_author_names() {
        let db = Db::open_in_memory().unwrap();
        setup(&db);

        db.with_conn(|conn| {
            insert_comment(conn, comment("m1", "u1", None, "2026-02-01T00:00:00Z"))?;
            insert_comment(conn, comment("m2", "ghost", None, "2026-02-01T00:01:00Z"))?;

            let rows = list_for_challenge(conn, "c1")?;
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].1.as_deref(), Some("Ana"));
            assert_eq!(rows[1].1, None);

            assert_eq!(delete_for_challenge(conn, "c1")?, 2);
            Ok(())
        })
        .unwrap();
    }
}
