//! Comment threads on challenges
//!
//! Threads are two levels deep: a root comment and its direct replies.
//! Replying to a reply is rejected rather than flattened.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;

use crate::auth::Requester;
use crate::db::models::{current_timestamp, CommentRow, NewComment};
use crate::db::{challenges, comments, users, Db};
use crate::error::GamificationError;

use super::challenge_service::stored_targets;
use super::events::{EventBus, GamificationEvent};
use super::ranking_service::challenge_visible_to;

pub const MAX_COMMENT_LENGTH: usize = 2000;

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct CommentInput {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct CommentView {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub content: String,
    pub parent_id: Option<String>,
    pub like_count: i64,
    pub is_liked_by_user: bool,
    pub created_at: String,
    pub updated_at: String,
    pub replies: Vec<CommentView>,
}

impl CommentView {
    fn from_row(row: CommentRow, user_name: Option<String>, like_count: i64, liked: bool) -> Self {
        Self {
            id: row.id,
            challenge_id: row.challenge_id,
            user_id: row.user_id,
            user_name,
            content: row.content,
            parent_id: row.parent_id,
            like_count,
            is_liked_by_user: liked,
            created_at: row.created_at,
            updated_at: row.updated_at,
            replies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct LikeToggle {
    pub liked: bool,
    pub like_count: i64,
}

fn check_content(content: &str) -> Result<String, GamificationError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(GamificationError::Validation("content is required".into()));
    }
    if content.chars().count() > MAX_COMMENT_LENGTH {
        return Err(GamificationError::Validation(format!(
            "content must be at most {} characters",
            MAX_COMMENT_LENGTH
        )));
    }
    Ok(content.to_string())
}

pub struct CommentService {
    db: Arc<Db>,
    events: Arc<EventBus>,
}

impl CommentService {
    pub fn new(db: Arc<Db>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    fn ensure_visible(
        conn: &mut diesel::SqliteConnection,
        requester: &Requester,
        challenge_id: &str,
    ) -> Result<(), GamificationError> {
        let challenge = challenges::get_challenge(conn, challenge_id)?
            .ok_or_else(|| GamificationError::NotFound(format!("Challenge {} not found", challenge_id)))?;
        if !challenge_visible_to(&stored_targets(&challenge)?, requester) {
            return Err(GamificationError::NotFound(format!("Challenge {} not found", challenge_id)));
        }
        Ok(())
    }

    /// Root comments oldest first, each with its replies oldest first
    pub fn list(&self, requester: &Requester, challenge_id: &str) -> Result<Vec<CommentView>, GamificationError> {
        self.db.with_conn(|conn| {
            Self::ensure_visible(conn, requester, challenge_id)?;

            let rows = comments::list_for_challenge(conn, challenge_id)?;
            let ids: Vec<String> = rows.iter().map(|(c, _)| c.id.clone()).collect();
            let counts = comments::like_counts(conn, &ids)?;
            let liked = comments::liked_by(conn, &requester.id, &ids)?;

            let mut roots: Vec<CommentView> = Vec::new();
            let mut replies: HashMap<String, Vec<CommentView>> = HashMap::new();
            for (row, name) in rows {
                let count = counts.get(&row.id).copied().unwrap_or(0);
                let is_liked = liked.contains(&row.id);
                let view = CommentView::from_row(row, name, count, is_liked);
                match view.parent_id.clone() {
                    Some(parent) => replies.entry(parent).or_default().push(view),
                    None => roots.push(view),
                }
            }
            for root in &mut roots {
                root.replies = replies.remove(&root.id).unwrap_or_default();
            }

            Ok(roots)
        })
    }

    pub fn post(
        &self,
        requester: &Requester,
        challenge_id: &str,
        input: CommentInput,
    ) -> Result<CommentView, GamificationError> {
        let content = check_content(&input.content)?;
        let parent_id = input.parent_id.filter(|p| !p.trim().is_empty());
        let id = uuid::Uuid::new_v4().to_string();
        let now = current_timestamp();

        let row = self.db.transaction(|conn| {
            Self::ensure_visible(conn, requester, challenge_id)?;

            if let Some(parent_id) = &parent_id {
                let parent = comments::get_comment(conn, parent_id)?
                    .filter(|p| p.challenge_id == challenge_id)
                    .ok_or_else(|| GamificationError::Validation(format!("Parent comment {} not found", parent_id)))?;
                if parent.parent_id.is_some() {
                    return Err(GamificationError::Validation("Replies cannot be nested".into()));
                }
            }

            comments::insert_comment(
                conn,
                NewComment {
                    id: &id,
                    challenge_id,
                    user_id: &requester.id,
                    content: &content,
                    parent_id: parent_id.as_deref(),
                    created_at: &now,
                    updated_at: &now,
                },
            )
        })?;

        info!(id = %row.id, challenge = %row.challenge_id, user = %row.user_id, "Posted comment");
        self.events.emit(GamificationEvent::CommentPosted {
            id: row.id.clone(),
            challenge_id: row.challenge_id.clone(),
            parent_id: row.parent_id.clone(),
        });

        let name = self.db.with_conn(|conn| users::get_user(conn, &row.user_id))?;
        Ok(CommentView::from_row(row, name.map(|u| u.display_name), 0, false))
    }

    /// Edit a comment; only its author may
    pub fn update(&self, requester: &Requester, id: &str, content: &str) -> Result<CommentView, GamificationError> {
        let content = check_content(content)?;
        let now = current_timestamp();

        let (row, count, liked) = self.db.transaction(|conn| {
            let existing = comments::get_comment(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Comment {} not found", id)))?;
            if existing.user_id != requester.id {
                return Err(GamificationError::Forbidden("Only the author can edit a comment".into()));
            }

            let row = comments::update_content(conn, id, &content, &now)?;
            let ids = [row.id.clone()];
            let count = comments::like_counts(conn, &ids)?.get(&row.id).copied().unwrap_or(0);
            let liked = comments::liked_by(conn, &requester.id, &ids)?.contains(&row.id);
            Ok((row, count, liked))
        })?;

        let name = self.db.with_conn(|conn| users::get_user(conn, &row.user_id))?;
        Ok(CommentView::from_row(row, name.map(|u| u.display_name), count, liked))
    }

    /// Delete a comment (author or admin); a root takes its replies with it
    pub fn delete(&self, requester: &Requester, id: &str) -> Result<(), GamificationError> {
        self.db.transaction(|conn| {
            let existing = comments::get_comment(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Comment {} not found", id)))?;
            if existing.user_id != requester.id && !requester.is_admin() {
                return Err(GamificationError::Forbidden("Only the author or an admin can delete a comment".into()));
            }
            comments::delete_comment(conn, id)?;
            Ok(())
        })?;

        info!(id = %id, by = %requester.id, "Deleted comment");
        self.events.emit(GamificationEvent::CommentDeleted {
            id: id.to_string(),
            deleted_by: requester.id.clone(),
        });
        Ok(())
    }

    pub fn toggle_like(&self, requester: &Requester, id: &str) -> Result<LikeToggle, GamificationError> {
        self.db.transaction(|conn| {
            let comment = comments::get_comment(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Comment {} not found", id)))?;
            Self::ensure_visible(conn, requester, &comment.challenge_id)?;

            let liked = comments::toggle_like(conn, &requester.id, id)?;
            let like_count = comments::like_counts(conn, &[comment.id.clone()])?
                .get(&comment.id)
                .copied()
                .unwrap_or(0);
            Ok(LikeToggle { liked, like_count })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::challenges::{insert_challenge, tests::new_challenge};

    fn service() -> CommentService {
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.with_conn(|conn| {
            users::upsert_user(conn, "u1", "Ana", None)?;
            users::upsert_user(conn, "u2", "Bruno", None)?;
            insert_challenge(conn, new_challenge("c1", "Run", "2000-01-01T00:00:00Z", "2999-12-31T23:59:59Z"))?;
            insert_challenge(conn, new_challenge("c2", "Swim", "2000-01-01T00:00:00Z", "2999-12-31T23:59:59Z"))?;
            Ok(())
        })
        .unwrap();
        CommentService::new(db, Arc::new(EventBus::new()))
    }

    fn user(id: &str) -> Requester {
        Requester { id: id.into(), role: Role::User, category_ids: vec![] }
    }

    fn input(content: &str, parent_id: Option<&str>) -> CommentInput {
        CommentInput { content: content.into(), parent_id: parent_id.map(String::from) }
    }

    #[test]
    fn test_two_level_threads() {
        let comments = service();

        let root = comments.post(&user("u1"), "c1", input("Great run!", None)).unwrap();
        let reply = comments.post(&user("u2"), "c1", input("Thanks", Some(&root.id))).unwrap();
        assert_eq!(reply.user_name.as_deref(), Some("Bruno"));

        let nested = comments.post(&user("u1"), "c1", input("Again", Some(&reply.id)));
        assert!(matches!(nested, Err(GamificationError::Validation(_))));

        let cross = comments.post(&user("u1"), "c2", input("Wrong place", Some(&root.id)));
        assert!(matches!(cross, Err(GamificationError::Validation(_))));

        let listed = comments.list(&user("u1"), "c1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].replies.len(), 1);
        assert_eq!(listed[0].replies[0].id, reply.id);
    }

    #[test]
    fn test_likes_toggle() {
        let comments = service();
        let root = comments.post(&user("u1"), "c1", input("Hi", None)).unwrap();

        let on = comments.toggle_like(&user("u2"), &root.id).unwrap();
        assert!(on.liked);
        assert_eq!(on.like_count, 1);

        let listed = comments.list(&user("u2"), "c1").unwrap();
        assert!(listed[0].is_liked_by_user);
        assert!(!comments.list(&user("u1"), "c1").unwrap()[0].is_liked_by_user);

        let off = comments.toggle_like(&user("u2"), &root.id).unwrap();
        assert!(!off.liked);
        assert_eq!(off.like_count, 0);
    }

    #[test]
    fn test_edit_and_delete_permissions() {
        let comments = service();
        let root = comments.post(&user("u1"), "c1", input("Hi", None)).unwrap();
        comments.post(&user("u2"), "c1", input("Reply", Some(&root.id))).unwrap();

        assert!(matches!(comments.update(&user("u2"), &root.id, "hijack"), Err(GamificationError::Forbidden(_))));
        let edited = comments.update(&user("u1"), &root.id, " Hello ").unwrap();
        assert_eq!(edited.content, "Hello");

        assert!(matches!(comments.delete(&user("u2"), &root.id), Err(GamificationError::Forbidden(_))));
        let admin = Requester { id: "u2".into(), role: Role::Admin, category_ids: vec![] };
        comments.delete(&admin, &root.id).unwrap();
        assert!(comments.list(&user("u1"), "c1").unwrap().is_empty());
    }

    #[test]
    fn test_content_rules() {
        let comments = service();
        assert!(matches!(comments.post(&user("u1"), "c1", input("   ", None)), Err(GamificationError::Validation(_))));
        let long = "x".repeat(MAX_COMMENT_LENGTH + 1);
        assert!(comments.post(&user("u1"), "c1", input(&long, None)).is_err());
        assert!(matches!(comments.post(&user("u1"), "nope", input("Hi", None)), Err(GamificationError::NotFound(_))));
    }
}
