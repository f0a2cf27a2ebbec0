//! Challenge service - CRUD, visibility and protected deletion
//!
//! ## Deletion
//!
//! Removing submissions (forced delete or "return submissions") is split in
//! two phases:
//!
//! 1. one database transaction retracts ledger entries, deletes
//!    submissions (and, for a full delete, comments and the challenge) and
//!    collects the uploaded file URLs the submissions referenced
//! 2. after commit, each file is deleted from object storage with a
//!    timeout; failures are counted in the returned summary, never thrown

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ts_rs::TS;

use crate::auth::Requester;
use crate::db::models::{
    challenge_types, current_timestamp, flag, format_timestamp, source_types, ChallengeChangeset, ChallengeRow,
    NewChallenge, PointsEntry,
};
use crate::db::{challenges, comments, points, submissions, users, Db};
use crate::error::GamificationError;
use crate::evaluation::{EvaluationConfig, EvaluationConfigInput, EvaluationType, SubmissionData};
use crate::object_store::{DeleteOutcome, ObjectStore};

use super::events::{EventBus, GamificationEvent};
use super::ranking_service::challenge_visible_to;

pub const MAX_TITLE_LENGTH: usize = 200;

// ============================================================================
// API shapes
// ============================================================================

/// Challenge as returned to clients
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub detailed_description: Option<String>,
    pub image_url: Option<String>,
    pub points: i32,
    pub start_date: String,
    pub end_date: String,
    #[serde(rename = "type")]
    pub challenge_type: String,
    pub is_active: bool,
    pub evaluation_type: EvaluationType,
    pub evaluation_config: Option<EvaluationConfig>,
    pub target_category_ids: Vec<String>,
    pub display_order: i32,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    /// The requester's own submission status, in participant listings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_submission_status: Option<String>,
}

impl Challenge {
    /// Decode a stored row; `redact` hides answers from participants
    pub fn from_row(row: ChallengeRow, redact: bool) -> Result<Self, GamificationError> {
        let evaluation_type = stored_evaluation_type(&row)?;
        let config = EvaluationConfig::from_stored(evaluation_type, row.evaluation_config_json.as_deref())?;
        let target_category_ids = stored_targets(&row)?;

        Ok(Self {
            id: row.id,
            title: row.title,
            description: row.description,
            detailed_description: row.detailed_description,
            image_url: row.image_url,
            points: row.points,
            start_date: row.start_date,
            end_date: row.end_date,
            challenge_type: row.challenge_type,
            is_active: flag(row.is_active),
            evaluation_type,
            evaluation_config: if redact { config.map(|c| c.redacted()) } else { config },
            target_category_ids,
            display_order: row.display_order,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            my_submission_status: None,
        })
    }
}

pub(crate) fn stored_evaluation_type(row: &ChallengeRow) -> Result<EvaluationType, GamificationError> {
    row.evaluation_type
        .parse()
        .map_err(|_| GamificationError::Internal(format!("Challenge {} has unknown evaluation type", row.id)))
}

pub(crate) fn stored_targets(row: &ChallengeRow) -> Result<Vec<String>, GamificationError> {
    serde_json::from_str(&row.target_category_ids_json)
        .map_err(|e| GamificationError::Internal(format!("Challenge {} has corrupt targets: {}", row.id, e)))
}

/// Whether submissions are accepted at `now`
pub(crate) fn is_open_at(row: &ChallengeRow, now: &str) -> bool {
    flag(row.is_active) && row.start_date.as_str() <= now && now <= row.end_date.as_str()
}

/// Admin request body for creating or replacing a challenge
#[derive(Debug, Clone, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct ChallengeInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub detailed_description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Ignored for file challenges, which derive points from requirements
    #[serde(default)]
    pub points: Option<i32>,
    /// `YYYY-MM-DD` or RFC 3339
    pub start_date: String,
    pub end_date: String,
    #[serde(default, rename = "type")]
    pub challenge_type: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub evaluation_type: EvaluationType,
    #[serde(default)]
    pub evaluation_config: EvaluationConfigInput,
    #[serde(default)]
    pub target_category_ids: Vec<String>,
    #[serde(default)]
    pub display_order: Option<i32>,
}

/// `GET /challenges/{id}/submission-count`
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct SubmissionCount {
    pub challenge_id: String,
    pub challenge_title: String,
    pub submission_count: i64,
}

/// Returned instead of deleting when submissions exist and force was not given
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct DeletionConfirmation {
    pub requires_confirmation: bool,
    pub challenge_id: String,
    pub challenge_title: String,
    pub submission_count: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct FileCleanupFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of a forced delete or a return-submissions call
#[derive(Debug, Clone, Default, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct RetractionSummary {
    pub challenge_id: String,
    pub challenge_title: String,
    pub challenge_deleted: bool,
    pub submissions_removed: usize,
    pub points_entries_retracted: usize,
    pub points_retracted: i64,
    pub comments_removed: usize,
    pub files_deleted: usize,
    /// Already gone, foreign, or still used by another submission
    pub files_skipped: usize,
    pub file_deletions_failed: usize,
    pub failures: Vec<FileCleanupFailure>,
    pub message: String,
}

impl RetractionSummary {
    fn describe(&mut self) {
        let verb = if self.challenge_deleted { "removed" } else { "returned" };
        let mut message = format!(
            "{} submission{} {}",
            self.submissions_removed,
            if self.submissions_removed == 1 { "" } else { "s" },
            verb
        );
        if self.file_deletions_failed > 0 {
            message.push_str(&format!(
                ", {} file deletion{} failed",
                self.file_deletions_failed,
                if self.file_deletions_failed == 1 { "" } else { "s" }
            ));
        }
        self.message = message;
    }
}

#[derive(Debug, Clone)]
pub enum ChallengeDeletion {
    RequiresConfirmation(DeletionConfirmation),
    Deleted(RetractionSummary),
}

/// Database half of a retraction, collected inside the transaction
struct Retraction {
    revoked: Vec<PointsEntry>,
    submissions_removed: usize,
    file_urls: Vec<String>,
}

// ============================================================================
// Input normalization
// ============================================================================

/// Accept a calendar date or an RFC 3339 instant; dates widen to the whole day
fn normalize_instant(value: &str, end_of_day: bool, field: &str) -> Result<String, GamificationError> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = if end_of_day { "23:59:59" } else { "00:00:00" };
        return Ok(format!("{}T{}Z", date.format("%Y-%m-%d"), time));
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| format_timestamp(dt.with_timezone(&Utc)))
        .map_err(|_| GamificationError::Validation(format!("{} '{}' is not a valid date", field, value)))
}

/// Checked, normalized form of [`ChallengeInput`]
struct ValidatedChallenge {
    title: String,
    description: String,
    detailed_description: Option<String>,
    image_url: Option<String>,
    points: i32,
    start_date: String,
    end_date: String,
    challenge_type: String,
    evaluation_type: EvaluationType,
    config_json: Option<String>,
    targets_json: String,
}

fn validate_input(
    conn: &mut SqliteConnection,
    input: &ChallengeInput,
) -> Result<ValidatedChallenge, GamificationError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(GamificationError::Validation("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(GamificationError::Validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_LENGTH
        )));
    }

    let challenge_type = input
        .challenge_type
        .as_deref()
        .unwrap_or(challenge_types::PERIODIC)
        .to_string();
    if !challenge_types::is_valid(&challenge_type) {
        return Err(GamificationError::Validation(format!(
            "Invalid challenge type: {}. Valid types: {:?}",
            challenge_type,
            challenge_types::ALL
        )));
    }

    let start_date = normalize_instant(&input.start_date, false, "startDate")?;
    let end_date = normalize_instant(&input.end_date, true, "endDate")?;
    if start_date >= end_date {
        return Err(GamificationError::Validation("startDate must be before endDate".into()));
    }

    let config = input.evaluation_config.resolve(input.evaluation_type)?;
    let points = match &config {
        Some(EvaluationConfig::File(file)) => file.total_points()?,
        _ => input.points.unwrap_or(0),
    };
    if points < 0 {
        return Err(GamificationError::Validation("points must not be negative".into()));
    }

    let mut targets: Vec<String> = Vec::new();
    for id in &input.target_category_ids {
        let id = id.trim().to_string();
        if id.is_empty() || targets.contains(&id) {
            continue;
        }
        if users::get_category(conn, &id)?.is_none() {
            return Err(GamificationError::Validation(format!("Unknown category {}", id)));
        }
        targets.push(id);
    }

    Ok(ValidatedChallenge {
        title: title.to_string(),
        description: input.description.trim().to_string(),
        detailed_description: input.detailed_description.clone().filter(|d| !d.trim().is_empty()),
        image_url: input.image_url.clone().filter(|u| !u.trim().is_empty()),
        points,
        start_date,
        end_date,
        challenge_type,
        evaluation_type: input.evaluation_type,
        config_json: config.as_ref().map(serde_json::to_string).transpose()?,
        targets_json: serde_json::to_string(&targets)?,
    })
}

// ============================================================================
// Service
// ============================================================================

/// Challenge service for business logic
pub struct ChallengeService {
    db: Arc<Db>,
    events: Arc<EventBus>,
    objects: Arc<dyn ObjectStore>,
    delete_timeout: Duration,
}

impl ChallengeService {
    pub fn new(
        db: Arc<Db>,
        events: Arc<EventBus>,
        objects: Arc<dyn ObjectStore>,
        delete_timeout: Duration,
    ) -> Self {
        Self { db, events, objects, delete_timeout }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Challenge listing
    ///
    /// `admin_view` (admins only) returns every challenge newest first.
    /// Otherwise only open challenges visible to the requester are
    /// returned in display order, each with the requester's status.
    pub fn list(&self, requester: &Requester, admin_view: bool) -> Result<Vec<Challenge>, GamificationError> {
        if admin_view {
            if !requester.is_admin() {
                return Err(GamificationError::Forbidden("Admin role required".into()));
            }
            let rows = self.db.with_conn(challenges::list_all)?;
            return rows.into_iter().map(|row| Challenge::from_row(row, false)).collect();
        }

        let now = current_timestamp();
        self.db.with_conn(|conn| {
            let mut visible = Vec::new();
            for row in challenges::list_open_at(conn, &now)? {
                if challenge_visible_to(&stored_targets(&row)?, requester) {
                    visible.push(Challenge::from_row(row, !requester.is_admin())?);
                }
            }

            let ids: Vec<String> = visible.iter().map(|c| c.id.clone()).collect();
            let statuses = submissions::statuses_for_user(conn, &requester.id, &ids)?;
            for challenge in &mut visible {
                challenge.my_submission_status = statuses.get(&challenge.id).cloned();
            }
            Ok(visible)
        })
    }

    /// One challenge; hidden (404) from users outside its target categories
    pub fn get(&self, requester: &Requester, id: &str) -> Result<Challenge, GamificationError> {
        self.db.with_conn(|conn| {
            let row = challenges::get_challenge(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Challenge {} not found", id)))?;

            if !challenge_visible_to(&stored_targets(&row)?, requester) {
                return Err(GamificationError::NotFound(format!("Challenge {} not found", id)));
            }

            let mut challenge = Challenge::from_row(row, !requester.is_admin())?;
            challenge.my_submission_status =
                submissions::find_for_user(conn, id, &requester.id)?.map(|s| s.status);
            Ok(challenge)
        })
    }

    pub fn submission_count(&self, id: &str) -> Result<SubmissionCount, GamificationError> {
        self.db.with_conn(|conn| {
            let row = challenges::get_challenge(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Challenge {} not found", id)))?;
            Ok(SubmissionCount {
                submission_count: submissions::count_for_challenge(conn, id)?,
                challenge_id: row.id,
                challenge_title: row.title,
            })
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn create(&self, input: ChallengeInput, actor_id: &str) -> Result<Challenge, GamificationError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = current_timestamp();

        let row = self.db.transaction(|conn| {
            let v = validate_input(conn, &input)?;
            let display_order = match input.display_order {
                Some(order) => order,
                None => challenges::next_display_order(conn)?,
            };

            challenges::insert_challenge(
                conn,
                NewChallenge {
                    id: &id,
                    title: &v.title,
                    description: &v.description,
                    detailed_description: v.detailed_description.as_deref(),
                    image_url: v.image_url.as_deref(),
                    points: v.points,
                    start_date: &v.start_date,
                    end_date: &v.end_date,
                    challenge_type: &v.challenge_type,
                    is_active: i32::from(input.is_active.unwrap_or(true)),
                    evaluation_type: v.evaluation_type.as_str(),
                    evaluation_config_json: v.config_json.as_deref(),
                    target_category_ids_json: &v.targets_json,
                    display_order,
                    created_by: actor_id,
                    created_at: &now,
                    updated_at: &now,
                },
            )
        })?;

        info!(id = %row.id, title = %row.title, points = row.points, "Created challenge");
        self.events.emit(GamificationEvent::ChallengeCreated {
            id: row.id.clone(),
            title: row.title.clone(),
            evaluation_type: row.evaluation_type.clone(),
        });

        Challenge::from_row(row, false)
    }

    /// Replace a challenge's editable fields; file points are re-derived
    pub fn update(&self, id: &str, input: ChallengeInput) -> Result<Challenge, GamificationError> {
        let now = current_timestamp();

        let row = self.db.transaction(|conn| {
            let existing = challenges::get_challenge(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Challenge {} not found", id)))?;
            let v = validate_input(conn, &input)?;

            challenges::update_challenge(
                conn,
                id,
                ChallengeChangeset {
                    title: &v.title,
                    description: &v.description,
                    detailed_description: v.detailed_description.as_deref(),
                    image_url: v.image_url.as_deref(),
                    points: v.points,
                    start_date: &v.start_date,
                    end_date: &v.end_date,
                    challenge_type: &v.challenge_type,
                    is_active: input.is_active.map(i32::from).unwrap_or(existing.is_active),
                    evaluation_type: v.evaluation_type.as_str(),
                    evaluation_config_json: v.config_json.as_deref(),
                    target_category_ids_json: &v.targets_json,
                    display_order: input.display_order.unwrap_or(existing.display_order),
                    updated_at: &now,
                },
            )
        })?;

        info!(id = %row.id, points = row.points, "Updated challenge");
        self.events.emit(GamificationEvent::ChallengeUpdated { id: row.id.clone() });

        Challenge::from_row(row, false)
    }

    /// Delete a challenge, or ask for confirmation when submissions exist
    pub async fn delete(&self, id: &str, force: bool) -> Result<ChallengeDeletion, GamificationError> {
        let outcome = self.db.transaction(|conn| {
            let row = challenges::get_challenge(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Challenge {} not found", id)))?;

            let submission_count = submissions::count_for_challenge(conn, id)?;
            if submission_count > 0 && !force {
                return Ok(Err(DeletionConfirmation {
                    requires_confirmation: true,
                    challenge_id: row.id,
                    challenge_title: row.title,
                    submission_count,
                }));
            }

            let retraction = retract_submissions(conn, id)?;
            let comments_removed = comments::delete_for_challenge(conn, id)?;
            challenges::delete_challenge(conn, id)?;

            Ok(Ok((row, retraction, comments_removed)))
        })?;

        let (row, retraction, comments_removed) = match outcome {
            Ok(done) => done,
            Err(confirmation) => {
                info!(id = %id, submissions = confirmation.submission_count, "Challenge delete needs confirmation");
                return Ok(ChallengeDeletion::RequiresConfirmation(confirmation));
            }
        };

        let mut summary = RetractionSummary {
            challenge_id: row.id,
            challenge_title: row.title,
            challenge_deleted: true,
            comments_removed,
            ..Default::default()
        };
        self.finish_retraction(&mut summary, retraction).await;

        info!(
            id = %summary.challenge_id,
            submissions = summary.submissions_removed,
            retracted = summary.points_entries_retracted,
            failed_files = summary.file_deletions_failed,
            "Deleted challenge"
        );
        self.events.emit(GamificationEvent::ChallengeDeleted {
            id: summary.challenge_id.clone(),
            submissions_removed: summary.submissions_removed,
            points_retracted: summary.points_entries_retracted,
        });

        Ok(ChallengeDeletion::Deleted(summary))
    }

    /// Clear every submission and its points while keeping the challenge
    pub async fn return_submissions(&self, id: &str) -> Result<RetractionSummary, GamificationError> {
        let (row, retraction) = self.db.transaction(|conn| {
            let row = challenges::get_challenge(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Challenge {} not found", id)))?;
            let retraction = retract_submissions(conn, id)?;
            Ok((row, retraction))
        })?;

        let mut summary = RetractionSummary {
            challenge_id: row.id,
            challenge_title: row.title,
            ..Default::default()
        };
        self.finish_retraction(&mut summary, retraction).await;

        info!(
            id = %summary.challenge_id,
            submissions = summary.submissions_removed,
            failed_files = summary.file_deletions_failed,
            "Returned submissions"
        );
        self.events.emit(GamificationEvent::SubmissionsReturned {
            challenge_id: summary.challenge_id.clone(),
            count: summary.submissions_removed,
        });

        Ok(summary)
    }

    /// Post-commit half: announce revocations and clean up files
    async fn finish_retraction(&self, summary: &mut RetractionSummary, retraction: Retraction) {
        summary.submissions_removed = retraction.submissions_removed;
        summary.points_entries_retracted = retraction.revoked.len();
        summary.points_retracted = retraction.revoked.iter().map(|e| e.points as i64).sum();

        for entry in &retraction.revoked {
            self.events.emit(GamificationEvent::PointsRevoked {
                entry_id: entry.id.clone(),
                user_id: entry.user_id.clone(),
                points: entry.points,
            });
        }

        self.cleanup_files(summary, retraction.file_urls).await;
        summary.describe();
    }

    /// Best-effort object deletion; never fails the caller
    ///
    /// A URL still used by another submission or by any challenge (image,
    /// description, QR code image) is kept.
    async fn cleanup_files(&self, summary: &mut RetractionSummary, urls: Vec<String>) {
        for url in urls {
            let referenced = self.db.with_conn(|conn| {
                Ok(submissions::url_referenced(conn, &url)? || challenges::url_referenced(conn, &url)?)
            });
            match referenced {
                Ok(true) => {
                    summary.files_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(url = %url, error = %e, "Could not check file references, keeping file");
                    summary.files_skipped += 1;
                    continue;
                }
            }

            let result = match tokio::time::timeout(self.delete_timeout, self.objects.delete(&url)).await {
                Ok(result) => result,
                Err(_) => Err(GamificationError::ExternalIo(format!(
                    "Timed out after {:?}",
                    self.delete_timeout
                ))),
            };

            match result {
                Ok(DeleteOutcome::Deleted) => summary.files_deleted += 1,
                Ok(DeleteOutcome::Missing) | Ok(DeleteOutcome::Foreign) => summary.files_skipped += 1,
                Err(e) => {
                    let reason = e.to_string();
                    warn!(url = %url, reason = %reason, "Failed to delete submission file");
                    self.events.emit(GamificationEvent::FileCleanupFailed {
                        url: url.clone(),
                        reason: reason.clone(),
                    });
                    summary.file_deletions_failed += 1;
                    summary.failures.push(FileCleanupFailure { url, reason });
                }
            }
        }
    }
}

/// Revoke ledger entries for every submission of a challenge and delete them
fn retract_submissions(conn: &mut SqliteConnection, challenge_id: &str) -> Result<Retraction, GamificationError> {
    let rows = submissions::list_for_challenge(conn, challenge_id)?;

    let mut revoked = Vec::new();
    let mut seen_urls = HashSet::new();
    let mut file_urls = Vec::new();

    for row in &rows {
        let entries = points::entries_for_source(conn, source_types::CHALLENGE_SUBMISSION, &row.id)?;
        points::delete_for_source(conn, &row.user_id, source_types::CHALLENGE_SUBMISSION, &row.id)?;
        revoked.extend(entries.into_iter().filter(|e| e.user_id == row.user_id));

        match serde_json::from_str::<SubmissionData>(&row.submission_data_json) {
            Ok(data) => {
                for url in data.stored_file_urls() {
                    if seen_urls.insert(url.clone()) {
                        file_urls.push(url);
                    }
                }
            }
            Err(e) => warn!(submission = %row.id, error = %e, "Unreadable submission payload, skipping its files"),
        }
    }

    let submissions_removed = submissions::delete_for_challenge(conn, challenge_id)?;

    Ok(Retraction { revoked, submissions_removed, file_urls })
}
