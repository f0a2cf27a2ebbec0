//! Submission lifecycle: submit, resubmit after rejection, review
//!
//! ```text
//!   (none) --submit--> pending --approve--> approved
//!                         |
//!                         +----reject----> rejected --resubmit--> pending
//! ```
//!
//! A quiz graded below its minimum score goes straight to `rejected`.
//! Approval appends one ledger entry referencing the submission, in the
//! same transaction as the status change.

use std::sync::Arc;
use std::time::Duration;

use diesel::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::info;
use ts_rs::TS;

use crate::auth::Requester;
use crate::db::models::{
    current_timestamp, entry_types, source_types, submission_status, NewSubmission, PointsEntry,
    SubmissionResubmit, SubmissionReview, SubmissionRow,
};
use crate::db::{challenges, submissions, users, Db};
use crate::error::GamificationError;
use crate::evaluation::{evaluate_submission, EvaluationConfig, EvaluationType, FileSubmission, SubmissionData};
use crate::object_store::ObjectStore;

use super::challenge_service::{is_open_at, stored_evaluation_type, stored_targets};
use super::events::{EventBus, GamificationEvent};
use super::ledger_service::{record_grant, Grant, GrantSource, LedgerService};
use super::ranking_service::challenge_visible_to;

pub const MAX_FEEDBACK_LENGTH: usize = 2000;

/// `POST /challenges/{id}/submissions` body
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct SubmitRequest {
    pub submission_data: SubmissionData,
}

/// Admin review decision
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct ReviewInput {
    pub status: String,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "gamification/")]
pub struct Submission {
    pub id: String,
    pub challenge_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub status: String,
    pub submission_data: SubmissionData,
    pub points: i32,
    pub attempts: i32,
    pub admin_feedback: Option<String>,
    pub reviewed_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Submission {
    fn from_row(row: SubmissionRow, user_name: Option<String>) -> Result<Self, GamificationError> {
        let submission_data = serde_json::from_str(&row.submission_data_json).map_err(|e| {
            GamificationError::Internal(format!("Submission {} has corrupt payload: {}", row.id, e))
        })?;

        Ok(Self {
            id: row.id,
            challenge_id: row.challenge_id,
            user_id: row.user_id,
            user_name,
            status: row.status,
            submission_data,
            points: row.points,
            attempts: row.attempts,
            admin_feedback: row.admin_feedback,
            reviewed_by: row.reviewed_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn with_names(conn: &mut SqliteConnection, rows: Vec<SubmissionRow>) -> Result<Vec<Submission>, GamificationError> {
    let mut ids: Vec<String> = rows.iter().map(|r| r.user_id.clone()).collect();
    ids.sort();
    ids.dedup();
    let names = users::display_names(conn, &ids)?;

    rows.into_iter()
        .map(|row| {
            let name = names.get(&row.user_id).cloned();
            Submission::from_row(row, name)
        })
        .collect()
}

/// Submission service for business logic
pub struct SubmissionService {
    db: Arc<Db>,
    events: Arc<EventBus>,
    ledger: Arc<LedgerService>,
    objects: Arc<dyn ObjectStore>,
    lookup_timeout: Duration,
}

impl SubmissionService {
    pub fn new(
        db: Arc<Db>,
        events: Arc<EventBus>,
        ledger: Arc<LedgerService>,
        objects: Arc<dyn ObjectStore>,
        lookup_timeout: Duration,
    ) -> Self {
        Self { db, events, ledger, objects, lookup_timeout }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// The requester's submission for a challenge, if any
    pub fn my_submission(&self, requester: &Requester, challenge_id: &str) -> Result<Option<Submission>, GamificationError> {
        self.db.with_conn(|conn| {
            match submissions::find_for_user(conn, challenge_id, &requester.id)? {
                Some(row) => Ok(with_names(conn, vec![row])?.pop()),
                None => Ok(None),
            }
        })
    }

    pub fn list_for_challenge(&self, challenge_id: &str) -> Result<Vec<Submission>, GamificationError> {
        self.db.with_conn(|conn| {
            if challenges::get_challenge(conn, challenge_id)?.is_none() {
                return Err(GamificationError::NotFound(format!("Challenge {} not found", challenge_id)));
            }
            let rows = submissions::list_for_challenge(conn, challenge_id)?;
            with_names(conn, rows)
        })
    }

    /// Review queue, optionally filtered by status
    pub fn list_queue(&self, status: Option<&str>) -> Result<Vec<Submission>, GamificationError> {
        let status = match status {
            Some(s) if s != "all" => {
                if !submission_status::is_valid(s) {
                    return Err(GamificationError::Validation(format!(
                        "Invalid status: {}. Valid statuses: {:?}",
                        s,
                        submission_status::ALL
                    )));
                }
                Some(s)
            }
            _ => None,
        };

        self.db.with_conn(|conn| {
            let rows = submissions::list_by_status(conn, status)?;
            with_names(conn, rows)
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Submit (or resubmit after rejection) for an open challenge
    ///
    /// File items are checked against what object storage holds, never
    /// against the size and type the client declared.
    pub async fn submit(
        &self,
        requester: &Requester,
        challenge_id: &str,
        mut data: SubmissionData,
    ) -> Result<Submission, GamificationError> {
        if let SubmissionData::File(files) = &mut data {
            self.attach_stored_facts(files).await?;
        }
        let now = current_timestamp();

        let row = self.db.transaction(|conn| {
            let challenge = challenges::get_challenge(conn, challenge_id)?
                .filter(|c| is_open_at(c, &now))
                .ok_or_else(|| {
                    GamificationError::NotFound(format!("Challenge {} is not open for submissions", challenge_id))
                })?;
            if !challenge_visible_to(&stored_targets(&challenge)?, requester) {
                return Err(GamificationError::NotFound(format!(
                    "Challenge {} is not open for submissions",
                    challenge_id
                )));
            }

            let existing = submissions::find_for_user(conn, challenge_id, &requester.id)?;
            if let Some(existing) = &existing {
                if submission_status::is_active(&existing.status) {
                    return Err(GamificationError::Conflict(format!(
                        "A {} submission for this challenge already exists",
                        existing.status
                    )));
                }
            }

            let evaluation_type = stored_evaluation_type(&challenge)?;
            let config = EvaluationConfig::from_stored(evaluation_type, challenge.evaluation_config_json.as_deref())?;
            let evaluated = evaluate_submission(evaluation_type, config.as_ref(), data)?;

            let attempt = existing.as_ref().map(|s| s.attempts).unwrap_or(0) + 1;
            let points = match &config {
                Some(EvaluationConfig::Quiz(quiz)) => {
                    if attempt as u32 > quiz.attempt_limit() {
                        return Err(GamificationError::Conflict(format!(
                            "No attempts left ({} allowed)",
                            quiz.attempt_limit()
                        )));
                    }
                    quiz.points_for_attempt(challenge.points, attempt as u32)
                }
                _ => challenge.points,
            };

            let (status, feedback) = if evaluated.passed {
                (submission_status::PENDING, None)
            } else {
                (
                    submission_status::REJECTED,
                    Some(format!(
                        "Score {}% is below the minimum required",
                        evaluated.quiz_score.unwrap_or(0)
                    )),
                )
            };

            let data_json = serde_json::to_string(&evaluated.data)?;
            let submission_type = evaluation_type.as_str();

            match existing {
                Some(previous) => submissions::resubmit(
                    conn,
                    &previous.id,
                    submission_status::REJECTED,
                    SubmissionResubmit {
                        status,
                        submission_type,
                        submission_data_json: &data_json,
                        points,
                        attempts: attempt,
                        admin_feedback: feedback.as_deref(),
                        reviewed_by: None,
                        updated_at: &now,
                    },
                ),
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    submissions::insert_submission(
                        conn,
                        NewSubmission {
                            id: &id,
                            challenge_id,
                            user_id: &requester.id,
                            status,
                            submission_type,
                            submission_data_json: &data_json,
                            points,
                            attempts: attempt,
                            admin_feedback: feedback.as_deref(),
                            created_at: &now,
                            updated_at: &now,
                        },
                    )
                }
            }
        })?;

        info!(
            id = %row.id,
            challenge = %row.challenge_id,
            user = %row.user_id,
            status = %row.status,
            attempt = row.attempts,
            "Recorded submission"
        );
        self.events.emit(GamificationEvent::SubmissionCreated {
            id: row.id.clone(),
            challenge_id: row.challenge_id.clone(),
            user_id: row.user_id.clone(),
            status: row.status.clone(),
        });

        Submission::from_row(row, None)
    }

    async fn attach_stored_facts(&self, submission: &mut FileSubmission) -> Result<(), GamificationError> {
        for file in &mut submission.files {
            let info = tokio::time::timeout(self.lookup_timeout, self.objects.stat(&file.url))
                .await
                .map_err(|_| {
                    GamificationError::ExternalIo(format!(
                        "Timed out after {:?} looking up {}",
                        self.lookup_timeout, file.url
                    ))
                })??;
            file.attach_stored(info);
        }
        Ok(())
    }

    /// Approve or reject a pending submission
    pub fn review(&self, reviewer: &Requester, id: &str, input: ReviewInput) -> Result<Submission, GamificationError> {
        let status = match input.status.as_str() {
            submission_status::APPROVED => submission_status::APPROVED,
            submission_status::REJECTED => submission_status::REJECTED,
            other => {
                return Err(GamificationError::Validation(format!(
                    "Invalid review status: {}. Use approved or rejected",
                    other
                )))
            }
        };
        let feedback = input.feedback.map(|f| f.trim().to_string()).filter(|f| !f.is_empty());
        if feedback.as_ref().map_or(false, |f| f.chars().count() > MAX_FEEDBACK_LENGTH) {
            return Err(GamificationError::Validation(format!(
                "feedback must be at most {} characters",
                MAX_FEEDBACK_LENGTH
            )));
        }
        let now = current_timestamp();

        let (row, grant): (SubmissionRow, Option<PointsEntry>) = self.db.transaction(|conn| {
            let current = submissions::get_submission(conn, id)?
                .ok_or_else(|| GamificationError::NotFound(format!("Submission {} not found", id)))?;
            if current.status != submission_status::PENDING {
                return Err(GamificationError::Conflict(format!(
                    "Submission {} is already {}",
                    id, current.status
                )));
            }
            let challenge = challenges::get_challenge(conn, &current.challenge_id)?.ok_or_else(|| {
                GamificationError::Internal(format!("Submission {} has no challenge", current.id))
            })?;

            // Quiz points depend on the attempt and were fixed at grading;
            // everything else is worth what the challenge offers right now
            let points = match stored_evaluation_type(&challenge)? {
                EvaluationType::Quiz => current.points,
                _ => challenge.points,
            };

            let row = submissions::apply_review(
                conn,
                id,
                submission_status::PENDING,
                SubmissionReview {
                    status,
                    points,
                    admin_feedback: feedback.as_deref(),
                    reviewed_by: Some(reviewer.id.as_str()),
                    updated_at: &now,
                },
            )?;

            let grant = if status == submission_status::APPROVED && row.points != 0 {
                Some(record_grant(
                    conn,
                    &Grant {
                        user_id: row.user_id.clone(),
                        points: row.points,
                        description: challenge.title,
                        entry_type: entry_types::CHALLENGE.to_string(),
                        actor_id: reviewer.id.clone(),
                        source: Some(GrantSource {
                            source_type: source_types::CHALLENGE_SUBMISSION.to_string(),
                            source_id: row.id.clone(),
                        }),
                    },
                )?)
            } else {
                None
            };

            Ok((row, grant))
        })?;

        info!(id = %row.id, status = %row.status, reviewer = %reviewer.id, points = row.points, "Reviewed submission");
        self.events.emit(GamificationEvent::SubmissionReviewed {
            id: row.id.clone(),
            status: row.status.clone(),
            reviewer_id: reviewer.id.clone(),
        });
        if let Some(entry) = &grant {
            self.ledger.emit_granted(entry);
        }

        let name = self.db.with_conn(|conn| users::display_names(conn, &[row.user_id.clone()]))?;
        let user_name = name.get(&row.user_id).cloned();
        Submission::from_row(row, user_name)
    }
}
